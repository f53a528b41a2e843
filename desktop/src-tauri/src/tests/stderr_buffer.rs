use crate::server::StderrBuffer;

use googletest::assert_that;
use googletest::prelude::eq;

#[test]
fn given_lines_within_capacity_when_snapshotted_then_all_kept_in_order() {
    // Given
    let buffer = StderrBuffer::new(1024);

    // When
    buffer.push_line("INFO: Started server process");
    buffer.push_line("INFO: Waiting for application startup.");

    // Then
    assert_that!(
        buffer.snapshot(),
        eq("INFO: Started server process\nINFO: Waiting for application startup.")
    );
}

#[test]
fn given_buffer_over_capacity_when_line_pushed_then_oldest_evicted() {
    let buffer = StderrBuffer::new(10);

    buffer.push_line("aaaa");
    buffer.push_line("bbbb");
    buffer.push_line("cccc");

    assert_that!(buffer.snapshot(), eq("bbbb\ncccc"));
    assert_that!(buffer.len_bytes(), eq(8));
}

#[test]
fn given_many_lines_when_tail_requested_then_last_lines_returned() {
    let buffer = StderrBuffer::new(4096);
    for i in 0..10 {
        buffer.push_line(&format!("line {i}"));
    }

    assert_that!(buffer.tail(3), eq("line 7\nline 8\nline 9"));
    assert_that!(buffer.tail(100).lines().count(), eq(10));
}

#[test]
fn given_empty_buffer_when_tail_requested_then_empty() {
    let buffer = StderrBuffer::new(64);

    assert_that!(buffer.tail(5), eq(""));
    assert_that!(buffer.len_bytes(), eq(0));
}

#[test]
fn given_oversize_line_when_pushed_then_end_of_line_kept() {
    let buffer = StderrBuffer::new(8);

    buffer.push_line("0123456789ABCDEF");

    assert_that!(buffer.snapshot(), eq("89ABCDEF"));
}

#[test]
fn given_oversize_multibyte_line_when_pushed_then_cut_on_char_boundary() {
    let buffer = StderrBuffer::new(4);

    // Each 'é' is two bytes; a cut at byte 3 would split one
    buffer.push_line("ééé!");

    let snapshot = buffer.snapshot();
    assert_that!(snapshot, eq("é!"));
    assert_that!(buffer.len_bytes(), eq(3));
}

#[test]
fn given_clones_when_pushed_then_share_storage() {
    let buffer = StderrBuffer::new(128);
    let reader = buffer.clone();

    buffer.push_line("ModuleNotFoundError: No module named 'uvicorn'");

    assert_that!(
        reader.tail(1),
        eq("ModuleNotFoundError: No module named 'uvicorn'")
    );
}
