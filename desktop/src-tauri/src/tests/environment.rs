use crate::server::{ServerConfig, backend_environment, is_private_host, validate_public_url};

use std::path::Path;

use googletest::assert_that;
use googletest::prelude::{anything, contains_substring, eq, err, none, ok, some};

// =========================================================================
// Backend Environment
// =========================================================================

#[test]
fn given_default_config_when_environment_built_then_backend_keys_present() {
    // Given
    let config = ServerConfig::default();

    // When
    let env = backend_environment(&config, Some(Path::new("/opt/plexio/resources")));

    // Then
    assert_that!(env.get("PYTHONUNBUFFERED").map(String::as_str), some(eq("1")));
    assert_that!(env.get("HOST").map(String::as_str), some(eq("0.0.0.0")));
    assert_that!(env.get("PORT").map(String::as_str), some(eq("8000")));
    assert_that!(env.get("SERVE_STATIC").map(String::as_str), some(eq("true")));
    assert_that!(env.get("CACHE_TYPE").map(String::as_str), some(eq("memory")));
    assert_that!(env.get("CORS_ORIGIN_REGEX").map(String::as_str), some(eq(".*")));
    assert_that!(
        env.get("RESOURCES_PATH").map(String::as_str),
        some(eq("/opt/plexio/resources"))
    );
}

#[test]
fn given_no_resources_when_environment_built_then_resources_path_absent() {
    let env = backend_environment(&ServerConfig::default(), None);

    assert_that!(env.get("RESOURCES_PATH"), none());
    assert_that!(env.get("PUBLIC_BASE_URL"), none());
    assert_that!(env.get("PUBLIC_STREAMING_BASE_URL"), none());
}

#[test]
fn given_public_urls_when_environment_built_then_trailing_slash_trimmed() {
    let mut config = ServerConfig::default();
    config.environment.public_base_url = Some(" https://plexio.example.com/ ".into());
    config.environment.public_streaming_base_url = Some("https://cdn.example.com/".into());

    let env = backend_environment(&config, None);

    assert_that!(
        env.get("PUBLIC_BASE_URL").map(String::as_str),
        some(eq("https://plexio.example.com"))
    );
    assert_that!(
        env.get("PUBLIC_STREAMING_BASE_URL").map(String::as_str),
        some(eq("https://cdn.example.com"))
    );
}

#[test]
fn given_private_public_url_when_environment_built_then_omitted() {
    let mut config = ServerConfig::default();
    config.environment.public_base_url = Some("http://127.0.0.1:8000".into());
    config.environment.public_streaming_base_url = Some("   ".into());

    let env = backend_environment(&config, None);

    assert_that!(env.get("PUBLIC_BASE_URL"), none());
    assert_that!(env.get("PUBLIC_STREAMING_BASE_URL"), none());
}

#[test]
fn given_serve_static_disabled_when_environment_built_then_false_passed() {
    let mut config = ServerConfig::default();
    config.environment.serve_static = false;
    config.server.port = 9100;

    let env = backend_environment(&config, None);

    assert_that!(env.get("SERVE_STATIC").map(String::as_str), some(eq("false")));
    assert_that!(env.get("PORT").map(String::as_str), some(eq("9100")));
}

// =========================================================================
// Private Hosts
// =========================================================================

#[test]
fn given_loopback_and_lan_hosts_when_checked_then_private() {
    for host in [
        "localhost",
        "LOCALHOST",
        "127.0.0.1",
        "0.0.0.0",
        "10.1.2.3",
        "172.16.0.9",
        "192.168.1.20",
        "169.254.10.10",
        "::1",
        "[::1]",
        "fd00::1",
        "fe80::1",
        "",
    ] {
        assert!(is_private_host(host), "{host:?} should be private");
    }
}

#[test]
fn given_public_hosts_when_checked_then_not_private() {
    for host in ["8.8.8.8", "plexio.example.com", "2001:4860:4860::8888", "172.32.0.1"] {
        assert!(!is_private_host(host), "{host:?} should be public");
    }
}

#[test]
fn given_public_url_when_validated_then_ok() {
    assert_that!(
        validate_public_url("public_base_url", "https://plexio.example.com"),
        ok(anything())
    );
}

#[test]
fn given_garbage_url_when_validated_then_error_names_field() {
    let result = validate_public_url("public_streaming_base_url", "not a url");

    assert_that!(result, err(anything()));
    let err_msg = format!("{}", result.unwrap_err());
    assert_that!(err_msg, contains_substring("public_streaming_base_url"));
}
