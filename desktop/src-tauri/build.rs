fn main() {
    // The headless shell has no window assets to generate.
    #[cfg(feature = "desktop")]
    tauri_build::build();
}
