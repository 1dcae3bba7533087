fn main() {
    #[cfg(feature = "ui")]
    tauri_build::build();
}
