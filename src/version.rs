/// Reported at startup and by `--version`; `APP_VERSION` at build time overrides the crate version.
pub const VERSION: &str = match option_env!("APP_VERSION") {
    Some(version) => version,
    None => env!("CARGO_PKG_VERSION"),
};
