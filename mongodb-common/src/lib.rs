pub mod logging;
pub mod shutdown;

/// Enables or disables ANSI color in log output, honoring `DISABLE_COLORS`/`NO_COLOR`
/// the same way the rest of the fleet's services do.
pub fn init() {
    let disable_colors = ["1", "true"].contains(
        &std::env::var("DISABLE_COLORS")
            .unwrap_or_default()
            .to_lowercase()
            .as_str(),
    ) || std::env::var_os("NO_COLOR").is_some();
    owo_colors::set_override(!disable_colors);
}
