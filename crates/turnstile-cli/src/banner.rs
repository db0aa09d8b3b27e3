use std::path::Path;

use turnstile_config::AppConfig;

/// Print the startup banner with the listen address and data directory.
pub fn print_banner(config: &AppConfig, data_dir: &Path) {
    let version = env!("CARGO_PKG_VERSION");
    let url = format!("http://{}:{}", config.gateway.host, config.gateway.port);

    let width = 58;
    let top = format!("╭{}╮", "─".repeat(width - 2));
    let bottom = format!("╰{}╯", "─".repeat(width - 2));
    let row = |text: &str| format!("│ {:<w$}│", text, w = width - 3);

    println!("{top}");
    println!("{}", row(&format!("Turnstile v{version} - offline QR attendance")));
    println!("{}", row(""));
    println!("{}", row(&format!("Gateway   {url}")));
    println!("{}", row(&format!("Data dir  {}", data_dir.display())));
    println!("{}", row(&format!("Default   {}", config.default_gateway_id)));
    println!("{}", row(""));
    println!("{}", row("Press Ctrl+C to stop"));
    println!("{bottom}");
}
