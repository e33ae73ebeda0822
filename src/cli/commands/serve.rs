//! Web server command.

use console::style;

use crate::config::Settings;

const DEFAULT_PORT: u16 = 8000;

/// Start the web server.
pub async fn cmd_serve(settings: &Settings, bind: &str) -> anyhow::Result<()> {
    let (host, port) = parse_bind_address(bind);

    println!(
        "{} Starting docsift at http://{}:{}",
        style("→").cyan(),
        host,
        port
    );
    println!(
        "  {} workers, {}s processing timeout, analyzer: {}",
        settings.workers,
        settings.processing_timeout.as_secs(),
        settings.analyzer.command
    );
    println!("  Press Ctrl+C to stop");

    crate::server::serve(settings, &host, port).await
}

/// Parse a bind address that can be:
/// - Just a port: "8000" -> 127.0.0.1:8000
/// - Just a host: "0.0.0.0" -> 0.0.0.0:8000
/// - Host and port: "0.0.0.0:8000" -> 0.0.0.0:8000
fn parse_bind_address(bind: &str) -> (String, u16) {
    if let Ok(port) = bind.parse::<u16>() {
        return ("127.0.0.1".to_string(), port);
    }

    if let Some((host, port_str)) = bind.rsplit_once(':') {
        if let Ok(port) = port_str.parse::<u16>() {
            return (host.trim_matches(|c| c == '[' || c == ']').to_string(), port);
        }
    }

    (bind.to_string(), DEFAULT_PORT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bind_address() {
        assert_eq!(parse_bind_address("9000"), ("127.0.0.1".to_string(), 9000));
        assert_eq!(parse_bind_address("0.0.0.0"), ("0.0.0.0".to_string(), 8000));
        assert_eq!(
            parse_bind_address("0.0.0.0:3030"),
            ("0.0.0.0".to_string(), 3030)
        );
        assert_eq!(parse_bind_address("[::1]:8080"), ("::1".to_string(), 8080));
    }
}
