use faultdesk_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let webhook_token = config
        .notify
        .webhook_token
        .as_ref()
        .map(|token| redact_token(token.expose_secret()))
        .unwrap_or_else(|| "(unset)".to_string());

    let policy_path = config
        .routing
        .policy_path
        .as_ref()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "(compiled-in default)".to_string());

    let lines = vec![
        "effective config (source precedence: env > file > default):".to_string(),
        render_line("database.url", &config.database.url),
        render_line("database.max_connections", &config.database.max_connections.to_string()),
        render_line("database.timeout_secs", &config.database.timeout_secs.to_string()),
        render_line("server.bind_address", &config.server.bind_address),
        render_line("server.port", &config.server.port.to_string()),
        render_line(
            "server.graceful_shutdown_secs",
            &config.server.graceful_shutdown_secs.to_string(),
        ),
        render_line("notify.enabled", &config.notify.enabled.to_string()),
        render_line(
            "notify.webhook_url",
            config.notify.webhook_url.as_deref().unwrap_or("(unset)"),
        ),
        render_line("notify.webhook_token", &webhook_token),
        render_line("notify.email_from", &config.notify.email_from),
        render_line("routing.policy_path", &policy_path),
        render_line("logging.level", &config.logging.level),
        render_line("logging.format", &format!("{:?}", config.logging.format).to_lowercase()),
    ];

    lines.join("\n")
}

fn render_line(key: &str, value: &str) -> String {
    format!("- {key} = {value}")
}

fn redact_token(token: &str) -> String {
    if token.is_empty() {
        return "(unset)".to_string();
    }
    let visible: String = token.chars().take(4).collect();
    format!("{visible}…(redacted)")
}
