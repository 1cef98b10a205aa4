//! `sseflow-tail`: print the events of a Server-Sent Events endpoint

use std::time::Duration;

use clap::{Parser, ValueEnum};
use sseflow::{
    Backoff, Callbacks, EventSourceConfig, EventSourceError, Message, fetch_event_source,
    validate_event_stream,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Tail a Server-Sent Events endpoint
#[derive(Parser, Debug)]
#[command(
    name = "sseflow-tail",
    version,
    about = "Tail a Server-Sent Events endpoint, reconnecting with last-event-id"
)]
struct Cli {
    /// Endpoint URL
    #[arg(env = "SSEFLOW_URL")]
    url: String,

    /// HTTP method
    #[arg(long, short = 'X', default_value = "GET")]
    method: String,

    /// Extra request header as `name: value` (repeatable)
    #[arg(long = "header", short = 'H', value_parser = parse_header)]
    headers: Vec<(String, String)>,

    /// Request body sent with every attempt
    #[arg(long, short = 'd')]
    data: Option<String>,

    /// Bearer token added as the `authorization` header
    #[arg(long, env = "SSEFLOW_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Retries allowed since the last successful open (unlimited when omitted)
    #[arg(long, env = "SSEFLOW_MAX_RETRIES")]
    max_retries: Option<u32>,

    /// Request timeout in milliseconds
    #[arg(long, env = "SSEFLOW_TIMEOUT_MS", default_value_t = 60_000)]
    timeout_ms: u64,

    /// Reconnect delay in milliseconds
    #[arg(long, env = "SSEFLOW_RETRY_MS", default_value_t = 1_000)]
    retry_ms: u64,

    /// Double the reconnect delay after each failure, up to this many milliseconds
    #[arg(long)]
    backoff_max_ms: Option<u64>,

    /// Follow the server's `retry:` hint
    #[arg(long)]
    honor_server_retry: bool,

    /// Exit when the server closes the stream instead of reconnecting
    #[arg(long)]
    once: bool,

    /// Do not reconnect after network failures
    #[arg(long)]
    no_reconnect: bool,

    /// Output format
    #[arg(long, short = 'f', value_enum, default_value = "human")]
    format: OutputFormat,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
enum OutputFormat {
    /// `event: data` lines
    Human,
    /// One JSON object per message
    Json,
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected `name: value`, got `{raw}`"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("empty header name in `{raw}`"));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

impl Cli {
    fn config(&self) -> EventSourceConfig {
        let mut config = EventSourceConfig::new(&self.url)
            .method(&self.method)
            .max_retry_count(self.max_retries)
            .timeout(Duration::from_millis(self.timeout_ms))
            .retry_interval(Duration::from_millis(self.retry_ms))
            .honor_server_retry(self.honor_server_retry)
            .open_when_hidden(self.once);

        for (name, value) in &self.headers {
            config = config.header(name, value);
        }
        if let Some(token) = &self.token {
            config = config.header("authorization", format!("Bearer {token}"));
        }
        if let Some(data) = &self.data {
            config = config.body(data.clone());
        }
        if let Some(max_ms) = self.backoff_max_ms {
            config = config.backoff(Backoff::Exponential {
                max_delay: Duration::from_millis(max_ms),
                jitter: true,
            });
        }
        config
    }
}

fn render(format: OutputFormat, message: &Message) -> String {
    match format {
        OutputFormat::Human => {
            format!("{}: {}", message.event_type(), message.data.trim_end_matches('\n'))
        }
        OutputFormat::Json => serde_json::to_string(message)
            .unwrap_or_else(|e| format!("{{\"error\":\"{e}\"}}")),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let format = cli.format;
    let reconnect = (!cli.no_reconnect).then(|| Duration::from_millis(cli.retry_ms));

    let callbacks = Callbacks::new()
        .on_open(|response| {
            let accepted = validate_event_stream(response);
            let status = response.status;
            async move {
                if accepted.is_ok() {
                    info!(status, "Stream opened");
                }
                accepted
            }
        })
        .on_message(move |message| async move {
            println!("{}", render(format, &message));
            Ok(())
        })
        .on_close(|| async {
            info!("Server closed the stream");
            Ok(())
        })
        .on_error(move |error: &EventSourceError| {
            warn!(error = %error, "Stream error");
            let delay = if error.is_transport() { reconnect } else { None };
            async move { Ok(delay) }
        });

    let handle = fetch_event_source(cli.config(), callbacks)?;
    let abort = handle.abort_signal();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, closing stream");
            abort.abort();
        }
    });

    handle.join().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_header() {
        assert_eq!(
            parse_header("X-Trace: abc:1").unwrap(),
            ("X-Trace".to_string(), "abc:1".to_string())
        );
        assert!(parse_header("no-colon").is_err());
        assert!(parse_header(": value").is_err());
    }

    #[test]
    fn test_cli_maps_onto_config() {
        let cli = Cli::parse_from([
            "sseflow-tail",
            "https://example.com/events",
            "-H",
            "x-tenant: blue",
            "--max-retries",
            "3",
            "--retry-ms",
            "250",
            "--backoff-max-ms",
            "4000",
            "--once",
        ]);
        let config = cli.config();

        assert_eq!(config.url, "https://example.com/events");
        assert_eq!(config.headers.get("x-tenant").map(String::as_str), Some("blue"));
        assert_eq!(config.max_retry_count, Some(3));
        assert_eq!(config.retry_interval, Duration::from_millis(250));
        assert!(config.open_when_hidden);
        assert!(matches!(config.backoff, Backoff::Exponential { jitter: true, .. }));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_render_formats() {
        let message = Message::new("a\nb\n").with_event("tick").with_id("9");
        assert_eq!(render(OutputFormat::Human, &message), "tick: a\nb");

        let json: serde_json::Value =
            serde_json::from_str(&render(OutputFormat::Json, &message)).unwrap();
        assert_eq!(json["id"], "9");
        assert_eq!(json["data"], "a\nb\n");
    }
}
