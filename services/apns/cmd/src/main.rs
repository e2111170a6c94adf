//! apns-push: send notifications and read feedback over the APNs binary interface.

use anyhow::{bail, Context};
use apns_session::{ApnClient, Behavior, LogLevel, TlsDialer};
use apns_wire::{NotificationBuilder, Priority};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod logging;
mod payload;

use config::ApnsConfig;
use logging::ApnsLogFormatter;
use payload::Payload;

/// Command-line APNs client
#[derive(Parser, Debug)]
#[command(
    name = "apns-push",
    version,
    about = "Send push notifications and read feedback over the APNs binary interface"
)]
struct Args {
    /// Configuration file path
    #[arg(long, default_value = "apns.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Use the sandbox environment
    #[arg(long)]
    sandbox: bool,

    /// PEM certificate file
    #[arg(long)]
    cert: Option<String>,

    /// PEM private key file
    #[arg(long)]
    key: Option<String>,

    /// Passphrase of an encrypted private key
    #[arg(long)]
    key_pass: Option<String>,

    /// PKCS#12 container, instead of --cert/--key
    #[arg(long, conflicts_with_all = ["cert", "key"])]
    pkcs12: Option<String>,

    /// PKCS#12 passphrase
    #[arg(long)]
    pkcs12_pass: Option<String>,

    /// CA bundle replacing the platform trust store
    #[arg(long)]
    ca_file: Option<PathBuf>,

    /// Stop at the first rejected token instead of reconnecting
    #[arg(long)]
    no_reconnect: bool,

    /// Gateway or feedback endpoint override, host:port
    #[arg(long)]
    endpoint: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send one notification to one or more devices
    Send {
        /// Device token, 64 hex characters (repeatable)
        #[arg(long = "token", required = true)]
        tokens: Vec<String>,

        /// Alert text
        #[arg(long)]
        alert: Option<String>,

        /// Badge number
        #[arg(long)]
        badge: Option<u32>,

        /// Sound name
        #[arg(long)]
        sound: Option<String>,

        /// Background update (content-available)
        #[arg(long)]
        content_available: bool,

        /// Custom top-level payload key, KEY=VALUE with VALUE as JSON or text (repeatable)
        #[arg(long = "custom", value_name = "KEY=VALUE")]
        custom: Vec<String>,

        /// Complete JSON payload, instead of --alert/--badge/--sound/--custom
        #[arg(
            long,
            conflicts_with_all = ["alert", "badge", "sound", "content_available", "custom"]
        )]
        payload_json: Option<String>,

        /// Absolute expiry, seconds since the epoch (0 = do not store)
        #[arg(long, conflicts_with = "ttl")]
        expiry: Option<u32>,

        /// Expiry relative to now, e.g. 1h
        #[arg(long)]
        ttl: Option<humantime::Duration>,

        /// Delivery priority
        #[arg(long, value_enum, default_value = "immediate")]
        priority: PriorityArg,
    },

    /// Print tokens reported by the feedback service
    Feedback,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum PriorityArg {
    Immediate,
    PowerConserving,
}

impl From<PriorityArg> for Priority {
    fn from(value: PriorityArg) -> Self {
        match value {
            PriorityArg::Immediate => Priority::Immediate,
            PriorityArg::PowerConserving => Priority::PowerConserving,
        }
    }
}

fn client_log_level(level: &str) -> LogLevel {
    match level.to_lowercase().as_str() {
        "trace" | "debug" => LogLevel::all(),
        "info" => LogLevel::ERROR | LogLevel::INFO,
        _ => LogLevel::ERROR,
    }
}

fn expiry_from(expiry: Option<u32>, ttl: Option<humantime::Duration>) -> anyhow::Result<u32> {
    if let Some(expiry) = expiry {
        return Ok(expiry);
    }
    let Some(ttl) = ttl else {
        return Ok(0);
    };

    let ttl = chrono::Duration::from_std(*ttl).context("ttl out of range")?;
    let at = chrono::Utc::now() + ttl;
    u32::try_from(at.timestamp()).context("expiry does not fit the protocol's 32-bit field")
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::new("warn")
        .add_directive(format!("apns_push={}", args.log_level).parse()?)
        .add_directive(format!("apns_session={}", args.log_level).parse()?)
        .add_directive(format!("apns_wire={}", args.log_level).parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .event_format(ApnsLogFormatter::new("apns"))
        .init();

    info!(
        "Starting apns-push v{} (apns-session {})",
        env!("CARGO_PKG_VERSION"),
        apns_session::version_string()
    );
    apns_session::init();

    let mut config = ApnsConfig::load_from_file(&args.config)?;
    if args.sandbox {
        config.mode = "sandbox".to_string();
    }
    if args.cert.is_some() {
        config.certificate = args.cert.clone();
        config.pkcs12_file = None;
    }
    if args.key.is_some() {
        config.private_key = args.key.clone();
    }
    if args.key_pass.is_some() {
        config.private_key_passphrase = args.key_pass.clone();
    }
    if args.pkcs12.is_some() {
        config.pkcs12_file = args.pkcs12.clone();
    }
    if args.pkcs12_pass.is_some() {
        config.pkcs12_passphrase = args.pkcs12_pass.clone();
    }
    if args.ca_file.is_some() {
        config.ca_file = args.ca_file.clone();
    }
    if args.no_reconnect {
        config.reconnect = false;
    }
    if let Some(endpoint) = &args.endpoint {
        match args.command {
            Command::Send { .. } => config.gateway = Some(endpoint.clone()),
            Command::Feedback => config.feedback = Some(endpoint.clone()),
        }
    }

    let options = config.client_options(client_log_level(&args.log_level))?;
    let mut client = ApnClient::with_options(TlsDialer, options);
    client.set_credentials(config.credentials());

    match args.command {
        Command::Send {
            tokens,
            alert,
            badge,
            sound,
            content_available,
            custom,
            payload_json,
            expiry,
            ttl,
            priority,
        } => {
            let payload = match payload_json {
                Some(raw) => payload::from_raw_json(&raw)?,
                None => {
                    let mut payload = Payload::new()
                        .alert(alert)
                        .badge(badge)
                        .sound(sound)
                        .content_available(content_available);
                    for arg in &custom {
                        let (key, value) = payload::parse_custom(arg)?;
                        payload = payload.custom(&key, value);
                    }
                    payload.to_bytes()?
                }
            };
            let frame = NotificationBuilder::new(payload)
                .expiry(expiry_from(expiry, ttl)?)
                .priority(priority.into())
                .build()?;

            run_send(&mut client, &frame, &tokens).await
        }
        Command::Feedback => run_feedback(&mut client).await,
    }
}

async fn run_send(
    client: &mut ApnClient,
    frame: &apns_wire::NotificationFrame,
    tokens: &[String],
) -> anyhow::Result<()> {
    client
        .connect()
        .await
        .context("could not connect to the notification gateway")?;

    let mut invalid = Vec::new();
    let result = client.send(frame, tokens, Some(&mut invalid)).await;
    client.close().await;

    for token in &invalid {
        println!("{}", token);
    }

    match result {
        Ok(()) => {
            component_info!(
                "send",
                "Sent to {} device(s), {} invalid",
                tokens.len() - invalid.len(),
                invalid.len()
            );
            Ok(())
        }
        Err(e) if e.is_invalid_token() && !client.behavior().contains(Behavior::RECONNECT) => {
            component_warn!("send", "Batch stopped at a rejected token: {}", e);
            bail!("batch stopped at a rejected token; rerun without --no-reconnect to skip it")
        }
        Err(e) => {
            component_error!("send", "Could not send notification: {}", e);
            Err(e).context("sending notification")
        }
    }
}

async fn run_feedback(client: &mut ApnClient) -> anyhow::Result<()> {
    client
        .feedback_connect()
        .await
        .context("could not connect to the feedback service")?;

    let result = client.feedback_all().await;
    client.close().await;

    let tokens = result.context("reading feedback")?;
    for token in &tokens {
        println!("{}", token);
    }
    component_info!("feedback", "{} token(s) reported", tokens.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([
            "apns-push",
            "--sandbox",
            "--cert",
            "push.pem",
            "--key",
            "push.key",
            "send",
            "--token",
            "aa",
            "--token",
            "bb",
            "--alert",
            "Hello",
            "--priority",
            "power-conserving",
        ])
        .unwrap();

        assert!(args.sandbox);
        match args.command {
            Command::Send {
                tokens, priority, ..
            } => {
                assert_eq!(tokens, vec!["aa", "bb"]);
                assert_eq!(Priority::from(priority), Priority::PowerConserving);
            }
            Command::Feedback => panic!("expected send"),
        }
    }

    #[test]
    fn test_custom_keys_parse() {
        let args = Args::try_parse_from([
            "apns-push",
            "send",
            "--token",
            "aa",
            "--custom",
            "order=42",
            "--custom",
            "room=lobby",
        ])
        .unwrap();

        match args.command {
            Command::Send { custom, .. } => assert_eq!(custom, vec!["order=42", "room=lobby"]),
            Command::Feedback => panic!("expected send"),
        }

        let result = Args::try_parse_from([
            "apns-push",
            "send",
            "--token",
            "aa",
            "--custom",
            "order=42",
            "--payload-json",
            "{}",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_payload_json_conflicts_with_alert() {
        let result = Args::try_parse_from([
            "apns-push",
            "send",
            "--token",
            "aa",
            "--alert",
            "Hello",
            "--payload-json",
            "{}",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_client_log_level() {
        assert_eq!(client_log_level("debug"), LogLevel::all());
        assert_eq!(client_log_level("info"), LogLevel::ERROR | LogLevel::INFO);
        assert_eq!(client_log_level("warn"), LogLevel::ERROR);
    }

    #[test]
    fn test_expiry() {
        assert_eq!(expiry_from(Some(42), None).unwrap(), 42);
        assert_eq!(expiry_from(None, None).unwrap(), 0);

        let ttl: humantime::Duration = "1h".parse().unwrap();
        let expiry = expiry_from(None, Some(ttl)).unwrap() as i64;
        let now = chrono::Utc::now().timestamp();
        assert!((expiry - now - 3600).abs() <= 5);
    }
}
