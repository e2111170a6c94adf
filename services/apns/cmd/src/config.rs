//! Configuration handling for apns-push.
//!
//! Settings come from a YAML file, then environment variables, then command-line
//! flags, each layer overriding the previous one.

use anyhow::{bail, Context, Result};
use apns_session::{Behavior, ClientOptions, Credentials, Endpoint, Environment, LogLevel, Timeouts};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// apns-push configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ApnsConfig {
    /// "sandbox" or "production"
    pub mode: String,
    /// PEM certificate file
    pub certificate: Option<String>,
    /// PEM private key file
    pub private_key: Option<String>,
    /// Passphrase of an encrypted private key
    pub private_key_passphrase: Option<String>,
    /// PKCS#12 container, used instead of the PEM files when set
    pub pkcs12_file: Option<String>,
    /// PKCS#12 passphrase
    pub pkcs12_passphrase: Option<String>,
    /// CA bundle replacing the platform trust store
    pub ca_file: Option<PathBuf>,
    /// Reconnect and resume after rejected tokens or dropped connections
    pub reconnect: bool,
    /// Mirror client messages to standard error in `[inf] ...` form
    pub log_stderr: bool,
    /// Gateway override, `host:port`
    pub gateway: Option<String>,
    /// Feedback service override, `host:port`
    pub feedback: Option<String>,
    /// Timing knobs
    pub timeouts: Timeouts,
}

impl Default for ApnsConfig {
    fn default() -> Self {
        Self {
            mode: "production".to_string(),
            certificate: None,
            private_key: None,
            private_key_passphrase: None,
            pkcs12_file: None,
            pkcs12_passphrase: None,
            ca_file: None,
            reconnect: true,
            log_stderr: false,
            gateway: None,
            feedback: None,
            timeouts: Timeouts::default(),
        }
    }
}

/// Root of the YAML file
#[derive(Debug, Deserialize)]
struct RootConfig {
    apns: Option<FileConfig>,
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    mode: Option<String>,
    certificate: Option<String>,
    private_key: Option<String>,
    private_key_passphrase: Option<String>,
    pkcs12_file: Option<String>,
    pkcs12_passphrase: Option<String>,
    ca_file: Option<PathBuf>,
    reconnect: Option<bool>,
    log_stderr: Option<bool>,
    gateway: Option<String>,
    feedback: Option<String>,
    timeouts: Option<TimeoutsConfig>,
}

/// Durations in humantime notation ("10s", "500ms")
#[derive(Debug, Default, Deserialize)]
struct TimeoutsConfig {
    send_wait: Option<String>,
    trailing_wait: Option<String>,
    feedback_wait: Option<String>,
    reconnect_delay: Option<String>,
    connect: Option<String>,
    shutdown: Option<String>,
}

fn apply_duration(target: &mut Duration, name: &str, value: Option<String>) {
    let Some(value) = value else {
        return;
    };
    match humantime::parse_duration(&value) {
        Ok(duration) => *target = duration,
        Err(e) => warn!("Ignoring timeouts.{} = {:?}: {}", name, value, e),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse `host:port`
pub fn parse_endpoint(value: &str) -> Result<Endpoint> {
    let (host, port) = value
        .rsplit_once(':')
        .with_context(|| format!("endpoint {:?} is not host:port", value))?;
    if host.is_empty() {
        bail!("endpoint {:?} has no host", value);
    }
    let port = port
        .parse::<u16>()
        .with_context(|| format!("endpoint {:?} has an invalid port", value))?;
    Ok(Endpoint::new(host, port))
}

impl ApnsConfig {
    /// Load configuration from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let mut config = Self::default();
        let path = config_path.as_ref();

        match std::fs::read_to_string(path) {
            Ok(content) => {
                let root: RootConfig = serde_yaml::from_str(&content)
                    .with_context(|| format!("failed to parse config file {:?}", path))?;
                if let Some(file) = root.apns {
                    config.apply_file_config(file);
                }
                info!("Loaded configuration from {:?}", path);
            }
            Err(_) => warn!("Config file {:?} not found, using defaults", path),
        }

        config.apply_environment_overrides();
        Ok(config)
    }

    fn apply_file_config(&mut self, file: FileConfig) {
        if let Some(mode) = file.mode {
            self.mode = mode;
        }
        if file.certificate.is_some() {
            self.certificate = file.certificate;
        }
        if file.private_key.is_some() {
            self.private_key = file.private_key;
        }
        if file.private_key_passphrase.is_some() {
            self.private_key_passphrase = file.private_key_passphrase;
        }
        if file.pkcs12_file.is_some() {
            self.pkcs12_file = file.pkcs12_file;
        }
        if file.pkcs12_passphrase.is_some() {
            self.pkcs12_passphrase = file.pkcs12_passphrase;
        }
        if file.ca_file.is_some() {
            self.ca_file = file.ca_file;
        }
        if let Some(reconnect) = file.reconnect {
            self.reconnect = reconnect;
        }
        if let Some(log_stderr) = file.log_stderr {
            self.log_stderr = log_stderr;
        }
        if file.gateway.is_some() {
            self.gateway = file.gateway;
        }
        if file.feedback.is_some() {
            self.feedback = file.feedback;
        }

        if let Some(timeouts) = file.timeouts {
            let t = &mut self.timeouts;
            apply_duration(&mut t.send_wait, "send_wait", timeouts.send_wait);
            apply_duration(&mut t.trailing_wait, "trailing_wait", timeouts.trailing_wait);
            apply_duration(&mut t.feedback_wait, "feedback_wait", timeouts.feedback_wait);
            apply_duration(&mut t.reconnect_delay, "reconnect_delay", timeouts.reconnect_delay);
            apply_duration(&mut t.connect, "connect", timeouts.connect);
            apply_duration(&mut t.shutdown, "shutdown", timeouts.shutdown);
        }
    }

    /// Apply environment variable overrides
    fn apply_environment_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(mode) = lookup("APNS_MODE") {
            info!("Mode overridden by environment: {}", mode);
            self.mode = mode;
        }

        if let Some(certificate) = lookup("APNS_CERT") {
            info!("Certificate overridden by environment: {}", certificate);
            self.certificate = Some(certificate);
        }

        if let Some(private_key) = lookup("APNS_KEY") {
            info!("Private key overridden by environment: {}", private_key);
            self.private_key = Some(private_key);
        }

        if let Some(passphrase) = lookup("APNS_KEY_PASS") {
            self.private_key_passphrase = Some(passphrase);
        }

        if let Some(pkcs12) = lookup("APNS_PKCS12") {
            info!("PKCS#12 file overridden by environment: {}", pkcs12);
            self.pkcs12_file = Some(pkcs12);
        }

        if let Some(passphrase) = lookup("APNS_PKCS12_PASS") {
            self.pkcs12_passphrase = Some(passphrase);
        }

        if let Some(ca_file) = lookup("APNS_CA_FILE") {
            info!("CA file overridden by environment: {}", ca_file);
            self.ca_file = Some(PathBuf::from(ca_file));
        }

        if let Some(reconnect) = lookup("APNS_RECONNECT") {
            match parse_bool(&reconnect) {
                Some(value) => {
                    self.reconnect = value;
                    info!("Reconnect overridden by environment: {}", value);
                }
                None => warn!("Ignoring APNS_RECONNECT={:?}", reconnect),
            }
        }
    }

    /// Selected environment
    pub fn environment(&self) -> Result<Environment> {
        match self.mode.to_lowercase().as_str() {
            "sandbox" | "development" => Ok(Environment::Sandbox),
            "production" => Ok(Environment::Production),
            other => bail!("unknown mode {:?}, expected sandbox or production", other),
        }
    }

    /// Client credentials. A PKCS#12 file wins over PEM files.
    pub fn credentials(&self) -> Credentials {
        if let Some(file) = &self.pkcs12_file {
            if self.certificate.is_some() {
                warn!("Both PKCS#12 and PEM credentials configured, using {}", file);
            }
            return Credentials::pkcs12(file, self.pkcs12_passphrase.as_deref().unwrap_or(""));
        }

        match &self.certificate {
            Some(certificate) => Credentials::pem(
                certificate,
                self.private_key.as_deref(),
                self.private_key_passphrase.as_deref(),
            ),
            None => Credentials::Unconfigured,
        }
    }

    /// Client options derived from this configuration
    pub fn client_options(&self, log_level: LogLevel) -> Result<ClientOptions> {
        let mut behavior = Behavior::empty();
        if self.reconnect {
            behavior |= Behavior::RECONNECT;
        }
        if self.log_stderr {
            behavior |= Behavior::LOG_STDERR;
        }

        Ok(ClientOptions {
            environment: self.environment()?,
            behavior,
            log_level,
            timeouts: self.timeouts,
            ca_file: self.ca_file.clone(),
            gateway: self.gateway.as_deref().map(parse_endpoint).transpose()?,
            feedback: self.feedback.as_deref().map(parse_endpoint).transpose()?,
        })
    }
}
