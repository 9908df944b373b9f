// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Centralized logging utilities for Kosh
//!
//! This crate provides standardized logging initialization plus the redaction
//! helpers the rest of the workspace uses to keep live credentials out of log
//! output. Every HTTP transcript line emitted by the URL-VCR must pass
//! through [`redact_secrets`] before it reaches a tracing macro.

use std::io;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

// Re-export Level for convenience
pub use tracing::Level;

/// Output format for log messages
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable plaintext format
    #[default]
    Plaintext,
    /// Structured JSON format
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Plaintext => write!(f, "plaintext"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

/// CLI log level enum for clap integration
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum CliLogLevel {
    /// Only error conditions
    Error,
    /// Errors and warnings
    #[default]
    Warn,
    /// Errors, warnings, and informational messages
    Info,
    /// All above plus debug information
    Debug,
    /// All above plus detailed tracing
    Trace,
}

impl From<CliLogLevel> for Level {
    fn from(level: CliLogLevel) -> Self {
        match level {
            CliLogLevel::Error => Level::ERROR,
            CliLogLevel::Warn => Level::WARN,
            CliLogLevel::Info => Level::INFO,
            CliLogLevel::Debug => Level::DEBUG,
            CliLogLevel::Trace => Level::TRACE,
        }
    }
}

/// Standardized CLI logging arguments for clap integration
///
/// Use this with `#[command(flatten)]` in clap structs so both kosh binaries
/// expose the same logging switches. Kosh logs to stderr; stdout belongs to
/// the data the user asked for.
#[derive(Clone, Debug, Default, clap::Args)]
pub struct CliLoggingArgs {
    /// Log verbosity level
    #[arg(long, value_enum, help = "Log verbosity level (default: warn)")]
    pub log_level: Option<CliLogLevel>,

    /// Log output format
    #[arg(long, value_enum, help = "Log output format (default: plaintext)")]
    pub log_format: Option<LogFormat>,
}

impl CliLoggingArgs {
    /// Initialize logging based on the parsed CLI arguments.
    pub fn init(self, component: &str) -> anyhow::Result<()> {
        init(
            component,
            self.log_level.unwrap_or_default().into(),
            self.log_format.unwrap_or_default(),
        )
    }
}

/// Initialize logging with the specified component name, default level, and format
///
/// `RUST_LOG` overrides `default_level` when set.
pub fn init(component: &str, default_level: Level, format: LogFormat) -> anyhow::Result<()> {
    init_with_writer(component, default_level, format, io::stderr)
}

/// Initialize logging with a custom writer
pub fn init_with_writer<W>(
    component: &str,
    default_level: Level,
    format: LogFormat,
    writer: W,
) -> anyhow::Result<()>
where
    W: for<'writer> tracing_subscriber::fmt::MakeWriter<'writer> + Send + Sync + 'static,
{
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{},{}={}", default_level, component, default_level))
    });

    match format {
        LogFormat::Json => {
            let layer = tracing_subscriber::fmt::layer().with_writer(writer).json();
            tracing_subscriber::registry().with(filter).with(layer).try_init()?;
        }
        LogFormat::Plaintext => {
            let layer = tracing_subscriber::fmt::layer().with_writer(writer);
            tracing_subscriber::registry().with(filter).with(layer).try_init()?;
        }
    }

    Ok(())
}

/// Redact a single sensitive value from log output
///
/// # Example
/// ```rust
/// use kosh_logging::redact;
///
/// let passphrase = "hunter2";
/// tracing::info!(passphrase = %redact(passphrase), "database unlocked");
/// // Output: passphrase="[REDACTED]"
/// ```
pub fn redact(_value: impl std::fmt::Display) -> &'static str {
    "[REDACTED]"
}

/// Substitute live credential values in a transcript line with sentinels.
///
/// `secrets` pairs each sentinel with the live value it replaces, e.g.
/// `[("<username>", Some("alice")), ("<oldpass>", Some("hunter2"))]`. Pairs
/// whose value is `None` or empty are skipped. Longer values are substituted
/// first so a password that contains the username is not partially leaked.
pub fn redact_secrets(text: &str, secrets: &[(&str, Option<&str>)]) -> String {
    let mut pairs: Vec<(&str, &str)> = secrets
        .iter()
        .filter_map(|(sentinel, value)| match value {
            Some(v) if !v.is_empty() => Some((*sentinel, *v)),
            _ => None,
        })
        .collect();
    pairs.sort_by_key(|(_, v)| std::cmp::Reverse(v.len()));

    let mut out = text.to_string();
    for (sentinel, value) in pairs {
        out = out.replace(value, sentinel);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact() {
        assert_eq!(format!("{}", redact("sensitive-data")), "[REDACTED]");
    }

    #[test]
    fn test_redact_secrets_substitutes_sentinels() {
        let line = "POST body: user=alice&pass=hunter2";
        let out = redact_secrets(
            line,
            &[
                ("<username>", Some("alice")),
                ("<oldpass>", Some("hunter2")),
                ("<newpass>", None),
            ],
        );
        assert_eq!(out, "POST body: user=<username>&pass=<oldpass>");
    }

    #[test]
    fn test_redact_secrets_longest_first() {
        // The password embeds the username; it must be replaced as a whole.
        let line = "pass=alice123 user=alice";
        let out = redact_secrets(
            line,
            &[("<username>", Some("alice")), ("<oldpass>", Some("alice123"))],
        );
        assert_eq!(out, "pass=<oldpass> user=<username>");
    }

    #[test]
    fn test_redact_secrets_empty_values_ignored() {
        let line = "nothing to hide";
        let out = redact_secrets(line, &[("<oldpass>", Some(""))]);
        assert_eq!(out, line);
    }
}
