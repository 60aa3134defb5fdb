//! Courier Logging
//!
//! Installs the `tracing` subscriber used by every Courier crate and provides
//! the span constructors that stamp a correlation id on each log line.
//!
//! # Features
//!
//! - **Environment-controlled**: `COURIER_DEBUG=1` enables debug logging
//! - **Structured output**: pretty, compact, or JSON lines
//! - **Correlation spans**: every event emitted inside [`outbound_span`] or
//!   [`inbound_span`] carries `correlation_id`, whichever thread emits it
//!
//! # Usage
//!
//! ```rust,no_run
//! use courier_log::{LogConfig, outbound_span};
//!
//! courier_log::init(&LogConfig::from_env());
//!
//! let span = outbound_span("abc-123", "GET", "https://api.example.com/users");
//! let _entered = span.enter();
//! tracing::info!("inside the call");
//! ```
//!
//! # Environment Variables
//!
//! - `COURIER_DEBUG=1` - Enable debug logging
//! - `COURIER_LOG_LEVEL=trace|debug|info|warn|error|off` - Set log level
//! - `COURIER_LOG_FORMAT=pretty|json|compact` - Set output format
//! - `COURIER_LOG_COLOR=1|0` - Enable/disable colors
//!
//! `RUST_LOG`, when set, takes precedence over the configured level.

use serde::Deserialize;
use std::env;
use tracing::Span;

// ============================================================================
// Log Levels
// ============================================================================

/// Minimum log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    /// Trace level (most verbose)
    Trace,
    /// Debug level
    Debug,
    /// Info level
    Info,
    /// Warning level
    #[serde(alias = "warning")]
    Warn,
    /// Error level (least verbose)
    Error,
    /// Off (no logging)
    #[serde(alias = "none")]
    Off,
}

impl Level {
    /// Get level from string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Some(Level::Trace),
            "debug" => Some(Level::Debug),
            "info" => Some(Level::Info),
            "warn" | "warning" => Some(Level::Warn),
            "error" => Some(Level::Error),
            "off" | "none" => Some(Level::Off),
            _ => None,
        }
    }

    /// Directive understood by `EnvFilter`.
    pub fn as_directive(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Off => "off",
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_directive())
    }
}

// ============================================================================
// Log Format
// ============================================================================

/// Output format for log messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// Multi-line human readable output
    Pretty,
    /// Compact single-line format
    Compact,
    /// JSON lines for structured logging
    Json,
}

impl Format {
    /// Get format from string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pretty" => Some(Format::Pretty),
            "compact" => Some(Format::Compact),
            "json" => Some(Format::Json),
            _ => None,
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Whether debug mode is enabled
    pub debug: bool,
    /// Minimum log level
    pub level: Level,
    /// Output format
    pub format: Format,
    /// Whether colors are enabled (ignored for JSON)
    pub color: bool,
    /// Whether to include the event target
    pub target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            debug: false,
            level: Level::Info,
            format: Format::Json,
            color: false,
            target: true,
        }
    }
}

fn flag(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

impl LogConfig {
    /// Create config from process environment variables.
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| env::var(key).ok())
    }

    /// Apply `COURIER_*` overrides read through `lookup`.
    ///
    /// Unparseable values are ignored and the current value is kept.
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(debug) = lookup("COURIER_DEBUG") {
            self.debug = flag(&debug);
        }

        match lookup("COURIER_LOG_LEVEL").and_then(|s| Level::from_str(&s)) {
            Some(level) => self.level = level,
            None if self.debug && self.level > Level::Debug => self.level = Level::Debug,
            None => {}
        }

        if let Some(format) = lookup("COURIER_LOG_FORMAT").and_then(|s| Format::from_str(&s)) {
            self.format = format;
        }

        if let Some(color) = lookup("COURIER_LOG_COLOR") {
            self.color = flag(&color);
        } else if lookup("NO_COLOR").is_some() {
            self.color = false;
        }

        self
    }

    /// The filter directive this config resolves to.
    pub fn directive(&self) -> &'static str {
        if self.debug && self.level > Level::Debug {
            Level::Debug.as_directive()
        } else {
            self.level.as_directive()
        }
    }
}

// ============================================================================
// Subscriber
// ============================================================================

/// Error returned when a global subscriber is already installed.
#[derive(Debug, thiserror::Error)]
#[error("failed to install tracing subscriber: {0}")]
pub struct InitError(#[from] tracing_subscriber::util::TryInitError);

/// Install the global subscriber, ignoring a previously installed one.
pub fn init(config: &LogConfig) {
    if let Err(e) = try_init(config) {
        tracing::debug!(error = %e, "Tracing subscriber already installed");
    }
}

/// Install the global subscriber.
pub fn try_init(config: &LogConfig) -> Result<(), InitError> {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{EnvFilter, fmt};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.directive()));
    let registry = tracing_subscriber::registry().with(filter);

    match config.format {
        Format::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_target(config.target),
            )
            .try_init()?,
        Format::Pretty => registry
            .with(
                fmt::layer()
                    .pretty()
                    .with_ansi(config.color)
                    .with_target(config.target),
            )
            .try_init()?,
        Format::Compact => registry
            .with(
                fmt::layer()
                    .compact()
                    .with_ansi(config.color)
                    .with_target(config.target),
            )
            .try_init()?,
    }

    Ok(())
}

// ============================================================================
// Spans
// ============================================================================

/// Span for one logical outbound call.
pub fn outbound_span(correlation_id: &str, method: &str, uri: &str) -> Span {
    tracing::info_span!("outbound", correlation_id = %correlation_id, method = %method, uri = %uri)
}

/// Span for one inbound request.
pub fn inbound_span(correlation_id: &str, method: &str, path: &str) -> Span {
    tracing::info_span!("inbound", correlation_id = %correlation_id, method = %method, path = %path)
}

// ============================================================================
// Tests
// ============================================================================
