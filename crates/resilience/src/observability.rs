//! Tracing subscriber setup
//!
//! The library itself only emits `tracing` events; binaries and tests that
//! want to see them call [`init_tracing`] once at startup. The filter honors
//! `RUST_LOG` and defaults to `info`.

use std::fmt;
use std::str::FromStr;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt as fmt_layer, EnvFilter};

use crate::error::{CommonError, CommonResult};

/// Environment variable selecting the output format
pub const LOG_FORMAT_ENV: &str = "BULWARK_LOG_FORMAT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable multi-line output
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

impl LogFormat {
    /// Format named by `BULWARK_LOG_FORMAT`, falling back to `Pretty`
    pub fn from_env() -> Self {
        std::env::var(LOG_FORMAT_ENV).ok().and_then(|v| v.parse().ok()).unwrap_or_default()
    }
}

impl FromStr for LogFormat {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(CommonError::config_field(LOG_FORMAT_ENV, format!("unknown log format '{other}'"))),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pretty => write!(f, "pretty"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Install the global subscriber
///
/// # Errors
/// Returns `CommonError::Internal` if a global subscriber is already set.
pub fn init_tracing(format: LogFormat) -> CommonResult<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    let result = match format {
        LogFormat::Pretty => registry.with(fmt_layer::layer().with_target(true)).try_init(),
        LogFormat::Json => {
            registry.with(fmt_layer::layer().json().with_current_span(true).with_target(true)).try_init()
        }
    };

    result.map_err(|e| CommonError::internal_with_context(e.to_string(), "tracing subscriber already set"))?;
    tracing::debug!(%format, "tracing initialized");
    Ok(())
}
