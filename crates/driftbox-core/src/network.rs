//! Network-quality based concurrency defaults.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Cap used when the connection quality is unknown.
pub const DEFAULT_CONCURRENCY: usize = 2;

/// Effective connection type, as reported by the host platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionQuality {
    #[serde(rename = "slow-2g")]
    Slow2g,
    #[serde(rename = "2g")]
    Cellular2g,
    #[serde(rename = "3g")]
    Cellular3g,
    #[serde(rename = "4g")]
    Cellular4g,
}

impl ConnectionQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionQuality::Slow2g => "slow-2g",
            ConnectionQuality::Cellular2g => "2g",
            ConnectionQuality::Cellular3g => "3g",
            ConnectionQuality::Cellular4g => "4g",
        }
    }
}

impl FromStr for ConnectionQuality {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "slow-2g" => Ok(ConnectionQuality::Slow2g),
            "2g" => Ok(ConnectionQuality::Cellular2g),
            "3g" => Ok(ConnectionQuality::Cellular3g),
            "4g" => Ok(ConnectionQuality::Cellular4g),
            other => Err(anyhow::anyhow!("Unknown connection quality: {}", other)),
        }
    }
}

/// Concurrency cap for a connection quality; `None` falls back to [`DEFAULT_CONCURRENCY`].
pub fn default_concurrency(quality: Option<ConnectionQuality>) -> usize {
    match quality {
        Some(ConnectionQuality::Cellular4g) => 4,
        Some(ConnectionQuality::Cellular3g) => 2,
        Some(ConnectionQuality::Cellular2g) | Some(ConnectionQuality::Slow2g) => 1,
        None => DEFAULT_CONCURRENCY,
    }
}
