use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::AdmissionConfig;

/// Caller classification determining the quota applied to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Anonymous,
    Registered,
    Premium,
}

impl Tier {
    /// Stable string form, used for metric labels and job records.
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Anonymous => "anonymous",
            Tier::Registered => "registered",
            Tier::Premium => "premium",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "anonymous" => Ok(Tier::Anonymous),
            "registered" => Ok(Tier::Registered),
            "premium" => Ok(Tier::Premium),
            other => Err(format!("unknown tier: {}", other)),
        }
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Serialize)]
pub struct AdmissionDecision {
    /// Whether the request may proceed to enqueue.
    pub allowed: bool,
    /// Requests left in the current window (None = unlimited quota).
    pub remaining: Option<u32>,
    /// When the caller's window resets and budget is available again.
    pub reset_at: DateTime<Utc>,
}

/// Classify a caller into a tier from their presented API key.
///
/// Keys are compared in constant time against the configured registered and
/// premium key sets. No key, or a key matching neither set, is anonymous.
pub fn classify_tier(api_key: Option<&str>, config: &AdmissionConfig) -> Tier {
    let Some(key) = api_key else {
        return Tier::Anonymous;
    };

    if config
        .premium_keys
        .iter()
        .any(|k| constant_time_eq(k.as_bytes(), key.as_bytes()))
    {
        return Tier::Premium;
    }

    if config
        .registered_keys
        .iter()
        .any(|k| constant_time_eq(k.as_bytes(), key.as_bytes()))
    {
        return Tier::Registered;
    }

    Tier::Anonymous
}

/// Constant-time byte comparison to prevent timing attacks.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}
