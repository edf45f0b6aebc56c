//! Named rate-limit policies.

use std::fmt;
use std::time::Duration;

use vetline_core::config::{PolicyConfig, RateLimitConfig};

/// Which limit a request is counted against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyName {
    DistressCall,
    AiAssist,
    General,
}

impl PolicyName {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyName::DistressCall => "distress-call",
            PolicyName::AiAssist => "ai-assist",
            PolicyName::General => "general",
        }
    }
}

impl fmt::Display for PolicyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed-window limit: at most `max_requests` per `window` per key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    pub name: PolicyName,
    pub window: Duration,
    pub max_requests: u32,
    /// Message returned to rejected callers
    pub message: String,
}

impl Policy {
    pub fn from_config(name: PolicyName, config: &PolicyConfig) -> Self {
        Self {
            name,
            window: Duration::from_secs(config.window_secs),
            max_requests: config.max_requests,
            message: config.message.clone(),
        }
    }
}

/// The three policies the API applies
#[derive(Debug, Clone)]
pub struct Policies {
    pub distress_call: Policy,
    pub ai_assist: Policy,
    pub general: Policy,
}

impl Policies {
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self {
            distress_call: Policy::from_config(PolicyName::DistressCall, &config.distress_call),
            ai_assist: Policy::from_config(PolicyName::AiAssist, &config.ai_assist),
            general: Policy::from_config(PolicyName::General, &config.general),
        }
    }

    pub fn get(&self, name: PolicyName) -> &Policy {
        match name {
            PolicyName::DistressCall => &self.distress_call,
            PolicyName::AiAssist => &self.ai_assist,
            PolicyName::General => &self.general,
        }
    }
}

impl Default for Policies {
    fn default() -> Self {
        Self::from_config(&RateLimitConfig::default())
    }
}
