//! Rate limiter (component B): cron-scheduled per-agent blackouts, sliding
//! sliding-window limits in the shared store, and claims-driven tier limits.

pub mod agent;
pub mod sliding;

pub use agent::AgentCronLimiter;
pub use sliding::{SlidingWindowLimiter, WindowConfig};

use chrono::{DateTime, Utc};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    NotLimited,
    LimitedAgent,
    LimitedIp,
    LimitedIpUa,
    LimitedTier,
}

impl Outcome {
    pub fn metric_label(self) -> &'static str {
        match self {
            Outcome::NotLimited => "not_limited",
            Outcome::LimitedAgent => "agent",
            Outcome::LimitedIp => "ip",
            Outcome::LimitedIpUa => "ip_ua",
            Outcome::LimitedTier => "tier",
        }
    }

    pub fn is_limited(self) -> bool {
        !matches!(self, Outcome::NotLimited)
    }
}

pub struct RateLimiter {
    agents: Vec<AgentCronLimiter>,
    sliding: SlidingWindowLimiter,
    ip_cfg: WindowConfig,
    ipua_cfg: WindowConfig,
    tier_cfg: HashMap<u8, WindowConfig>,
}

impl RateLimiter {
    pub fn new(
        agents: Vec<AgentCronLimiter>,
        sliding: SlidingWindowLimiter,
        ip_cfg: WindowConfig,
        ipua_cfg: WindowConfig,
        tier_cfg: HashMap<u8, WindowConfig>,
    ) -> Self {
        Self {
            agents,
            sliding,
            ip_cfg,
            ipua_cfg,
            tier_cfg,
        }
    }

    /// Runs the full admission pipeline for an anonymous client request
    /// agent blackout, then IP window, then IP+UA window.
    pub async fn check(&self, now: DateTime<Utc>, ip: &str, user_agent: &str) -> Outcome {
        for limiter in &self.agents {
            if user_agent.contains(&limiter.agent) && limiter.is_limited(now) {
                return Outcome::LimitedAgent;
            }
        }

        let now_micros = now.timestamp_micros();

        if self.sliding.hit(&format!("rl:ip:{ip}"), now_micros, self.ip_cfg).await {
            return Outcome::LimitedIp;
        }

        let ipua_key = format!("rl:ipua:{ip}:{user_agent}");
        if self.sliding.hit(&ipua_key, now_micros, self.ipua_cfg).await {
            return Outcome::LimitedIpUa;
        }

        Outcome::NotLimited
    }

    /// Tier limit keyed by `(org, ip)`, driven by the `tier` claim on a
    /// validated bearer token's tier claim.
    pub async fn check_tier(&self, now: DateTime<Utc>, org: &str, ip: &str, tier: u8) -> Outcome {
        let Some(cfg) = self.tier_cfg.get(&tier) else {
            return Outcome::NotLimited;
        };
        let key = format!("rl:tier:{org}:{ip}");
        if self.sliding.hit(&key, now.timestamp_micros(), *cfg).await {
            Outcome::LimitedTier
        } else {
            Outcome::NotLimited
        }
    }
}
