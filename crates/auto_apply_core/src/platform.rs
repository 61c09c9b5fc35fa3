//! crates/auto_apply_core/src/platform.rs
//!
//! The closed set of platforms the engine throttles, and their default limits.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ports::PortError;

/// A job board (or channel) with its own throughput quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    LinkedIn,
    Indeed,
    Glassdoor,
    Email,
}

impl Platform {
    pub const ALL: [Platform; 4] = [
        Platform::LinkedIn,
        Platform::Indeed,
        Platform::Glassdoor,
        Platform::Email,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::LinkedIn => "linkedin",
            Platform::Indeed => "indeed",
            Platform::Glassdoor => "glassdoor",
            Platform::Email => "email",
        }
    }

    /// Resolves a job's `source` field. `None` means the platform is not
    /// throttled at all.
    pub fn from_source(source: &str) -> Option<Platform> {
        let normalized: String = source
            .trim()
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' ' | '.'))
            .flat_map(char::to_lowercase)
            .collect();
        match normalized.as_str() {
            "linkedin" | "linkedincom" => Some(Platform::LinkedIn),
            "indeed" | "indeedcom" => Some(Platform::Indeed),
            "glassdoor" | "glassdoorcom" => Some(Platform::Glassdoor),
            "email" | "mail" => Some(Platform::Email),
            _ => None,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = PortError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Platform::from_source(s)
            .ok_or_else(|| PortError::InvalidInput(format!("unsupported platform '{}'", s)))
    }
}

/// Quota for one platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformLimits {
    pub hourly: u32,
    pub daily: u32,
    /// When the hourly headroom drops below this, the remaining attempts of
    /// the hour are spaced out instead of fired back to back.
    pub burst_floor: u32,
}

impl PlatformLimits {
    pub const fn new(hourly: u32, daily: u32, burst_floor: u32) -> Self {
        Self {
            hourly,
            daily,
            burst_floor,
        }
    }

    pub fn validate(&self) -> Result<(), PortError> {
        if self.hourly == 0 || self.daily == 0 {
            return Err(PortError::InvalidInput(
                "hourly and daily limits must be at least 1".to_string(),
            ));
        }
        if self.hourly > self.daily {
            return Err(PortError::InvalidInput(format!(
                "hourly limit {} exceeds daily limit {}",
                self.hourly, self.daily
            )));
        }
        Ok(())
    }
}

/// Default limits per platform plus tracker hardening knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub linkedin: PlatformLimits,
    pub indeed: PlatformLimits,
    pub glassdoor: PlatformLimits,
    pub email: PlatformLimits,
    /// Deny after this many consecutive tracker storage errors.
    /// `None` keeps the tracker purely fail-open.
    pub fail_closed_after: Option<u32>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            linkedin: PlatformLimits::new(5, 50, 1),
            indeed: PlatformLimits::new(10, 100, 2),
            glassdoor: PlatformLimits::new(3, 30, 1),
            email: PlatformLimits::new(5, 20, 2),
            fail_closed_after: None,
        }
    }
}

impl RateLimitConfig {
    pub fn limits(&self, platform: Platform) -> PlatformLimits {
        match platform {
            Platform::LinkedIn => self.linkedin,
            Platform::Indeed => self.indeed,
            Platform::Glassdoor => self.glassdoor,
            Platform::Email => self.email,
        }
    }

    pub fn set_limits(&mut self, platform: Platform, limits: PlatformLimits) {
        match platform {
            Platform::LinkedIn => self.linkedin = limits,
            Platform::Indeed => self.indeed = limits,
            Platform::Glassdoor => self.glassdoor = limits,
            Platform::Email => self.email = limits,
        }
    }
}
