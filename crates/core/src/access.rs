//! Authorization context and access decisions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Ordered clearance tier. A caller sees a document only when
/// `caller >= required`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClearanceTier {
    /// Default tier for everyone
    Basic,
    /// Team leads and branch staff
    Standard,
    /// Headquarters and managers
    Advanced,
}

impl ClearanceTier {
    /// Numeric level stored in vector metadata for range filters.
    pub fn level(self) -> u8 {
        match self {
            Self::Basic => 1,
            Self::Standard => 2,
            Self::Advanced => 3,
        }
    }

    /// Inverse of [`ClearanceTier::level`].
    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            1 => Some(Self::Basic),
            2 => Some(Self::Standard),
            3 => Some(Self::Advanced),
            _ => None,
        }
    }

    /// Lowercase label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Standard => "standard",
            Self::Advanced => "advanced",
        }
    }
}

impl Default for ClearanceTier {
    fn default() -> Self {
        Self::Basic
    }
}

impl fmt::Display for ClearanceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ClearanceTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "basic" => Ok(Self::Basic),
            "standard" => Ok(Self::Standard),
            "advanced" => Ok(Self::Advanced),
            other => Err(format!("unknown clearance tier: {other}")),
        }
    }
}

/// Who is asking. Every surfaced match is re-checked against this.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthContext {
    /// Tenant (company/branch) the caller belongs to
    pub tenant_id: String,

    /// Entity (employee) the caller acts as
    pub entity_id: Option<String>,

    /// Caller clearance
    pub clearance: ClearanceTier,
}

impl AuthContext {
    /// Create an entity-bound context.
    pub fn for_entity(
        tenant_id: impl Into<String>,
        entity_id: impl Into<String>,
        clearance: ClearanceTier,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            entity_id: Some(entity_id.into()),
            clearance,
        }
    }

    /// Whether the caller's tier covers `required`.
    pub fn covers(&self, required: ClearanceTier) -> bool {
        self.clearance >= required
    }
}

/// Outcome of a single access check, kept for the audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessDecision {
    /// Whether the result may be surfaced
    pub allowed: bool,

    /// Human readable reason when denied
    pub reason: Option<String>,
}

impl AccessDecision {
    /// An allowing decision.
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    /// A denying decision with its reason.
    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}
