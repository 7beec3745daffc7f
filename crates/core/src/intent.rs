//! Query intents recognised by the classifier.

use serde::{Deserialize, Serialize};

/// Closed set of query intents. Each maps to exactly one namespace
/// strategy, see [`crate::NamespaceStrategy::for_intent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryIntent {
    /// Questions about the caller's own records (pay, contracts, clawbacks)
    PersonalRecords,
    /// Questions about tenant-wide rules and policies
    PolicyLookup,
    /// General product or domain knowledge
    GeneralKnowledge,
    /// No dominant signal
    Mixed,
}

impl QueryIntent {
    /// All intents, in declaration order.
    pub const ALL: [QueryIntent; 4] = [
        Self::PersonalRecords,
        Self::PolicyLookup,
        Self::GeneralKnowledge,
        Self::Mixed,
    ];

    /// Lowercase label used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PersonalRecords => "personal_records",
            Self::PolicyLookup => "policy_lookup",
            Self::GeneralKnowledge => "general_knowledge",
            Self::Mixed => "mixed",
        }
    }
}

impl std::fmt::Display for QueryIntent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
