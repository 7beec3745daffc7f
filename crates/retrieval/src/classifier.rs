//! Query intent classification.

use regex::Regex;
use tenantrag_core::{MetadataFilter, QueryIntent, Result, RagError};
use tracing::debug;

/// Metadata field holding the statement period (`YYYY-MM`).
pub const PERIOD_FIELD: &str = "period";

/// Classified query.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedQuery {
    /// Dominant intent
    pub intent: QueryIntent,

    /// Structured filter extracted from the text, dropped by the fallback retry
    pub filter: Option<MetadataFilter>,
}

/// Maps query text onto a [`QueryIntent`].
pub trait IntentClassifier: Send + Sync {
    /// Classify `text`.
    fn classify(&self, text: &str) -> ClassifiedQuery;
}

/// Keyword classifier for Korean and English queries.
///
/// Each intent owns one pattern; the intent with the most hits wins. No
/// hits or a tie yields [`QueryIntent::Mixed`]. A year/month mention is
/// turned into an equality filter on [`PERIOD_FIELD`].
pub struct KeywordIntentClassifier {
    personal: Regex,
    policy: Regex,
    general: Regex,
    period: Regex,
}

const PERSONAL_PATTERN: &str = r"(?i)(^|\s)(내|나의|제|저의)(\s|$)|\b(my|mine|me)\b|급여|수수료|지급액|환수|명세|정산|contract|계약|salary|payslip|commission|statement|clawback";
const POLICY_PATTERN: &str = r"(?i)규정|정책|기준|규칙|절차|지침|\b(policy|policies|rule|rules|regulation|guideline|procedure)\b";
const GENERAL_PATTERN: &str = r"(?i)상품|보험|약관|보장|무엇|뭐야|\b(what is|product|insurance|coverage|explain)\b";
const PERIOD_PATTERN: &str = r"(\d{4})\s*[-./년]\s*(\d{1,2})\s*월?";

impl KeywordIntentClassifier {
    /// Classifier with the built-in keyword sets.
    pub fn new() -> Result<Self> {
        Self::with_patterns(PERSONAL_PATTERN, POLICY_PATTERN, GENERAL_PATTERN)
    }

    /// Classifier with custom keyword patterns.
    pub fn with_patterns(personal: &str, policy: &str, general: &str) -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| RagError::config(format!("invalid intent pattern: {e}")))
        };
        Ok(Self {
            personal: compile(personal)?,
            policy: compile(policy)?,
            general: compile(general)?,
            period: compile(PERIOD_PATTERN)?,
        })
    }

    fn period_filter(&self, text: &str) -> Option<MetadataFilter> {
        let caps = self.period.captures(text)?;
        let year: u32 = caps.get(1)?.as_str().parse().ok()?;
        let month: u32 = caps.get(2)?.as_str().parse().ok()?;
        if !(1..=12).contains(&month) {
            return None;
        }
        Some(MetadataFilter::new().equals(PERIOD_FIELD, format!("{year:04}-{month:02}")))
    }
}

impl IntentClassifier for KeywordIntentClassifier {
    fn classify(&self, text: &str) -> ClassifiedQuery {
        let scores = [
            (QueryIntent::PersonalRecords, self.personal.find_iter(text).count()),
            (QueryIntent::PolicyLookup, self.policy.find_iter(text).count()),
            (QueryIntent::GeneralKnowledge, self.general.find_iter(text).count()),
        ];

        let best = scores.iter().map(|(_, n)| *n).max().unwrap_or(0);
        let leaders: Vec<QueryIntent> = scores
            .iter()
            .filter(|(_, n)| best > 0 && *n == best)
            .map(|(intent, _)| *intent)
            .collect();

        let intent = match leaders.as_slice() {
            [single] => *single,
            _ => QueryIntent::Mixed,
        };
        let filter = self.period_filter(text);

        debug!(%intent, has_filter = filter.is_some(), "Classified query");
        ClassifiedQuery { intent, filter }
    }
}
