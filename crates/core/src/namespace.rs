//! Namespace taxonomy and strategy selection.
//!
//! Every chunk lives in exactly one namespace. Names are built
//! deterministically from a prefix table and the processing/query context.

use crate::error::{RagError, Result};
use crate::intent::QueryIntent;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Closed namespace taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamespaceKind {
    /// Shared by every entity of one tenant
    TenantShared,
    /// Private to a single entity
    EntityScoped,
    /// Visible to every tenant
    Public,
}

impl NamespaceKind {
    /// Lowercase label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TenantShared => "tenant_shared",
            Self::EntityScoped => "entity_scoped",
            Self::Public => "public",
        }
    }
}

impl std::fmt::Display for NamespaceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Prefix table used to build namespace names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespacePrefixes {
    /// Prepended to the entity id
    #[serde(default = "default_entity_prefix")]
    pub entity: String,

    /// Appended to the tenant id
    #[serde(default = "default_shared_suffix")]
    pub shared_suffix: String,

    /// Name of the public namespace
    #[serde(default = "default_public_name")]
    pub public: String,
}

fn default_entity_prefix() -> String {
    "employee_".to_string()
}

fn default_shared_suffix() -> String {
    "_shared".to_string()
}

fn default_public_name() -> String {
    "public".to_string()
}

impl Default for NamespacePrefixes {
    fn default() -> Self {
        Self {
            entity: default_entity_prefix(),
            shared_suffix: default_shared_suffix(),
            public: default_public_name(),
        }
    }
}

/// Context fields a namespace may be derived from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceContext {
    /// Tenant id
    pub tenant_id: Option<String>,

    /// Entity id
    pub entity_id: Option<String>,
}

impl NamespaceContext {
    /// Context carrying both tenant and entity.
    pub fn new(tenant_id: impl Into<String>, entity_id: Option<String>) -> Self {
        Self {
            tenant_id: Some(tenant_id.into()),
            entity_id,
        }
    }
}

/// Build the namespace name for `kind` from `context`.
///
/// Fails with a configuration error when the kind needs a context field
/// that is absent, or when the field could not be embedded safely.
pub fn generate_namespace(
    kind: NamespaceKind,
    context: &NamespaceContext,
    prefixes: &NamespacePrefixes,
) -> Result<String> {
    match kind {
        NamespaceKind::EntityScoped => {
            let entity = required(context.entity_id.as_deref(), "entity_id", kind)?;
            Ok(format!("{}{}", prefixes.entity, entity))
        }
        NamespaceKind::TenantShared => {
            let tenant = required(context.tenant_id.as_deref(), "tenant_id", kind)?;
            Ok(format!("{}{}", tenant, prefixes.shared_suffix))
        }
        NamespaceKind::Public => Ok(prefixes.public.clone()),
    }
}

fn required<'a>(value: Option<&'a str>, field: &str, kind: NamespaceKind) -> Result<&'a str> {
    let value = value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| RagError::config(format!("{kind} namespace requires {field}")))?;

    let valid = value
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if !valid {
        return Err(RagError::config(format!(
            "{field} '{value}' contains characters not allowed in a namespace"
        )));
    }
    Ok(value)
}

/// How ingested content is scoped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMode {
    /// Per-entity records (statements, contracts)
    EntityRecords,
    /// Tenant reference material (rules, notices)
    TenantReference,
    /// Public reference material
    PublicReference,
}

/// Search ordering across target namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    /// Query all namespaces concurrently
    Parallel,
    /// Query in priority order, stop once enough results are found
    Sequential,
}

/// Namespaces, weights and ordering selected for a query intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamespaceStrategy {
    /// Target kinds in priority order
    pub priority: Vec<NamespaceKind>,

    /// Score multiplier per kind
    pub weights: BTreeMap<NamespaceKind, f32>,

    /// Parallel or sequential fan-out
    pub mode: SearchMode,
}

impl NamespaceStrategy {
    fn build(entries: &[(NamespaceKind, f32)], mode: SearchMode) -> Self {
        Self {
            priority: entries.iter().map(|(k, _)| *k).collect(),
            weights: entries.iter().copied().collect(),
            mode,
        }
    }

    /// Strategy table for query intents.
    pub fn for_intent(intent: QueryIntent) -> Self {
        use NamespaceKind::*;
        match intent {
            QueryIntent::PersonalRecords => {
                Self::build(&[(EntityScoped, 1.5), (TenantShared, 1.0)], SearchMode::Sequential)
            }
            QueryIntent::PolicyLookup => {
                Self::build(&[(TenantShared, 1.2), (Public, 0.8)], SearchMode::Parallel)
            }
            QueryIntent::GeneralKnowledge => {
                Self::build(&[(Public, 1.0), (TenantShared, 0.9)], SearchMode::Parallel)
            }
            QueryIntent::Mixed => Self::build(
                &[(EntityScoped, 1.5), (TenantShared, 1.0), (Public, 0.7)],
                SearchMode::Parallel,
            ),
        }
    }

    /// Weight for `kind`, zero if the strategy does not target it.
    pub fn weight(&self, kind: NamespaceKind) -> f32 {
        self.weights.get(&kind).copied().unwrap_or(0.0)
    }

    /// Whether this strategy needs an entity id in the query context.
    pub fn requires_entity(&self) -> bool {
        self.priority.contains(&NamespaceKind::EntityScoped)
    }
}

/// Namespace kind used when ingesting under `mode`.
pub fn kind_for_mode(mode: ProcessingMode) -> NamespaceKind {
    match mode {
        ProcessingMode::EntityRecords => NamespaceKind::EntityScoped,
        ProcessingMode::TenantReference => NamespaceKind::TenantShared,
        ProcessingMode::PublicReference => NamespaceKind::Public,
    }
}

/// What a namespace strategy is being selected for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyRequest {
    /// Ingestion picks a single target from the processing mode
    Ingestion(ProcessingMode),
    /// Queries pick a weighted fan-out from the classified intent
    Query(QueryIntent),
}

/// Select a strategy. Ingestion yields a single-namespace strategy with
/// unit weight.
pub fn get_strategy(request: StrategyRequest) -> NamespaceStrategy {
    match request {
        StrategyRequest::Ingestion(mode) => {
            NamespaceStrategy::build(&[(kind_for_mode(mode), 1.0)], SearchMode::Sequential)
        }
        StrategyRequest::Query(intent) => NamespaceStrategy::for_intent(intent),
    }
}
