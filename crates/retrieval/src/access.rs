//! Three-layer access control for search results.
//!
//! 1. Partition isolation: targets are only ever built from the caller's
//!    own tenant and entity, so other entities' namespaces are unreachable.
//! 2. Query-time filter: every namespace query carries an owner or tenant
//!    equality filter plus a clearance bound.
//! 3. Post-hoc validation: every returned match is re-checked against the
//!    caller. A mismatch drops the match, is logged on the `security`
//!    target and written to the audit trail.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tenantrag_core::{
    generate_namespace, keys, AccessDecision, AuthContext, ClearanceTier, MetadataFilter,
    NamespaceContext, NamespaceKind, NamespacePrefixes, NamespaceStrategy, NamespaceTarget,
    RagError, Result, SearchMatch,
};
use tenantrag_storage::{AuditRecord, AuditStore};
use tracing::{debug, error, warn};

/// Access controller shared by every query.
pub struct AccessController {
    prefixes: NamespacePrefixes,
    audit: Option<Arc<dyn AuditStore>>,
    violations: AtomicU64,
}

impl AccessController {
    /// Controller without an audit trail.
    pub fn new(prefixes: NamespacePrefixes) -> Self {
        Self {
            prefixes,
            audit: None,
            violations: AtomicU64::new(0),
        }
    }

    /// Attach an audit store for denied matches.
    pub fn with_audit(mut self, audit: Arc<dyn AuditStore>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Prefix table used to build namespace names.
    pub fn prefixes(&self) -> &NamespacePrefixes {
        &self.prefixes
    }

    /// Matches dropped by post-hoc validation since startup.
    pub fn violation_count(&self) -> u64 {
        self.violations.load(Ordering::Relaxed)
    }

    /// Concrete namespaces the caller may search under `strategy`.
    ///
    /// Names come only from `auth`. When `strict` is set every kind of the
    /// strategy must resolve; otherwise kinds the caller has no context
    /// for (an entity namespace for a tenant-level caller) are skipped.
    pub fn partition_targets(
        &self,
        strategy: &NamespaceStrategy,
        auth: &AuthContext,
        strict: bool,
    ) -> Result<Vec<NamespaceTarget>> {
        let context = NamespaceContext::new(auth.tenant_id.clone(), auth.entity_id.clone());
        let mut targets = Vec::with_capacity(strategy.priority.len());

        for kind in &strategy.priority {
            match generate_namespace(*kind, &context, &self.prefixes) {
                Ok(namespace) => targets.push(NamespaceTarget {
                    namespace,
                    kind: *kind,
                    weight: strategy.weight(*kind),
                }),
                Err(e) if !strict => {
                    debug!(%kind, error = %e, "Skipping namespace without caller context");
                }
                Err(e) => return Err(e),
            }
        }

        if targets.is_empty() {
            return Err(RagError::config("no namespace resolvable for caller"));
        }
        Ok(targets)
    }

    /// Security filter attached to every query against a `kind` namespace.
    pub fn security_filter(&self, kind: NamespaceKind, auth: &AuthContext) -> MetadataFilter {
        let filter = MetadataFilter::new().at_most(keys::CLEARANCE_LEVEL, auth.clearance.level() as f64);
        match kind {
            NamespaceKind::EntityScoped => filter
                .equals(keys::OWNER_ID, auth.entity_id.clone().unwrap_or_default())
                .equals(keys::TENANT_ID, auth.tenant_id.clone()),
            NamespaceKind::TenantShared => filter.equals(keys::TENANT_ID, auth.tenant_id.clone()),
            NamespaceKind::Public => filter,
        }
    }

    /// Independent check of one match against the caller.
    ///
    /// `allowed` maps the namespaces searched for this caller to their kind.
    /// Anything unexpected, including missing metadata, is a denial.
    pub fn validate(
        &self,
        m: &SearchMatch,
        allowed: &HashMap<String, NamespaceKind>,
        auth: &AuthContext,
    ) -> AccessDecision {
        let Some(kind) = allowed.get(&m.namespace) else {
            return AccessDecision::deny(format!("namespace {} not searched for caller", m.namespace));
        };

        if let Some(stored) = m.meta_str(keys::NAMESPACE) {
            if stored != m.namespace {
                return AccessDecision::deny(format!(
                    "stored namespace {stored} differs from source {}",
                    m.namespace
                ));
            }
        }

        match kind {
            NamespaceKind::EntityScoped => {
                let Some(entity) = auth.entity_id.as_deref() else {
                    return AccessDecision::deny("entity namespace searched without caller entity");
                };
                match m.meta_str(keys::OWNER_ID) {
                    Some(owner) if owner == entity => {}
                    Some(owner) => return AccessDecision::deny(format!("owner {owner} is not caller")),
                    None => return AccessDecision::deny("missing owner_id"),
                }
                if let Some(denied) = check_tenant(m, auth) {
                    return denied;
                }
            }
            NamespaceKind::TenantShared => {
                if let Some(denied) = check_tenant(m, auth) {
                    return denied;
                }
            }
            NamespaceKind::Public => {}
        }

        let required = m
            .metadata
            .get(keys::CLEARANCE_LEVEL)
            .and_then(|v| v.as_f64())
            .and_then(integral_level)
            .and_then(ClearanceTier::from_level);
        match required {
            Some(tier) if auth.covers(tier) => AccessDecision::allow(),
            Some(tier) => AccessDecision::deny(format!(
                "requires {tier} clearance, caller has {}",
                auth.clearance
            )),
            None => AccessDecision::deny("missing or invalid clearance_level"),
        }
    }

    /// Drop every match that fails [`AccessController::validate`].
    ///
    /// Returns the surviving matches in their original order and the
    /// number dropped.
    pub async fn enforce(
        &self,
        matches: Vec<SearchMatch>,
        targets: &[NamespaceTarget],
        auth: &AuthContext,
    ) -> (Vec<SearchMatch>, usize) {
        let allowed: HashMap<String, NamespaceKind> = targets
            .iter()
            .map(|t| (t.namespace.clone(), t.kind))
            .collect();

        let mut kept = Vec::with_capacity(matches.len());
        let mut denied = 0;
        for m in matches {
            let decision = self.validate(&m, &allowed, auth);
            if decision.allowed {
                kept.push(m);
                continue;
            }

            denied += 1;
            self.violations.fetch_add(1, Ordering::Relaxed);
            let reason = decision.reason.unwrap_or_default();
            error!(
                target: "security",
                tenant = %auth.tenant_id,
                entity = auth.entity_id.as_deref().unwrap_or("-"),
                match_id = %m.id,
                namespace = %m.namespace,
                %reason,
                "Access violation: match dropped"
            );

            if let Some(audit) = &self.audit {
                let record = AuditRecord::new(
                    auth.tenant_id.clone(),
                    auth.entity_id.clone(),
                    m.id.clone(),
                    m.namespace.clone(),
                    reason,
                );
                if let Err(e) = audit.record_denial(&record).await {
                    warn!(error = %e, "Failed to write access audit record");
                }
            }
        }
        (kept, denied)
    }
}

fn check_tenant(m: &SearchMatch, auth: &AuthContext) -> Option<AccessDecision> {
    match m.meta_str(keys::TENANT_ID) {
        Some(tenant) if tenant == auth.tenant_id => None,
        Some(tenant) => Some(AccessDecision::deny(format!("tenant {tenant} is not caller tenant"))),
        None => Some(AccessDecision::deny("missing tenant_id")),
    }
}

/// Stored clearance as a tier level. Fractional, negative or out of range
/// values are rejected.
fn integral_level(level: f64) -> Option<u8> {
    if !level.is_finite() || level.fract() != 0.0 || !(0.0..=f64::from(u8::MAX)).contains(&level) {
        return None;
    }
    Some(level as u8)
}
