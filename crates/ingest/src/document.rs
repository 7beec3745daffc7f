//! Source documents handed to ingestion.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tenantrag_core::{
    content_hash, generate_namespace, kind_for_mode, ClearanceTier, MetadataValue,
    NamespaceContext, NamespaceKind, NamespacePrefixes, ProcessingMode, RagError, Result,
};

/// Parsed text of one business document with its ownership.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDocument {
    /// Stable document id
    pub id: String,

    /// Extracted text
    pub content: String,

    /// How the document is scoped
    pub mode: ProcessingMode,

    /// Owning tenant
    #[serde(default)]
    pub tenant_id: Option<String>,

    /// Owning entity, entity records only
    #[serde(default)]
    pub owner_id: Option<String>,

    /// Clearance required to read the document
    #[serde(default)]
    pub clearance: ClearanceTier,

    /// Document kind, e.g. `pay_statement`
    #[serde(default = "default_doc_type")]
    pub doc_type: String,

    /// Extra fields copied onto every chunk
    #[serde(default)]
    pub metadata: BTreeMap<String, Option<MetadataValue>>,
}

fn default_doc_type() -> String {
    "document".to_string()
}

impl SourceDocument {
    fn base(id: impl Into<String>, content: impl Into<String>, mode: ProcessingMode) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            mode,
            tenant_id: None,
            owner_id: None,
            clearance: ClearanceTier::default(),
            doc_type: default_doc_type(),
            metadata: BTreeMap::new(),
        }
    }

    /// A record owned by one entity of `tenant`.
    pub fn entity_record(
        id: impl Into<String>,
        tenant: impl Into<String>,
        owner: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: Some(tenant.into()),
            owner_id: Some(owner.into()),
            ..Self::base(id, content, ProcessingMode::EntityRecords)
        }
    }

    /// Reference material shared across `tenant`.
    pub fn tenant_reference(id: impl Into<String>, tenant: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tenant_id: Some(tenant.into()),
            ..Self::base(id, content, ProcessingMode::TenantReference)
        }
    }

    /// Reference material visible to every tenant.
    pub fn public_reference(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::base(id, content, ProcessingMode::PublicReference)
    }

    /// Set the required clearance.
    pub fn with_clearance(mut self, clearance: ClearanceTier) -> Self {
        self.clearance = clearance;
        self
    }

    /// Set the document kind.
    pub fn with_doc_type(mut self, doc_type: impl Into<String>) -> Self {
        self.doc_type = doc_type.into();
        self
    }

    /// Add an extra field. `None` is kept here and dropped on upsert.
    pub fn with_field(mut self, key: impl Into<String>, value: Option<MetadataValue>) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Hash of the content together with ownership, clearance, kind and
    /// extra fields. Identifies an ingestion run: any change to what ends
    /// up in the index starts a new run.
    pub fn fingerprint(&self) -> Result<String> {
        Ok(content_hash(&serde_json::to_string(self)?))
    }

    /// Namespace kind for this document's mode.
    pub fn namespace_kind(&self) -> NamespaceKind {
        kind_for_mode(self.mode)
    }

    /// Target namespace.
    pub fn namespace(&self, prefixes: &NamespacePrefixes) -> Result<String> {
        let context = NamespaceContext {
            tenant_id: self.tenant_id.clone(),
            entity_id: self.owner_id.clone(),
        };
        generate_namespace(self.namespace_kind(), &context, prefixes)
    }

    /// Check that ownership fields fit the processing mode.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(RagError::invalid_input("document id is empty"));
        }
        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());

        match self.mode {
            ProcessingMode::EntityRecords if !present(&self.owner_id) || !present(&self.tenant_id) => {
                Err(RagError::invalid_input(format!(
                    "entity record {} needs tenant_id and owner_id",
                    self.id
                )))
            }
            ProcessingMode::TenantReference if !present(&self.tenant_id) => Err(RagError::invalid_input(
                format!("tenant reference {} needs tenant_id", self.id),
            )),
            ProcessingMode::TenantReference | ProcessingMode::PublicReference if self.owner_id.is_some() => {
                Err(RagError::invalid_input(format!(
                    "shared document {} must not have an owner",
                    self.id
                )))
            }
            ProcessingMode::PublicReference if self.tenant_id.is_some() => Err(RagError::invalid_input(
                format!("public document {} must not have a tenant", self.id),
            )),
            _ => Ok(()),
        }
    }
}
