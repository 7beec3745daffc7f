//! Tenant-scoped retrieval for TenantRAG.
//!
//! A query is classified into an intent, fanned out over the caller's
//! namespaces with per-namespace weights, checked by three independent
//! access control layers, optionally reranked, and gated on relevance.

#![warn(missing_docs)]

pub mod access;
pub mod classifier;
pub mod context;
pub mod orchestrator;
pub mod rerank;

pub use access::AccessController;
pub use classifier::{ClassifiedQuery, IntentClassifier, KeywordIntentClassifier, PERIOD_FIELD};
pub use context::{assemble_context, AnswerGenerator, ContextAssembler};
pub use orchestrator::{QueryDiagnostics, QueryOutcome, QueryResponse, RetrievalOrchestrator};
pub use rerank::{parse_rerank_response, HttpRerankClient, RerankFusion, RerankProvider, RerankScore};
