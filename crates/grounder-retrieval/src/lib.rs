//! Query side of the grounding engine: intent classification, hybrid query
//! planning, reranking and evidence-pack assembly.

pub mod config;
pub mod error;
pub mod evidence;
pub mod intent;
pub mod planner;
pub mod rerank;
pub mod retriever;

pub use config::RetrievalConfig;
pub use error::{Result, RetrievalError};
pub use evidence::{Confidence, Coverage, Degradation, EvidenceItem, EvidencePack};
pub use intent::Intent;
pub use planner::{Lane, PlanSummary, QueryFilters, QueryPlan, RangeFilter, Template};
pub use retriever::{QueryRequest, Retriever};
