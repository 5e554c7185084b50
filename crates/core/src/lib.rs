pub mod audit;
pub mod config;
pub mod crm;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod knowledge;
pub mod scoring;
pub mod territory;
pub mod vocabulary;

pub use audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
pub use crm::{CrmLeadPayload, CrmOperation, CrmSync, CrmSyncError, CrmSyncReceipt};
pub use domain::lead::{
    Channel, ContactId, ConversationRole, ExtractedData, LeadField, LeadFlag, LeadRecord,
    LeadScore, MachineUsage, Urgency,
};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use flows::{FlowAction, FlowContext, FlowEngine, LeadState, TransitionOutcome};
pub use knowledge::{KnowledgeBase, KnowledgeStore, RagDocument, SearchQuery};
pub use scoring::{LeadScorer, ScoringPolicy};
pub use territory::{Salesperson, StaticTerritoryDirectory, Territory, TerritoryDirectory};
pub use vocabulary::{normalize_text, Vocabulary, VocabularyExtras};
