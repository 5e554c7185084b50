use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use leadflow_core::crm::CrmOperation;
use leadflow_core::domain::lead::{ContactId, LeadRecord, LeadScore};
use leadflow_core::flows::{FlowAction, LeadState};

pub mod conversation_log;
pub mod lead;
pub mod memory;

pub use conversation_log::SqlConversationLogRepository;
pub use lead::SqlLeadRepository;
pub use memory::{InMemoryConversationLogRepository, InMemoryLeadRepository};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LeadListFilter {
    pub state: Option<LeadState>,
    pub score: Option<LeadScore>,
    pub limit: u32,
}

impl LeadListFilter {
    pub fn limit(&self) -> u32 {
        if self.limit == 0 {
            100
        } else {
            self.limit
        }
    }

    pub fn matches(&self, record: &LeadRecord) -> bool {
        self.state.map_or(true, |state| record.state() == state)
            && self.score.map_or(true, |score| record.score == Some(score))
    }
}

#[async_trait]
pub trait LeadRepository: Send + Sync {
    async fn find_by_contact(&self, contact_id: &ContactId)
        -> Result<Option<LeadRecord>, RepositoryError>;
    async fn save(&self, record: &LeadRecord) -> Result<(), RepositoryError>;
    /// Most recently updated first.
    async fn list(&self, filter: &LeadListFilter) -> Result<Vec<LeadRecord>, RepositoryError>;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TurnLogEntry {
    pub contact_id: ContactId,
    pub correlation_id: String,
    pub inbound_text: String,
    pub reply_text: String,
    pub state: LeadState,
    pub checkpoint: u8,
    pub response: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionLogEntry {
    pub contact_id: ContactId,
    pub correlation_id: String,
    pub from: LeadState,
    pub to: LeadState,
    pub guard: Option<String>,
    pub actions: Vec<FlowAction>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrmSyncLogEntry {
    pub contact_id: ContactId,
    pub correlation_id: String,
    pub operation: CrmOperation,
    pub crm_lead_id: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl CrmSyncLogEntry {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Append-only history of turns, transitions and CRM attempts per contact.
#[async_trait]
pub trait ConversationLogRepository: Send + Sync {
    async fn append_turn(&self, entry: TurnLogEntry) -> Result<(), RepositoryError>;
    async fn append_transition(&self, entry: TransitionLogEntry) -> Result<(), RepositoryError>;
    async fn append_crm_sync(&self, entry: CrmSyncLogEntry) -> Result<(), RepositoryError>;

    /// Oldest first.
    async fn list_turns(&self, contact_id: &ContactId) -> Result<Vec<TurnLogEntry>, RepositoryError>;
    async fn list_transitions(
        &self,
        contact_id: &ContactId,
    ) -> Result<Vec<TransitionLogEntry>, RepositoryError>;
    async fn list_crm_syncs(
        &self,
        contact_id: &ContactId,
    ) -> Result<Vec<CrmSyncLogEntry>, RepositoryError>;
}
