use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::lead::{ConversationRole, LeadRecord};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrmContact {
    pub name: Option<String>,
    pub zone: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrmTechnicalData {
    pub machine_brand: Option<String>,
    pub machine_model: Option<String>,
    pub machine_use: Option<String>,
    pub implement_interest: Option<String>,
    pub urgency: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrmHistoryEntry {
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Lead document pushed to the CRM on create and update.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrmLeadPayload {
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub state: String,
    pub score: Option<String>,
    pub contact: CrmContact,
    pub technical_data: CrmTechnicalData,
    pub conversation_history: Vec<CrmHistoryEntry>,
    pub flags: Vec<String>,
    pub checkpoint: u8,
    pub assigned_to: Option<String>,
}

impl From<&LeadRecord> for CrmLeadPayload {
    fn from(record: &LeadRecord) -> Self {
        let data = &record.data;
        Self {
            source: record.channel().as_str().to_owned(),
            created_at: record.created_at,
            state: record.state().as_str().to_owned(),
            score: record.score.map(|score| score.as_str().to_owned()),
            contact: CrmContact { name: data.name.clone(), zone: data.zone.clone() },
            technical_data: CrmTechnicalData {
                machine_brand: data.machine.brand.clone(),
                machine_model: data.machine.model.clone(),
                machine_use: data.machine.usage.map(|usage| usage.as_str().to_owned()),
                implement_interest: data.implement_of_interest.clone(),
                urgency: data.urgency.map(|urgency| urgency.as_str().to_owned()),
            },
            conversation_history: record
                .history
                .iter()
                .map(|turn| CrmHistoryEntry {
                    role: match turn.role {
                        ConversationRole::Lead => "user".to_owned(),
                        ConversationRole::Assistant => "assistant".to_owned(),
                    },
                    content: turn.text.clone(),
                    timestamp: turn.at,
                })
                .collect(),
            flags: record.flags.iter().map(|flag| flag.as_str().to_owned()).collect(),
            checkpoint: record.checkpoint(),
            assigned_to: record.assigned_salesperson.as_ref().map(|sp| sp.id.clone()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrmOperation {
    Create,
    Update,
}

impl CrmOperation {
    pub fn for_record(record: &LeadRecord) -> Self {
        if record.crm_id.is_some() {
            Self::Update
        } else {
            Self::Create
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrmSyncReceipt {
    pub crm_lead_id: String,
    pub operation: CrmOperation,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CrmSyncError {
    #[error("crm api key is not configured")]
    NotConfigured,
    #[error("crm request failed: {0}")]
    Transport(String),
    #[error("crm rejected the lead with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("crm response could not be decoded: {0}")]
    Decode(String),
}

/// Pushes a lead to the external CRM. Creates when the record has no `crm_id`,
/// updates otherwise.
#[async_trait]
pub trait CrmSync: Send + Sync {
    async fn sync(&self, record: &LeadRecord) -> Result<CrmSyncReceipt, CrmSyncError>;
}
