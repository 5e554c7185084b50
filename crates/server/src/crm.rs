//! HTTP client for the Pilot CRM lead API.
//!
//! - `POST {api_url}/leads` creates a lead and returns its id
//! - `PUT {api_url}/leads/{crm_id}` updates an existing lead
//! - `POST {api_url}/leads/{crm_id}/assign` hands an assigned lead to its salesperson

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use leadflow_core::config::CrmConfig;
use leadflow_core::crm::{CrmLeadPayload, CrmOperation, CrmSync, CrmSyncError, CrmSyncReceipt};
use leadflow_core::domain::lead::LeadRecord;
use leadflow_core::flows::LeadState;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

pub struct PilotCrmClient {
    client: Client,
    api_url: String,
    api_key: SecretString,
}

#[derive(Serialize)]
struct AssignRequest<'a> {
    assigned_to: &'a str,
    zone: Option<&'a str>,
    assigned_at: String,
}

impl PilotCrmClient {
    pub fn new(config: &CrmConfig) -> Result<Self, CrmSyncError> {
        let api_key = config.api_key.clone().ok_or(CrmSyncError::NotConfigured)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| CrmSyncError::Transport(error.to_string()))?;

        Ok(Self { client, api_url: config.api_url.trim_end_matches('/').to_owned(), api_key })
    }

    async fn create(&self, payload: &CrmLeadPayload) -> Result<String, CrmSyncError> {
        let response = self
            .client
            .post(format!("{}/leads", self.api_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(payload)
            .send()
            .await
            .map_err(|error| CrmSyncError::Transport(error.to_string()))?;
        let body = read_success(response).await?;

        match body.get("id") {
            Some(Value::String(id)) if !id.is_empty() => Ok(id.clone()),
            Some(Value::Number(id)) => Ok(id.to_string()),
            _ => Err(CrmSyncError::Decode("create response has no lead id".to_owned())),
        }
    }

    async fn update(&self, crm_id: &str, payload: &CrmLeadPayload) -> Result<(), CrmSyncError> {
        let response = self
            .client
            .put(format!("{}/leads/{crm_id}", self.api_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(payload)
            .send()
            .await
            .map_err(|error| CrmSyncError::Transport(error.to_string()))?;
        read_success(response).await.map(|_| ())
    }

    async fn assign(&self, crm_id: &str, record: &LeadRecord) -> Result<(), CrmSyncError> {
        let Some(salesperson) = &record.assigned_salesperson else {
            return Ok(());
        };
        let request = AssignRequest {
            assigned_to: &salesperson.id,
            zone: record.data.zone.as_deref(),
            assigned_at: Utc::now().to_rfc3339(),
        };

        let response = self
            .client
            .post(format!("{}/leads/{crm_id}/assign", self.api_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|error| CrmSyncError::Transport(error.to_string()))?;
        read_success(response).await.map(|_| ())
    }
}

async fn read_success(response: reqwest::Response) -> Result<Value, CrmSyncError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(CrmSyncError::Rejected { status: status.as_u16(), body });
    }

    let text = response.text().await.map_err(|error| CrmSyncError::Transport(error.to_string()))?;
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&text).map_err(|error| CrmSyncError::Decode(error.to_string()))
}

#[async_trait]
impl CrmSync for PilotCrmClient {
    /// An assignment failure is logged; the lead itself is already stored remotely.
    async fn sync(&self, record: &LeadRecord) -> Result<CrmSyncReceipt, CrmSyncError> {
        let payload = CrmLeadPayload::from(record);
        let operation = CrmOperation::for_record(record);

        let crm_lead_id = match &record.crm_id {
            Some(crm_id) => {
                self.update(crm_id, &payload).await?;
                crm_id.clone()
            }
            None => self.create(&payload).await?,
        };

        if record.state() == LeadState::Assigned {
            if let Err(error) = self.assign(&crm_lead_id, record).await {
                warn!(
                    event_name = "crm.assign.failed",
                    contact_id = record.contact_id.as_str(),
                    crm_lead_id = %crm_lead_id,
                    error = %error,
                    "crm salesperson assignment failed"
                );
            }
        }

        info!(
            event_name = "crm.sync.succeeded",
            contact_id = record.contact_id.as_str(),
            crm_lead_id = %crm_lead_id,
            operation = operation.as_str(),
            "lead synced to crm"
        );
        Ok(CrmSyncReceipt { crm_lead_id, operation })
    }
}
