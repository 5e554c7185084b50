use chrono::{DateTime, Utc};
use sqlx::Row;

use leadflow_core::crm::CrmOperation;
use leadflow_core::domain::lead::ContactId;
use leadflow_core::flows::{FlowAction, LeadState};

use super::{
    ConversationLogRepository, CrmSyncLogEntry, RepositoryError, TransitionLogEntry, TurnLogEntry,
};
use crate::DbPool;

pub struct SqlConversationLogRepository {
    pool: DbPool,
}

impl SqlConversationLogRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn decode_err(error: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::Decode(error.to_string())
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value).map(|dt| dt.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now())
}

fn parse_state(value: &str) -> Result<LeadState, RepositoryError> {
    value.parse::<LeadState>().map_err(RepositoryError::Decode)
}

fn parse_operation(value: &str) -> Result<CrmOperation, RepositoryError> {
    match value {
        "create" => Ok(CrmOperation::Create),
        "update" => Ok(CrmOperation::Update),
        other => Err(RepositoryError::Decode(format!("unknown crm operation `{other}`"))),
    }
}

fn row_to_turn(row: &sqlx::sqlite::SqliteRow) -> Result<TurnLogEntry, RepositoryError> {
    let contact_id: String = row.try_get("contact_id").map_err(decode_err)?;
    let correlation_id: String = row.try_get("correlation_id").map_err(decode_err)?;
    let inbound_text: String = row.try_get("inbound_text").map_err(decode_err)?;
    let reply_text: String = row.try_get("reply_text").map_err(decode_err)?;
    let state: String = row.try_get("state").map_err(decode_err)?;
    let checkpoint: i64 = row.try_get("checkpoint").map_err(decode_err)?;
    let response_json: String = row.try_get("response_json").map_err(decode_err)?;
    let created_at: String = row.try_get("created_at").map_err(decode_err)?;

    Ok(TurnLogEntry {
        contact_id: ContactId(contact_id),
        correlation_id,
        inbound_text,
        reply_text,
        state: parse_state(&state)?,
        checkpoint: u8::try_from(checkpoint).map_err(decode_err)?,
        response: serde_json::from_str(&response_json).map_err(decode_err)?,
        created_at: parse_timestamp(&created_at),
    })
}

fn row_to_transition(row: &sqlx::sqlite::SqliteRow) -> Result<TransitionLogEntry, RepositoryError> {
    let contact_id: String = row.try_get("contact_id").map_err(decode_err)?;
    let correlation_id: String = row.try_get("correlation_id").map_err(decode_err)?;
    let from_state: String = row.try_get("from_state").map_err(decode_err)?;
    let to_state: String = row.try_get("to_state").map_err(decode_err)?;
    let guard: Option<String> = row.try_get("guard").map_err(decode_err)?;
    let actions_json: String = row.try_get("actions_json").map_err(decode_err)?;
    let created_at: String = row.try_get("created_at").map_err(decode_err)?;

    let actions: Vec<FlowAction> = serde_json::from_str(&actions_json).map_err(decode_err)?;
    Ok(TransitionLogEntry {
        contact_id: ContactId(contact_id),
        correlation_id,
        from: parse_state(&from_state)?,
        to: parse_state(&to_state)?,
        guard,
        actions,
        created_at: parse_timestamp(&created_at),
    })
}

fn row_to_crm_sync(row: &sqlx::sqlite::SqliteRow) -> Result<CrmSyncLogEntry, RepositoryError> {
    let contact_id: String = row.try_get("contact_id").map_err(decode_err)?;
    let correlation_id: String = row.try_get("correlation_id").map_err(decode_err)?;
    let operation: String = row.try_get("operation").map_err(decode_err)?;
    let crm_lead_id: Option<String> = row.try_get("crm_lead_id").map_err(decode_err)?;
    let error: Option<String> = row.try_get("error").map_err(decode_err)?;
    let created_at: String = row.try_get("created_at").map_err(decode_err)?;

    Ok(CrmSyncLogEntry {
        contact_id: ContactId(contact_id),
        correlation_id,
        operation: parse_operation(&operation)?,
        crm_lead_id,
        error,
        created_at: parse_timestamp(&created_at),
    })
}

#[async_trait::async_trait]
impl ConversationLogRepository for SqlConversationLogRepository {
    async fn append_turn(&self, entry: TurnLogEntry) -> Result<(), RepositoryError> {
        let response_json = serde_json::to_string(&entry.response).map_err(decode_err)?;

        sqlx::query(
            "INSERT INTO lead_turn (contact_id, correlation_id, inbound_text, reply_text,
                                    state, checkpoint, response_json, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(entry.contact_id.as_str())
        .bind(&entry.correlation_id)
        .bind(&entry.inbound_text)
        .bind(&entry.reply_text)
        .bind(entry.state.as_str())
        .bind(i64::from(entry.checkpoint))
        .bind(&response_json)
        .bind(entry.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn append_transition(&self, entry: TransitionLogEntry) -> Result<(), RepositoryError> {
        let actions_json = serde_json::to_string(&entry.actions).map_err(decode_err)?;

        sqlx::query(
            "INSERT INTO lead_transition (contact_id, correlation_id, from_state, to_state,
                                          guard, actions_json, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(entry.contact_id.as_str())
        .bind(&entry.correlation_id)
        .bind(entry.from.as_str())
        .bind(entry.to.as_str())
        .bind(entry.guard.as_deref())
        .bind(&actions_json)
        .bind(entry.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn append_crm_sync(&self, entry: CrmSyncLogEntry) -> Result<(), RepositoryError> {
        let outcome = if entry.succeeded() { "succeeded" } else { "failed" };

        sqlx::query(
            "INSERT INTO crm_sync_event (contact_id, correlation_id, operation, outcome,
                                         crm_lead_id, error, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(entry.contact_id.as_str())
        .bind(&entry.correlation_id)
        .bind(entry.operation.as_str())
        .bind(outcome)
        .bind(entry.crm_lead_id.as_deref())
        .bind(entry.error.as_deref())
        .bind(entry.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_turns(&self, contact_id: &ContactId) -> Result<Vec<TurnLogEntry>, RepositoryError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(
            "SELECT contact_id, correlation_id, inbound_text, reply_text, state, checkpoint,
                    response_json, created_at
             FROM lead_turn WHERE contact_id = ? ORDER BY id ASC",
        )
        .bind(contact_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_turn).collect::<Result<Vec<_>, _>>()
    }

    async fn list_transitions(
        &self,
        contact_id: &ContactId,
    ) -> Result<Vec<TransitionLogEntry>, RepositoryError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(
            "SELECT contact_id, correlation_id, from_state, to_state, guard, actions_json, created_at
             FROM lead_transition WHERE contact_id = ? ORDER BY id ASC",
        )
        .bind(contact_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_transition).collect::<Result<Vec<_>, _>>()
    }

    async fn list_crm_syncs(
        &self,
        contact_id: &ContactId,
    ) -> Result<Vec<CrmSyncLogEntry>, RepositoryError> {
        let rows: Vec<sqlx::sqlite::SqliteRow> = sqlx::query(
            "SELECT contact_id, correlation_id, operation, crm_lead_id, error, created_at
             FROM crm_sync_event WHERE contact_id = ? ORDER BY id ASC",
        )
        .bind(contact_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_crm_sync).collect::<Result<Vec<_>, _>>()
    }
}
