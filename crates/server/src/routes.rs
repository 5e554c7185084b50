use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use leadflow_agent::advisor::{AdvisorErrorBody, AdvisorReply, TechnicalAdvisor};
use leadflow_agent::runtime::{AgentRuntime, InboundMessage, LeadResponse, TurnResult};
use leadflow_core::config::KnowledgeConfig;
use leadflow_core::domain::lead::{ContactId, LeadRecord};
use leadflow_core::errors::{ApplicationError, InterfaceError};
use leadflow_core::knowledge::{KnowledgeBase, KnowledgeOrigin, KnowledgeStore};
use leadflow_db::repositories::{
    ConversationLogRepository, CrmSyncLogEntry, LeadRepository, TransitionLogEntry, TurnLogEntry,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::locks::ContactLocks;

#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<AgentRuntime>,
    pub advisor: Option<Arc<TechnicalAdvisor>>,
    pub leads: Arc<dyn LeadRepository>,
    pub conversation_log: Arc<dyn ConversationLogRepository>,
    pub knowledge: Arc<KnowledgeStore>,
    pub knowledge_config: KnowledgeConfig,
    pub locks: ContactLocks,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    pub correlation_id: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AdvisorQueryRequest {
    pub query: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeReloadResponse {
    pub documents: usize,
    pub fingerprint: String,
    pub origin: KnowledgeOrigin,
}

type ApiError = (StatusCode, Json<ErrorBody>);

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/messages", post(post_message))
        .route("/api/v1/leads/{contact_id}", get(get_lead))
        .route("/api/v1/advisor/query", post(advisor_query))
        .route("/api/v1/knowledge/reload", post(reload_knowledge))
        .with_state(state)
}

fn api_error(error: InterfaceError) -> ApiError {
    let status = match &error {
        InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorBody {
            error: error.user_message().to_owned(),
            message: error.to_string(),
            correlation_id: error.correlation_id().to_owned(),
        }),
    )
}

fn persistence_error(error: impl std::fmt::Display, correlation_id: &str) -> ApiError {
    api_error(ApplicationError::Persistence(error.to_string()).into_interface(correlation_id))
}

pub async fn post_message(
    State(state): State<AppState>,
    Json(message): Json<InboundMessage>,
) -> Result<Json<LeadResponse>, ApiError> {
    let correlation_id = Uuid::new_v4().to_string();
    if message.contact_id.as_str().trim().is_empty() {
        return Err(api_error(InterfaceError::BadRequest {
            message: "contact_id must not be empty".to_owned(),
            correlation_id,
        }));
    }

    let _guard = state.locks.acquire(message.contact_id.as_str()).await;

    let prior = state
        .leads
        .find_by_contact(&message.contact_id)
        .await
        .map_err(|error| persistence_error(error, &correlation_id))?;
    let turn = state.runtime.handle_turn(prior, &message, &correlation_id).await;

    state
        .leads
        .save(&turn.record)
        .await
        .map_err(|error| persistence_error(error, &correlation_id))?;
    record_turn_log(state.conversation_log.as_ref(), &message, &turn, &correlation_id).await;

    Ok(Json(turn.response))
}

/// Log writes are best effort: the lead itself is already saved.
async fn record_turn_log(
    log: &dyn ConversationLogRepository,
    message: &InboundMessage,
    turn: &TurnResult,
    correlation_id: &str,
) {
    let now = Utc::now();
    let contact_id = &turn.record.contact_id;
    let mut failures = Vec::new();

    let response = serde_json::to_value(&turn.response).unwrap_or_default();
    if let Err(error) = log
        .append_turn(TurnLogEntry {
            contact_id: contact_id.clone(),
            correlation_id: correlation_id.to_owned(),
            inbound_text: message.text.clone(),
            reply_text: turn.response.reply_to_user.clone(),
            state: turn.response.state_transition,
            checkpoint: turn.response.checkpoint,
            response,
            created_at: now,
        })
        .await
    {
        failures.push(error.to_string());
    }

    for outcome in &turn.transitions {
        if let Err(error) = log
            .append_transition(TransitionLogEntry {
                contact_id: contact_id.clone(),
                correlation_id: correlation_id.to_owned(),
                from: outcome.from,
                to: outcome.to,
                guard: outcome.guard.map(|guard| {
                    serde_json::to_value(guard)
                        .ok()
                        .and_then(|value| value.as_str().map(str::to_owned))
                        .unwrap_or_default()
                }),
                actions: outcome.actions.clone(),
                created_at: now,
            })
            .await
        {
            failures.push(error.to_string());
        }
    }

    if let Some(attempt) = &turn.crm {
        let (crm_lead_id, sync_error) = match &attempt.result {
            Ok(receipt) => (Some(receipt.crm_lead_id.clone()), None),
            Err(sync_error) => (turn.record.crm_id.clone(), Some(sync_error.to_string())),
        };
        if let Err(error) = log
            .append_crm_sync(CrmSyncLogEntry {
                contact_id: contact_id.clone(),
                correlation_id: correlation_id.to_owned(),
                operation: attempt.operation,
                crm_lead_id,
                error: sync_error,
                created_at: now,
            })
            .await
        {
            failures.push(error.to_string());
        }
    }

    if !failures.is_empty() {
        warn!(
            event_name = "lead.turn_log.failed",
            correlation_id,
            contact_id = contact_id.as_str(),
            failures = ?failures,
            "conversation log write failed"
        );
    }
}

pub async fn get_lead(
    State(state): State<AppState>,
    Path(contact_id): Path<String>,
) -> Result<Json<LeadRecord>, ApiError> {
    let correlation_id = Uuid::new_v4().to_string();
    let record = state
        .leads
        .find_by_contact(&ContactId(contact_id.clone()))
        .await
        .map_err(|error| persistence_error(error, &correlation_id))?;

    match record {
        Some(record) => Ok(Json(record)),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorBody {
                error: "lead not found".to_owned(),
                message: format!("no lead for contact `{contact_id}`"),
                correlation_id,
            }),
        )),
    }
}

pub async fn advisor_query(
    State(state): State<AppState>,
    Json(request): Json<AdvisorQueryRequest>,
) -> (StatusCode, Json<AdvisorReply>) {
    let refuse = |status: StatusCode, reason: &str| {
        (
            status,
            Json(AdvisorReply::Error(AdvisorErrorBody {
                error: "No se pudo procesar la consulta".to_owned(),
                reason: reason.to_owned(),
            })),
        )
    };

    if request.query.trim().is_empty() {
        return refuse(StatusCode::BAD_REQUEST, "query must not be empty");
    }
    let Some(advisor) = &state.advisor else {
        return refuse(StatusCode::SERVICE_UNAVAILABLE, "llm provider is not configured");
    };

    let reply = advisor.process_query(&request.query).await;
    let status = if reply.is_error() { StatusCode::BAD_GATEWAY } else { StatusCode::OK };
    (status, Json(reply))
}

pub async fn reload_knowledge(
    State(state): State<AppState>,
) -> Result<Json<KnowledgeReloadResponse>, ApiError> {
    let correlation_id = Uuid::new_v4().to_string();
    let config = state.knowledge_config.clone();

    let loaded = tokio::task::spawn_blocking(move || KnowledgeBase::load(&config))
        .await
        .map_err(|join_error| {
            api_error(InterfaceError::Internal {
                message: join_error.to_string(),
                correlation_id: correlation_id.clone(),
            })
        })?;
    let base = loaded.map_err(|load_error| {
        error!(
            event_name = "knowledge.reload.failed",
            correlation_id = %correlation_id,
            error = %load_error,
            "knowledge reload failed; keeping current snapshot"
        );
        api_error(
            ApplicationError::Integration(load_error.to_string()).into_interface(&correlation_id),
        )
    })?;

    let snapshot = state.knowledge.replace(base);
    info!(
        event_name = "knowledge.reloaded",
        correlation_id = %correlation_id,
        documents = snapshot.len(),
        fingerprint = snapshot.fingerprint(),
        "knowledge snapshot swapped"
    );

    Ok(Json(KnowledgeReloadResponse {
        documents: snapshot.len(),
        fingerprint: snapshot.fingerprint().to_owned(),
        origin: snapshot.origin().clone(),
    }))
}
