use std::sync::Arc;
use std::time::Duration;

use leadflow_core::audit::{
    AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, TracingAuditSink,
};
use leadflow_core::config::AppConfig;
use leadflow_core::crm::{CrmOperation, CrmSync, CrmSyncError, CrmSyncReceipt};
use leadflow_core::domain::lead::{
    Channel, ContactId, ConversationRole, ExtractedData, LeadFlag, LeadRecord, LeadScore,
};
use leadflow_core::flows::{
    FlowAction, FlowContext, FlowEngine, LeadQualificationFlow, LeadState, TransitionOutcome,
};
use leadflow_core::scoring::{LeadScorer, ScoringPolicy};
use leadflow_core::territory::{StaticTerritoryDirectory, TerritoryDirectory};
use leadflow_core::vocabulary::Vocabulary;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::advisor::Confidence;
use crate::conversation::FieldExtractor;
use crate::guardrails::GuardrailPolicy;
use crate::rag::{KnowledgeSource, RagError, RagHit, TechnicalQuery};
use crate::reply::{compose_reply, next_questions};

const ACTOR: &str = "agent-runtime";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub text: String,
    pub channel: Channel,
    pub contact_id: ContactId,
}

/// Outbound JSON for one processed message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LeadResponse {
    pub reply_to_user: String,
    pub extracted_data: ExtractedData,
    pub state_transition: LeadState,
    pub checkpoint: u8,
    pub actions: Vec<FlowAction>,
    pub lead_score: Option<LeadScore>,
    pub flags: Vec<LeadFlag>,
    pub next_questions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<Confidence>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rag_results: Vec<RagHit>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CrmAttempt {
    pub operation: CrmOperation,
    pub result: Result<CrmSyncReceipt, CrmSyncError>,
}

/// Everything one turn produced: the record to persist, the reply, and side-effect logs.
#[derive(Clone, Debug)]
pub struct TurnResult {
    pub record: LeadRecord,
    pub response: LeadResponse,
    pub transitions: Vec<TransitionOutcome>,
    pub crm: Option<CrmAttempt>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RuntimeSettings {
    pub stall_turns: Option<u32>,
    pub exploratory_min_turns: Option<u32>,
    pub top_k: usize,
    pub rag_timeout: Duration,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            stall_turns: None,
            exploratory_min_turns: None,
            top_k: 5,
            rag_timeout: Duration::from_secs(5),
        }
    }
}

impl RuntimeSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            stall_turns: config.conversation.stall_turns,
            exploratory_min_turns: config.conversation.exploratory_threshold(),
            top_k: config.knowledge.top_k,
            ..Self::default()
        }
    }
}

/// Runs one conversational turn: guardrails, extraction, flow, scoring, retrieval, CRM.
///
/// Callers own per-contact exclusivity: at most one `handle_turn` per contact at a time.
pub struct AgentRuntime {
    settings: RuntimeSettings,
    extractor: FieldExtractor,
    guardrails: GuardrailPolicy,
    engine: FlowEngine<LeadQualificationFlow>,
    scorer: LeadScorer,
    territories: Arc<dyn TerritoryDirectory>,
    knowledge: Arc<dyn KnowledgeSource>,
    crm: Option<Arc<dyn CrmSync>>,
    audit: Arc<dyn AuditSink>,
}

impl AgentRuntime {
    pub fn new(
        settings: RuntimeSettings,
        territories: Arc<dyn TerritoryDirectory>,
        knowledge: Arc<dyn KnowledgeSource>,
    ) -> Self {
        let scorer = LeadScorer::new(
            ScoringPolicy { exploratory_min_turns: settings.exploratory_min_turns },
            territories.clone(),
        );
        Self {
            settings,
            extractor: FieldExtractor::default(),
            guardrails: GuardrailPolicy::default(),
            engine: FlowEngine::default(),
            scorer,
            territories,
            knowledge,
            crm: None,
            audit: Arc::new(TracingAuditSink),
        }
    }

    /// Wires territories and vocabulary from config.
    pub fn from_config(config: &AppConfig, knowledge: Arc<dyn KnowledgeSource>) -> Self {
        let territories: Arc<dyn TerritoryDirectory> =
            Arc::new(StaticTerritoryDirectory::new(config.territories.clone()));
        let vocabulary = Vocabulary::builtin()
            .with_extras(&config.vocabulary)
            .with_territories(&config.territories);
        Self::new(RuntimeSettings::from_config(config), territories, knowledge)
            .with_vocabulary(&vocabulary)
    }

    pub fn with_vocabulary(mut self, vocabulary: &Vocabulary) -> Self {
        self.extractor = FieldExtractor::new(vocabulary);
        self
    }

    pub fn with_guardrails(mut self, guardrails: GuardrailPolicy) -> Self {
        self.guardrails = guardrails;
        self
    }

    pub fn with_crm(mut self, crm: Arc<dyn CrmSync>) -> Self {
        self.crm = Some(crm);
        self
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn settings(&self) -> RuntimeSettings {
        self.settings
    }

    pub fn start_record(&self, message: &InboundMessage) -> LeadRecord {
        LeadRecord::new(message.contact_id.clone(), message.channel)
    }

    pub async fn handle_turn(
        &self,
        prior: Option<LeadRecord>,
        message: &InboundMessage,
        correlation_id: &str,
    ) -> TurnResult {
        let mut record = prior.unwrap_or_else(|| self.start_record(message));
        let audit = AuditContext::new(Some(record.contact_id.clone()), correlation_id, ACTOR);
        let prior_state = record.state();

        if record.channel() != message.channel {
            warn!(
                event_name = "lead.channel.mismatch",
                correlation_id,
                contact_id = record.contact_id.as_str(),
                stored = record.channel().as_str(),
                received = message.channel.as_str(),
                "channel is fixed at creation; keeping stored channel"
            );
        }

        record.push_history(ConversationRole::Lead, message.text.clone());

        let mut actions: Vec<FlowAction> = Vec::new();
        let mut notices = Vec::new();
        for (intent, decision) in self.guardrails.review(&message.text) {
            record.flag(intent.flag());
            if let Some(notice) = decision.user_message() {
                notices.push(notice.to_owned());
            }
            push_actions(&mut actions, decision.actions());
            info!(
                event_name = "guardrail.triggered",
                correlation_id,
                contact_id = record.contact_id.as_str(),
                action_key = intent.action_key(),
                "guardrail triggered"
            );
        }

        let report = self.extractor.apply(&message.text, &mut record);
        record.record_turn(&report.filled);

        let transitions = self.advance(&mut record, &audit, &mut actions);

        if !matches!(prior_state, LeadState::Qualified | LeadState::Assigned) {
            record.score = self.scorer.score(&record);
        }
        if record.missing_required_fields().is_empty() {
            record.flags.remove(&LeadFlag::MissingTechData);
        } else if record.state() != LeadState::New {
            record.flag(LeadFlag::MissingTechData);
        }

        let mut confidence = None;
        let mut rag_results = Vec::new();
        if actions.contains(&FlowAction::SearchRag) {
            match self.search_knowledge(&record).await {
                Ok(hits) => {
                    confidence =
                        Some(if hits.is_empty() { Confidence::Media } else { Confidence::Alta });
                    rag_results = hits;
                }
                Err(rag_error) => {
                    warn!(
                        event_name = "rag.query.failed",
                        correlation_id,
                        contact_id = record.contact_id.as_str(),
                        error = %rag_error,
                        "knowledge lookup degraded"
                    );
                    record.flag(LeadFlag::RagUnavailable);
                    confidence = Some(Confidence::Baja);
                }
            }
        }

        let crm_due = actions.contains(&FlowAction::SyncCrm)
            || (record.crm_id.is_some() && !report.filled.is_empty());
        let crm = if crm_due { self.sync_crm(&mut record, &audit).await } else { None };

        let questions = next_questions(&record);
        let knowledge_note = (!rag_results.is_empty()).then(|| knowledge_note(&record));
        let reply = compose_reply(&record, &notices, knowledge_note.as_deref(), &questions);
        record.push_history(ConversationRole::Assistant, reply.clone());

        let response = LeadResponse {
            reply_to_user: reply,
            extracted_data: record.data.clone(),
            state_transition: record.state(),
            checkpoint: record.checkpoint(),
            actions,
            lead_score: record.score,
            flags: record.flags.iter().copied().collect(),
            next_questions: questions,
            confidence,
            rag_results,
        };

        info!(
            event_name = "lead.turn.processed",
            correlation_id,
            contact_id = record.contact_id.as_str(),
            state = record.state().as_str(),
            checkpoint = record.checkpoint(),
            score = record.score.map(|score| score.as_str()).unwrap_or("-"),
            "lead turn processed"
        );

        TurnResult { record, response, transitions, crm }
    }

    fn advance(
        &self,
        record: &mut LeadRecord,
        audit: &AuditContext,
        actions: &mut Vec<FlowAction>,
    ) -> Vec<TransitionOutcome> {
        let context = FlowContext::new(self.settings.stall_turns, self.territories.as_ref());
        let outcomes =
            match self.engine.settle_with_audit(record, &context, self.audit.as_ref(), audit) {
                Ok(outcomes) => outcomes,
                Err(flow_error) => {
                    warn!(
                        event_name = "lead.transition.rejected",
                        correlation_id = %audit.correlation_id,
                        contact_id = record.contact_id.as_str(),
                        error = %flow_error,
                        "transition rejected; keeping prior state"
                    );
                    record.flag(LeadFlag::InvalidTransition);
                    return Vec::new();
                }
            };

        let mut applied = Vec::new();
        for outcome in outcomes {
            if let Err(domain_error) = record.commit(&outcome) {
                warn!(
                    event_name = "lead.transition.rejected",
                    correlation_id = %audit.correlation_id,
                    contact_id = record.contact_id.as_str(),
                    from = outcome.from.as_str(),
                    to = outcome.to.as_str(),
                    error = %domain_error,
                    "transition rejected; keeping prior state"
                );
                record.flag(LeadFlag::InvalidTransition);
                break;
            }

            match (outcome.from, outcome.to) {
                (LeadState::Qualified, LeadState::Assigned) => {
                    record.assigned_salesperson =
                        record.data.zone.as_deref().and_then(|zone| self.territories.resolve(zone));
                    record.flags.remove(&LeadFlag::ZoneNotCovered);
                }
                (LeadState::Qualified, LeadState::FollowUp) => {
                    record.flag(LeadFlag::ZoneNotCovered);
                }
                _ => {}
            }

            info!(
                event_name = "lead.transition.applied",
                correlation_id = %audit.correlation_id,
                contact_id = record.contact_id.as_str(),
                from = outcome.from.as_str(),
                to = outcome.to.as_str(),
                checkpoint = record.checkpoint(),
                "lead transition applied"
            );
            push_actions(actions, &outcome.actions);
            applied.push(outcome);
        }
        applied
    }

    async fn search_knowledge(&self, record: &LeadRecord) -> Result<Vec<RagHit>, RagError> {
        let query = TechnicalQuery::from_data(&record.data);
        match tokio::time::timeout(
            self.settings.rag_timeout,
            self.knowledge.query(&query, self.settings.top_k),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                Err(RagError::Timeout { after_ms: self.settings.rag_timeout.as_millis() as u64 })
            }
        }
    }

    /// A failed sync flags the record and leaves its state alone.
    async fn sync_crm(&self, record: &mut LeadRecord, audit: &AuditContext) -> Option<CrmAttempt> {
        let crm = self.crm.as_ref()?;
        let operation = CrmOperation::for_record(record);
        let result = crm.sync(record).await;

        match &result {
            Ok(receipt) => {
                record.crm_id = Some(receipt.crm_lead_id.clone());
                record.synced_to_crm = true;
                record.flags.remove(&LeadFlag::CrmSyncFailed);
                self.audit.emit(
                    AuditEvent::new(
                        audit.contact_id.clone(),
                        audit.correlation_id.clone(),
                        "crm.sync.succeeded",
                        AuditCategory::Crm,
                        ACTOR,
                        AuditOutcome::Success,
                    )
                    .with_metadata("operation", operation.as_str())
                    .with_metadata("crm_lead_id", receipt.crm_lead_id.clone()),
                );
            }
            Err(sync_error) => {
                record.synced_to_crm = false;
                record.flag(LeadFlag::CrmSyncFailed);
                warn!(
                    event_name = "crm.sync.failed",
                    correlation_id = %audit.correlation_id,
                    contact_id = record.contact_id.as_str(),
                    operation = operation.as_str(),
                    error = %sync_error,
                    "crm sync failed; lead state kept"
                );
                self.audit.emit(
                    AuditEvent::new(
                        audit.contact_id.clone(),
                        audit.correlation_id.clone(),
                        "crm.sync.failed",
                        AuditCategory::Crm,
                        ACTOR,
                        AuditOutcome::Failed,
                    )
                    .with_metadata("operation", operation.as_str())
                    .with_metadata("error", sync_error.to_string()),
                );
            }
        }

        Some(CrmAttempt { operation, result })
    }
}

fn push_actions(actions: &mut Vec<FlowAction>, additions: &[FlowAction]) {
    for action in additions {
        if !actions.contains(action) {
            actions.push(*action);
        }
    }
}

fn knowledge_note(record: &LeadRecord) -> String {
    let machine = match (&record.data.machine.brand, &record.data.machine.model) {
        (Some(brand), Some(model)) => format!("tu {brand} {model}"),
        (Some(brand), None) => format!("tu {brand}"),
        _ => "tu equipo".to_owned(),
    };
    format!("Tenemos fichas técnicas de {machine} que el asesor va a revisar con vos.")
}
