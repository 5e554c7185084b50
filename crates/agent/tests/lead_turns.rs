use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use leadflow_agent::rag::{KnowledgeSource, LocalKnowledgeSource, RagError, RagHit, TechnicalQuery};
use leadflow_agent::runtime::{AgentRuntime, InboundMessage, RuntimeSettings, TurnResult};
use leadflow_core::audit::InMemoryAuditSink;
use leadflow_core::crm::{CrmOperation, CrmSync, CrmSyncError, CrmSyncReceipt};
use leadflow_core::domain::lead::{Channel, ContactId, LeadFlag, LeadRecord, LeadScore};
use leadflow_core::flows::{FlowAction, LeadState};
use leadflow_core::knowledge::{KnowledgeBase, KnowledgeStore};
use leadflow_core::territory::{Salesperson, StaticTerritoryDirectory, Territory};

const FIRST_MESSAGE: &str = "Hola, necesito un balde para una Bobcat S70";
const SECOND_MESSAGE: &str = "Soy Juan Pérez, estoy en Córdoba y lo necesito urgente";

fn territories() -> Arc<StaticTerritoryDirectory> {
    Arc::new(StaticTerritoryDirectory::new(vec![Territory {
        zone: "Córdoba".to_owned(),
        aliases: vec!["cba".to_owned()],
        salesperson: Salesperson { id: "sp-cba".to_owned(), name: "Lucía".to_owned() },
    }]))
}

fn settings() -> RuntimeSettings {
    RuntimeSettings {
        stall_turns: Some(3),
        exploratory_min_turns: Some(3),
        top_k: 3,
        rag_timeout: Duration::from_millis(100),
    }
}

fn local_knowledge() -> Arc<dyn KnowledgeSource> {
    Arc::new(LocalKnowledgeSource::new(Arc::new(KnowledgeStore::new(KnowledgeBase::builtin()))))
}

fn runtime_with(knowledge: Arc<dyn KnowledgeSource>) -> AgentRuntime {
    AgentRuntime::new(settings(), territories(), knowledge)
}

fn message(text: &str) -> InboundMessage {
    InboundMessage {
        text: text.to_owned(),
        channel: Channel::Whatsapp,
        contact_id: ContactId("+5493510000000".to_owned()),
    }
}

async fn run(runtime: &AgentRuntime, prior: Option<LeadRecord>, text: &str) -> TurnResult {
    runtime.handle_turn(prior, &message(text), "corr-test").await
}

struct DownKnowledge;

#[async_trait]
impl KnowledgeSource for DownKnowledge {
    async fn search(&self, _text: &str, _top_k: usize) -> Result<Vec<RagHit>, RagError> {
        Err(RagError::Unavailable("connection refused".to_owned()))
    }

    async fn query(&self, _query: &TechnicalQuery, _top_k: usize) -> Result<Vec<RagHit>, RagError> {
        Err(RagError::Unavailable("connection refused".to_owned()))
    }
}

struct SlowKnowledge;

#[async_trait]
impl KnowledgeSource for SlowKnowledge {
    async fn search(&self, _text: &str, _top_k: usize) -> Result<Vec<RagHit>, RagError> {
        tokio::time::sleep(Duration::from_secs(2)).await;
        Ok(Vec::new())
    }

    async fn query(&self, _query: &TechnicalQuery, _top_k: usize) -> Result<Vec<RagHit>, RagError> {
        tokio::time::sleep(Duration::from_secs(2)).await;
        Ok(Vec::new())
    }
}

#[derive(Default)]
struct RecordingCrm {
    calls: AtomicUsize,
    fail: bool,
}

#[async_trait]
impl CrmSync for RecordingCrm {
    async fn sync(&self, record: &LeadRecord) -> Result<CrmSyncReceipt, CrmSyncError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(CrmSyncError::Transport("pilot unreachable".to_owned()));
        }
        Ok(CrmSyncReceipt {
            crm_lead_id: "pilot-42".to_owned(),
            operation: CrmOperation::for_record(record),
        })
    }
}

#[tokio::test]
async fn first_message_moves_new_lead_to_collecting() {
    let runtime = runtime_with(local_knowledge());
    let turn = run(&runtime, None, FIRST_MESSAGE).await;
    let response = &turn.response;

    assert_eq!(response.extracted_data.implement_of_interest.as_deref(), Some("balde"));
    assert_eq!(response.extracted_data.machine.brand.as_deref(), Some("Bobcat"));
    assert_eq!(response.extracted_data.machine.model.as_deref(), Some("S70"));
    assert_eq!(response.state_transition, LeadState::CollectingTechData);
    assert_eq!(response.checkpoint, 2);
    assert!(response.lead_score.is_none());
    assert_eq!(response.actions, vec![FlowAction::PromptForMissingFields]);
    assert!(response.flags.contains(&LeadFlag::MissingTechData));
    assert_eq!(response.next_questions[0], "¿Cuál es tu nombre?");

    let json = serde_json::to_value(response).expect("serialize response");
    assert_eq!(json["state_transition"], "COLLECTING_TECH_DATA");
    assert!(json["lead_score"].is_null());
    assert_eq!(json["actions"][0], "prompt_for_missing_fields");
}

#[tokio::test]
async fn complete_data_in_covered_zone_is_assigned_with_score_a() {
    let runtime = runtime_with(local_knowledge());
    let first = run(&runtime, None, FIRST_MESSAGE).await;
    let second = run(&runtime, Some(first.record), SECOND_MESSAGE).await;
    let response = &second.response;

    let path: Vec<_> = second.transitions.iter().map(|outcome| outcome.to).collect();
    assert_eq!(path, vec![LeadState::Qualified, LeadState::Assigned]);
    assert_eq!(response.state_transition, LeadState::Assigned);
    assert_eq!(response.checkpoint, 4);
    assert_eq!(response.lead_score, Some(LeadScore::A));
    assert!(response.actions.contains(&FlowAction::SearchRag));
    assert!(response.actions.contains(&FlowAction::SyncCrm));
    assert!(!response.flags.contains(&LeadFlag::MissingTechData));
    assert!(response.next_questions.is_empty());
    assert_eq!(
        second.record.assigned_salesperson.as_ref().map(|salesperson| salesperson.id.as_str()),
        Some("sp-cba")
    );
    assert!(response.reply_to_user.contains("Lucía"));
    assert_eq!(response.rag_results[0].document_id, "doc_001");
}

#[tokio::test]
async fn stalled_lead_moves_to_follow_up_with_score_c() {
    let runtime = runtime_with(local_knowledge());
    let mut turn = run(&runtime, None, "busco un balde").await;
    assert_eq!(turn.response.state_transition, LeadState::CollectingTechData);

    for _ in 0..2 {
        turn = run(&runtime, Some(turn.record), "ok gracias").await;
        assert_eq!(turn.response.state_transition, LeadState::CollectingTechData);
    }
    turn = run(&runtime, Some(turn.record), "ok gracias").await;

    assert_eq!(turn.response.state_transition, LeadState::FollowUp);
    assert_eq!(turn.response.checkpoint, 5);
    assert_eq!(turn.response.lead_score, Some(LeadScore::C));
    assert!(turn.response.actions.contains(&FlowAction::ScheduleFollowUp));
    assert_eq!(turn.record.data.implement_of_interest.as_deref(), Some("balde"));
}

#[tokio::test]
async fn follow_up_returns_to_collecting_when_a_field_arrives() {
    let runtime = runtime_with(local_knowledge());
    let mut turn = run(&runtime, None, "busco un balde").await;
    for _ in 0..3 {
        turn = run(&runtime, Some(turn.record), "ok gracias").await;
    }
    assert_eq!(turn.response.state_transition, LeadState::FollowUp);

    let turn = run(&runtime, Some(turn.record), "es para una Bobcat").await;
    assert_eq!(turn.response.state_transition, LeadState::CollectingTechData);
    assert!(turn.response.actions.contains(&FlowAction::PromptForMissingFields));
}

#[tokio::test]
async fn follow_up_lead_completed_in_uncovered_zone_settles_in_follow_up() {
    let runtime = runtime_with(local_knowledge());
    let mut turn = run(&runtime, None, "busco un balde").await;
    for _ in 0..3 {
        turn = run(&runtime, Some(turn.record), "ok gracias").await;
    }
    assert_eq!(turn.response.state_transition, LeadState::FollowUp);

    let turn =
        run(&runtime, Some(turn.record), "Soy Juan, estoy en Mendoza, tengo una Bobcat").await;
    let path: Vec<(LeadState, LeadState)> =
        turn.transitions.iter().map(|outcome| (outcome.from, outcome.to)).collect();

    assert_eq!(
        path,
        vec![
            (LeadState::FollowUp, LeadState::CollectingTechData),
            (LeadState::CollectingTechData, LeadState::Qualified),
            (LeadState::Qualified, LeadState::FollowUp),
        ]
    );
    assert_eq!(turn.response.state_transition, LeadState::FollowUp);
    assert!(turn.response.flags.contains(&LeadFlag::ZoneNotCovered));
    assert!(turn.record.assigned_salesperson.is_none());

    let again = run(&runtime, Some(turn.record), "ok").await;
    assert_eq!(again.response.state_transition, LeadState::FollowUp);
    assert!(again.transitions.is_empty());
}

#[tokio::test]
async fn stall_rule_is_disabled_without_threshold() {
    let settings = RuntimeSettings { stall_turns: None, exploratory_min_turns: None, ..settings() };
    let runtime = AgentRuntime::new(settings, territories(), local_knowledge());
    let mut turn = run(&runtime, None, "busco un balde").await;
    for _ in 0..10 {
        turn = run(&runtime, Some(turn.record), "ok gracias").await;
    }

    assert_eq!(turn.response.state_transition, LeadState::CollectingTechData);
    assert!(turn.response.lead_score.is_none());
}

#[tokio::test]
async fn failing_knowledge_source_degrades_to_low_confidence() {
    let runtime = runtime_with(Arc::new(DownKnowledge));
    let first = run(&runtime, None, FIRST_MESSAGE).await;
    let second = run(&runtime, Some(first.record), SECOND_MESSAGE).await;

    assert_eq!(second.response.state_transition, LeadState::Assigned);
    assert!(second.response.flags.contains(&LeadFlag::RagUnavailable));
    assert!(second.response.rag_results.is_empty());

    let json = serde_json::to_value(&second.response).expect("serialize response");
    assert_eq!(json["confidence"], "baja");
    assert!(json["flags"].as_array().is_some_and(|flags| flags.contains(&"rag_unavailable".into())));
}

#[tokio::test]
async fn slow_knowledge_source_times_out() {
    let runtime = runtime_with(Arc::new(SlowKnowledge));
    let first = run(&runtime, None, FIRST_MESSAGE).await;
    let second = run(&runtime, Some(first.record), SECOND_MESSAGE).await;

    assert!(second.response.flags.contains(&LeadFlag::RagUnavailable));
    assert_eq!(second.response.lead_score, Some(LeadScore::A));
}

#[tokio::test]
async fn uncovered_zone_goes_to_follow_up() {
    let runtime = runtime_with(local_knowledge());
    let first = run(&runtime, None, FIRST_MESSAGE).await;
    let second =
        run(&runtime, Some(first.record), "Soy Juan, estoy en Mendoza y lo necesito urgente").await;

    assert_eq!(second.response.state_transition, LeadState::FollowUp);
    assert_eq!(second.response.lead_score, Some(LeadScore::B));
    assert!(second.response.flags.contains(&LeadFlag::ZoneNotCovered));
    assert!(second.record.assigned_salesperson.is_none());
    assert!(second.response.reply_to_user.contains("no tenemos un asesor asignado"));
    assert!(!second.response.reply_to_user.contains("necesitamos algunos datos"));
}

#[tokio::test]
async fn crm_sync_records_remote_id() {
    let crm = Arc::new(RecordingCrm::default());
    let runtime = runtime_with(local_knowledge()).with_crm(crm.clone());
    let first = run(&runtime, None, FIRST_MESSAGE).await;
    assert!(first.crm.is_none());

    let second = run(&runtime, Some(first.record), SECOND_MESSAGE).await;
    let attempt = second.crm.expect("crm attempt");
    assert_eq!(attempt.operation, CrmOperation::Create);
    assert_eq!(second.record.crm_id.as_deref(), Some("pilot-42"));
    assert!(second.record.synced_to_crm);
    assert_eq!(crm.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn crm_failure_keeps_assignment() {
    let crm = Arc::new(RecordingCrm { fail: true, ..RecordingCrm::default() });
    let runtime = runtime_with(local_knowledge()).with_crm(crm);
    let first = run(&runtime, None, FIRST_MESSAGE).await;
    let second = run(&runtime, Some(first.record), SECOND_MESSAGE).await;

    assert_eq!(second.response.state_transition, LeadState::Assigned);
    assert!(second.response.flags.contains(&LeadFlag::CrmSyncFailed));
    assert!(!second.record.synced_to_crm);
    assert!(second.record.crm_id.is_none());
}

#[tokio::test]
async fn price_request_is_flagged_and_escalated() {
    let runtime = runtime_with(local_knowledge());
    let turn = run(&runtime, None, "cuanto sale un balde para Bobcat?").await;

    assert!(turn.response.flags.contains(&LeadFlag::PriceRequested));
    assert!(turn.response.actions.contains(&FlowAction::EscalateHuman));
    assert!(!turn.response.reply_to_user.contains('$'));
}

#[tokio::test]
async fn transitions_are_audited() {
    let sink = InMemoryAuditSink::default();
    let runtime = runtime_with(local_knowledge()).with_audit_sink(Arc::new(sink.clone()));
    let first = run(&runtime, None, FIRST_MESSAGE).await;
    run(&runtime, Some(first.record), SECOND_MESSAGE).await;

    let events = sink.events();
    assert_eq!(events.len(), 3);
    assert!(events.iter().all(|event| event.correlation_id == "corr-test"));
}

#[tokio::test]
async fn extracted_fields_never_disappear() {
    let runtime = runtime_with(local_knowledge());
    let messages = [FIRST_MESSAGE, "ahora es para una Kubota", "ok", SECOND_MESSAGE, "gracias"];
    let mut prior: Option<LeadRecord> = None;
    let mut previous_present = 0;

    for text in messages {
        let turn = run(&runtime, prior.take(), text).await;
        let present = [
            turn.record.data.name.is_some(),
            turn.record.data.zone.is_some(),
            turn.record.data.machine.brand.is_some(),
            turn.record.data.machine.model.is_some(),
            turn.record.data.implement_of_interest.is_some(),
            turn.record.data.urgency.is_some(),
        ]
        .into_iter()
        .filter(|present| *present)
        .count();
        assert!(present >= previous_present);
        assert_eq!(turn.record.data.machine.brand.as_deref(), Some("Bobcat"));
        previous_present = present;
        prior = Some(turn.record);
    }
}

#[tokio::test]
async fn same_input_gives_same_response() {
    let runtime = runtime_with(local_knowledge());
    let prior = run(&runtime, None, FIRST_MESSAGE).await.record;

    let left = run(&runtime, Some(prior.clone()), SECOND_MESSAGE).await;
    let right = run(&runtime, Some(prior), SECOND_MESSAGE).await;
    assert_eq!(left.response, right.response);
}

#[tokio::test]
async fn every_reply_is_nonempty_for_odd_input() {
    let runtime = runtime_with(local_knowledge());
    for text in ["", "   ", "👍", "?????", "123456"] {
        let turn = run(&runtime, None, text).await;
        assert!(!turn.response.reply_to_user.is_empty());
        assert_eq!(turn.response.state_transition, LeadState::CollectingTechData);
    }
}
