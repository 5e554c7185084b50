use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use leadflow_agent::rag::{KnowledgeSource, LocalKnowledgeSource};
use leadflow_agent::runtime::{AgentRuntime, InboundMessage};
use leadflow_core::config::{AppConfig, LoadOptions};
use leadflow_core::domain::lead::{Channel, ContactId, LeadRecord};
use leadflow_core::knowledge::{KnowledgeBase, KnowledgeStore};
use serde_json::json;

use crate::commands::{current_thread_runtime, CommandResult};

pub struct SimulateRequest {
    pub contact_id: String,
    pub channel: Channel,
    pub messages: Vec<String>,
    pub script: Option<PathBuf>,
}

/// Replays a scripted conversation through the agent runtime in memory.
/// CRM sync is never attempted and nothing is persisted.
pub fn run(request: SimulateRequest) -> CommandResult {
    let messages = match collect_messages(&request) {
        Ok(messages) if !messages.is_empty() => messages,
        Ok(_) => {
            return CommandResult::failure(
                "simulate",
                "invalid_input",
                "provide at least one message or a --script file",
                2,
            );
        }
        Err(message) => return CommandResult::failure("simulate", "script_read", message, 2),
    };

    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "simulate",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let base = match KnowledgeBase::load(&config.knowledge) {
        Ok(base) => base,
        Err(error) => {
            return CommandResult::failure("simulate", "knowledge_read", error.to_string(), 4);
        }
    };
    let knowledge: Arc<dyn KnowledgeSource> =
        Arc::new(LocalKnowledgeSource::new(Arc::new(KnowledgeStore::new(base))));
    let agent = AgentRuntime::from_config(&config, knowledge);

    let runtime = match current_thread_runtime() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "simulate",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let contact_id = ContactId(request.contact_id);
    let (record, responses) = runtime.block_on(async {
        let mut record: Option<LeadRecord> = None;
        let mut responses = Vec::with_capacity(messages.len());
        for (index, text) in messages.into_iter().enumerate() {
            let message =
                InboundMessage { text, channel: request.channel, contact_id: contact_id.clone() };
            let correlation_id = format!("simulate-{}", index + 1);
            let turn = agent.handle_turn(record.take(), &message, &correlation_id).await;
            responses.push(turn.response);
            record = Some(turn.record);
        }
        (record, responses)
    });

    let Some(record) = record else {
        return CommandResult::failure("simulate", "invalid_input", "no turns were processed", 2);
    };

    CommandResult::success_with_details(
        "simulate",
        format!(
            "{} turns processed; lead ended in {} with score {}",
            responses.len(),
            record.state().as_str(),
            record.score.map_or("none", |score| score.as_str())
        ),
        Some(json!({
            "contact_id": record.contact_id,
            "final_state": record.state(),
            "score": record.score,
            "flags": record.flags,
            "assigned_salesperson": record.assigned_salesperson,
            "turns": responses,
        })),
    )
}

fn collect_messages(request: &SimulateRequest) -> Result<Vec<String>, String> {
    let mut messages = request.messages.clone();
    if let Some(path) = &request.script {
        let raw = fs::read_to_string(path)
            .map_err(|error| format!("could not read script `{}`: {error}", path.display()))?;
        messages.extend(
            raw.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(str::to_owned),
        );
    }
    Ok(messages)
}
