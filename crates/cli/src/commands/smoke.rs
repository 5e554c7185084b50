use std::sync::Arc;
use std::time::Instant;

use leadflow_agent::rag::{KnowledgeSource, LocalKnowledgeSource};
use leadflow_agent::runtime::{AgentRuntime, InboundMessage};
use leadflow_core::config::{AppConfig, LoadOptions};
use leadflow_core::domain::lead::{Channel, ContactId};
use leadflow_core::flows::LeadState;
use leadflow_core::knowledge::{KnowledgeBase, KnowledgeStore};
use leadflow_db::{connect_with_config, migrations};
use serde::Serialize;

use crate::commands::{current_thread_runtime, escape_json, CommandResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum SmokeStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct SmokeCheck {
    name: &'static str,
    status: SmokeStatus,
    elapsed_ms: u64,
    message: String,
}

impl SmokeCheck {
    fn finished(name: &'static str, started: Instant, outcome: Result<String, String>) -> Self {
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(message) => Self { name, status: SmokeStatus::Pass, elapsed_ms, message },
            Err(message) => Self { name, status: SmokeStatus::Fail, elapsed_ms, message },
        }
    }

    fn skipped(name: &'static str) -> Self {
        Self {
            name,
            status: SmokeStatus::Skipped,
            elapsed_ms: 0,
            message: "skipped due previous failure".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct SmokeReport {
    command: &'static str,
    status: SmokeStatus,
    summary: String,
    total_elapsed_ms: u64,
    checks: Vec<SmokeCheck>,
}

const CHECKS_AFTER_CONFIG: [&str; 4] =
    ["db_connectivity", "migration_visibility", "knowledge_base", "agent_turn"];

pub fn run() -> CommandResult {
    let started = Instant::now();
    let mut checks = Vec::new();

    let config_started = Instant::now();
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(SmokeCheck::finished(
                "config_validation",
                config_started,
                Ok("configuration loaded and validated".to_string()),
            ));
            config
        }
        Err(error) => {
            checks.push(SmokeCheck::finished("config_validation", config_started, Err(error.to_string())));
            checks.extend(CHECKS_AFTER_CONFIG.into_iter().map(SmokeCheck::skipped));
            return finalize_report(checks, started);
        }
    };

    let runtime = match current_thread_runtime() {
        Ok(runtime) => runtime,
        Err(error) => {
            checks.push(SmokeCheck::finished(
                "db_connectivity",
                Instant::now(),
                Err(format!("failed to initialize async runtime: {error}")),
            ));
            checks.extend(CHECKS_AFTER_CONFIG[1..].iter().copied().map(SmokeCheck::skipped));
            return finalize_report(checks, started);
        }
    };

    let db_started = Instant::now();
    let pool = match runtime.block_on(connect_with_config(&config.database)) {
        Ok(pool) => {
            checks.push(SmokeCheck::finished(
                "db_connectivity",
                db_started,
                Ok(format!("connected using `{}`", config.database.url)),
            ));
            pool
        }
        Err(error) => {
            checks.push(SmokeCheck::finished(
                "db_connectivity",
                db_started,
                Err(format!("failed to connect: {error}")),
            ));
            checks.extend(CHECKS_AFTER_CONFIG[1..].iter().copied().map(SmokeCheck::skipped));
            return finalize_report(checks, started);
        }
    };

    let migration_started = Instant::now();
    let migration_result = runtime.block_on(migrations::run_pending(&pool));
    runtime.block_on(pool.close());
    checks.push(SmokeCheck::finished(
        "migration_visibility",
        migration_started,
        migration_result
            .map(|()| "migrations are visible and executable".to_string())
            .map_err(|error| format!("migration execution failed: {error}")),
    ));

    let knowledge_started = Instant::now();
    let base = match KnowledgeBase::load(&config.knowledge) {
        Ok(base) => {
            checks.push(SmokeCheck::finished(
                "knowledge_base",
                knowledge_started,
                Ok(format!("{} documents loaded", base.len())),
            ));
            base
        }
        Err(error) => {
            checks.push(SmokeCheck::finished("knowledge_base", knowledge_started, Err(error.to_string())));
            checks.push(SmokeCheck::skipped("agent_turn"));
            return finalize_report(checks, started);
        }
    };

    let turn_started = Instant::now();
    let knowledge: Arc<dyn KnowledgeSource> =
        Arc::new(LocalKnowledgeSource::new(Arc::new(KnowledgeStore::new(base))));
    let agent = AgentRuntime::from_config(&config, knowledge);
    let message = InboundMessage {
        text: "Hola, quiero información".to_string(),
        channel: Channel::Whatsapp,
        contact_id: ContactId("smoke-check".to_string()),
    };
    let turn = runtime.block_on(agent.handle_turn(None, &message, "smoke"));
    let turn_outcome = if turn.response.state_transition == LeadState::CollectingTechData
        && !turn.response.reply_to_user.trim().is_empty()
    {
        Ok("first message moved a new lead to COLLECTING_TECH_DATA".to_string())
    } else {
        Err(format!(
            "unexpected first-turn state {}",
            turn.response.state_transition.as_str()
        ))
    };
    checks.push(SmokeCheck::finished("agent_turn", turn_started, turn_outcome));

    finalize_report(checks, started)
}

fn finalize_report(checks: Vec<SmokeCheck>, started: Instant) -> CommandResult {
    let total_elapsed_ms = started.elapsed().as_millis() as u64;
    let passed = checks.iter().filter(|check| check.status == SmokeStatus::Pass).count();
    let total = checks.len();
    let failed = checks.iter().any(|check| check.status != SmokeStatus::Pass);

    let report = SmokeReport {
        command: "smoke",
        status: if failed { SmokeStatus::Fail } else { SmokeStatus::Pass },
        summary: format!("smoke: {passed}/{total} checks passed in {total_elapsed_ms}ms"),
        total_elapsed_ms,
        checks,
    };

    let human = report.summary.clone();
    let machine = serde_json::to_string(&report).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"smoke\",\"status\":\"fail\",\"summary\":\"serialization failed\",\"error\":\"{}\"}}",
            escape_json(&error.to_string())
        )
    });

    CommandResult { exit_code: if failed { 6 } else { 0 }, output: format!("{human}\n{machine}") }
}
