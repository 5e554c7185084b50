use std::env;
use std::fs;
use std::sync::{Mutex, OnceLock};

use leadflow_cli::commands::simulate::SimulateRequest;
use leadflow_cli::commands::{doctor, knowledge, migrate, simulate, smoke};
use leadflow_core::domain::lead::Channel;
use leadflow_core::knowledge::KnowledgeBase;
use serde_json::Value;

#[test]
fn migrate_returns_success_with_valid_env() {
    let dir = tempfile::tempdir().expect("tempdir");
    let database_url = sqlite_url(&dir);
    with_env(&[("LEADFLOW_LLM_API_KEY", "sk-test"), ("LEADFLOW_DATABASE_URL", &database_url)], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn migrate_returns_config_failure_without_llm_key() {
    with_env(&[], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
        assert!(payload["message"].as_str().unwrap_or_default().contains("llm.api_key"));
    });
}

#[test]
fn smoke_returns_success_report_with_valid_env() {
    let dir = tempfile::tempdir().expect("tempdir");
    let database_url = sqlite_url(&dir);
    with_env(&[("LEADFLOW_LLM_API_KEY", "sk-test"), ("LEADFLOW_DATABASE_URL", &database_url)], || {
        let result = smoke::run();
        assert_eq!(result.exit_code, 0, "expected smoke success: {}", result.output);

        let payload = parse_payload(last_line(&result.output));
        assert_eq!(payload["command"], "smoke");
        assert_eq!(payload["status"], "pass");

        let names: Vec<&str> = payload["checks"]
            .as_array()
            .expect("checks array")
            .iter()
            .filter_map(|check| check["name"].as_str())
            .collect();
        assert_eq!(
            names,
            vec![
                "config_validation",
                "db_connectivity",
                "migration_visibility",
                "knowledge_base",
                "agent_turn"
            ]
        );
    });
}

#[test]
fn smoke_skips_remaining_checks_after_config_failure() {
    with_env(&[("LEADFLOW_CONVERSATION_STALL_TURNS", "0"), ("LEADFLOW_LLM_API_KEY", "sk-test")], || {
        let result = smoke::run();
        assert_eq!(result.exit_code, 6);

        let payload = parse_payload(last_line(&result.output));
        assert_eq!(payload["status"], "fail");
        let checks = payload["checks"].as_array().expect("checks array");
        assert_eq!(checks[0]["status"], "fail");
        assert!(checks[1..].iter().all(|check| check["status"] == "skipped"));
    });
}

#[test]
fn doctor_warns_when_no_territory_or_crm_is_configured() {
    let dir = tempfile::tempdir().expect("tempdir");
    let database_url = sqlite_url(&dir);
    with_env(&[("LEADFLOW_LLM_API_KEY", "sk-test"), ("LEADFLOW_DATABASE_URL", &database_url)], || {
        let payload = parse_payload(&doctor::run(true));
        assert_eq!(payload["overall_status"], "warn");

        let checks = payload["checks"].as_array().expect("checks array");
        let status_of = |name: &str| {
            checks
                .iter()
                .find(|check| check["name"] == name)
                .map(|check| check["status"].clone())
                .expect("check present")
        };
        assert_eq!(status_of("territory_coverage"), "warn");
        assert_eq!(status_of("crm_readiness"), "warn");
        assert_eq!(status_of("database_connectivity"), "pass");
    });
}

#[test]
fn knowledge_ingest_writes_document_store() {
    let dir = tempfile::tempdir().expect("tempdir");
    let source = dir.path().join("docs");
    fs::create_dir_all(&source).expect("create docs dir");
    fs::write(
        source.join("bobcat_s70_compatibilidad.txt"),
        "El balde estándar de 1,2 m es compatible con Bobcat S70.",
    )
    .expect("write doc");
    fs::write(source.join("vacio.txt"), "   ").expect("write empty doc");
    let output = dir.path().join("store").join("rag_documents.json");

    let result = knowledge::ingest(vec![source], Some(output.clone()));
    assert_eq!(result.exit_code, 0, "expected ingest success: {}", result.output);

    let payload = parse_payload(&result.output);
    assert_eq!(payload["command"], "knowledge_ingest");
    assert_eq!(payload["details"]["documents"], 1);

    let stored = KnowledgeBase::from_json_file(&output).expect("store should load");
    assert_eq!(stored.len(), 1);
    assert_eq!(payload["details"]["fingerprint"], stored.fingerprint());
}

#[test]
fn knowledge_ingest_rejects_directories_without_documents() {
    let dir = tempfile::tempdir().expect("tempdir");
    let result =
        knowledge::ingest(vec![dir.path().to_path_buf()], Some(dir.path().join("out.json")));

    assert_eq!(result.exit_code, 4);
    let payload = parse_payload(&result.output);
    assert_eq!(payload["error_class"], "knowledge_empty");
    assert!(!dir.path().join("out.json").exists());
}

#[test]
fn simulate_replays_script_and_reports_final_state() {
    let dir = tempfile::tempdir().expect("tempdir");
    let script = dir.path().join("conversation.txt");
    fs::write(&script, "# lead from Mendoza\nSoy Juan, estoy en Mendoza y lo necesito urgente\n")
        .expect("write script");

    with_env(&[("LEADFLOW_LLM_API_KEY", "sk-test")], || {
        let result = simulate::run(SimulateRequest {
            contact_id: "+5492610000000".to_string(),
            channel: Channel::Whatsapp,
            messages: vec!["Hola, necesito un balde para una Bobcat S70".to_string()],
            script: Some(script.clone()),
        });
        assert_eq!(result.exit_code, 0, "expected simulate success: {}", result.output);

        let payload = parse_payload(&result.output);
        let details = &payload["details"];
        assert_eq!(details["turns"].as_array().map(Vec::len), Some(2));
        assert_eq!(details["turns"][0]["state_transition"], "COLLECTING_TECH_DATA");
        assert_eq!(details["final_state"], "FOLLOW_UP");
        assert_eq!(details["score"], "B");
        assert!(details["flags"]
            .as_array()
            .expect("flags array")
            .iter()
            .any(|flag| flag == "zone_not_covered"));
    });
}

#[test]
fn simulate_without_messages_is_invalid_input() {
    let result = simulate::run(SimulateRequest {
        contact_id: "c-1".to_string(),
        channel: Channel::Instagram,
        messages: Vec::new(),
        script: None,
    });

    assert_eq!(result.exit_code, 2);
    assert_eq!(parse_payload(&result.output)["error_class"], "invalid_input");
}

fn sqlite_url(dir: &tempfile::TempDir) -> String {
    format!("sqlite://{}", dir.path().join("leadflow.db").display())
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn last_line(output: &str) -> &str {
    output.lines().last().unwrap_or_default()
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "LEADFLOW_DATABASE_URL",
        "LEADFLOW_DATABASE_MAX_CONNECTIONS",
        "LEADFLOW_DATABASE_TIMEOUT_SECS",
        "LEADFLOW_LLM_PROVIDER",
        "LEADFLOW_LLM_API_KEY",
        "OPENROUTER_API_KEY",
        "LEADFLOW_LLM_BASE_URL",
        "LEADFLOW_LLM_MODEL",
        "LEADFLOW_CRM_ENABLED",
        "LEADFLOW_CRM_API_KEY",
        "PILOT_API_KEY",
        "LEADFLOW_KNOWLEDGE_DOCUMENTS_PATH",
        "LEADFLOW_CONVERSATION_STALL_TURNS",
        "LEADFLOW_CONVERSATION_EXPLORATORY_MIN_TURNS",
        "LEADFLOW_LOGGING_LEVEL",
        "LEADFLOW_LOGGING_FORMAT",
        "LEADFLOW_LOG_LEVEL",
        "LEADFLOW_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(test_fn));

    for (key, value) in previous_values {
        match value {
            Some(value) => env::set_var(key, value),
            None => env::remove_var(key),
        }
    }

    if let Err(panic) = outcome {
        std::panic::resume_unwind(panic);
    }
}
