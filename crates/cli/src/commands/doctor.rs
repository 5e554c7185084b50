use leadflow_core::config::{AppConfig, LoadOptions};
use leadflow_core::knowledge::KnowledgeBase;
use leadflow_db::connect_with_config;
use serde::Serialize;

use crate::commands::{current_thread_runtime, escape_json};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Warn,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn skipped(name: &'static str) -> Self {
        Self {
            name,
            status: CheckStatus::Skipped,
            details: "skipped because configuration did not load".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> String {
    let report = build_report();

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_territories(&config));
            checks.push(check_crm(&config));
            checks.push(check_knowledge(&config));
            checks.push(check_database_connectivity(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in ["territory_coverage", "crm_readiness", "knowledge_base", "database_connectivity"]
            {
                checks.push(DoctorCheck::skipped(name));
            }
        }
    }

    let failed = checks.iter().any(|check| check.status == CheckStatus::Fail);
    let warned = checks.iter().any(|check| check.status == CheckStatus::Warn);
    let (overall_status, summary) = match (failed, warned) {
        (true, _) => (CheckStatus::Fail, "doctor: one or more readiness checks failed"),
        (false, true) => (CheckStatus::Warn, "doctor: ready with warnings"),
        (false, false) => (CheckStatus::Pass, "doctor: all readiness checks passed"),
    };

    DoctorReport { overall_status, summary: summary.to_string(), checks }
}

// Without territories every complete lead is parked as zone-not-covered.
fn check_territories(config: &AppConfig) -> DoctorCheck {
    if config.territories.is_empty() {
        return DoctorCheck {
            name: "territory_coverage",
            status: CheckStatus::Warn,
            details: "no [[territories]] configured; no lead can be assigned".to_string(),
        };
    }

    let zones: Vec<&str> =
        config.territories.iter().map(|territory| territory.zone.as_str()).collect();
    DoctorCheck {
        name: "territory_coverage",
        status: CheckStatus::Pass,
        details: format!("{} zones covered: {}", zones.len(), zones.join(", ")),
    }
}

fn check_crm(config: &AppConfig) -> DoctorCheck {
    if !config.crm.enabled {
        return DoctorCheck {
            name: "crm_readiness",
            status: CheckStatus::Warn,
            details: "crm sync disabled; qualified leads stay local".to_string(),
        };
    }

    DoctorCheck {
        name: "crm_readiness",
        status: CheckStatus::Pass,
        details: format!("crm sync enabled against `{}`", config.crm.api_url),
    }
}

fn check_knowledge(config: &AppConfig) -> DoctorCheck {
    match KnowledgeBase::load(&config.knowledge) {
        Ok(base) => DoctorCheck {
            name: "knowledge_base",
            status: CheckStatus::Pass,
            details: format!(
                "{} documents from {:?} (fingerprint {})",
                base.len(),
                base.origin(),
                base.fingerprint()
            ),
        },
        Err(error) => {
            DoctorCheck { name: "knowledge_base", status: CheckStatus::Fail, details: error.to_string() }
        }
    }
}

fn check_database_connectivity(config: &AppConfig) -> DoctorCheck {
    let runtime = match current_thread_runtime() {
        Ok(runtime) => runtime,
        Err(error) => {
            return DoctorCheck {
                name: "database_connectivity",
                status: CheckStatus::Fail,
                details: format!("failed to initialize async runtime: {error}"),
            };
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| format!("failed to connect to database: {error}"))?;
        pool.close().await;
        Ok::<(), String>(())
    });

    match result {
        Ok(()) => DoctorCheck {
            name: "database_connectivity",
            status: CheckStatus::Pass,
            details: format!("connected using `{}`", config.database.url),
        },
        Err(error) => {
            DoctorCheck { name: "database_connectivity", status: CheckStatus::Fail, details: error }
        }
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = vec![report.summary.clone()];

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Warn => "warn",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}
