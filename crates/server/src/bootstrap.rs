use std::sync::Arc;
use std::time::Duration;

use leadflow_agent::advisor::TechnicalAdvisor;
use leadflow_agent::llm::{LlmClient, OpenAiCompatibleClient};
use leadflow_agent::rag::{KnowledgeSource, LocalKnowledgeSource};
use leadflow_agent::runtime::AgentRuntime;
use leadflow_core::config::{AppConfig, ConfigError, LoadOptions};
use leadflow_core::crm::CrmSyncError;
use leadflow_core::knowledge::{KnowledgeBase, KnowledgeError, KnowledgeStore};
use leadflow_db::repositories::{SqlConversationLogRepository, SqlLeadRepository};
use leadflow_db::{connect_with_config, migrations, DbPool};
use thiserror::Error;
use tracing::{info, warn};

use crate::crm::PilotCrmClient;
use crate::locks::ContactLocks;
use crate::routes::AppState;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub state: AppState,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("knowledge base could not be loaded: {0}")]
    Knowledge(#[from] KnowledgeError),
    #[error("crm client could not be built: {0}")]
    Crm(#[source] CrmSyncError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let knowledge_config = config.knowledge.clone();
    let base = tokio::task::spawn_blocking(move || KnowledgeBase::load(&knowledge_config))
        .await
        .map_err(|error| {
            BootstrapError::Knowledge(KnowledgeError::Read {
                path: config.knowledge.documents_path.clone(),
                source: std::io::Error::other(error.to_string()),
            })
        })??;
    info!(
        event_name = "system.bootstrap.knowledge_loaded",
        correlation_id = "bootstrap",
        documents = base.len(),
        fingerprint = base.fingerprint(),
        "knowledge base ready"
    );
    let knowledge = Arc::new(KnowledgeStore::new(base));
    let source: Arc<dyn KnowledgeSource> = Arc::new(LocalKnowledgeSource::new(knowledge.clone()));

    let mut runtime = AgentRuntime::from_config(&config, source.clone());
    if config.crm.enabled {
        let client = PilotCrmClient::new(&config.crm).map_err(BootstrapError::Crm)?;
        runtime = runtime.with_crm(Arc::new(client));
        info!(
            event_name = "system.bootstrap.crm_enabled",
            correlation_id = "bootstrap",
            api_url = %config.crm.api_url,
            "crm sync enabled"
        );
    }

    let advisor = build_advisor(&config, source);

    let state = AppState {
        runtime: Arc::new(runtime),
        advisor,
        leads: Arc::new(SqlLeadRepository::new(db_pool.clone())),
        conversation_log: Arc::new(SqlConversationLogRepository::new(db_pool.clone())),
        knowledge,
        knowledge_config: config.knowledge.clone(),
        locks: ContactLocks::default(),
    };

    Ok(Application { config, db_pool, state })
}

/// The advisor is optional: without a usable LLM the endpoint answers 503.
fn build_advisor(
    config: &AppConfig,
    knowledge: Arc<dyn KnowledgeSource>,
) -> Option<Arc<TechnicalAdvisor>> {
    match OpenAiCompatibleClient::new(&config.llm) {
        Ok(client) => {
            info!(
                event_name = "system.bootstrap.advisor_enabled",
                correlation_id = "bootstrap",
                provider = config.llm.provider.as_str(),
                model = client.model(),
                "technical advisor enabled"
            );
            let llm: Arc<dyn LlmClient> = Arc::new(client);
            Some(Arc::new(
                TechnicalAdvisor::new(llm, knowledge)
                    .with_top_k(config.knowledge.top_k)
                    .with_rag_timeout(Duration::from_secs(5)),
            ))
        }
        Err(error) => {
            warn!(
                event_name = "system.bootstrap.advisor_disabled",
                correlation_id = "bootstrap",
                error = %error,
                "technical advisor disabled"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use leadflow_agent::runtime::InboundMessage;
    use leadflow_core::config::{ConfigOverrides, LoadOptions};
    use leadflow_core::domain::lead::{Channel, ContactId};
    use leadflow_core::flows::LeadState;

    use crate::bootstrap::{bootstrap, BootstrapError};

    fn options(dir: &tempfile::TempDir, overrides: ConfigOverrides) -> LoadOptions {
        LoadOptions {
            config_path: Some(dir.path().join("leadflow.toml")),
            overrides: ConfigOverrides {
                database_url: Some(format!("sqlite://{}", dir.path().join("leads.db").display())),
                documents_path: Some(dir.path().join("rag_documents.json")),
                ..overrides
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_when_crm_is_enabled_without_key() {
        let dir = tempfile::tempdir().expect("tempdir");
        let result = bootstrap(options(&dir, ConfigOverrides {
            llm_api_key: Some("sk-test".to_string()),
            crm_enabled: Some(true),
            crm_api_key: Some("   ".to_string()),
            ..ConfigOverrides::default()
        }))
        .await;

        let error = result.err().expect("bootstrap must fail");
        assert!(matches!(error, BootstrapError::Config(_)));
        assert!(error.to_string().contains("crm.api_key"));
    }

    #[tokio::test]
    async fn bootstrap_wires_database_knowledge_and_runtime() {
        let dir = tempfile::tempdir().expect("tempdir");
        let app = bootstrap(options(&dir, ConfigOverrides {
            llm_api_key: Some("sk-test".to_string()),
            ..ConfigOverrides::default()
        }))
        .await
        .expect("bootstrap should succeed with valid overrides");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('lead', 'lead_turn', 'lead_transition', 'crm_sync_event')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("count tables");
        assert_eq!(table_count, 4);

        assert!(!app.state.knowledge.snapshot().is_empty());
        assert!(app.state.advisor.is_some());

        let message = InboundMessage {
            text: "Hola, soy Juan".to_string(),
            channel: Channel::Whatsapp,
            contact_id: ContactId("+5493510000001".to_string()),
        };
        let turn = app.state.runtime.handle_turn(None, &message, "bootstrap-test").await;
        assert_eq!(turn.response.state_transition, LeadState::CollectingTechData);

        app.db_pool.close().await;
    }
}
