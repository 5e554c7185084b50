//! Technical advisor for salespeople.
//!
//! The model must answer with a single JSON object. Anything else is rejected as a
//! whole and reported as `{"error", "reason"}`; nothing is salvaged from a partial reply.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::llm::{ChatMessage, LlmClient, LlmError};
use crate::rag::{KnowledgeSource, RagError, RagHit};

pub const RESPONSE_MIN_CHARS: usize = 100;
pub const RESPONSE_MAX_CHARS: usize = 500;
const CONTEXT_DOCUMENTS: usize = 3;
const EXCERPT_CHARS: usize = 200;
const RAG_UNAVAILABLE_FLAG: &str = "rag_unavailable";

pub const DEFAULT_SYSTEM_PROMPT: &str = r#"Sos un asesor técnico para vendedores de implementos para minicargadoras.
Respondé únicamente con información de las fichas técnicas provistas. No inventes datos ni precios.
Tu respuesta debe ser SOLO un objeto JSON válido, sin texto adicional, con esta forma:
{
  "technical_response": "texto de 100 a 500 caracteres",
  "rag_results": [{"document_id": "...", "content": "...", "metadata": {}}],
  "state_transition": "PROVIDE_ADVICE",
  "actions": ["..."],
  "confidence": "alta" | "media" | "baja"
}"#;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdvisorState {
    ReceiveQuery,
    SearchRag,
    ProvideAdvice,
}

impl AdvisorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReceiveQuery => "RECEIVE_QUERY",
            Self::SearchRag => "SEARCH_RAG",
            Self::ProvideAdvice => "PROVIDE_ADVICE",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Alta,
    Media,
    Baja,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RagResult {
    pub document_id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl From<&RagHit> for RagResult {
    fn from(hit: &RagHit) -> Self {
        Self {
            document_id: hit.document_id.clone(),
            content: excerpt(&hit.excerpt),
            metadata: hit.metadata.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TechnicalResponse {
    pub technical_response: String,
    #[serde(default)]
    pub rag_results: Vec<RagResult>,
    pub state_transition: AdvisorState,
    pub actions: Vec<String>,
    pub confidence: Confidence,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<String>,
}

/// Wire shape of a failed advisor turn.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvisorErrorBody {
    pub error: String,
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AdvisorReply {
    Advice(TechnicalResponse),
    Error(AdvisorErrorBody),
}

impl AdvisorReply {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

#[derive(Debug, Error)]
pub enum AdvisorError {
    #[error("llm call failed: {0}")]
    Llm(#[from] LlmError),
    #[error("response is not valid JSON: {0}")]
    MalformedJson(String),
    #[error("response does not match the advisor schema: {0}")]
    Schema(String),
}

impl AdvisorError {
    pub fn to_body(&self) -> AdvisorErrorBody {
        AdvisorErrorBody {
            error: "No se pudo procesar la consulta".to_owned(),
            reason: self.to_string(),
        }
    }
}

/// Parses one model reply. Object only, known fields only, bounded text length.
pub fn parse_technical_response(raw: &str) -> Result<TechnicalResponse, AdvisorError> {
    let value: Value = serde_json::from_str(raw.trim())
        .map_err(|error| AdvisorError::MalformedJson(error.to_string()))?;
    if !value.is_object() {
        return Err(AdvisorError::MalformedJson("top-level value is not an object".to_owned()));
    }

    let response: TechnicalResponse =
        serde_json::from_value(value).map_err(|error| AdvisorError::Schema(error.to_string()))?;

    let length = response.technical_response.chars().count();
    if !(RESPONSE_MIN_CHARS..=RESPONSE_MAX_CHARS).contains(&length) {
        return Err(AdvisorError::Schema(format!(
            "technical_response has {length} characters, expected {RESPONSE_MIN_CHARS}..={RESPONSE_MAX_CHARS}"
        )));
    }

    Ok(response)
}

pub struct TechnicalAdvisor {
    llm: Arc<dyn LlmClient>,
    knowledge: Arc<dyn KnowledgeSource>,
    system_prompt: String,
    top_k: usize,
    rag_timeout: Duration,
}

impl TechnicalAdvisor {
    pub fn new(llm: Arc<dyn LlmClient>, knowledge: Arc<dyn KnowledgeSource>) -> Self {
        Self {
            llm,
            knowledge,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_owned(),
            top_k: 5,
            rag_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_rag_timeout(mut self, rag_timeout: Duration) -> Self {
        self.rag_timeout = rag_timeout;
        self
    }

    /// RECEIVE_QUERY → SEARCH_RAG → PROVIDE_ADVICE. Never panics and never returns `Err`:
    /// failures come back as [`AdvisorReply::Error`].
    pub async fn process_query(&self, query: &str) -> AdvisorReply {
        info!(event_name = "advisor.state", state = AdvisorState::ReceiveQuery.as_str(), "advisor query received");

        info!(event_name = "advisor.state", state = AdvisorState::SearchRag.as_str(), "searching knowledge");
        let retrieval = match tokio::time::timeout(
            self.rag_timeout,
            self.knowledge.search(query, self.top_k),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(RagError::Timeout { after_ms: self.rag_timeout.as_millis() as u64 }),
        };
        let (hits, rag_failed) = match retrieval {
            Ok(hits) => (hits, false),
            Err(rag_error) => {
                warn!(event_name = "rag.query.failed", error = %rag_error, "advisor continues without knowledge");
                (Vec::new(), true)
            }
        };

        let context: Vec<&RagHit> = hits.iter().take(CONTEXT_DOCUMENTS).collect();
        let messages = [
            ChatMessage::system(self.system_prompt.clone()),
            ChatMessage::user(user_prompt(query, &context)),
        ];

        let parsed = match self.llm.complete(&messages).await {
            Ok(raw) => parse_technical_response(&raw),
            Err(llm_error) => Err(AdvisorError::from(llm_error)),
        };

        match parsed {
            Ok(mut response) => {
                response.rag_results = context.iter().map(|hit| RagResult::from(*hit)).collect();
                response.state_transition = AdvisorState::ProvideAdvice;
                if rag_failed {
                    response.confidence = Confidence::Baja;
                    if !response.flags.iter().any(|flag| flag == RAG_UNAVAILABLE_FLAG) {
                        response.flags.push(RAG_UNAVAILABLE_FLAG.to_owned());
                    }
                }
                info!(
                    event_name = "advisor.state",
                    state = AdvisorState::ProvideAdvice.as_str(),
                    documents = response.rag_results.len(),
                    "advice ready"
                );
                AdvisorReply::Advice(response)
            }
            Err(advisor_error) => {
                error!(event_name = "advisor.response.rejected", error = %advisor_error, "advisor reply rejected");
                AdvisorReply::Error(advisor_error.to_body())
            }
        }
    }
}

fn user_prompt(query: &str, context: &[&RagHit]) -> String {
    let mut documents = String::new();
    for hit in context {
        documents.push_str(&format!("Documento: {}\n{}\n\n", hit.document_id, hit.excerpt));
    }
    if documents.is_empty() {
        documents.push_str("(sin resultados)\n");
    }

    format!(
        "Consulta del vendedor: {query}\n\nResultados RAG disponibles:\n{documents}\nProporciona una respuesta técnica detallada basada únicamente en la información de las fichas técnicas."
    )
}

fn excerpt(content: &str) -> String {
    if content.chars().count() <= EXCERPT_CHARS {
        return content.to_owned();
    }
    let truncated: String = content.chars().take(EXCERPT_CHARS).collect();
    format!("{truncated}...")
}
