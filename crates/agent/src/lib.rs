//! Agent Runtime - conversational lead qualification
//!
//! This crate turns free-text WhatsApp/Instagram messages into qualified leads:
//! - Extracts technical fields from Spanish text (`conversation`)
//! - Enforces price and human-handoff guardrails (`guardrails`)
//! - Drives the lead flow, scoring, retrieval and CRM sync per turn (`runtime`)
//! - Answers technical queries with a strict JSON contract (`advisor`)
//!
//! # Architecture
//!
//! One turn runs a constrained loop:
//! 1. **Guardrails** - flag price/human requests before anything else
//! 2. **Extraction** - fill empty fields only, never overwrite
//! 3. **Flow** - settle the lead state machine and collect actions
//! 4. **Side effects** - scoring, knowledge lookup, CRM sync (best effort)
//! 5. **Reply** - Spanish reply plus the next questions to ask
//!
//! # Safety Principle
//!
//! The LLM only phrases technical answers. It never decides state, score or prices.

pub mod advisor;
pub mod conversation;
pub mod guardrails;
pub mod llm;
pub mod rag;
pub mod reply;
pub mod runtime;

pub use advisor::{AdvisorReply, TechnicalAdvisor, TechnicalResponse};
pub use conversation::{ExtractionReport, FieldExtractor};
pub use guardrails::{GuardrailDecision, GuardrailIntent, GuardrailPolicy};
pub use llm::{ChatMessage, LlmClient, LlmError, OpenAiCompatibleClient};
pub use rag::{KnowledgeSource, LocalKnowledgeSource, RagError, RagHit, TechnicalQuery};
pub use runtime::{AgentRuntime, InboundMessage, LeadResponse, RuntimeSettings, TurnResult};
