use std::path::PathBuf;

use leadflow_core::config::{AppConfig, LoadOptions};
use leadflow_core::knowledge::KnowledgeBase;
use serde_json::json;

use crate::commands::CommandResult;

/// Reads every `*.txt` file under `sources` and writes the flat JSON document store.
///
/// Directories and output path fall back to `[knowledge]` config when not given.
pub fn ingest(sources: Vec<PathBuf>, output: Option<PathBuf>) -> CommandResult {
    let (sources, output) = if !sources.is_empty() && output.is_some() {
        (sources, output)
    } else {
        match AppConfig::load(LoadOptions::default()) {
            Ok(config) => {
                let sources = if sources.is_empty() { config.knowledge.text_dirs } else { sources };
                (sources, output.or(Some(config.knowledge.documents_path)))
            }
            Err(error) => {
                return CommandResult::failure(
                    "knowledge_ingest",
                    "config_validation",
                    format!("configuration issue: {error}"),
                    2,
                );
            }
        }
    };
    let Some(output) = output else {
        return CommandResult::failure(
            "knowledge_ingest",
            "config_validation",
            "no output path for the document store",
            2,
        );
    };

    let base = match KnowledgeBase::from_text_dirs(&sources) {
        Ok(base) => base,
        Err(error) => {
            return CommandResult::failure("knowledge_ingest", "knowledge_read", error.to_string(), 4);
        }
    };
    if base.is_empty() {
        let listed: Vec<String> = sources.iter().map(|path| path.display().to_string()).collect();
        return CommandResult::failure(
            "knowledge_ingest",
            "knowledge_empty",
            format!("no non-empty .txt documents found in {}", listed.join(", ")),
            4,
        );
    }

    if let Err(error) = base.save(&output) {
        return CommandResult::failure("knowledge_ingest", "knowledge_write", error.to_string(), 5);
    }

    CommandResult::success_with_details(
        "knowledge_ingest",
        format!("wrote {} documents to `{}`", base.len(), output.display()),
        Some(json!({
            "documents": base.len(),
            "fingerprint": base.fingerprint(),
            "categories": base.category_counts(),
            "output": output.display().to_string(),
        })),
    )
}
