use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::config::KnowledgeConfig;
use crate::knowledge::document::{
    metadata_from_filename, RagDocument, META_BRAND, META_CATEGORY, META_MODEL,
};
use crate::knowledge::KnowledgeError;
use crate::vocabulary::normalize_text;

const COMPATIBLE_CONFIDENCE: f32 = 0.8;
const RESTRICTED_CONFIDENCE: f32 = 0.3;
const HUMAN_REVIEW_BELOW: f32 = 0.5;
const MAX_RECOMMENDATIONS: usize = 3;
const RESTRICTION_KEYWORDS: [&str; 3] = ["no compatible", "limitado", "restriccion"];
const ENDORSEMENT_KEYWORDS: [&str; 3] = ["compatible", "recomendado", "optimo"];

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum KnowledgeOrigin {
    JsonStore { path: PathBuf },
    TextFiles { directories: Vec<PathBuf> },
    Builtin,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SearchQuery {
    pub text: String,
    pub filters: BTreeMap<String, String>,
    pub top_k: usize,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>, top_k: usize) -> Self {
        Self { text: text.into(), filters: BTreeMap::new(), top_k }
    }

    pub fn filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.insert(key.into(), value.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompatibilityReport {
    pub compatible: Option<bool>,
    pub confidence: f32,
    pub message: String,
    pub recommendations: Vec<String>,
    pub requires_human: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpecificationSheet {
    pub brand: String,
    pub model: Option<String>,
    pub specifications: String,
    pub metadata: BTreeMap<String, Value>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct DocumentFile {
    #[serde(default)]
    documents: Vec<RagDocument>,
}

#[derive(Clone, Debug)]
pub struct KnowledgeBase {
    documents: Vec<RagDocument>,
    origin: KnowledgeOrigin,
    fingerprint: String,
}

impl KnowledgeBase {
    pub fn new(documents: Vec<RagDocument>, origin: KnowledgeOrigin) -> Self {
        let fingerprint = fingerprint(&documents);
        Self { documents, origin, fingerprint }
    }

    /// Built-in sample documents used when nothing else is available.
    pub fn builtin() -> Self {
        Self::new(
            vec![
                RagDocument::new(
                    "doc_001",
                    "Bobcat S70: Capacidad de carga 320kg, sistema hidráulico 45L/min, compatible con baldes hasta 0.3m³",
                )
                .with_metadata(META_BRAND, "Bobcat")
                .with_metadata(META_MODEL, "S70")
                .with_metadata(META_CATEGORY, "especificaciones"),
                RagDocument::new(
                    "doc_002",
                    "Caterpillar 242D: Sistema hidráulico de alta presión, compatible con martillos hasta 500kg",
                )
                .with_metadata(META_BRAND, "Caterpillar")
                .with_metadata(META_MODEL, "242D")
                .with_metadata(META_CATEGORY, "compatibilidad"),
            ],
            KnowledgeOrigin::Builtin,
        )
    }

    /// JSON store first, then text directories, then the built-in samples.
    pub fn load(config: &KnowledgeConfig) -> Result<Self, KnowledgeError> {
        if config.documents_path.exists() {
            let base = Self::from_json_file(&config.documents_path)?;
            if !base.is_empty() {
                info!(
                    event_name = "knowledge.loaded",
                    source = "json_store",
                    documents = base.len(),
                    "knowledge base loaded"
                );
                return Ok(base);
            }
        }

        let base = Self::from_text_dirs(&config.text_dirs)?;
        if !base.is_empty() {
            info!(
                event_name = "knowledge.loaded",
                source = "text_files",
                documents = base.len(),
                "knowledge base loaded"
            );
            return Ok(base);
        }

        info!(event_name = "knowledge.loaded", source = "builtin", "using built-in sample documents");
        Ok(Self::builtin())
    }

    pub fn from_json_file(path: &Path) -> Result<Self, KnowledgeError> {
        let raw = fs::read_to_string(path)
            .map_err(|source| KnowledgeError::Read { path: path.to_path_buf(), source })?;
        let file: DocumentFile = serde_json::from_str(&raw)
            .map_err(|source| KnowledgeError::Parse { path: path.to_path_buf(), source })?;
        Ok(Self::new(file.documents, KnowledgeOrigin::JsonStore { path: path.to_path_buf() }))
    }

    /// Every non-empty `*.txt` file becomes one document with metadata from its file name.
    pub fn from_text_dirs(directories: &[PathBuf]) -> Result<Self, KnowledgeError> {
        let mut documents = Vec::new();

        for directory in directories {
            if !directory.is_dir() {
                debug!(
                    event_name = "knowledge.directory_missing",
                    directory = %directory.display(),
                    "skipping missing knowledge directory"
                );
                continue;
            }

            let entries = fs::read_dir(directory)
                .map_err(|source| KnowledgeError::Read { path: directory.clone(), source })?;
            let mut paths: Vec<PathBuf> = entries
                .filter_map(Result::ok)
                .map(|entry| entry.path())
                .filter(|path| {
                    path.extension().is_some_and(|extension| extension.eq_ignore_ascii_case("txt"))
                })
                .collect();
            paths.sort();

            for path in paths {
                let content = fs::read_to_string(&path)
                    .map_err(|source| KnowledgeError::Read { path: path.clone(), source })?;
                if content.trim().is_empty() {
                    continue;
                }
                let stem = path.file_stem().and_then(|stem| stem.to_str()).unwrap_or_default();
                documents.push(RagDocument {
                    id: format!("file_{stem}"),
                    content,
                    metadata: metadata_from_filename(stem),
                });
            }
        }

        Ok(Self::new(documents, KnowledgeOrigin::TextFiles { directories: directories.to_vec() }))
    }

    /// Writes the flat `{"documents": [...]}` store.
    pub fn save(&self, path: &Path) -> Result<(), KnowledgeError> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|source| KnowledgeError::Write { path: parent.to_path_buf(), source })?;
        }
        let file = DocumentFile { documents: self.documents.clone() };
        let encoded = serde_json::to_string_pretty(&file)?;
        fs::write(path, encoded)
            .map_err(|source| KnowledgeError::Write { path: path.to_path_buf(), source })
    }

    pub fn documents(&self) -> &[RagDocument] {
        &self.documents
    }

    pub fn origin(&self) -> &KnowledgeOrigin {
        &self.origin
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn category_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for document in &self.documents {
            let category = document.category().unwrap_or_else(|| "general".to_owned());
            *counts.entry(category).or_insert(0) += 1;
        }
        counts
    }

    /// Keyword search: each query word contained in the content adds one point. Documents
    /// failing a metadata filter or scoring zero are dropped; ties keep document order.
    pub fn search(&self, query: &SearchQuery) -> Vec<&RagDocument> {
        let normalized_query = normalize_text(&query.text);
        let words: Vec<&str> = normalized_query.split(' ').filter(|word| !word.is_empty()).collect();

        let mut scored: Vec<(usize, &RagDocument)> = self
            .documents
            .iter()
            .filter(|document| matches_filters(document, &query.filters))
            .filter_map(|document| {
                let content = normalize_text(&document.content);
                let score = words.iter().filter(|word| content.contains(**word)).count();
                (score > 0).then_some((score, document))
            })
            .collect();

        scored.sort_by(|left, right| right.0.cmp(&left.0));
        scored.into_iter().take(query.top_k).map(|(_, document)| document).collect()
    }

    pub fn validate_compatibility(
        &self,
        implement: &str,
        brand: &str,
        model: Option<&str>,
        top_k: usize,
    ) -> CompatibilityReport {
        let mut query = SearchQuery::new(
            format!("compatibilidad {implement} {brand} {}", model.unwrap_or_default()),
            top_k,
        )
        .filter(META_BRAND, brand);
        if let Some(model) = model {
            query = query.filter(META_MODEL, model);
        }

        let results = self.search(&query);
        if results.is_empty() {
            return CompatibilityReport {
                compatible: None,
                confidence: 0.0,
                message: "No hay información técnica disponible para validar compatibilidad"
                    .to_owned(),
                recommendations: Vec::new(),
                requires_human: true,
            };
        }

        let mut compatible = true;
        let mut confidence = COMPATIBLE_CONFIDENCE;
        let mut recommendations = Vec::new();
        for document in results {
            let content = normalize_text(&document.content);
            if RESTRICTION_KEYWORDS.iter().any(|keyword| content.contains(keyword)) {
                compatible = false;
                confidence = RESTRICTED_CONFIDENCE;
            }
            if ENDORSEMENT_KEYWORDS.iter().any(|keyword| content.contains(keyword)) {
                recommendations.push(document.content.clone());
            }
        }
        recommendations.truncate(MAX_RECOMMENDATIONS);

        CompatibilityReport {
            compatible: Some(compatible),
            confidence,
            message: format!(
                "Validación para {implement} en {brand} {}",
                model.unwrap_or_default()
            )
            .trim_end()
            .to_owned(),
            recommendations,
            requires_human: confidence < HUMAN_REVIEW_BELOW,
        }
    }

    pub fn specifications(
        &self,
        brand: &str,
        model: Option<&str>,
        top_k: usize,
    ) -> Option<SpecificationSheet> {
        let mut query =
            SearchQuery::new(format!("{brand} {} especificaciones", model.unwrap_or_default()), top_k)
                .filter(META_BRAND, brand)
                .filter(META_CATEGORY, "especificaciones");
        if let Some(model) = model {
            query = query.filter(META_MODEL, model);
        }

        self.search(&query).first().map(|document| SpecificationSheet {
            brand: brand.to_owned(),
            model: model.map(str::to_owned),
            specifications: document.content.clone(),
            metadata: document.metadata.clone(),
        })
    }
}

fn matches_filters(document: &RagDocument, filters: &BTreeMap<String, String>) -> bool {
    filters.iter().all(|(key, expected)| {
        document
            .metadata_text(key)
            .is_some_and(|actual| normalize_text(&actual) == normalize_text(expected))
    })
}

fn fingerprint(documents: &[RagDocument]) -> String {
    let mut hasher = blake3::Hasher::new();
    for document in documents {
        hasher.update(document.id.as_bytes());
        hasher.update(&[0]);
        hasher.update(document.content.as_bytes());
        hasher.update(&[0]);
        for (key, value) in &document.metadata {
            hasher.update(key.as_bytes());
            hasher.update(value.to_string().as_bytes());
        }
        hasher.update(&[0xff]);
    }
    hasher.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use crate::config::KnowledgeConfig;
    use crate::knowledge::document::{RagDocument, META_BRAND, META_CATEGORY, META_MODEL};

    use super::{KnowledgeBase, KnowledgeOrigin, SearchQuery};

    fn config_in(dir: &TempDir) -> KnowledgeConfig {
        KnowledgeConfig {
            documents_path: dir.path().join("rag_documents.json"),
            text_dirs: vec![dir.path().join("docs")],
            ..KnowledgeConfig::default()
        }
    }

    #[test]
    fn search_ranks_by_matching_words_and_applies_filters() {
        let base = KnowledgeBase::builtin();

        let hits = base.search(&SearchQuery::new("compatible balde bobcat", 5));
        assert_eq!(hits.first().map(|doc| doc.id.as_str()), Some("doc_001"));
        assert_eq!(hits.len(), 2, "both documents mention `compatible`");

        let filtered =
            base.search(&SearchQuery::new("compatible", 5).filter(META_BRAND, "caterpillar"));
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id, "doc_002");
    }

    #[test]
    fn search_returns_empty_when_nothing_matches() {
        let base = KnowledgeBase::builtin();

        assert!(base.search(&SearchQuery::new("tractor", 5)).is_empty());
        assert!(base
            .search(&SearchQuery::new("compatible", 5).filter(META_BRAND, "Kubota"))
            .is_empty());
    }

    #[test]
    fn compatibility_detects_restrictions_and_missing_data() {
        let base = KnowledgeBase::new(
            vec![RagDocument::new(
                "doc-jcb",
                "JCB 190: uso limitado con martillos de más de 400kg, restricción de caudal",
            )
            .with_metadata(META_BRAND, "JCB")],
            KnowledgeOrigin::Builtin,
        );

        let report = base.validate_compatibility("martillo", "JCB", None, 5);
        assert_eq!(report.compatible, Some(false));
        assert!((report.confidence - 0.3).abs() < f32::EPSILON);
        assert!(report.requires_human);

        let unknown = base.validate_compatibility("balde", "Kubota", None, 5);
        assert_eq!(unknown.compatible, None);
        assert!(unknown.requires_human);
    }

    #[test]
    fn compatible_document_becomes_recommendation() {
        let report = KnowledgeBase::builtin().validate_compatibility("balde", "Bobcat", Some("S70"), 5);

        assert_eq!(report.compatible, Some(true));
        assert!(!report.requires_human);
        assert_eq!(report.recommendations.len(), 1);
    }

    #[test]
    fn specifications_use_specification_documents_only() {
        let base = KnowledgeBase::builtin();

        let sheet = base.specifications("Bobcat", Some("S70"), 5).expect("bobcat specs");
        assert!(sheet.specifications.contains("320kg"));
        assert!(base.specifications("Caterpillar", Some("242D"), 5).is_none());
    }

    #[test]
    fn load_prefers_json_then_text_then_builtin() {
        let dir = TempDir::new().expect("tempdir");
        let config = config_in(&dir);

        let base = KnowledgeBase::load(&config).expect("builtin samples");
        assert_eq!(base.origin(), &KnowledgeOrigin::Builtin);

        fs::create_dir_all(dir.path().join("docs")).expect("docs dir");
        fs::write(
            dir.path().join("docs").join("Kubota_SVL75_specs.txt"),
            "Kubota SVL75: caudal auxiliar 80L/min",
        )
        .expect("write txt");
        let base = KnowledgeBase::load(&config).expect("text files");
        assert!(matches!(base.origin(), KnowledgeOrigin::TextFiles { .. }));
        assert_eq!(base.documents()[0].id, "file_Kubota_SVL75_specs");
        assert_eq!(base.documents()[0].metadata_text(META_MODEL).as_deref(), Some("SVL75"));

        KnowledgeBase::builtin().save(&config.documents_path).expect("save");
        let base = KnowledgeBase::load(&config).expect("json store");
        assert!(matches!(base.origin(), KnowledgeOrigin::JsonStore { .. }));
        assert_eq!(base.len(), 2);
        assert_eq!(base.fingerprint(), KnowledgeBase::builtin().fingerprint());
        assert_eq!(base.category_counts().get("especificaciones"), Some(&1));
    }

    #[test]
    fn malformed_json_store_is_an_error() {
        let dir = TempDir::new().expect("tempdir");
        let config = config_in(&dir);
        fs::write(&config.documents_path, "{not json").expect("write");

        assert!(KnowledgeBase::load(&config).is_err());
        assert!(KnowledgeBase::builtin()
            .documents()
            .iter()
            .all(|doc| doc.metadata.contains_key(META_CATEGORY)));
    }
}
