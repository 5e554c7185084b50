use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::vocabulary::normalize_text;

pub const META_BRAND: &str = "marca";
pub const META_MODEL: &str = "modelo";
pub const META_CATEGORY: &str = "categoria";

const FILENAME_BRANDS: [&str; 9] = [
    "john deere",
    "new holland",
    "bobcat",
    "caterpillar",
    "jcb",
    "case",
    "komatsu",
    "alkimax",
    "kubota",
];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RagDocument {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl RagDocument {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self { id: id.into(), content: content.into(), metadata: BTreeMap::new() }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Metadata value rendered as text; non-string JSON values use their JSON form.
    pub fn metadata_text(&self, key: &str) -> Option<String> {
        self.metadata.get(key).map(|value| match value {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        })
    }

    pub fn category(&self) -> Option<String> {
        self.metadata_text(META_CATEGORY)
    }
}

/// Derives brand, model and category from a file stem such as `Bobcat_S70_Especificaciones`.
pub fn metadata_from_filename(stem: &str) -> BTreeMap<String, Value> {
    let normalized = normalize_text(&stem.replace('_', " "));
    let padded = format!(" {normalized} ");
    let mut metadata = BTreeMap::new();

    if let Some(brand) =
        FILENAME_BRANDS.iter().find(|brand| padded.contains(&format!(" {brand} ")))
    {
        metadata.insert(META_BRAND.to_owned(), Value::String(title_case(brand)));
    }

    let model = normalized.split(' ').find(|token| {
        token.chars().any(|ch| ch.is_ascii_digit()) && token.chars().any(|ch| ch.is_alphabetic())
    });
    if let Some(model) = model {
        metadata.insert(META_MODEL.to_owned(), Value::String(model.to_uppercase()));
    }

    let category = if normalized.contains("especificaciones") || normalized.contains("specs") {
        "especificaciones"
    } else if normalized.contains("compatibilidad") || normalized.contains("compatible") {
        "compatibilidad"
    } else if normalized.contains("manual") {
        "manual"
    } else if normalized.contains("instalacion") {
        "instalacion"
    } else {
        "general"
    };
    metadata.insert(META_CATEGORY.to_owned(), Value::String(category.to_owned()));

    metadata
}

fn title_case(text: &str) -> String {
    text.split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::{metadata_from_filename, RagDocument, META_BRAND, META_CATEGORY, META_MODEL};

    #[test]
    fn derives_brand_model_and_category_from_file_stem() {
        let metadata = metadata_from_filename("Bobcat_S70_Especificaciones");

        assert_eq!(metadata.get(META_BRAND), Some(&Value::String("Bobcat".to_owned())));
        assert_eq!(metadata.get(META_MODEL), Some(&Value::String("S70".to_owned())));
        assert_eq!(metadata.get(META_CATEGORY), Some(&Value::String("especificaciones".to_owned())));
    }

    #[test]
    fn multi_word_brands_and_unknown_categories() {
        let metadata = metadata_from_filename("john_deere_320G_notas");

        assert_eq!(metadata.get(META_BRAND), Some(&Value::String("John Deere".to_owned())));
        assert_eq!(metadata.get(META_MODEL), Some(&Value::String("320G".to_owned())));
        assert_eq!(metadata.get(META_CATEGORY), Some(&Value::String("general".to_owned())));
    }

    #[test]
    fn metadata_text_renders_non_string_values() {
        let document = RagDocument::new("doc-1", "texto").with_metadata("anio", 2024);

        assert_eq!(document.metadata_text("anio").as_deref(), Some("2024"));
        assert!(document.metadata_text(META_BRAND).is_none());
    }
}
