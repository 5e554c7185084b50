//! Closed keyword vocabularies the field extractor matches against.
//!
//! Everything here is data. Phrases are stored normalized (lowercase, accents folded,
//! single spaces) and are matched on word boundaries by the extractor.

use crate::domain::lead::{MachineUsage, Urgency};
use crate::territory::Territory;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Term {
    pub canonical: String,
    pub phrases: Vec<String>,
}

impl Term {
    pub fn new(canonical: &str, aliases: &[&str]) -> Self {
        let mut phrases = vec![normalize_text(canonical)];
        phrases.extend(aliases.iter().map(|alias| normalize_text(alias)));
        phrases.retain(|phrase| !phrase.is_empty());
        phrases.dedup();
        Self { canonical: canonical.trim().to_owned(), phrases }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeywordSet<T> {
    pub value: T,
    pub phrases: Vec<String>,
}

impl<T> KeywordSet<T> {
    pub fn new(value: T, phrases: &[&str]) -> Self {
        Self { value, phrases: phrases.iter().map(|phrase| normalize_text(phrase)).collect() }
    }
}

/// Additions loaded from the `[vocabulary]` config section.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VocabularyExtras {
    pub brands: Vec<String>,
    pub implements: Vec<String>,
    pub zones: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Vocabulary {
    brands: Vec<Term>,
    implements: Vec<Term>,
    zones: Vec<Term>,
    usage: Vec<KeywordSet<MachineUsage>>,
    urgency: Vec<KeywordSet<Urgency>>,
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self::builtin()
    }
}

impl Vocabulary {
    pub fn builtin() -> Self {
        Self {
            brands: vec![
                Term::new("Bobcat", &[]),
                Term::new("Caterpillar", &["cat"]),
                Term::new("JCB", &[]),
                Term::new("Case", &[]),
                Term::new("John Deere", &["deere"]),
                Term::new("Komatsu", &[]),
                Term::new("Alkimax", &[]),
                Term::new("New Holland", &[]),
                Term::new("Kubota", &[]),
                Term::new("Gehl", &[]),
                Term::new("Takeuchi", &[]),
                Term::new("Mustang", &[]),
            ],
            implements: vec![
                Term::new("balde", &["baldes", "cuchara", "bucket"]),
                Term::new("martillo", &["martillo hidraulico", "rompedor", "hammer"]),
                Term::new("horquilla", &["horquillas", "porta pallet", "portapallet"]),
                Term::new("barredora", &["barredoras", "sweeper"]),
                Term::new("hoyadora", &["ahoyadora", "perforadora", "mecha", "auger"]),
                Term::new("rastrillo", &["rastrillos", "rake"]),
                Term::new("pinza", &["pinzas", "grapple"]),
                Term::new("retroexcavadora", &["retro", "backhoe"]),
                Term::new("zanjadora", &["zanjadoras", "trencher"]),
                Term::new("desmalezadora", &["trituradora", "mulcher"]),
                Term::new("hoja topadora", &["topadora", "pala topadora", "cuchilla niveladora"]),
                Term::new("fresadora", &["fresadora de asfalto", "cold planer"]),
            ],
            zones: vec![
                Term::new("Buenos Aires", &["bs as", "bsas", "provincia de buenos aires"]),
                Term::new("CABA", &["capital federal", "ciudad de buenos aires"]),
                Term::new("Córdoba", &[]),
                Term::new("Santa Fe", &[]),
                Term::new("Mendoza", &[]),
                Term::new("Tucumán", &[]),
                Term::new("Entre Ríos", &[]),
                Term::new("Neuquén", &[]),
                Term::new("Salta", &[]),
                Term::new("La Pampa", &[]),
                Term::new("Chaco", &[]),
                Term::new("Corrientes", &[]),
                Term::new("Misiones", &[]),
                Term::new("San Juan", &[]),
                Term::new("San Luis", &[]),
                Term::new("Río Negro", &[]),
                Term::new("Chubut", &[]),
                Term::new("Santiago del Estero", &[]),
                Term::new("Jujuy", &[]),
                Term::new("Catamarca", &[]),
                Term::new("La Rioja", &[]),
                Term::new("Formosa", &[]),
                Term::new("Santa Cruz", &[]),
                Term::new("Tierra del Fuego", &[]),
            ],
            usage: vec![
                KeywordSet::new(
                    MachineUsage::Obra,
                    &["obra", "obras", "construccion", "constructora", "demolicion", "movimiento de suelo"],
                ),
                KeywordSet::new(
                    MachineUsage::Campo,
                    &["campo", "agricola", "agro", "tambo", "estancia", "granja", "rural", "feedlot"],
                ),
                KeywordSet::new(
                    MachineUsage::Industrial,
                    &["industrial", "industria", "fabrica", "planta", "galpon", "deposito", "logistica"],
                ),
            ],
            urgency: vec![
                KeywordSet::new(
                    Urgency::Alta,
                    &[
                        "urgente",
                        "urgentemente",
                        "urgencia alta",
                        "prioridad alta",
                        "cuanto antes",
                        "lo antes posible",
                        "inmediato",
                        "inmediatamente",
                        "para hoy",
                        "para manana",
                        "esta semana",
                    ],
                ),
                KeywordSet::new(
                    Urgency::Media,
                    &[
                        "urgencia media",
                        "prioridad media",
                        "este mes",
                        "proximas semanas",
                        "en unas semanas",
                        "el mes que viene",
                    ],
                ),
                KeywordSet::new(
                    Urgency::Baja,
                    &[
                        "urgencia baja",
                        "prioridad baja",
                        "sin apuro",
                        "no hay apuro",
                        "no tengo apuro",
                        "no es urgente",
                        "sin urgencia",
                        "mas adelante",
                        "el ano que viene",
                        "solo averiguando",
                        "solo consultando",
                    ],
                ),
            ],
        }
    }

    /// Adds configured extras. Existing canonical entries win over duplicates.
    pub fn with_extras(mut self, extras: &VocabularyExtras) -> Self {
        merge_terms(&mut self.brands, extras.brands.iter().map(|brand| Term::new(brand, &[])));
        merge_terms(
            &mut self.implements,
            extras.implements.iter().map(|implement| Term::new(implement, &[])),
        );
        merge_terms(&mut self.zones, extras.zones.iter().map(|zone| Term::new(zone, &[])));
        self
    }

    /// Every configured sales territory is a recognizable zone, aliases included.
    pub fn with_territories(mut self, territories: &[Territory]) -> Self {
        merge_terms(
            &mut self.zones,
            territories.iter().map(|territory| {
                let aliases: Vec<&str> = territory.aliases.iter().map(String::as_str).collect();
                Term::new(&territory.zone, &aliases)
            }),
        );
        self
    }

    pub fn brands(&self) -> &[Term] {
        &self.brands
    }

    pub fn implements(&self) -> &[Term] {
        &self.implements
    }

    pub fn zones(&self) -> &[Term] {
        &self.zones
    }

    pub fn usage(&self) -> &[KeywordSet<MachineUsage>] {
        &self.usage
    }

    pub fn urgency(&self) -> &[KeywordSet<Urgency>] {
        &self.urgency
    }
}

fn merge_terms(existing: &mut Vec<Term>, additions: impl Iterator<Item = Term>) {
    for term in additions {
        let key = normalize_text(&term.canonical);
        if key.is_empty() {
            continue;
        }
        match existing.iter_mut().find(|current| normalize_text(&current.canonical) == key) {
            Some(current) => {
                for phrase in term.phrases {
                    if !current.phrases.contains(&phrase) {
                        current.phrases.push(phrase);
                    }
                }
            }
            None => existing.push(term),
        }
    }
}

/// Lowercases, folds Spanish accents and collapses everything that is not a letter,
/// digit or hyphen into single spaces.
pub fn normalize_text(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    let mut pending_space = false;

    for ch in input.chars().flat_map(char::to_lowercase) {
        let folded = fold_accent(ch);
        if folded.is_alphanumeric() || folded == '-' {
            if pending_space && !output.is_empty() {
                output.push(' ');
            }
            pending_space = false;
            output.push(folded);
        } else {
            pending_space = true;
        }
    }

    output
}

pub fn fold_accent(ch: char) -> char {
    match ch {
        'á' | 'à' | 'ä' | 'â' => 'a',
        'é' | 'è' | 'ë' | 'ê' => 'e',
        'í' | 'ì' | 'ï' | 'î' => 'i',
        'ó' | 'ò' | 'ö' | 'ô' => 'o',
        'ú' | 'ù' | 'ü' | 'û' => 'u',
        'ñ' => 'n',
        other => other,
    }
}
