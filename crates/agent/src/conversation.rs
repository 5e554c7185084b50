use std::collections::BTreeSet;

use leadflow_core::domain::lead::{LeadField, LeadFlag, LeadRecord, MachineUsage, Urgency};
use leadflow_core::vocabulary::{normalize_text, Vocabulary};

const NAME_CUES: [(&str, bool); 3] =
    [("mi nombre es", false), ("me llamo", false), ("soy", true)];
const ZONE_CUES: [&str; 5] = ["de la zona de", "estoy en", "soy de", "desde", "zona"];
const NAME_STOPWORDS: [&str; 10] = ["de", "del", "el", "la", "los", "las", "un", "una", "muy", "yo"];
const MAX_NAME_TOKENS: usize = 2;
const MAX_ZONE_TOKENS: usize = 3;
const MODEL_MIN_LEN: usize = 2;
const MODEL_MAX_LEN: usize = 12;

/// Fields newly filled by one extraction pass, plus ambiguity flags raised.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExtractionReport {
    pub filled: BTreeSet<LeadField>,
    pub ambiguous: BTreeSet<LeadFlag>,
}

impl ExtractionReport {
    pub fn is_empty(&self) -> bool {
        self.filled.is_empty() && self.ambiguous.is_empty()
    }
}

/// Keyword extractor over the closed vocabularies.
///
/// Additive per field: a field that already has a value is never overwritten, and a
/// message that matches more than one distinct value for a field leaves it empty.
#[derive(Clone, Debug)]
pub struct FieldExtractor {
    brands: PhraseIndex<String>,
    implements: PhraseIndex<String>,
    zones: PhraseIndex<String>,
    usage: PhraseIndex<MachineUsage>,
    urgency: PhraseIndex<Urgency>,
}

impl Default for FieldExtractor {
    fn default() -> Self {
        Self::new(&Vocabulary::builtin())
    }
}

impl FieldExtractor {
    pub fn new(vocabulary: &Vocabulary) -> Self {
        let terms = |terms: &[leadflow_core::vocabulary::Term]| {
            PhraseIndex::new(terms.iter().flat_map(|term| {
                term.phrases.iter().map(move |phrase| (phrase.clone(), term.canonical.clone()))
            }))
        };

        Self {
            brands: terms(vocabulary.brands()),
            implements: terms(vocabulary.implements()),
            zones: terms(vocabulary.zones()),
            usage: PhraseIndex::new(vocabulary.usage().iter().flat_map(|set| {
                set.phrases.iter().map(move |phrase| (phrase.clone(), set.value))
            })),
            urgency: PhraseIndex::new(vocabulary.urgency().iter().flat_map(|set| {
                set.phrases.iter().map(move |phrase| (phrase.clone(), set.value))
            })),
        }
    }

    /// Returns `prior` with every currently empty field that the message fills.
    pub fn extract(&self, text: &str, prior: &LeadRecord) -> LeadRecord {
        self.extract_with_report(text, prior).0
    }

    pub fn extract_with_report(
        &self,
        text: &str,
        prior: &LeadRecord,
    ) -> (LeadRecord, ExtractionReport) {
        let mut record = prior.clone();
        let report = self.apply(text, &mut record);
        (record, report)
    }

    /// Writes only `record.data` and ambiguity flags. Turn bookkeeping belongs to the caller.
    pub fn apply(&self, text: &str, record: &mut LeadRecord) -> ExtractionReport {
        let mut report = ExtractionReport::default();
        let (normalized, original) = aligned_tokens(text);
        let tokens: Vec<&str> = normalized.iter().map(String::as_str).collect();
        if tokens.is_empty() {
            return report;
        }
        let mut claimed = vec![false; tokens.len()];

        let brand_matches = self.brands.find(&tokens);
        let zone_matches = self.zones.find(&tokens);
        let implement_matches = self.implements.find(&tokens);
        for found in brand_matches.iter().chain(&zone_matches).chain(&implement_matches) {
            claimed[found.start..found.end].iter_mut().for_each(|slot| *slot = true);
        }

        let data = &mut record.data;

        match resolve(&brand_matches) {
            Resolution::One(found) => {
                let brand = found.value.clone();
                if data.machine.model.is_none()
                    && data.machine.brand.as_ref().map_or(true, |current| *current == brand)
                {
                    if let Some(model) = model_near(&tokens, &claimed, found.start, found.end) {
                        data.machine.model = Some(model);
                        report.filled.insert(LeadField::MachineModel);
                    }
                }
                if data.machine.brand.is_none() {
                    data.machine.brand = Some(brand);
                    report.filled.insert(LeadField::MachineBrand);
                }
            }
            Resolution::Ambiguous if data.machine.brand.is_none() => {
                report.ambiguous.insert(LeadFlag::AmbiguousBrand);
            }
            _ => {}
        }

        if data.implement_of_interest.is_none() {
            match resolve(&implement_matches) {
                Resolution::One(found) => {
                    data.implement_of_interest = Some(found.value.clone());
                    report.filled.insert(LeadField::ImplementOfInterest);
                }
                Resolution::Ambiguous => {
                    report.ambiguous.insert(LeadFlag::AmbiguousImplement);
                }
                Resolution::Missing => {}
            }
        }

        if data.zone.is_none() {
            match resolve(&zone_matches) {
                Resolution::One(found) => {
                    data.zone = Some(found.value.clone());
                    report.filled.insert(LeadField::Zone);
                }
                Resolution::Ambiguous => {
                    report.ambiguous.insert(LeadFlag::AmbiguousZone);
                }
                Resolution::Missing => {
                    if let Some(zone) = zone_after_cue(&tokens, &original, &claimed) {
                        data.zone = Some(zone);
                        report.filled.insert(LeadField::Zone);
                    }
                }
            }
        }

        if data.machine.usage.is_none() {
            match resolve(&self.usage.find(&tokens)) {
                Resolution::One(found) => {
                    data.machine.usage = Some(found.value);
                    report.filled.insert(LeadField::MachineUsage);
                }
                Resolution::Ambiguous => {
                    report.ambiguous.insert(LeadFlag::AmbiguousUsage);
                }
                Resolution::Missing => {}
            }
        }

        if data.urgency.is_none() {
            match resolve(&self.urgency.find(&tokens)) {
                Resolution::One(found) => {
                    data.urgency = Some(found.value);
                    report.filled.insert(LeadField::Urgency);
                }
                Resolution::Ambiguous => {
                    report.ambiguous.insert(LeadFlag::AmbiguousUrgency);
                }
                Resolution::Missing => {}
            }
        }

        if data.name.is_none() {
            if let Some(name) = name_after_cue(&tokens, &original, &claimed) {
                data.name = Some(name);
                report.filled.insert(LeadField::Name);
            }
        }

        for flag in &report.ambiguous {
            record.flags.insert(*flag);
        }

        report
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct PhraseMatch<T> {
    value: T,
    start: usize,
    end: usize,
}

/// Phrases split into tokens, longest first so "no es urgente" wins over "urgente".
#[derive(Clone, Debug)]
struct PhraseIndex<T> {
    entries: Vec<(Vec<String>, T)>,
}

impl<T: Clone + PartialEq> PhraseIndex<T> {
    fn new(pairs: impl IntoIterator<Item = (String, T)>) -> Self {
        let mut entries: Vec<(Vec<String>, T)> = pairs
            .into_iter()
            .map(|(phrase, value)| {
                (phrase.split(' ').filter(|t| !t.is_empty()).map(str::to_owned).collect(), value)
            })
            .filter(|(phrase, _): &(Vec<String>, T)| !phrase.is_empty())
            .collect();
        entries.sort_by(|left, right| right.0.len().cmp(&left.0.len()));
        Self { entries }
    }

    fn find(&self, tokens: &[&str]) -> Vec<PhraseMatch<T>> {
        let mut consumed = vec![false; tokens.len()];
        let mut found = Vec::new();

        for (phrase, value) in &self.entries {
            let width = phrase.len();
            if width > tokens.len() {
                continue;
            }
            for start in 0..=tokens.len() - width {
                let end = start + width;
                if consumed[start..end].iter().any(|taken| *taken) {
                    continue;
                }
                if tokens[start..end].iter().zip(phrase).all(|(token, word)| *token == word) {
                    consumed[start..end].iter_mut().for_each(|slot| *slot = true);
                    found.push(PhraseMatch { value: value.clone(), start, end });
                }
            }
        }

        found.sort_by_key(|found| found.start);
        found
    }
}

enum Resolution<'a, T> {
    Missing,
    One(&'a PhraseMatch<T>),
    Ambiguous,
}

fn resolve<T: PartialEq>(matches: &[PhraseMatch<T>]) -> Resolution<'_, T> {
    let Some(first) = matches.first() else {
        return Resolution::Missing;
    };
    if matches.iter().all(|found| found.value == first.value) {
        Resolution::One(first)
    } else {
        Resolution::Ambiguous
    }
}

fn model_near(tokens: &[&str], claimed: &[bool], start: usize, end: usize) -> Option<String> {
    let after = tokens.get(end).filter(|_| !claimed[end]);
    let before = start.checked_sub(1).and_then(|index| tokens.get(index).filter(|_| !claimed[index]));

    after
        .filter(|token| looks_like_model(token))
        .or_else(|| before.filter(|token| looks_like_model(token)))
        .map(|token| token.to_uppercase())
}

fn looks_like_model(token: &str) -> bool {
    (MODEL_MIN_LEN..=MODEL_MAX_LEN).contains(&token.chars().count())
        && token.chars().any(|ch| ch.is_ascii_digit())
        && token.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '-')
        && !token.starts_with('-')
}

/// Normalized tokens, each paired with the original word it came from. Lowercasing can
/// split a word (`İ` becomes `i` plus a combining mark); only the first piece keeps the
/// original word, the rest pair with an empty string.
fn aligned_tokens(text: &str) -> (Vec<String>, Vec<String>) {
    let mut normalized = Vec::new();
    let mut original = Vec::new();
    let words = text.split(|ch: char| !(ch.is_alphanumeric() || ch == '-'));
    for word in words.filter(|word| !word.is_empty()) {
        let folded = normalize_text(word);
        for (piece, token) in folded.split(' ').filter(|token| !token.is_empty()).enumerate() {
            normalized.push(token.to_owned());
            original.push(if piece == 0 { word.to_owned() } else { String::new() });
        }
    }
    (normalized, original)
}

fn cue_positions<'a>(tokens: &'a [&str], cue: &'a str) -> impl Iterator<Item = usize> + 'a {
    let cue: Vec<&str> = cue.split(' ').collect();
    let width = cue.len();
    (0..tokens.len().saturating_sub(width - 1))
        .filter(move |start| tokens[*start..*start + width] == cue[..])
        .map(move |start| start + width)
}

fn name_after_cue(tokens: &[&str], original: &[String], claimed: &[bool]) -> Option<String> {
    for (cue, needs_capital) in NAME_CUES {
        for start in cue_positions(tokens, cue) {
            let mut words = Vec::new();
            for index in start..tokens.len().min(start + MAX_NAME_TOKENS) {
                let word = &original[index];
                let capitalized = word.chars().next().is_some_and(char::is_uppercase);
                let usable = !claimed[index]
                    && !word.is_empty()
                    && !NAME_STOPWORDS.contains(&tokens[index])
                    && word.chars().all(char::is_alphabetic)
                    && (capitalized || (!needs_capital && words.is_empty()));
                if !usable {
                    break;
                }
                words.push(title_case(word));
            }
            if !words.is_empty() {
                return Some(words.join(" "));
            }
        }
    }
    None
}

fn zone_after_cue(tokens: &[&str], original: &[String], claimed: &[bool]) -> Option<String> {
    for cue in ZONE_CUES {
        for start in cue_positions(tokens, cue) {
            let words: Vec<&str> = (start..tokens.len().min(start + MAX_ZONE_TOKENS))
                .map_while(|index| {
                    let word = original[index].as_str();
                    let capitalized = word.chars().next().is_some_and(char::is_uppercase);
                    (!claimed[index] && capitalized && word.chars().all(char::is_alphabetic))
                        .then_some(word)
                })
                .collect();
            if !words.is_empty() {
                return Some(words.join(" "));
            }
        }
    }
    None
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}
