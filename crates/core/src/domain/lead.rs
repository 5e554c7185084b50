use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::flows::states::{LeadState, TransitionOutcome};
use crate::territory::Salesperson;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContactId(pub String);

impl ContactId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Whatsapp,
    Instagram,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Whatsapp => "whatsapp",
            Self::Instagram => "instagram",
        }
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "whatsapp" => Ok(Self::Whatsapp),
            "instagram" => Ok(Self::Instagram),
            other => Err(format!("unsupported channel `{other}`")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MachineUsage {
    Obra,
    Campo,
    Industrial,
}

impl MachineUsage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Obra => "obra",
            Self::Campo => "campo",
            Self::Industrial => "industrial",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Alta,
    Media,
    Baja,
}

impl Urgency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alta => "alta",
            Self::Media => "media",
            Self::Baja => "baja",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LeadScore {
    A,
    B,
    C,
}

impl LeadScore {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
        }
    }
}

/// Data fields the extractor can fill. Required fields drive qualification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadField {
    Name,
    Zone,
    MachineBrand,
    MachineModel,
    MachineUsage,
    ImplementOfInterest,
    Urgency,
}

pub const REQUIRED_FIELDS: [LeadField; 4] =
    [LeadField::Name, LeadField::Zone, LeadField::MachineBrand, LeadField::ImplementOfInterest];

impl LeadField {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Zone => "zone",
            Self::MachineBrand => "machine.brand",
            Self::MachineModel => "machine.model",
            Self::MachineUsage => "machine.usage",
            Self::ImplementOfInterest => "implement_of_interest",
            Self::Urgency => "urgency",
        }
    }

    pub fn is_required(&self) -> bool {
        REQUIRED_FIELDS.contains(self)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadFlag {
    MissingTechData,
    AmbiguousUsage,
    AmbiguousUrgency,
    AmbiguousZone,
    AmbiguousBrand,
    AmbiguousImplement,
    ZoneNotCovered,
    RagUnavailable,
    CrmSyncFailed,
    InvalidTransition,
    PriceRequested,
    HumanRequested,
}

impl LeadFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingTechData => "missing_tech_data",
            Self::AmbiguousUsage => "ambiguous_usage",
            Self::AmbiguousUrgency => "ambiguous_urgency",
            Self::AmbiguousZone => "ambiguous_zone",
            Self::AmbiguousBrand => "ambiguous_brand",
            Self::AmbiguousImplement => "ambiguous_implement",
            Self::ZoneNotCovered => "zone_not_covered",
            Self::RagUnavailable => "rag_unavailable",
            Self::CrmSyncFailed => "crm_sync_failed",
            Self::InvalidTransition => "invalid_transition",
            Self::PriceRequested => "price_requested",
            Self::HumanRequested => "human_requested",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineInfo {
    pub brand: Option<String>,
    pub model: Option<String>,
    pub usage: Option<MachineUsage>,
}

/// Everything the extractor has learned about the lead so far.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedData {
    pub name: Option<String>,
    pub zone: Option<String>,
    #[serde(default)]
    pub machine: MachineInfo,
    pub implement_of_interest: Option<String>,
    pub urgency: Option<Urgency>,
}

impl ExtractedData {
    pub fn is_present(&self, field: LeadField) -> bool {
        match field {
            LeadField::Name => self.name.is_some(),
            LeadField::Zone => self.zone.is_some(),
            LeadField::MachineBrand => self.machine.brand.is_some(),
            LeadField::MachineModel => self.machine.model.is_some(),
            LeadField::MachineUsage => self.machine.usage.is_some(),
            LeadField::ImplementOfInterest => self.implement_of_interest.is_some(),
            LeadField::Urgency => self.urgency.is_some(),
        }
    }

    pub fn missing_required_fields(&self) -> Vec<LeadField> {
        REQUIRED_FIELDS.iter().copied().filter(|field| !self.is_present(*field)).collect()
    }

    pub fn required_fields_present(&self) -> usize {
        REQUIRED_FIELDS.iter().filter(|field| self.is_present(**field)).count()
    }

    pub fn required_fields_complete(&self) -> bool {
        self.missing_required_fields().is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationRole {
    Lead,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: ConversationRole,
    pub text: String,
    pub at: DateTime<Utc>,
}

/// Per-contact lead record.
///
/// `state` and `checkpoint` are only reachable through [`LeadRecord::commit`], which
/// accepts outcomes that match an edge of the lead transition table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadRecord {
    pub contact_id: ContactId,
    channel: Channel,
    #[serde(flatten)]
    pub data: ExtractedData,
    state: LeadState,
    checkpoint: u8,
    pub score: Option<LeadScore>,
    #[serde(default)]
    pub flags: BTreeSet<LeadFlag>,
    #[serde(default)]
    pub turns: u32,
    #[serde(default)]
    pub stalled_turns: u32,
    #[serde(default)]
    pub recently_filled: BTreeSet<LeadField>,
    pub assigned_salesperson: Option<Salesperson>,
    pub crm_id: Option<String>,
    #[serde(default)]
    pub synced_to_crm: bool,
    #[serde(default)]
    pub history: Vec<ConversationTurn>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LeadRecord {
    pub fn new(contact_id: ContactId, channel: Channel) -> Self {
        let now = Utc::now();
        Self {
            contact_id,
            channel,
            data: ExtractedData::default(),
            state: LeadState::New,
            checkpoint: LeadState::New.checkpoint(),
            score: None,
            flags: BTreeSet::new(),
            turns: 0,
            stalled_turns: 0,
            recently_filled: BTreeSet::new(),
            assigned_salesperson: None,
            crm_id: None,
            synced_to_crm: false,
            history: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn state(&self) -> LeadState {
        self.state
    }

    pub fn checkpoint(&self) -> u8 {
        self.checkpoint
    }

    pub fn missing_required_fields(&self) -> Vec<LeadField> {
        self.data.missing_required_fields()
    }

    /// True once every required field is filled, whatever state the record is in.
    pub fn is_qualified(&self) -> bool {
        self.missing_required_fields().is_empty()
    }

    /// Books one inbound message: bumps the turn counter and tracks consecutive turns
    /// in which no new field was filled.
    pub fn record_turn(&mut self, filled: &BTreeSet<LeadField>) {
        self.turns = self.turns.saturating_add(1);
        if filled.is_empty() {
            self.stalled_turns = self.stalled_turns.saturating_add(1);
        } else {
            self.stalled_turns = 0;
        }
        self.recently_filled = filled.clone();
        self.updated_at = Utc::now();
    }

    pub fn push_history(&mut self, role: ConversationRole, text: impl Into<String>) {
        self.history.push(ConversationTurn { role, text: text.into(), at: Utc::now() });
    }

    pub fn flag(&mut self, flag: LeadFlag) {
        self.flags.insert(flag);
    }

    /// Moves the record along a transition produced by the flow engine.
    pub fn commit(&mut self, outcome: &TransitionOutcome) -> Result<(), DomainError> {
        if outcome.from != self.state {
            return Err(DomainError::StaleTransition { expected: outcome.from, actual: self.state });
        }
        if outcome.is_noop() {
            return Ok(());
        }
        if !self.state.can_transition_to(outcome.to) {
            return Err(DomainError::InvalidLeadTransition { from: self.state, to: outcome.to });
        }

        self.state = outcome.to;
        self.checkpoint = outcome.to.checkpoint();
        self.updated_at = Utc::now();
        Ok(())
    }
}
