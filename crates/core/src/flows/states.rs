use serde::{Deserialize, Serialize};

use crate::territory::TerritoryDirectory;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeadState {
    New,
    CollectingTechData,
    Qualified,
    Assigned,
    FollowUp,
}

impl LeadState {
    pub const ALL: [LeadState; 5] = [
        LeadState::New,
        LeadState::CollectingTechData,
        LeadState::Qualified,
        LeadState::Assigned,
        LeadState::FollowUp,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::CollectingTechData => "COLLECTING_TECH_DATA",
            Self::Qualified => "QUALIFIED",
            Self::Assigned => "ASSIGNED",
            Self::FollowUp => "FOLLOW_UP",
        }
    }

    pub fn checkpoint(&self) -> u8 {
        match self {
            Self::New => 1,
            Self::CollectingTechData => 2,
            Self::Qualified => 3,
            Self::Assigned => 4,
            Self::FollowUp => 5,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Assigned)
    }

    pub fn can_transition_to(&self, next: LeadState) -> bool {
        TRANSITION_TABLE.iter().any(|rule| rule.from == *self && rule.to == next)
    }
}

impl std::str::FromStr for LeadState {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        LeadState::ALL
            .into_iter()
            .find(|state| state.as_str().eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| format!("unknown lead state `{value}`"))
    }
}

impl std::fmt::Display for LeadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Condition that has to hold on the lead record for a rule to fire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionGuard {
    MessageReceived,
    RequiredFieldsComplete,
    Stalled,
    MissingFieldRecovered,
    TerritoryResolved,
    TerritoryUnresolved,
}

impl TransitionGuard {
    pub fn describe(&self) -> &'static str {
        match self {
            Self::MessageReceived => "no inbound message has been recorded",
            Self::RequiredFieldsComplete => "required fields are still missing",
            Self::Stalled => "conversation has not stalled long enough",
            Self::MissingFieldRecovered => "no missing required field was filled this turn",
            Self::TerritoryResolved => "zone does not map to a salesperson",
            Self::TerritoryUnresolved => "zone maps to a salesperson",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowAction {
    PromptForMissingFields,
    SearchRag,
    AssignSalesperson,
    SyncCrm,
    ScheduleFollowUp,
    EscalateHuman,
}

impl FlowAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PromptForMissingFields => "prompt_for_missing_fields",
            Self::SearchRag => "search_rag",
            Self::AssignSalesperson => "assign_salesperson",
            Self::SyncCrm => "sync_crm",
            Self::ScheduleFollowUp => "schedule_follow_up",
            Self::EscalateHuman => "escalate_human",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransitionRule {
    pub from: LeadState,
    pub to: LeadState,
    pub guard: TransitionGuard,
    pub actions: &'static [FlowAction],
}

/// Legal edges in evaluation order. The first rule from a state whose guard holds wins.
pub const TRANSITION_TABLE: &[TransitionRule] = &[
    TransitionRule {
        from: LeadState::New,
        to: LeadState::CollectingTechData,
        guard: TransitionGuard::MessageReceived,
        actions: &[FlowAction::PromptForMissingFields],
    },
    TransitionRule {
        from: LeadState::CollectingTechData,
        to: LeadState::Qualified,
        guard: TransitionGuard::RequiredFieldsComplete,
        actions: &[FlowAction::SearchRag, FlowAction::AssignSalesperson],
    },
    TransitionRule {
        from: LeadState::CollectingTechData,
        to: LeadState::FollowUp,
        guard: TransitionGuard::Stalled,
        actions: &[FlowAction::ScheduleFollowUp],
    },
    TransitionRule {
        from: LeadState::Qualified,
        to: LeadState::Assigned,
        guard: TransitionGuard::TerritoryResolved,
        actions: &[FlowAction::SyncCrm, FlowAction::EscalateHuman],
    },
    TransitionRule {
        from: LeadState::Qualified,
        to: LeadState::FollowUp,
        guard: TransitionGuard::TerritoryUnresolved,
        actions: &[FlowAction::ScheduleFollowUp],
    },
    TransitionRule {
        from: LeadState::FollowUp,
        to: LeadState::CollectingTechData,
        guard: TransitionGuard::MissingFieldRecovered,
        actions: &[FlowAction::PromptForMissingFields],
    },
];

/// Configuration the guards read besides the record itself.
#[derive(Clone, Copy)]
pub struct FlowContext<'a> {
    pub stall_turns: Option<u32>,
    pub territories: &'a dyn TerritoryDirectory,
}

impl<'a> FlowContext<'a> {
    pub fn new(stall_turns: Option<u32>, territories: &'a dyn TerritoryDirectory) -> Self {
        Self { stall_turns, territories }
    }
}

impl std::fmt::Debug for FlowContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowContext").field("stall_turns", &self.stall_turns).finish_non_exhaustive()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: LeadState,
    pub to: LeadState,
    pub guard: Option<TransitionGuard>,
    pub actions: Vec<FlowAction>,
}

impl TransitionOutcome {
    pub fn stay(state: LeadState) -> Self {
        Self { from: state, to: state, guard: None, actions: Vec::new() }
    }

    pub fn moved(
        from: LeadState,
        to: LeadState,
        guard: Option<TransitionGuard>,
        actions: Vec<FlowAction>,
    ) -> Self {
        Self { from, to, guard, actions }
    }

    pub fn is_noop(&self) -> bool {
        self.from == self.to && self.guard.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::{LeadState, TRANSITION_TABLE};

    #[test]
    fn checkpoints_follow_state_order() {
        let checkpoints: Vec<u8> = LeadState::ALL.iter().map(LeadState::checkpoint).collect();
        assert_eq!(checkpoints, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn assigned_has_no_outgoing_edges() {
        assert!(LeadState::Assigned.is_terminal());
        assert!(TRANSITION_TABLE.iter().all(|rule| rule.from != LeadState::Assigned));
    }

    #[test]
    fn table_only_contains_documented_edges() {
        assert!(LeadState::New.can_transition_to(LeadState::CollectingTechData));
        assert!(LeadState::CollectingTechData.can_transition_to(LeadState::Qualified));
        assert!(LeadState::CollectingTechData.can_transition_to(LeadState::FollowUp));
        assert!(LeadState::Qualified.can_transition_to(LeadState::Assigned));
        assert!(LeadState::Qualified.can_transition_to(LeadState::FollowUp));
        assert!(LeadState::FollowUp.can_transition_to(LeadState::CollectingTechData));

        assert!(!LeadState::New.can_transition_to(LeadState::Qualified));
        assert!(!LeadState::FollowUp.can_transition_to(LeadState::Assigned));
        assert_eq!(TRANSITION_TABLE.len(), 6);
    }

    #[test]
    fn parses_wire_names() {
        assert_eq!("collecting_tech_data".parse::<LeadState>(), Ok(LeadState::CollectingTechData));
        assert!("DONE".parse::<LeadState>().is_err());
    }
}
