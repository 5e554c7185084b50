use std::collections::BTreeSet;

use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::domain::lead::{LeadField, LeadRecord};
use crate::flows::states::{
    FlowContext, LeadState, TransitionGuard, TransitionOutcome, TransitionRule, TRANSITION_TABLE,
};

pub trait FlowDefinition {
    fn initial_state(&self) -> LeadState;
    fn rules(&self) -> &'static [TransitionRule];
}

#[derive(Clone, Debug, Default)]
pub struct LeadQualificationFlow;

impl FlowDefinition for LeadQualificationFlow {
    fn initial_state(&self) -> LeadState {
        LeadState::New
    }

    fn rules(&self) -> &'static [TransitionRule] {
        TRANSITION_TABLE
    }
}

pub struct FlowEngine<F> {
    flow: F,
}

impl<F> FlowEngine<F>
where
    F: FlowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn initial_state(&self) -> LeadState {
        self.flow.initial_state()
    }

    /// Evaluates the rules leaving `current` in table order and returns the first whose
    /// guard holds. When none fires the outcome stays on `current`.
    pub fn apply_transition(
        &self,
        current: &LeadState,
        record: &LeadRecord,
        context: &FlowContext<'_>,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        if current.is_terminal() {
            return Err(FlowTransitionError::TerminalState { state: *current });
        }

        let fired = self
            .flow
            .rules()
            .iter()
            .filter(|rule| rule.from == *current)
            .find(|rule| guard_holds(rule.guard, record, context));

        Ok(match fired {
            Some(rule) => TransitionOutcome::moved(
                rule.from,
                rule.to,
                Some(rule.guard),
                rule.actions.to_vec(),
            ),
            None => TransitionOutcome::stay(*current),
        })
    }

    /// Explicitly requested move to `target`. Fails unless the edge exists and its guard holds.
    pub fn transition_to(
        &self,
        current: &LeadState,
        target: &LeadState,
        record: &LeadRecord,
        context: &FlowContext<'_>,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        if current.is_terminal() {
            return Err(FlowTransitionError::TerminalState { state: *current });
        }

        let rule = self
            .flow
            .rules()
            .iter()
            .find(|rule| rule.from == *current && rule.to == *target)
            .ok_or(FlowTransitionError::InvalidTransition { from: *current, to: *target })?;

        if !guard_holds(rule.guard, record, context) {
            return Err(FlowTransitionError::GuardNotSatisfied {
                from: *current,
                to: *target,
                reason: rule.guard.describe().to_owned(),
            });
        }

        Ok(TransitionOutcome::moved(rule.from, rule.to, Some(rule.guard), rule.actions.to_vec()))
    }

    /// Applies transitions until the record settles. Each edge fires at most once per pass,
    /// so one turn never loops but may pass through a state twice.
    pub fn settle(
        &self,
        record: &LeadRecord,
        context: &FlowContext<'_>,
    ) -> Result<Vec<TransitionOutcome>, FlowTransitionError> {
        let mut state = record.state();
        let mut fired = BTreeSet::new();
        let mut outcomes = Vec::new();

        while !state.is_terminal() {
            let outcome = self.apply_transition(&state, record, context)?;
            if outcome.is_noop() || !fired.insert((outcome.from, outcome.to)) {
                break;
            }
            state = outcome.to;
            outcomes.push(outcome);
        }

        Ok(outcomes)
    }

    pub fn settle_with_audit<S>(
        &self,
        record: &LeadRecord,
        context: &FlowContext<'_>,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<Vec<TransitionOutcome>, FlowTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.settle(record, context);
        match &result {
            Ok(outcomes) => {
                for outcome in outcomes {
                    sink.emit(transition_applied(audit, outcome));
                }
            }
            Err(error) => sink.emit(transition_rejected(audit, error)),
        }
        result
    }

    pub fn apply_with_audit<S>(
        &self,
        current: &LeadState,
        record: &LeadRecord,
        context: &FlowContext<'_>,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply_transition(current, record, context);
        match &result {
            Ok(outcome) if !outcome.is_noop() => sink.emit(transition_applied(audit, outcome)),
            Ok(_) => {}
            Err(error) => sink.emit(transition_rejected(audit, error)),
        }
        result
    }
}

impl Default for FlowEngine<LeadQualificationFlow> {
    fn default() -> Self {
        Self::new(LeadQualificationFlow)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: LeadState, to: LeadState },
    #[error("{state} is terminal and accepts no transitions")]
    TerminalState { state: LeadState },
    #[error("transition from {from} to {to} not allowed: {reason}")]
    GuardNotSatisfied { from: LeadState, to: LeadState, reason: String },
}

fn guard_holds(guard: TransitionGuard, record: &LeadRecord, context: &FlowContext<'_>) -> bool {
    match guard {
        TransitionGuard::MessageReceived => record.turns > 0,
        TransitionGuard::RequiredFieldsComplete => record.data.required_fields_complete(),
        TransitionGuard::Stalled => match context.stall_turns {
            Some(threshold) => {
                !record.data.required_fields_complete() && record.stalled_turns >= threshold
            }
            None => false,
        },
        TransitionGuard::MissingFieldRecovered => {
            record.recently_filled.iter().any(LeadField::is_required)
        }
        TransitionGuard::TerritoryResolved => zone_resolves(record, context),
        TransitionGuard::TerritoryUnresolved => !zone_resolves(record, context),
    }
}

fn zone_resolves(record: &LeadRecord, context: &FlowContext<'_>) -> bool {
    record.data.zone.as_deref().is_some_and(|zone| context.territories.resolve(zone).is_some())
}

fn transition_applied(audit: &AuditContext, outcome: &TransitionOutcome) -> AuditEvent {
    let actions: Vec<&str> = outcome.actions.iter().map(|action| action.as_str()).collect();
    AuditEvent::new(
        audit.contact_id.clone(),
        audit.correlation_id.clone(),
        "lead.transition.applied",
        AuditCategory::Flow,
        audit.actor.clone(),
        AuditOutcome::Success,
    )
    .with_metadata("from", outcome.from.as_str())
    .with_metadata("to", outcome.to.as_str())
    .with_metadata("checkpoint", outcome.to.checkpoint().to_string())
    .with_metadata("actions", actions.join(","))
}

fn transition_rejected(audit: &AuditContext, error: &FlowTransitionError) -> AuditEvent {
    AuditEvent::new(
        audit.contact_id.clone(),
        audit.correlation_id.clone(),
        "lead.transition.rejected",
        AuditCategory::Flow,
        audit.actor.clone(),
        AuditOutcome::Rejected,
    )
    .with_metadata("error", error.to_string())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use crate::audit::{AuditContext, AuditOutcome, InMemoryAuditSink};
    use crate::domain::lead::{
        Channel, ContactId, LeadField, LeadRecord, MachineUsage, Urgency,
    };
    use crate::flows::engine::{FlowEngine, FlowTransitionError};
    use crate::flows::states::{FlowAction, FlowContext, LeadState};
    use crate::territory::{Salesperson, StaticTerritoryDirectory, Territory};

    fn directory() -> StaticTerritoryDirectory {
        StaticTerritoryDirectory::new(vec![Territory {
            zone: "Buenos Aires".to_owned(),
            aliases: vec!["caba".to_owned()],
            salesperson: Salesperson { id: "sp-ba".to_owned(), name: "Marta".to_owned() },
        }])
    }

    fn record_in(state: LeadState) -> LeadRecord {
        let mut record =
            LeadRecord::new(ContactId("+5491100000000".to_owned()), Channel::Whatsapp);
        let engine = FlowEngine::default();
        let directory = directory();
        let context = FlowContext::new(Some(3), &directory);
        record.record_turn(&BTreeSet::new());

        let path: &[LeadState] = match state {
            LeadState::New => &[],
            LeadState::CollectingTechData => &[LeadState::CollectingTechData],
            _ => panic!("helper only walks the opening edge"),
        };
        for target in path {
            let outcome = engine
                .transition_to(&record.state(), target, &record, &context)
                .expect("walk to requested state");
            record.commit(&outcome).expect("commit");
        }
        record
    }

    fn complete(record: &mut LeadRecord, zone: &str) {
        record.data.name = Some("Juan".to_owned());
        record.data.zone = Some(zone.to_owned());
        record.data.machine.brand = Some("Bobcat".to_owned());
        record.data.machine.usage = Some(MachineUsage::Obra);
        record.data.implement_of_interest = Some("balde".to_owned());
        record.data.urgency = Some(Urgency::Alta);
    }

    #[test]
    fn first_message_moves_new_to_collecting() {
        let engine = FlowEngine::default();
        let directory = directory();
        let context = FlowContext::new(Some(3), &directory);
        let record = record_in(LeadState::New);

        let outcome =
            engine.apply_transition(&LeadState::New, &record, &context).expect("new -> collecting");

        assert_eq!(outcome.to, LeadState::CollectingTechData);
        assert_eq!(outcome.actions, vec![FlowAction::PromptForMissingFields]);
    }

    #[test]
    fn collecting_stays_put_until_required_fields_complete() {
        let engine = FlowEngine::default();
        let directory = directory();
        let context = FlowContext::new(Some(3), &directory);
        let mut record = record_in(LeadState::CollectingTechData);
        record.data.implement_of_interest = Some("balde".to_owned());

        let outcome = engine
            .apply_transition(&LeadState::CollectingTechData, &record, &context)
            .expect("no rule fires");

        assert!(outcome.is_noop());
        assert_eq!(outcome.to, LeadState::CollectingTechData);
    }

    #[test]
    fn complete_record_with_covered_zone_settles_in_assigned() {
        let engine = FlowEngine::default();
        let directory = directory();
        let context = FlowContext::new(Some(3), &directory);
        let mut record = record_in(LeadState::CollectingTechData);
        complete(&mut record, "Buenos Aires");

        let outcomes = engine.settle(&record, &context).expect("settle");
        let states: Vec<LeadState> = outcomes.iter().map(|outcome| outcome.to).collect();

        assert_eq!(states, vec![LeadState::Qualified, LeadState::Assigned]);
        assert!(outcomes[1].actions.contains(&FlowAction::SyncCrm));
    }

    #[test]
    fn uncovered_zone_qualifies_then_follows_up_without_looping() {
        let engine = FlowEngine::default();
        let directory = directory();
        let context = FlowContext::new(Some(3), &directory);
        let mut record = record_in(LeadState::CollectingTechData);
        complete(&mut record, "Jujuy");
        record.recently_filled = BTreeSet::from([LeadField::Zone]);

        let outcomes = engine.settle(&record, &context).expect("settle");
        let states: Vec<LeadState> = outcomes.iter().map(|outcome| outcome.to).collect();

        assert_eq!(states, vec![LeadState::Qualified, LeadState::FollowUp]);
    }

    #[test]
    fn stalled_conversation_moves_to_follow_up_only_when_threshold_configured() {
        let engine = FlowEngine::default();
        let directory = directory();
        let mut record = record_in(LeadState::CollectingTechData);
        record.stalled_turns = 3;

        let disabled = FlowContext::new(None, &directory);
        let outcome = engine
            .apply_transition(&LeadState::CollectingTechData, &record, &disabled)
            .expect("no stall rule without threshold");
        assert!(outcome.is_noop());

        let enabled = FlowContext::new(Some(3), &directory);
        let outcome = engine
            .apply_transition(&LeadState::CollectingTechData, &record, &enabled)
            .expect("stall rule fires");
        assert_eq!(outcome.to, LeadState::FollowUp);
        assert_eq!(outcome.actions, vec![FlowAction::ScheduleFollowUp]);
    }

    #[test]
    fn follow_up_returns_to_collecting_when_missing_field_arrives() {
        let engine = FlowEngine::default();
        let directory = directory();
        let context = FlowContext::new(Some(3), &directory);
        let mut record = record_in(LeadState::CollectingTechData);
        record.stalled_turns = 3;
        let outcome = engine
            .apply_transition(&LeadState::CollectingTechData, &record, &context)
            .expect("collecting -> follow up");
        record.commit(&outcome).expect("commit");

        record.recently_filled = BTreeSet::from([LeadField::Urgency]);
        let outcome =
            engine.apply_transition(&LeadState::FollowUp, &record, &context).expect("no-op");
        assert!(outcome.is_noop(), "urgency is not a required field");

        record.recently_filled = BTreeSet::from([LeadField::Zone]);
        let outcome = engine
            .apply_transition(&LeadState::FollowUp, &record, &context)
            .expect("follow up -> collecting");
        assert_eq!(outcome.to, LeadState::CollectingTechData);
    }

    #[test]
    fn follow_up_recovery_into_uncovered_zone_settles_back_in_follow_up() {
        let engine = FlowEngine::default();
        let directory = directory();
        let context = FlowContext::new(Some(3), &directory);
        let mut record = record_in(LeadState::CollectingTechData);
        record.stalled_turns = 3;
        let outcome = engine
            .apply_transition(&LeadState::CollectingTechData, &record, &context)
            .expect("collecting -> follow up");
        record.commit(&outcome).expect("commit");

        complete(&mut record, "Mendoza");
        record.stalled_turns = 0;
        record.recently_filled =
            BTreeSet::from([LeadField::Name, LeadField::Zone, LeadField::MachineBrand]);

        let outcomes = engine.settle(&record, &context).expect("settle");
        let edges: Vec<(LeadState, LeadState)> =
            outcomes.iter().map(|outcome| (outcome.from, outcome.to)).collect();

        assert_eq!(
            edges,
            vec![
                (LeadState::FollowUp, LeadState::CollectingTechData),
                (LeadState::CollectingTechData, LeadState::Qualified),
                (LeadState::Qualified, LeadState::FollowUp),
            ]
        );
    }

    #[test]
    fn assigned_is_terminal() {
        let engine = FlowEngine::default();
        let directory = directory();
        let context = FlowContext::new(Some(3), &directory);
        let record = record_in(LeadState::New);

        let error = engine
            .apply_transition(&LeadState::Assigned, &record, &context)
            .expect_err("terminal");
        assert!(matches!(error, FlowTransitionError::TerminalState { state: LeadState::Assigned }));
    }

    #[test]
    fn explicit_transition_outside_table_is_rejected() {
        let engine = FlowEngine::default();
        let directory = directory();
        let context = FlowContext::new(Some(3), &directory);
        let record = record_in(LeadState::New);

        let error = engine
            .transition_to(&LeadState::New, &LeadState::Assigned, &record, &context)
            .expect_err("new -> assigned is not an edge");
        assert!(matches!(
            error,
            FlowTransitionError::InvalidTransition {
                from: LeadState::New,
                to: LeadState::Assigned
            }
        ));

        let error = engine
            .transition_to(&LeadState::CollectingTechData, &LeadState::Qualified, &record, &context)
            .expect_err("guard fails with missing fields");
        assert!(matches!(error, FlowTransitionError::GuardNotSatisfied { .. }));
    }

    #[test]
    fn transitions_are_deterministic_for_every_state() {
        let engine = FlowEngine::default();
        let directory = directory();
        let context = FlowContext::new(Some(2), &directory);
        let mut record = record_in(LeadState::New);
        complete(&mut record, "caba");

        for state in LeadState::ALL {
            let first = engine.apply_transition(&state, &record, &context);
            let second = engine.apply_transition(&state, &record, &context);
            assert_eq!(first, second);
        }
    }

    #[test]
    fn audited_settle_emits_one_event_per_transition() {
        let engine = FlowEngine::default();
        let directory = directory();
        let context = FlowContext::new(Some(3), &directory);
        let mut record = record_in(LeadState::CollectingTechData);
        complete(&mut record, "Buenos Aires");
        let sink = InMemoryAuditSink::default();
        let audit = AuditContext::new(Some(record.contact_id.clone()), "req-1", "flow-engine");

        engine.settle_with_audit(&record, &context, &sink, &audit).expect("settle");
        let _ = engine.apply_with_audit(&LeadState::Assigned, &record, &context, &sink, &audit);

        let events = sink.events();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].event_type, "lead.transition.applied");
        assert_eq!(events[1].metadata.get("to").map(String::as_str), Some("ASSIGNED"));
        assert_eq!(events[2].event_type, "lead.transition.rejected");
        assert_eq!(events[2].outcome, AuditOutcome::Rejected);
    }
}
