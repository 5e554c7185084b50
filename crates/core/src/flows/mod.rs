pub mod engine;
pub mod states;

pub use engine::{FlowDefinition, FlowEngine, FlowTransitionError, LeadQualificationFlow};
pub use states::{
    FlowAction, FlowContext, LeadState, TransitionGuard, TransitionOutcome, TransitionRule,
    TRANSITION_TABLE,
};
