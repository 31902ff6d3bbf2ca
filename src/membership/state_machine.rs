//! Finite state machine for membership resolution.
//!
//! ## Phases
//!
//! No peer configured:
//! Init → ReadyNew
//!
//! Joining an existing cluster:
//! Init → Probing → ReadyExisting
//!
//! Transient failures loop through `Retry`:
//! Probing → Retry → Probing → ...
//!
//! `Failed` is terminal and reached on fatal errors, cancellation,
//! attempt exhaustion or deadline expiry.

use std::fmt;

/// Phases of membership resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResolverPhase {
    #[default]
    Init,
    Probing,
    Retry,
    ReadyNew,
    ReadyExisting,
    Failed,
}

impl ResolverPhase {
    /// Whether no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ResolverPhase::ReadyNew | ResolverPhase::ReadyExisting | ResolverPhase::Failed
        )
    }
}

impl fmt::Display for ResolverPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolverPhase::Init => write!(f, "Init"),
            ResolverPhase::Probing => write!(f, "Probing"),
            ResolverPhase::Retry => write!(f, "Retry"),
            ResolverPhase::ReadyNew => write!(f, "Ready(New)"),
            ResolverPhase::ReadyExisting => write!(f, "Ready(Existing)"),
            ResolverPhase::Failed => write!(f, "Failed"),
        }
    }
}

/// Events that trigger phase transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolverEvent {
    /// No existing peer configured; form a new cluster
    NoPeerConfigured,
    /// First probe of the existing cluster started
    ProbeStarted,
    /// This node's peer URL is already a member
    AlreadyRegistered,
    /// This node was added via MemberAdd
    MemberAdded,
    /// Probe failed in a way that may clear up
    TransientFailure,
    /// Retry interval elapsed; probe again
    RetryElapsed,
    /// Probe failed in a way retrying cannot fix
    FatalFailure,
    /// Caller cancelled resolution
    Cancelled,
    /// Maximum attempts reached
    AttemptsExhausted,
    /// Overall deadline reached
    DeadlineExceeded,
}

impl fmt::Display for ResolverEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A state transition definition
#[derive(Debug)]
pub struct Transition {
    pub from: ResolverPhase,
    pub to: ResolverPhase,
    pub event: ResolverEvent,
    pub description: &'static str,
}

impl Transition {
    const fn new(
        from: ResolverPhase,
        to: ResolverPhase,
        event: ResolverEvent,
        description: &'static str,
    ) -> Self {
        Self {
            from,
            to,
            event,
            description,
        }
    }
}

/// Result of attempting a state transition
#[derive(Debug, PartialEq, Eq)]
pub enum TransitionResult {
    Success {
        from: ResolverPhase,
        to: ResolverPhase,
        event: ResolverEvent,
        description: &'static str,
    },
    InvalidTransition {
        current: ResolverPhase,
        event: ResolverEvent,
    },
}

/// State machine for membership resolution
pub struct ResolverStateMachine {
    transitions: Vec<Transition>,
}

impl Default for ResolverStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ResolverStateMachine {
    /// Create a new state machine with the defined transition table
    pub fn new() -> Self {
        use ResolverEvent as E;
        use ResolverPhase as P;

        Self {
            transitions: vec![
                // Init
                Transition::new(P::Init, P::ReadyNew, E::NoPeerConfigured, "No peer configured, forming a new cluster"),
                Transition::new(P::Init, P::Probing, E::ProbeStarted, "Probing existing cluster"),
                Transition::new(P::Init, P::Failed, E::FatalFailure, "Invalid peer configuration"),
                Transition::new(P::Init, P::Failed, E::Cancelled, "Cancelled before probing"),
                // Probing
                Transition::new(P::Probing, P::ReadyExisting, E::AlreadyRegistered, "Already a member, rejoining"),
                Transition::new(P::Probing, P::ReadyExisting, E::MemberAdded, "Registered as a new member"),
                Transition::new(P::Probing, P::Retry, E::TransientFailure, "Probe failed, will retry"),
                Transition::new(P::Probing, P::Failed, E::FatalFailure, "Probe failed permanently"),
                Transition::new(P::Probing, P::Failed, E::Cancelled, "Cancelled while probing"),
                // Retry
                Transition::new(P::Retry, P::Probing, E::RetryElapsed, "Retry interval elapsed"),
                Transition::new(P::Retry, P::Failed, E::Cancelled, "Cancelled while waiting to retry"),
                Transition::new(P::Retry, P::Failed, E::AttemptsExhausted, "Maximum attempts reached"),
                Transition::new(P::Retry, P::Failed, E::DeadlineExceeded, "Deadline exceeded"),
            ],
        }
    }

    /// Check whether an event is valid in the given phase
    pub fn can_transition(&self, from: &ResolverPhase, event: &ResolverEvent) -> bool {
        self.transitions
            .iter()
            .any(|t| t.from == *from && t.event == *event)
    }

    /// Attempt a transition
    pub fn transition(&self, from: &ResolverPhase, event: &ResolverEvent) -> TransitionResult {
        match self
            .transitions
            .iter()
            .find(|t| t.from == *from && t.event == *event)
        {
            Some(t) => TransitionResult::Success {
                from: t.from,
                to: t.to,
                event: t.event,
                description: t.description,
            },
            None => TransitionResult::InvalidTransition {
                current: *from,
                event: *event,
            },
        }
    }

    /// Events accepted in a phase
    pub fn valid_events(&self, from: &ResolverPhase) -> Vec<ResolverEvent> {
        self.transitions
            .iter()
            .filter(|t| t.from == *from)
            .map(|t| t.event)
            .collect()
    }
}
