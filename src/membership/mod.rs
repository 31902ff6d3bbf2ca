//! Membership resolution for the local etcd member.
//!
//! ## Architecture
//!
//! - `identity`: Member name and URLs derived from the advertise address
//! - `error`: Transient vs fatal error classification
//! - `state_machine`: Resolver phases and the transition table
//! - `resolver`: The probe/retry loop producing a `MembershipDecision`

pub mod error;
pub mod identity;
pub mod resolver;
pub mod state_machine;

pub use error::{MembershipError, Result};
pub use identity::{MemberIdentity, member_name};
pub use resolver::{JoinPlan, MembershipDecision, MembershipResolver, RetryPolicy, plan_join};
pub use state_machine::{ResolverEvent, ResolverPhase, ResolverStateMachine, TransitionResult};
