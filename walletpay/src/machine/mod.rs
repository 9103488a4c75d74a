//! Customer request state machine.
//!
//! The design separates:
//! - **State**: where the request is ([`MachineState`])
//! - **Context**: data it carries ([`TransactionContext`])
//! - **Events**: what happened ([`Event`])
//! - **Effects**: what to do ([`Effect`])
//! - **Transition**: pure function `(State, Context, Event) -> Effects` ([`transition()`])
//!
//! The [`MachineDriver`] executes effects on worker tasks and feeds their
//! results back as events.

pub mod context;
pub mod driver;
pub mod effect;
pub mod event;
pub mod state;
pub mod transition;

pub use context::{PendingRequest, TransactionContext};
pub use driver::{DriverConfig, EventSender, MachineDriver, MachineHandle, StateChange};
pub use effect::{Effect, GatewayCall, PollKind};
pub use event::Event;
pub use state::{AuthorizingState, MachineState, StateId};
pub use transition::{
    AUTHORIZE_ALLOWED, Outcome, PollOutcome, UPDATE_ALLOWED, classify_existing, classify_poll,
    transition,
};
