pub mod machine;
pub mod states;

pub use machine::{SessionMachine, SessionTransitionError};
pub use states::{SessionAction, SessionEvent, SessionTransitionOutcome};
