//! Durable state: the conversation session registry and the run ledger.

pub mod runs;
pub mod sessions;

pub use runs::{FixRecord, RunMode, RunOutcome, RunStatus, RunStore};
pub use sessions::SessionStore;
