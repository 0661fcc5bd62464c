//! Result delivery and per-user request gating.

mod dispatcher;
mod hosted;
pub mod notices;
mod pending;

pub use dispatcher::{CallbackDispatcher, DeliveryContext, DeliveryOutcome};
pub use pending::{OperationKind, PendingFlags};
