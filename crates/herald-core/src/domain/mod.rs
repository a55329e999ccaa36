//! Domain model (ids, tasks, request context, errors).

pub mod context;
pub mod errors;
pub mod ids;
pub mod task;

pub use context::RequestContext;
pub use errors::{DeliveryError, ErrorKind};
pub use ids::TaskId;
pub use task::{InvalidTransition, Recipient, Task, TaskKind, TaskPayload};
