//! `queue` crate — the durable agent-task queue processor.
//!
//! Producers outside this crate insert `pending` rows into `agent_tasks`.
//! [`TaskQueueProcessor::drain`] claims every due task of one type, hands
//! it to the [`TaskHandler`] registered for that type and records the
//! terminal state.  Failed tasks stay failed until they are resubmitted.

pub mod error;
pub mod handler;
pub mod processor;
pub mod notification;

pub use error::QueueError;
pub use handler::{HandlerRegistry, TaskHandler, TaskReport};
pub use processor::{TaskOutcome, TaskQueueProcessor};
pub use notification::{NotificationHandler, NotificationPreference, SEND_NOTIFICATION};
