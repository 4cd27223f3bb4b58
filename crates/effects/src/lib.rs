//! `effects` crate — the side-effect boundary of the workflow engine.
//!
//! Workflow steps never talk to external systems directly.  They go through
//! an [`EffectDispatcher`], and notification tasks go through a
//! [`NotificationChannel`].  Both traits are object-safe so the engine can be
//! driven by the real HTTP collaborators in production and by the recording
//! mocks in tests.

pub mod error;
pub mod traits;
pub mod http;
pub mod mock;

pub use error::EffectError;
pub use traits::{DataMap, EffectDispatcher, NotificationChannel};
