//! `db` crate — pure persistence layer.
//!
//! Provides a connection pool, typed row structs, the [`Store`] trait and
//! its two implementations: [`PgStore`] (repository functions over Postgres)
//! and [`MemoryStore`].  No business logic lives here.

pub mod error;
pub mod pool;
pub mod repository;
pub mod models;
pub mod store;
pub mod pg;
pub mod memory;

pub use pool::DbPool;
pub use error::DbError;
pub use store::Store;
pub use pg::PgStore;
pub use memory::MemoryStore;
