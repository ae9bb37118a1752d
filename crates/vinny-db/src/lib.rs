//! Storage layer for vinny: PostgreSQL pool, embedded migrations, typed row
//! models, and parameterized query modules.
//!
//! All queries classify driver failures into the small [`error::StorageError`]
//! taxonomy so the layers above never branch on `sqlx` internals.

pub mod config;
pub mod error;
pub mod models;
pub mod pool;
pub mod queries;

pub use error::{DbResult, StorageError};
