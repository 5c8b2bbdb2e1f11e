//! # AATR Database Crate
//!
//! The durable state store: the single source of truth for every strategy record
//! and the only channel through which scheduler workers coordinate.
//!
//! ## Architectural Principles
//!
//! - **Contract first:** `StateStore` is the narrow interface the orchestrator and
//!   scheduler program against. Backends are swapped by construction, never through
//!   a global client.
//! - **Optimistic concurrency:** every mutation is a `conditional_write` keyed on the
//!   version the writer read. A stale writer gets `DbError::VersionConflict`, never a
//!   lost update.
//! - **Unavailability is transient:** `RetryingStore` turns brief outages into
//!   backoff-and-retry instead of failures.
//!
//! ## Public API
//!
//! - `StateStore`, `StatusFilter`, `Page`, `PageToken`: the store contract.
//! - `PgStateStore`: PostgreSQL backend (JSONB document + version column).
//! - `InMemoryStore`: process-local backend for tests and dry runs.
//! - `RetryingStore`, `RetryPolicy`: exponential-backoff wrapper.
//! - `connect`, `run_migrations`: PostgreSQL pool setup.
//! - `DbError`: the specific error types that can be returned from this crate.

// Declare the modules that constitute this crate.
pub mod connection;
pub mod error;
pub mod memory;
pub mod repository;
pub mod retry;
pub mod store;

// Re-export the key components to create a clean, public-facing API.
pub use connection::{connect, run_migrations};
pub use error::DbError;
pub use memory::InMemoryStore;
pub use repository::PgStateStore;
pub use retry::{RetryPolicy, RetryingStore};
pub use store::{Page, PageToken, StateStore, StatusFilter};
