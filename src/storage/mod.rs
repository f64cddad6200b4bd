//! Concrete [`crate::authz::TupleStore`] backends. [`memory`] is the default
//! (and what every in-process test in this crate runs against); `sqlite`
//! (behind the `sqlite` feature) persists the same shape to a SQLite
//! database via `sqlx`.

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::InMemoryTupleStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteTupleStore;
