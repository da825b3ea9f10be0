//! PostgreSQL persistence for travel plan records.
//!
//! Implements the engine's `PlanStore` seam on top of a `saved_plans`
//! table: the indexed flight/accommodation attribute namespace lives in a
//! `jsonb` column, recency queries run against a `(user_id, last_updated)`
//! index, and the shared scan uses a partial index on records with a
//! non-empty sharing list.

pub mod config;
pub mod pool;
pub mod store;

pub use config::DbConfig;
pub use pool::{MIGRATOR, create_pool, ensure_database_exists, run_migrations};
pub use store::PgPlanStore;
