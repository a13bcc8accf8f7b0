//! Postgres backend for `exchange-core`'s `Store` trait.

mod amount_codec;
pub mod models;
pub mod pool;
pub mod store;

pub use pool::{create_pool, run_migrations};
pub use store::PgStore;
