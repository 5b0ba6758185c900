pub mod memory;
pub mod pool;
pub mod postgres;
pub mod repository;

pub use memory::{Fault, InMemoryStore};
pub use pool::{create_pool, run_migrations};
pub use postgres::PgBillingStore;
pub use repository::*;
