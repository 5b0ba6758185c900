pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod service;

pub use config::AppConfig;
pub use db::{create_pool, BillingStore, InMemoryStore, PgBillingStore};
pub use error::{BillingError, Result};
pub use service::BillingService;
