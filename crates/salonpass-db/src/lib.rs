//! SalonPass DB - Persistence layer
//!
//! SQLx-based repositories for the subscription engine, plus an in-memory
//! store with the same guarantees for tests and local runs.
//!
//! # Example
//!
//! ```rust,ignore
//! use salonpass_db::{create_pool, run_migrations, Repositories};
//!
//! let pool = create_pool("postgres://localhost/salonpass").await?;
//! run_migrations(&pool).await?;
//! let stores = Repositories::new(pool).into_stores();
//!
//! let subscription = stores.subscriptions.find_by_token(&token).await?;
//! ```

pub mod error;
pub mod memory;
pub mod models;
pub mod pg;
pub mod pool;
pub mod repo;

pub use error::{DbError, DbResult};
pub use memory::MemoryStore;
pub use models::*;
pub use pg::Repositories;
pub use pool::{create_pool, create_pool_with_options, run_migrations, DbPool, PoolOptions};
pub use repo::*;
