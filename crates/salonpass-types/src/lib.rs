//! SalonPass Types - Shared domain types
//!
//! This crate contains domain types used across SalonPass crates:
//! - Identifiers for customers, salons, packages, subscriptions, visits, payments
//! - Packages, subscriptions, visits and payments
//! - Lifecycle actors, transition reasons and audit entries

pub mod error;
pub mod ids;
pub mod lifecycle;
pub mod package;
pub mod payment;
pub mod subscription;
pub mod visit;

pub use error::*;
pub use ids::*;
pub use lifecycle::*;
pub use package::*;
pub use payment::*;
pub use subscription::*;
pub use visit::*;
