//! PostgreSQL repository implementations

mod audit;
mod package;
mod payment;
mod subscription;
mod token;
mod visit;

pub use audit::PgAuditRepository;
pub use package::PgPackageRepository;
pub use payment::PgPaymentRepository;
pub use subscription::PgSubscriptionRepository;
pub use token::PgTokenRepository;
pub use visit::PgVisitRepository;

use std::sync::Arc;

use crate::repo::Stores;
use crate::DbPool;

/// All repositories bundled together
#[derive(Clone)]
pub struct Repositories {
    pub packages: PgPackageRepository,
    pub subscriptions: PgSubscriptionRepository,
    pub tokens: PgTokenRepository,
    pub visits: PgVisitRepository,
    pub payments: PgPaymentRepository,
    pub audit: PgAuditRepository,
}

impl Repositories {
    /// Create all repositories from a database pool
    pub fn new(pool: DbPool) -> Self {
        Self {
            packages: PgPackageRepository::new(pool.clone()),
            subscriptions: PgSubscriptionRepository::new(pool.clone()),
            tokens: PgTokenRepository::new(pool.clone()),
            visits: PgVisitRepository::new(pool.clone()),
            payments: PgPaymentRepository::new(pool.clone()),
            audit: PgAuditRepository::new(pool),
        }
    }

    /// Erase the concrete types
    pub fn into_stores(self) -> Stores {
        Stores {
            packages: Arc::new(self.packages),
            subscriptions: Arc::new(self.subscriptions),
            tokens: Arc::new(self.tokens),
            visits: Arc::new(self.visits),
            payments: Arc::new(self.payments),
            audit: Arc::new(self.audit),
        }
    }
}
