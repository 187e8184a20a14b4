//! Service layer API for marketplace workflows.
//!
//! Every operation that touches more than one row runs as a single sled
//! transaction across the trees involved, so a failure leaves nothing half
//! applied. Notifications ride along in the same transaction as outbox
//! entries and are delivered best-effort once it commits.
mod inventory;
mod moderation;
mod notifications;
mod orders;
mod payments;

use super::config::MarketConfig;
use super::error::{MarketError, ValidationError};
use super::notification::{InboxSink, NotificationDispatcher, NotificationSink};
use super::payment::BASIS_POINTS_DIVISOR;
use super::store::Store;
use super::utils;
use std::collections::HashSet;
use std::sync::Arc;

pub struct MarketService {
    store: Store,
    config: MarketConfig,
    dispatcher: NotificationDispatcher,
}

/// A bulk member left untouched, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skipped {
    pub id: String,
    pub reason: String,
}

/// Outcome of a bulk transition. Members in `applied` were committed
/// together; members in `skipped` were not in the required source state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkReport {
    pub applied: Vec<String>,
    pub skipped: Vec<Skipped>,
    /// Shared settlement prefix, bulk payment runs only.
    pub transaction_prefix: Option<String>,
}

impl BulkReport {
    fn skip(&mut self, id: &str, reason: impl Into<String>) {
        self.skipped.push(Skipped {
            id: id.to_string(),
            reason: reason.into(),
        });
    }

    // Called after commit; a transaction closure may run more than once.
    fn log_skipped(&self) {
        for skipped in &self.skipped {
            log::debug!("bulk: skipped {}: {}", skipped.id, skipped.reason);
        }
    }
}

impl MarketService {
    /// Service whose notifications land in the in-app inbox.
    pub fn new(instance: Arc<sled::Db>, config: MarketConfig) -> Result<Self, MarketError> {
        let sink = Arc::new(InboxSink::open(&instance)?);
        Self::with_sink(instance, config, sink)
    }

    pub fn with_sink(
        instance: Arc<sled::Db>,
        config: MarketConfig,
        sink: Arc<dyn NotificationSink>,
    ) -> Result<Self, MarketError> {
        if config.platform_fee_bps > BASIS_POINTS_DIVISOR {
            return Err(ValidationError::InvalidFeeRate(config.platform_fee_bps).into());
        }
        let store = Store::open(instance)?;
        let dispatcher = NotificationDispatcher::new(&store, sink, config.max_dispatch_attempts);

        Ok(Self {
            store,
            config,
            dispatcher,
        })
    }

    /// Open the database named in `config` and build a service on it.
    pub fn open(config: MarketConfig) -> Result<Self, MarketError> {
        let db = config.open_db()?;
        Self::new(Arc::new(db), config)
    }

    pub fn config(&self) -> &MarketConfig {
        &self.config
    }

    /// Block until every committed write is durable.
    pub fn flush(&self) -> Result<usize, MarketError> {
        self.store.flush()
    }

    fn new_id(hrp: &str) -> Result<String, MarketError> {
        Ok(utils::new_uuid_to_bech32(hrp)?)
    }

    // Runs after a commit that queued notifications. Never fails the caller.
    fn deliver_notifications(&self) {
        match self.dispatcher.dispatch_pending() {
            Ok(report) if report.failed > 0 || report.dead > 0 => log::warn!(
                "{} notification(s) left in outbox ({} dead)",
                report.failed + report.dead,
                report.dead
            ),
            Ok(_) => {}
            Err(err) => log::warn!("notification dispatch deferred: {err}"),
        }
    }
}

// Drop repeats, keep first-seen order.
fn distinct_ids(ids: &[String]) -> Result<Vec<String>, ValidationError> {
    if ids.is_empty() {
        return Err(ValidationError::EmptyBatch);
    }
    let mut seen = HashSet::new();
    Ok(ids
        .iter()
        .filter(|id| seen.insert(id.as_str()))
        .cloned()
        .collect())
}
