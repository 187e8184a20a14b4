//! User notifications and the outbox that delivers them.
//!
//! Workflows never write notifications directly. They enqueue an
//! [`OutboxEntry`] inside the same transaction as the state change, and a
//! [`NotificationDispatcher`] moves entries to a [`NotificationSink`] after
//! the commit. A failed delivery stays in the outbox and is retried on the
//! next dispatch; it never rolls back the change that caused it.
use super::error::{MarketError, ValidationError};
use super::store::{NOTIFICATIONS_TREE, Record, Store, TxResult, decode, encode, tx_save};
use super::types::TimeStamp;
use super::utils;
use chrono::Utc;
use sled::Tree;
use sled::transaction::TransactionalTree;
use std::sync::{Arc, Mutex};

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    #[n(0)]
    ProductStatus,
    #[n(1)]
    OrderUpdate,
    #[n(2)]
    Payment,
    #[n(3)]
    Collection,
    #[n(4)]
    AdminMessage,
    #[n(5)]
    General,
}

/// Everything needed to tell one user about one event.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct NotificationRequest {
    #[n(0)]
    pub user_id: String,
    #[n(1)]
    pub title: String,
    #[n(2)]
    pub message: String,
    #[n(3)]
    pub kind: NotificationKind,
    #[n(4)]
    pub order_id: Option<String>,
    #[n(5)]
    pub product_id: Option<String>,
}

impl NotificationRequest {
    pub fn new(
        user_id: &str,
        kind: NotificationKind,
        title: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.to_string(),
            title: title.to_string(),
            message: message.into(),
            kind,
            order_id: None,
            product_id: None,
        }
    }
    pub fn for_order(mut self, order_id: &str) -> Self {
        self.order_id = Some(order_id.to_string());
        self
    }
    pub fn for_product(mut self, product_id: &str) -> Self {
        self.product_id = Some(product_id.to_string());
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.user_id.trim().is_empty() {
            return Err(ValidationError::MissingField("user_id"));
        }
        if self.title.trim().is_empty() {
            return Err(ValidationError::MissingField("title"));
        }
        if self.message.trim().is_empty() {
            return Err(ValidationError::MissingField("message"));
        }
        Ok(())
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub user_id: String,
    #[n(2)]
    pub title: String,
    #[n(3)]
    pub message: String,
    #[n(4)]
    pub kind: NotificationKind,
    #[n(5)]
    pub read: bool,
    #[n(6)]
    pub order_id: Option<String>,
    #[n(7)]
    pub product_id: Option<String>,
    #[n(8)]
    pub created_at: TimeStamp<Utc>,
}

impl Record for Notification {
    const KIND: &'static str = "notification";

    fn id(&self) -> &str {
        &self.id
    }
}

impl Notification {
    // Same id as the outbox entry, so redelivery overwrites instead of duplicating.
    fn from_entry(entry: &OutboxEntry) -> Self {
        let request = entry.request.clone();
        Self {
            id: entry.id.clone(),
            user_id: request.user_id,
            title: request.title,
            message: request.message,
            kind: request.kind,
            read: false,
            order_id: request.order_id,
            product_id: request.product_id,
            created_at: entry.enqueued_at.clone(),
        }
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct OutboxEntry {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub request: NotificationRequest,
    #[n(2)]
    pub attempts: u32,
    #[n(3)]
    pub last_error: Option<String>,
    #[n(4)]
    pub enqueued_at: TimeStamp<Utc>,
}

impl Record for OutboxEntry {
    const KIND: &'static str = "outbox entry";

    fn id(&self) -> &str {
        &self.id
    }
}

impl OutboxEntry {
    pub fn new(request: NotificationRequest) -> Result<Self, MarketError> {
        request.validate()?;
        Ok(Self {
            id: utils::new_uuid_to_bech32("note_")?,
            request,
            attempts: 0,
            last_error: None,
            enqueued_at: TimeStamp::new(),
        })
    }
}

/// Queue a notification as part of an open transaction. A request that
/// cannot be queued is dropped; it never aborts the surrounding change.
pub(crate) fn enqueue(outbox: &TransactionalTree, request: NotificationRequest) -> TxResult<()> {
    match OutboxEntry::new(request) {
        Ok(entry) => tx_save(outbox, &entry),
        Err(err) => {
            log::warn!("notification dropped: {err}");
            Ok(())
        }
    }
}

/// Where dispatched notifications end up.
pub trait NotificationSink: Send + Sync {
    fn deliver(&self, notification: &Notification) -> Result<(), MarketError>;
}

/// The in-app inbox read back by [`crate::service::MarketService::notifications_for`].
pub struct InboxSink {
    notifications: Tree,
}

impl InboxSink {
    pub fn open(db: &sled::Db) -> Result<Self, MarketError> {
        Ok(Self {
            notifications: db.open_tree(NOTIFICATIONS_TREE)?,
        })
    }
}

impl NotificationSink for InboxSink {
    // Only the first delivery writes. A redelivered entry must not reset the
    // read flag the user has set since.
    fn deliver(&self, notification: &Notification) -> Result<(), MarketError> {
        let written = self.notifications.compare_and_swap(
            notification.id.as_bytes(),
            None as Option<&[u8]>,
            Some(encode(notification)?),
        )?;
        if written.is_err() {
            log::debug!("notification {} already in the inbox", notification.id);
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    /// Failed this round, will be retried.
    pub failed: usize,
    /// Out of attempts; left in the outbox until requeued.
    pub dead: usize,
}

pub struct NotificationDispatcher {
    outbox: Tree,
    sink: Arc<dyn NotificationSink>,
    max_attempts: u32,
    running: Mutex<()>,
}

impl NotificationDispatcher {
    pub fn new(store: &Store, sink: Arc<dyn NotificationSink>, max_attempts: u32) -> Self {
        Self {
            outbox: store.outbox.clone(),
            sink,
            max_attempts: max_attempts.max(1),
            running: Mutex::new(()),
        }
    }

    /// Try to deliver everything in the outbox once.
    pub fn dispatch_pending(&self) -> Result<DispatchReport, MarketError> {
        // one pass at a time, two passes would deliver the same entry twice
        let _running = self.running.lock().unwrap_or_else(|p| p.into_inner());
        let mut report = DispatchReport::default();

        for mut entry in self.pending()? {
            if entry.attempts >= self.max_attempts {
                report.dead += 1;
                continue;
            }

            match self.sink.deliver(&Notification::from_entry(&entry)) {
                Ok(()) => {
                    self.outbox.remove(entry.id.as_bytes())?;
                    report.delivered += 1;
                }
                Err(err) => {
                    entry.attempts += 1;
                    entry.last_error = Some(err.to_string());
                    if entry.attempts >= self.max_attempts {
                        log::error!(
                            "notification {} to {} dead after {} attempts: {}",
                            entry.id,
                            entry.request.user_id,
                            entry.attempts,
                            err
                        );
                        report.dead += 1;
                    } else {
                        log::warn!(
                            "notification {} to {} failed (attempt {}): {}",
                            entry.id,
                            entry.request.user_id,
                            entry.attempts,
                            err
                        );
                        report.failed += 1;
                    }
                    self.outbox.insert(entry.id.as_bytes(), encode(&entry)?)?;
                }
            }
        }

        log::debug!(
            "dispatch pass: {} delivered, {} failed, {} dead",
            report.delivered,
            report.failed,
            report.dead
        );
        Ok(report)
    }

    /// Entries still waiting, dead ones included.
    pub fn pending(&self) -> Result<Vec<OutboxEntry>, MarketError> {
        self.outbox.iter().values().map(|v| decode(&v?)).collect()
    }

    pub fn dead_letters(&self) -> Result<Vec<OutboxEntry>, MarketError> {
        Ok(self
            .pending()?
            .into_iter()
            .filter(|entry| entry.attempts >= self.max_attempts)
            .collect())
    }

    /// Give dead entries a fresh set of attempts. Returns how many were reset.
    pub fn requeue_dead_letters(&self) -> Result<usize, MarketError> {
        let _running = self.running.lock().unwrap_or_else(|p| p.into_inner());
        let mut requeued = 0;
        for mut entry in self.dead_letters()? {
            entry.attempts = 0;
            self.outbox.insert(entry.id.as_bytes(), encode(&entry)?)?;
            requeued += 1;
        }
        Ok(requeued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sled::Transactional;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakySink {
        inbox: InboxSink,
        failures_left: AtomicUsize,
    }

    impl NotificationSink for FlakySink {
        fn deliver(&self, notification: &Notification) -> Result<(), MarketError> {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(anyhow::anyhow!("push gateway timed out").into());
            }
            self.inbox.deliver(notification)
        }
    }

    fn setup(
        failures: usize,
        max_attempts: u32,
    ) -> (tempfile::TempDir, Store, NotificationDispatcher) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(sled::open(dir.path().join("outbox.db")).unwrap());
        let store = Store::open(db.clone()).unwrap();
        let sink = FlakySink {
            inbox: InboxSink::open(&db).unwrap(),
            failures_left: AtomicUsize::new(failures),
        };
        let dispatcher = NotificationDispatcher::new(&store, Arc::new(sink), max_attempts);
        (dir, store, dispatcher)
    }

    fn queue(store: &Store, request: NotificationRequest) {
        store
            .outbox
            .transaction(|outbox| enqueue(outbox, request.clone()))
            .map_err(MarketError::from)
            .unwrap();
    }

    fn payment_note() -> NotificationRequest {
        NotificationRequest::new(
            "farmer_1",
            NotificationKind::Payment,
            "Payment Processed",
            "Your payment of 5000 has been processed",
        )
    }

    #[test]
    fn blank_requests_are_rejected() {
        let request = NotificationRequest::new("farmer_1", NotificationKind::General, " ", "hi");
        assert_eq!(request.validate(), Err(ValidationError::MissingField("title")));
        assert!(OutboxEntry::new(request).is_err());
    }

    #[test]
    fn malformed_request_does_not_block_the_transaction() {
        let (_dir, store, _dispatcher) = setup(0, 3);
        let blank = NotificationRequest::new("farmer_1", NotificationKind::General, "Hello", "  ");

        (&store.payments, &store.outbox)
            .transaction(|(payments, outbox)| -> TxResult<()> {
                payments.insert("pay_1", "settled")?;
                enqueue(outbox, blank.clone())
            })
            .map_err(MarketError::from)
            .unwrap();

        assert!(store.payments.contains_key("pay_1").unwrap());
        assert!(store.outbox.is_empty());
    }

    #[test]
    fn redelivery_keeps_the_read_flag() {
        let (_dir, store, dispatcher) = setup(0, 3);
        queue(&store, payment_note());
        let entry = dispatcher.pending().unwrap().remove(0);

        // delivered once, but the entry never left the outbox
        let inbox = InboxSink {
            notifications: store.notifications.clone(),
        };
        inbox.deliver(&Notification::from_entry(&entry)).unwrap();
        let mut delivered: Notification = store.fetch(&store.notifications, &entry.id).unwrap();
        delivered.read = true;
        store.save(&store.notifications, &delivered).unwrap();

        assert_eq!(dispatcher.dispatch_pending().unwrap().delivered, 1);
        assert!(store.outbox.is_empty());
        let after: Notification = store.fetch(&store.notifications, &entry.id).unwrap();
        assert!(after.read);
    }

    #[test]
    fn delivered_entries_leave_the_outbox() {
        let (_dir, store, dispatcher) = setup(0, 3);
        queue(&store, payment_note().for_order("order_1"));

        let report = dispatcher.dispatch_pending().unwrap();
        assert_eq!(report.delivered, 1);
        assert!(store.outbox.is_empty());

        let inbox: Vec<Notification> = store.scan(&store.notifications).unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].order_id.as_deref(), Some("order_1"));
        assert!(!inbox[0].read);
    }

    #[test]
    fn failed_delivery_is_retried_later() {
        let (_dir, store, dispatcher) = setup(1, 3);
        queue(&store, payment_note());

        let first = dispatcher.dispatch_pending().unwrap();
        assert_eq!(first.failed, 1);
        let waiting = dispatcher.pending().unwrap();
        assert_eq!(waiting[0].attempts, 1);
        assert!(waiting[0].last_error.as_deref().unwrap().contains("timed out"));

        let second = dispatcher.dispatch_pending().unwrap();
        assert_eq!(second.delivered, 1);
        assert!(dispatcher.pending().unwrap().is_empty());
    }

    #[test]
    fn exhausted_entries_become_dead_letters() {
        let (_dir, store, dispatcher) = setup(2, 2);
        queue(&store, payment_note());

        dispatcher.dispatch_pending().unwrap();
        let report = dispatcher.dispatch_pending().unwrap();
        assert_eq!(report.dead, 1);
        assert_eq!(dispatcher.dead_letters().unwrap().len(), 1);

        // skipped until someone requeues it
        assert_eq!(dispatcher.dispatch_pending().unwrap().dead, 1);
        assert_eq!(dispatcher.requeue_dead_letters().unwrap(), 1);
        assert_eq!(dispatcher.dispatch_pending().unwrap().delivered, 1);
        assert_eq!(store.scan::<Notification>(&store.notifications).unwrap().len(), 1);
    }
}
