use super::MarketService;
use crate::error::{MarketError, RuleError};
use crate::notification::{DispatchReport, Notification, NotificationRequest, OutboxEntry};
use crate::store::TxResult;
use sled::Transactional;

impl MarketService {
    /// Queue a notification outside any workflow and try to deliver it now.
    /// Returns the id the notification will carry in the inbox.
    pub fn send_notification(&self, request: NotificationRequest) -> Result<String, MarketError> {
        let entry = OutboxEntry::new(request)?;
        self.store.save(&self.store.outbox, &entry)?;
        log::debug!("notification {} queued for {}", entry.id, entry.request.user_id);

        self.deliver_notifications();
        Ok(entry.id)
    }

    /// A user's inbox, newest first.
    pub fn notifications_for(&self, user_id: &str) -> Result<Vec<Notification>, MarketError> {
        let mut notifications: Vec<Notification> = self
            .store
            .scan::<Notification>(&self.store.notifications)?
            .into_iter()
            .filter(|n| n.user_id == user_id)
            .collect();
        notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(notifications)
    }

    pub fn unread_count(&self, user_id: &str) -> Result<usize, MarketError> {
        Ok(self
            .notifications_for(user_id)?
            .iter()
            .filter(|n| !n.read)
            .count())
    }

    pub fn mark_notification_read(
        &self,
        notification_id: &str,
        user_id: &str,
    ) -> Result<Notification, MarketError> {
        let mut notification = self.owned_notification(notification_id, user_id)?;
        if !notification.read {
            notification.read = true;
            self.store.save(&self.store.notifications, &notification)?;
        }
        Ok(notification)
    }

    /// Returns how many notifications changed.
    pub fn mark_all_read(&self, user_id: &str) -> Result<usize, MarketError> {
        let mut changed = 0;
        for mut notification in self.notifications_for(user_id)? {
            if notification.read {
                continue;
            }
            notification.read = true;
            self.store.save(&self.store.notifications, &notification)?;
            changed += 1;
        }
        Ok(changed)
    }

    /// Delete from the inbox, along with any outbox copy still waiting, so a
    /// later dispatch cannot bring it back.
    pub fn delete_notification(&self, notification_id: &str, user_id: &str) -> Result<(), MarketError> {
        self.owned_notification(notification_id, user_id)?;
        (&self.store.notifications, &self.store.outbox).transaction(
            |(notifications, outbox)| -> TxResult<()> {
                notifications.remove(notification_id.as_bytes())?;
                outbox.remove(notification_id.as_bytes())?;
                Ok(())
            },
        )?;
        Ok(())
    }

    /// Retry everything still in the outbox.
    pub fn dispatch_notifications(&self) -> Result<DispatchReport, MarketError> {
        self.dispatcher.dispatch_pending()
    }

    pub fn undelivered_notifications(&self) -> Result<Vec<OutboxEntry>, MarketError> {
        self.dispatcher.pending()
    }

    /// Give dead-lettered notifications another round of attempts.
    pub fn requeue_dead_notifications(&self) -> Result<usize, MarketError> {
        let requeued = self.dispatcher.requeue_dead_letters()?;
        if requeued > 0 {
            log::info!("{requeued} dead notification(s) requeued");
        }
        Ok(requeued)
    }

    fn owned_notification(
        &self,
        notification_id: &str,
        user_id: &str,
    ) -> Result<Notification, MarketError> {
        let notification: Notification =
            self.store.fetch(&self.store.notifications, notification_id)?;
        if notification.user_id != user_id {
            return Err(RuleError::NotRecipient.into());
        }
        Ok(notification)
    }
}
