use super::{BulkReport, MarketService, distinct_ids};
use crate::config::BulkNotificationPolicy;
use crate::error::{MarketError, RuleError};
use crate::notification::{NotificationKind, NotificationRequest, enqueue};
use crate::order::{Order, OrderStatus};
use crate::payment::{Payment, PaymentStatus, farmer_share};
use crate::product::Product;
use crate::store::{TxResult, abort, tx_fetch, tx_load, tx_save};
use crate::utils;
use sled::Transactional;
use sled::transaction::TransactionalTree;

impl MarketService {
    /// Open a settlement for an order, paying the farmer the order total less
    /// the configured platform fee.
    pub fn create_order_payment(
        &self,
        order_id: &str,
        farmer_id: &str,
    ) -> Result<Payment, MarketError> {
        let order: Order = self.store.fetch(&self.store.orders, order_id)?;
        let payout = farmer_share(order.total_amount, self.config.platform_fee_bps)?;
        self.create_order_payment_with_payout(order_id, farmer_id, payout)
    }

    /// Open a settlement for an order with an explicit farmer payout.
    /// An order is settled at most once.
    pub fn create_order_payment_with_payout(
        &self,
        order_id: &str,
        farmer_id: &str,
        farmer_amount: u64,
    ) -> Result<Payment, MarketError> {
        let payment_id = Self::new_id("pay_")?;
        let store = &self.store;

        let payment = (&store.orders, &store.payments, &store.settlements).transaction(
            |(orders, payments, settlements)| -> TxResult<Payment> {
                let order: Order = tx_fetch(orders, order_id)?;
                if settlements.get(order_id.as_bytes())?.is_some() {
                    return Err(abort(RuleError::OrderAlreadySettled(order_id.to_string())));
                }
                let payment = Payment::for_order(payment_id.clone(), &order, farmer_id, farmer_amount)
                    .map_err(abort)?;

                tx_save(payments, &payment)?;
                settlements.insert(order_id.as_bytes(), payment.id.as_bytes())?;
                Ok(payment)
            },
        )?;

        log::info!(
            "payment {} opened for order {}: {} to farmer {}, fee {}",
            payment.id,
            order_id,
            payment.farmer_amount,
            payment.farmer_id,
            payment.platform_fee.unwrap_or_default()
        );
        Ok(payment)
    }

    /// Payout for collected produce that never went through a buyer order.
    pub fn create_collection_payment(
        &self,
        farmer_id: &str,
        farmer_amount: u64,
        product_id: Option<&str>,
    ) -> Result<Payment, MarketError> {
        if let Some(id) = product_id {
            self.store.fetch::<Product>(&self.store.products, id)?;
        }
        let payment = Payment::collection(Self::new_id("pay_")?, farmer_id, farmer_amount, product_id)?;
        self.store.save(&self.store.payments, &payment)?;

        log::info!(
            "collection payment {} opened: {} to farmer {}",
            payment.id,
            payment.farmer_amount,
            payment.farmer_id
        );
        Ok(payment)
    }

    /// Pay out one pending payment and tell the farmer. A payout for an order
    /// that has since been cancelled is refused.
    pub fn process_payment(&self, payment_id: &str, admin_id: &str) -> Result<Payment, MarketError> {
        let transaction_id = utils::new_transaction_id();

        let store = &self.store;

        let payment = (&store.payments, &store.orders, &store.outbox).transaction(
            |(payments, orders, outbox)| -> TxResult<Payment> {
                let mut payment: Payment = tx_fetch(payments, payment_id)?;
                if let Some(refusal) = cancelled_order(orders, &payment)? {
                    return Err(abort(refusal));
                }
                payment
                    .mark_processed(transaction_id.clone(), admin_id)
                    .map_err(abort)?;
                tx_save(payments, &payment)?;
                enqueue(outbox, processed_notification(&payment))?;
                Ok(payment)
            },
        )?;

        log::info!(
            "payment {} processed by {} as {}",
            payment.id,
            admin_id,
            transaction_id
        );
        self.deliver_notifications();
        Ok(payment)
    }

    /// Pay out many payments under one batch reference. Missing or already
    /// processed payments are skipped, as are payouts for cancelled orders;
    /// the rest are settled together.
    pub fn process_payments_bulk(
        &self,
        payment_ids: &[String],
        admin_id: &str,
    ) -> Result<BulkReport, MarketError> {
        let ids = distinct_ids(payment_ids)?;
        let prefix = utils::batch_transaction_prefix(&ids);
        let notify = self.config.bulk_payment_notifications == BulkNotificationPolicy::PerPayment;

        let store = &self.store;

        let report = (&store.payments, &store.orders, &store.outbox).transaction(
            |(payments, orders, outbox)| -> TxResult<BulkReport> {
                let mut report = BulkReport {
                    transaction_prefix: Some(prefix.clone()),
                    ..BulkReport::default()
                };
                for id in &ids {
                    let Some(mut payment) = tx_load::<Payment>(payments, id)? else {
                        report.skip(id, "payment not found");
                        continue;
                    };
                    if payment.status != PaymentStatus::Pending {
                        report.skip(id, format!("payment is {}", payment.status));
                        continue;
                    }
                    if let Some(refusal) = cancelled_order(orders, &payment)? {
                        report.skip(id, refusal.to_string());
                        continue;
                    }
                    let row = format!("{}-{:04}", prefix, report.applied.len() + 1);
                    payment.mark_processed(row, admin_id).map_err(abort)?;
                    tx_save(payments, &payment)?;
                    if notify {
                        enqueue(outbox, processed_notification(&payment))?;
                    }
                    report.applied.push(id.clone());
                }
                Ok(report)
            },
        )?;

        log::info!(
            "bulk payment run {} by {}: {} processed, {} skipped",
            prefix,
            admin_id,
            report.applied.len(),
            report.skipped.len()
        );
        report.log_skipped();
        if notify && !report.applied.is_empty() {
            self.deliver_notifications();
        }
        Ok(report)
    }

    /// Close out a payment the farmer has received.
    pub fn complete_payment(&self, payment_id: &str) -> Result<Payment, MarketError> {
        let payment = self.store.payments.transaction(|payments| -> TxResult<Payment> {
            let mut payment: Payment = tx_fetch(payments, payment_id)?;
            payment.mark_completed().map_err(abort)?;
            tx_save(payments, &payment)?;
            Ok(payment)
        })?;

        log::info!("payment {} completed", payment.id);
        Ok(payment)
    }

    pub fn payment(&self, payment_id: &str) -> Result<Payment, MarketError> {
        self.store.fetch(&self.store.payments, payment_id)
    }

    /// The settlement opened for an order, if any.
    pub fn payment_for_order(&self, order_id: &str) -> Result<Option<Payment>, MarketError> {
        match self.store.settlements.get(order_id.as_bytes())? {
            Some(payment_id) => {
                let payment_id = String::from_utf8_lossy(&payment_id);
                self.store.load(&self.store.payments, &payment_id)
            }
            None => Ok(None),
        }
    }

    /// A farmer's payments, newest first.
    pub fn payments_for_farmer(&self, farmer_id: &str) -> Result<Vec<Payment>, MarketError> {
        let mut payments: Vec<Payment> = self
            .store
            .scan::<Payment>(&self.store.payments)?
            .into_iter()
            .filter(|payment| payment.farmer_id == farmer_id)
            .collect();
        payments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(payments)
    }

    pub fn pending_payments(&self) -> Result<Vec<Payment>, MarketError> {
        Ok(self
            .store
            .scan::<Payment>(&self.store.payments)?
            .into_iter()
            .filter(|payment| payment.status == PaymentStatus::Pending)
            .collect())
    }
}

// An order payout stands only while the order it settles is still live.
fn cancelled_order(orders: &TransactionalTree, payment: &Payment) -> TxResult<Option<RuleError>> {
    let Some(order_id) = &payment.order_id else {
        return Ok(None);
    };
    let order: Order = tx_fetch(orders, order_id)?;
    if order.status != OrderStatus::Cancelled {
        return Ok(None);
    }
    Ok(Some(RuleError::OrderNotPayable {
        id: order.id,
        status: order.status.to_string(),
    }))
}

fn processed_notification(payment: &Payment) -> NotificationRequest {
    let mut request = NotificationRequest::new(
        &payment.farmer_id,
        NotificationKind::Payment,
        "Payment Processed",
        format!(
            "Your payment of {} has been processed. Transaction ID: {}",
            payment.farmer_amount,
            payment.transaction_id.as_deref().unwrap_or_default()
        ),
    );
    if let Some(order_id) = &payment.order_id {
        request = request.for_order(order_id);
    }
    if let Some(product_id) = &payment.product_id {
        request = request.for_product(product_id);
    }
    request
}
