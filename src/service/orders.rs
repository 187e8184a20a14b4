use super::{BulkReport, MarketService, distinct_ids};
use crate::error::MarketError;
use crate::inventory::{AggregatedProduct, Stock};
use crate::notification::{NotificationKind, NotificationRequest, enqueue};
use crate::order::{Order, OrderRequest, OrderStatus, PlacementTerms, ProductRef};
use crate::product::Product;
use crate::store::{Record, TxResult, abort, tx_fetch, tx_load, tx_save};
use sled::Transactional;
use sled::transaction::TransactionalTree;

type Applied = (Order, StockEffect);

// How a status change ripples out; read from config once per call.
#[derive(Clone, Copy)]
struct StatusPolicy {
    enforce: bool,
    restock: bool,
    notify: bool,
}

impl MarketService {
    /// Place an order: check stock, take it, and record the order, all in one
    /// transaction. Returns the stored order.
    pub fn place_order(&self, request: &OrderRequest) -> Result<Order, MarketError> {
        let terms = request.validate()?;
        let order_id = Self::new_id("order_")?;
        let notify = self.config.notify_on_order_placed;

        let order = match &terms.product {
            ProductRef::Aggregated(id) => self.reserve_and_record::<AggregatedProduct>(
                &self.store.aggregated,
                id,
                &order_id,
                &terms,
                notify,
            )?,
            ProductRef::Direct(id) => self.reserve_and_record::<Product>(
                &self.store.products,
                id,
                &order_id,
                &terms,
                notify,
            )?,
        };

        log::info!(
            "order {} placed by {}: {} x {} = {}",
            order.id,
            order.buyer_id,
            order.quantity_ordered,
            order.product_name,
            order.total_amount
        );
        if notify {
            self.deliver_notifications();
        }
        Ok(order)
    }

    fn reserve_and_record<S: Stock + Record>(
        &self,
        stock_tree: &sled::Tree,
        stock_id: &str,
        order_id: &str,
        terms: &PlacementTerms,
        notify: bool,
    ) -> Result<Order, MarketError> {
        let order = (stock_tree, &self.store.orders, &self.store.outbox).transaction(
            |(stock, orders, outbox)| -> TxResult<Order> {
                let mut source: S = tx_fetch(stock, stock_id)?;
                source.reserve(terms.quantity).map_err(abort)?;
                let order = Order::new(order_id.to_string(), terms, &source).map_err(abort)?;

                tx_save(stock, &source)?;
                tx_save(orders, &order)?;
                if notify {
                    enqueue(outbox, placed_notification(&order))?;
                }
                Ok(order)
            },
        )?;
        Ok(order)
    }

    /// Move an order to `next`. Illegal transitions are refused unless
    /// `enforce_order_transitions` is off. Cancelling returns the stock; a
    /// cancelled order reopened in permissive mode takes it back, or fails
    /// if it has been sold since.
    pub fn advance_order_status(
        &self,
        order_id: &str,
        next: OrderStatus,
        admin_id: &str,
    ) -> Result<Order, MarketError> {
        let policy = self.status_policy();
        let store = &self.store;

        let (order, effect) = (
            &store.orders,
            &store.aggregated,
            &store.products,
            &store.outbox,
        )
            .transaction(
                |(orders, aggregated, products, outbox)| -> TxResult<Applied> {
                    let mut order: Order = tx_fetch(orders, order_id)?;
                    let effect =
                        transition_order(&mut order, next, policy, aggregated, products, outbox)?;
                    tx_save(orders, &order)?;
                    Ok((order, effect))
                },
            )?;

        log::info!("order {} -> {} by {}", order.id, order.status, admin_id);
        effect.log(&order);
        if policy.notify {
            self.deliver_notifications();
        }
        Ok(order)
    }

    pub fn cancel_order(&self, order_id: &str, actor_id: &str) -> Result<Order, MarketError> {
        self.advance_order_status(order_id, OrderStatus::Cancelled, actor_id)
    }

    /// Apply one target status to many orders. Orders that cannot make the
    /// transition are reported and left alone; the rest commit together.
    pub fn advance_orders_bulk(
        &self,
        order_ids: &[String],
        next: OrderStatus,
        admin_id: &str,
    ) -> Result<BulkReport, MarketError> {
        let ids = distinct_ids(order_ids)?;
        let policy = self.status_policy();
        let store = &self.store;

        let (report, effects) = (
            &store.orders,
            &store.aggregated,
            &store.products,
            &store.outbox,
        )
            .transaction(
                |(orders, aggregated, products, outbox)| -> TxResult<(BulkReport, Vec<Applied>)> {
                    let mut report = BulkReport::default();
                    let mut effects = Vec::new();
                    for id in &ids {
                        let Some(mut order) = tx_load::<Order>(orders, id)? else {
                            report.skip(id, "order not found");
                            continue;
                        };
                        if policy.enforce && !order.status.can_transition_to(next) {
                            report.skip(id, format!("cannot move from {} to {}", order.status, next));
                            continue;
                        }
                        let effect =
                            transition_order(&mut order, next, policy, aggregated, products, outbox)?;
                        tx_save(orders, &order)?;
                        report.applied.push(id.clone());
                        effects.push((order, effect));
                    }
                    Ok((report, effects))
                },
            )?;

        log::info!(
            "bulk order update to {} by {}: {} applied, {} skipped",
            next,
            admin_id,
            report.applied.len(),
            report.skipped.len()
        );
        report.log_skipped();
        for (order, effect) in &effects {
            effect.log(order);
        }
        if policy.notify && !report.applied.is_empty() {
            self.deliver_notifications();
        }
        Ok(report)
    }

    pub fn order(&self, order_id: &str) -> Result<Order, MarketError> {
        self.store.fetch(&self.store.orders, order_id)
    }

    /// A buyer's orders, newest first.
    pub fn orders_for_buyer(&self, buyer_id: &str) -> Result<Vec<Order>, MarketError> {
        let mut orders: Vec<Order> = self
            .store
            .scan::<Order>(&self.store.orders)?
            .into_iter()
            .filter(|order| order.buyer_id == buyer_id)
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    pub fn orders_with_status(&self, status: OrderStatus) -> Result<Vec<Order>, MarketError> {
        Ok(self
            .store
            .scan::<Order>(&self.store.orders)?
            .into_iter()
            .filter(|order| order.status == status)
            .collect())
    }

    fn status_policy(&self) -> StatusPolicy {
        StatusPolicy {
            enforce: self.config.enforce_order_transitions,
            restock: self.config.restock_on_cancel,
            notify: self.config.notify_on_order_status,
        }
    }
}

/// What a status change did to the stock an order draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StockEffect {
    Unchanged,
    Returned,
    Retaken,
    SourceMissing,
}

impl StockEffect {
    fn log(self, order: &Order) {
        match self {
            StockEffect::Unchanged => {}
            StockEffect::Returned => log::debug!(
                "order {}: {} returned to {}",
                order.id,
                order.quantity_ordered,
                order.product.id()
            ),
            StockEffect::Retaken => log::debug!(
                "order {}: {} taken again from {}",
                order.id,
                order.quantity_ordered,
                order.product.id()
            ),
            StockEffect::SourceMissing => log::warn!(
                "cannot restock order {}: {} no longer exists",
                order.id,
                order.product.id()
            ),
        }
    }
}

// The order's `restocked` flag says whether its quantity currently sits back
// in the source, so stock moves at most once in each direction.
fn transition_order(
    order: &mut Order,
    next: OrderStatus,
    policy: StatusPolicy,
    aggregated: &TransactionalTree,
    products: &TransactionalTree,
    outbox: &TransactionalTree,
) -> TxResult<StockEffect> {
    let previous = order.status;
    order.apply_status(next, policy.enforce).map_err(abort)?;

    let quantity = order.quantity_ordered;
    let effect = if next == OrderStatus::Cancelled {
        if policy.restock && !order.restocked {
            let returned = match &order.product {
                ProductRef::Aggregated(id) => restock::<AggregatedProduct>(aggregated, id, quantity)?,
                ProductRef::Direct(id) => restock::<Product>(products, id, quantity)?,
            };
            order.restocked = returned;
            if returned {
                StockEffect::Returned
            } else {
                StockEffect::SourceMissing
            }
        } else {
            StockEffect::Unchanged
        }
    } else if order.restocked {
        // a permissive admin reopened a cancelled order
        match &order.product {
            ProductRef::Aggregated(id) => retake::<AggregatedProduct>(aggregated, id, quantity)?,
            ProductRef::Direct(id) => retake::<Product>(products, id, quantity)?,
        }
        order.restocked = false;
        StockEffect::Retaken
    } else {
        StockEffect::Unchanged
    };

    if policy.notify && previous != next {
        enqueue(outbox, status_notification(order))?;
    }
    Ok(effect)
}

// False when the source is gone and there is nothing to put the stock back into.
fn restock<S: Stock + Record>(tree: &TransactionalTree, id: &str, quantity: u64) -> TxResult<bool> {
    let Some(mut source) = tx_load::<S>(tree, id)? else {
        return Ok(false);
    };
    source.restock(quantity);
    tx_save(tree, &source)?;
    Ok(true)
}

fn retake<S: Stock + Record>(tree: &TransactionalTree, id: &str, quantity: u64) -> TxResult<()> {
    let mut source: S = tx_fetch(tree, id)?;
    source.reserve(quantity).map_err(abort)?;
    tx_save(tree, &source)
}

fn placed_notification(order: &Order) -> NotificationRequest {
    NotificationRequest::new(
        &order.buyer_id,
        NotificationKind::OrderUpdate,
        "Order Placed",
        format!(
            "Your order for {} {} has been placed. Total: {}",
            order.quantity_ordered, order.product_name, order.total_amount
        ),
    )
    .for_order(&order.id)
}

fn status_notification(order: &Order) -> NotificationRequest {
    let message = match (&order.status, &order.tracking_id) {
        (OrderStatus::Shipped, Some(tracking)) => format!(
            "Your order for {} has shipped. Tracking ID: {}",
            order.product_name, tracking
        ),
        (status, _) => format!("Your order for {} is now {}", order.product_name, status),
    };
    NotificationRequest::new(
        &order.buyer_id,
        NotificationKind::OrderUpdate,
        "Order Update",
        message,
    )
    .for_order(&order.id)
}
