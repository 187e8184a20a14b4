//! End to end marketplace workflows against a real sled database.

use agri_market::config::{BulkNotificationPolicy, MarketConfig};
use agri_market::error::{MarketError, RuleError, ValidationError};
use agri_market::inventory::{AggregatedProduct, AggregatedProductDraft};
use agri_market::notification::NotificationKind;
use agri_market::order::{OrderRequest, OrderStatus};
use agri_market::payment::PaymentStatus;
use agri_market::product::{DEFAULT_APPROVAL_NOTE, Product, ProductDraft, ProductStatus};
use agri_market::service::MarketService;
use agri_market::types::{Category, QualityGrade};
use agri_market::utils;
use anyhow::Context;
use sled::open;
use std::sync::Arc;

use tempfile::{TempDir, tempdir}; // Use for test db cleanup.

// Sled locks its directory, so every test gets a database of its own under a
// temp dir that is removed when the returned guard drops.
fn service_with(name: &str, config: MarketConfig) -> anyhow::Result<(TempDir, MarketService)> {
    let _ = env_logger::builder().is_test(true).try_init();
    let temp_dir = tempdir()?;
    let db = open(temp_dir.path().join(name))?;
    let service = MarketService::new(Arc::new(db), config)?;
    Ok((temp_dir, service))
}

fn service(name: &str) -> anyhow::Result<(TempDir, MarketService)> {
    service_with(name, MarketConfig::default())
}

fn wheat(service: &MarketService) -> anyhow::Result<AggregatedProduct> {
    let wheat = AggregatedProductDraft::new()
        .set_product_name("Wheat")
        .set_category(Category::Grain)
        .set_total_quantity(100)
        .set_standard_price(25_000)
        .set_quality_grade(QualityGrade::A)
        .set_farmer_count(12)
        .add_region("Punjab")
        .add_region("Haryana")
        .set_admin_certified(true);
    Ok(service.register_aggregated_product(wheat)?)
}

fn tomatoes(service: &MarketService, farmer_id: &str) -> anyhow::Result<Product> {
    let draft = ProductDraft::new()
        .set_farmer(farmer_id)
        .set_name("Tomatoes")
        .set_category(Category::Vegetable)
        .set_quantity(40)
        .set_price_per_unit(3_000)
        .set_quality_grade(QualityGrade::BPlus);
    Ok(service.submit_product(draft)?)
}

fn order_for(buyer_id: &str, product_id: &str, quantity: i64) -> OrderRequest {
    OrderRequest::new()
        .set_buyer(buyer_id)
        .set_aggregated_product(product_id)
        .set_quantity(quantity)
        .set_delivery_address("14 Mandi Road, Ludhiana")
        .set_phone("+91 98000 00000")
}

#[test]
fn order_draws_down_pooled_stock() -> anyhow::Result<()> {
    let (_dir, service) = service("order_draws_down.db")?;
    let buyer_id = utils::new_uuid_to_bech32("user_")?;
    let wheat = wheat(&service)?;

    let order = service
        .place_order(&order_for(&buyer_id, &wheat.id, 30))
        .context("Order Failed on Placement: ")?;

    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.total_amount, 750_000);
    assert_eq!(order.unit_price, 25_000);
    assert_eq!(order.product_name, "Wheat");
    assert_eq!(service.aggregated_product(&wheat.id)?.total_quantity, 70);

    // more than what is left is refused and nothing moves
    let err = service
        .place_order(&order_for(&buyer_id, &wheat.id, 80))
        .unwrap_err();
    assert!(matches!(
        err,
        MarketError::Rule(RuleError::ExceedsAvailableQuantity {
            requested: 80,
            available: 70
        })
    ));
    assert_eq!(
        err.to_string(),
        "Requested quantity 80 exceeds available quantity 70"
    );
    assert_eq!(service.aggregated_product(&wheat.id)?.total_quantity, 70);
    assert_eq!(service.orders_for_buyer(&buyer_id)?.len(), 1);

    Ok(())
}

#[test]
fn whole_stock_can_be_ordered() -> anyhow::Result<()> {
    let (_dir, service) = service("whole_stock.db")?;
    let wheat = wheat(&service)?;

    service.place_order(&order_for("buyer_1", &wheat.id, 100))?;
    assert_eq!(service.aggregated_product(&wheat.id)?.total_quantity, 0);

    let err = service
        .place_order(&order_for("buyer_2", &wheat.id, 1))
        .unwrap_err();
    assert!(matches!(
        err,
        MarketError::Rule(RuleError::ExceedsAvailableQuantity { available: 0, .. })
    ));

    Ok(())
}

#[test]
fn malformed_quantity_never_reaches_the_ledger() -> anyhow::Result<()> {
    let (_dir, service) = service("malformed_quantity.db")?;
    let wheat = wheat(&service)?;

    let request = order_for("buyer_1", &wheat.id, 1).set_quantity_text("ten");
    let err = service.place_order(&request).unwrap_err();
    assert!(matches!(
        err,
        MarketError::Validation(ValidationError::NonNumericQuantity(ref raw)) if raw == "ten"
    ));

    let err = service
        .place_order(&order_for("buyer_1", &wheat.id, 0))
        .unwrap_err();
    assert!(matches!(
        err,
        MarketError::Validation(ValidationError::NonPositiveQuantity)
    ));

    let err = service
        .place_order(&order_for("buyer_1", "agg_missing", 5))
        .unwrap_err();
    assert!(matches!(err, MarketError::NotFound { .. }));

    assert_eq!(service.aggregated_product(&wheat.id)?.total_quantity, 100);
    assert!(service.orders_for_buyer("buyer_1")?.is_empty());

    Ok(())
}

#[test]
fn direct_orders_need_an_approved_product() -> anyhow::Result<()> {
    let (_dir, service) = service("direct_orders.db")?;
    let farmer_id = utils::new_uuid_to_bech32("user_")?;
    let product = tomatoes(&service, &farmer_id)?;

    let request = OrderRequest::new()
        .set_buyer("buyer_1")
        .set_direct_product(&product.id)
        .set_quantity_text(" 5 ")
        .set_delivery_address("Stall 9, Azadpur Mandi");

    let err = service.place_order(&request).unwrap_err();
    assert!(matches!(
        err,
        MarketError::Rule(RuleError::ProductNotOrderable(_))
    ));

    service.approve_product(&product.id, "admin_1", None)?;
    let order = service.place_order(&request)?;

    assert_eq!(order.quantity_ordered, 5);
    assert_eq!(order.total_amount, 15_000);
    assert_eq!(service.product(&product.id)?.quantity_available, 35);

    Ok(())
}

#[test]
fn rejection_notifies_the_farmer_once() -> anyhow::Result<()> {
    let (_dir, service) = service("rejection.db")?;
    let farmer_id = utils::new_uuid_to_bech32("user_")?;
    let product = tomatoes(&service, &farmer_id)?;

    let rejected = service
        .reject_product(&product.id, "admin_1", "Quality below grade A")
        .context("Product Failed on Rejection: ")?;

    assert_eq!(rejected.status, ProductStatus::Rejected);
    assert_eq!(rejected.admin_notes.as_deref(), Some("Quality below grade A"));
    assert_eq!(rejected.reviewed_by.as_deref(), Some("admin_1"));

    let inbox = service.notifications_for(&farmer_id)?;
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].kind, NotificationKind::AdminMessage);
    assert_eq!(inbox[0].product_id.as_deref(), Some(product.id.as_str()));
    assert!(inbox[0].message.contains("Quality below grade A"));

    // a rejected product is final
    let err = service
        .approve_product(&product.id, "admin_1", None)
        .unwrap_err();
    assert!(matches!(
        err,
        MarketError::Rule(RuleError::IllegalProductTransition { .. })
    ));
    assert_eq!(service.notifications_for(&farmer_id)?.len(), 1);

    Ok(())
}

#[test]
fn blank_rejection_note_changes_nothing() -> anyhow::Result<()> {
    let (_dir, service) = service("blank_rejection.db")?;
    let farmer_id = utils::new_uuid_to_bech32("user_")?;
    let product = tomatoes(&service, &farmer_id)?;

    let err = service
        .reject_product(&product.id, "admin_1", "   ")
        .unwrap_err();
    assert!(matches!(
        err,
        MarketError::Validation(ValidationError::EmptyRejectionNote)
    ));

    let unchanged = service.product(&product.id)?;
    assert_eq!(unchanged.status, ProductStatus::PendingReview);
    assert!(unchanged.admin_notes.is_none());
    assert!(service.notifications_for(&farmer_id)?.is_empty());

    Ok(())
}

#[test]
fn approval_without_note_uses_default_message() -> anyhow::Result<()> {
    let (_dir, service) = service("approval_default.db")?;
    let product = tomatoes(&service, "farmer_1")?;

    service.begin_review(&product.id, "admin_1")?;
    let approved = service.approve_product(&product.id, "admin_2", Some("  "))?;

    assert_eq!(approved.status, ProductStatus::Approved);
    assert_eq!(approved.admin_notes.as_deref(), Some(DEFAULT_APPROVAL_NOTE));
    assert_eq!(approved.reviewed_by.as_deref(), Some("admin_2"));

    let kinds: Vec<NotificationKind> = service
        .notifications_for("farmer_1")?
        .iter()
        .map(|n| n.kind)
        .collect();
    assert_eq!(kinds.len(), 2);
    assert!(kinds.contains(&NotificationKind::ProductStatus));
    assert!(kinds.contains(&NotificationKind::AdminMessage));

    Ok(())
}

#[test]
fn bulk_approval_notifies_every_farmer() -> anyhow::Result<()> {
    let (_dir, service) = service("bulk_approval.db")?;

    let mut ids = Vec::new();
    for farmer in ["farmer_a", "farmer_b", "farmer_c"] {
        ids.push(tomatoes(&service, farmer)?.id);
    }
    let already_rejected = tomatoes(&service, "farmer_d")?;
    service.reject_product(&already_rejected.id, "admin_1", "Bruised")?;

    let mut batch = ids.clone();
    batch.push(already_rejected.id.clone());
    batch.push("prod_missing".to_string());
    batch.push(ids[0].clone());

    let report = service.approve_products_bulk(&batch, "admin_1", None)?;

    assert_eq!(report.applied, ids);
    assert_eq!(report.skipped.len(), 2);
    assert_eq!(report.skipped[0].id, already_rejected.id);

    for (farmer, id) in ["farmer_a", "farmer_b", "farmer_c"].iter().zip(&ids) {
        assert_eq!(service.product(id)?.status, ProductStatus::Approved);
        let inbox = service.notifications_for(farmer)?;
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].title, "Product Approved");
    }
    assert_eq!(service.notifications_for("farmer_d")?.len(), 1);
    assert_eq!(service.products_with_status(ProductStatus::Approved)?.len(), 3);
    assert_eq!(service.products_for_farmer("farmer_d")?[0].status, ProductStatus::Rejected);

    Ok(())
}

#[test]
fn bulk_rejection_requires_a_note() -> anyhow::Result<()> {
    let (_dir, service) = service("bulk_rejection.db")?;
    let product = tomatoes(&service, "farmer_1")?;
    let ids = vec![product.id.clone()];

    assert!(service.reject_products_bulk(&ids, "admin_1", "").is_err());
    assert!(service.approve_products_bulk(&[], "admin_1", None).is_err());

    let report = service.reject_products_bulk(&ids, "admin_1", "Moisture too high")?;
    assert_eq!(report.applied, ids);
    assert_eq!(service.product(&product.id)?.status, ProductStatus::Rejected);

    Ok(())
}

#[test]
fn collection_lifecycle_runs_to_payment() -> anyhow::Result<()> {
    let (_dir, service) = service("collection_lifecycle.db")?;
    let product = tomatoes(&service, "farmer_1")?;

    // cannot collect what has not been approved
    assert!(service
        .schedule_collection(&product.id, "admin_1", None)
        .is_err());

    service.approve_product(&product.id, "admin_1", None)?;
    service.schedule_collection(&product.id, "admin_1", Some("Pickup Tuesday 7am"))?;
    service.mark_collected(&product.id, "admin_1")?;

    let payment = service.create_collection_payment("farmer_1", 110_000, Some(product.id.as_str()))?;
    assert!(payment.is_collection());
    assert_eq!(payment.amount, None);
    assert_eq!(payment.platform_fee, None);

    service.process_payment(&payment.id, "admin_1")?;
    let paid = service.mark_product_paid(&product.id, "admin_1")?;
    assert_eq!(paid.status, ProductStatus::PaymentProcessed);
    assert_eq!(paid.admin_notes.as_deref(), Some("Pickup Tuesday 7am"));

    let collection_notes = service
        .notifications_for("farmer_1")?
        .into_iter()
        .filter(|n| n.kind == NotificationKind::Collection)
        .count();
    assert_eq!(collection_notes, 2);

    let err = service
        .create_collection_payment("farmer_1", 500, Some("prod_missing"))
        .unwrap_err();
    assert!(matches!(err, MarketError::NotFound { kind: "product", .. }));

    Ok(())
}

#[test]
fn payment_is_processed_exactly_once() -> anyhow::Result<()> {
    let (_dir, service) = service("payment_once.db")?;
    let farmer_id = utils::new_uuid_to_bech32("user_")?;
    let wheat = wheat(&service)?;
    let order = service.place_order(&order_for("buyer_1", &wheat.id, 30))?;

    // an unconfirmed order cannot be settled yet
    let err = service
        .create_order_payment(&order.id, &farmer_id)
        .unwrap_err();
    assert!(matches!(
        err,
        MarketError::Rule(RuleError::OrderNotPayable { .. })
    ));

    service.advance_order_status(&order.id, OrderStatus::Confirmed, "admin_1")?;
    let payment = service
        .create_order_payment(&order.id, &farmer_id)
        .context("Payment Failed on Creation: ")?;

    assert_eq!(payment.amount, Some(750_000));
    assert_eq!(payment.farmer_amount, 712_500);
    assert_eq!(payment.platform_fee, Some(37_500));
    assert_eq!(payment.buyer_id.as_deref(), Some("buyer_1"));

    let processed = service.process_payment(&payment.id, "admin_1")?;
    let transaction_id = processed.transaction_id.clone().unwrap_or_default();

    assert_eq!(processed.status, PaymentStatus::PaidToFarmer);
    assert!(transaction_id.starts_with("TXN-"));
    assert_eq!(processed.processed_by.as_deref(), Some("admin_1"));
    assert!(processed.processed_at.is_some());

    let inbox = service.notifications_for(&farmer_id)?;
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].kind, NotificationKind::Payment);
    assert!(inbox[0].message.contains("712500"));
    assert!(inbox[0].message.contains(&transaction_id));

    let err = service.process_payment(&payment.id, "admin_2").unwrap_err();
    assert!(matches!(
        err,
        MarketError::Rule(RuleError::PaymentNotPending { .. })
    ));

    let stored = service.payment(&payment.id)?;
    assert_eq!(stored.transaction_id.as_deref(), Some(transaction_id.as_str()));
    assert_eq!(stored.processed_by.as_deref(), Some("admin_1"));
    assert_eq!(service.notifications_for(&farmer_id)?.len(), 1);

    let completed = service.complete_payment(&payment.id)?;
    assert_eq!(completed.status, PaymentStatus::Completed);

    Ok(())
}

#[test]
fn an_order_is_settled_once() -> anyhow::Result<()> {
    let (_dir, service) = service("settled_once.db")?;
    let wheat = wheat(&service)?;
    let order = service.place_order(&order_for("buyer_1", &wheat.id, 10))?;
    service.advance_order_status(&order.id, OrderStatus::Confirmed, "admin_1")?;

    let err = service
        .create_order_payment_with_payout(&order.id, "farmer_1", 300_000)
        .unwrap_err();
    assert!(matches!(
        err,
        MarketError::Validation(ValidationError::PayoutExceedsAmount {
            payout: 300_000,
            amount: 250_000
        })
    ));

    let payment = service.create_order_payment_with_payout(&order.id, "farmer_1", 240_000)?;
    assert_eq!(payment.platform_fee, Some(10_000));

    let err = service
        .create_order_payment(&order.id, "farmer_1")
        .unwrap_err();
    assert!(matches!(
        err,
        MarketError::Rule(RuleError::OrderAlreadySettled(_))
    ));
    assert_eq!(service.payment_for_order(&order.id)?, Some(payment));
    assert_eq!(service.payments_for_farmer("farmer_1")?.len(), 1);

    Ok(())
}

#[test]
fn bulk_payments_skip_what_is_not_pending() -> anyhow::Result<()> {
    let (_dir, service) = service("bulk_payments.db")?;

    let mut ids = Vec::new();
    for amount in [1_000, 2_000, 3_000] {
        ids.push(service.create_collection_payment("farmer_1", amount, None)?.id);
    }
    service.process_payment(&ids[0], "admin_1")?;

    let mut batch = ids.clone();
    batch.push("pay_missing".to_string());
    let report = service.process_payments_bulk(&batch, "admin_1")?;

    assert_eq!(report.applied, ids[1..].to_vec());
    assert_eq!(report.skipped.len(), 2);
    let prefix = report.transaction_prefix.clone().unwrap_or_default();
    assert!(prefix.starts_with("TXN-BULK-"));

    for id in &ids[1..] {
        let payment = service.payment(id)?;
        assert_eq!(payment.status, PaymentStatus::PaidToFarmer);
        assert!(payment.transaction_id.unwrap_or_default().starts_with(&prefix));
    }
    assert!(service.pending_payments()?.is_empty());

    // only the single run notified; bulk runs are silent by default
    assert_eq!(service.notifications_for("farmer_1")?.len(), 1);

    Ok(())
}

#[test]
fn bulk_payments_can_notify_each_farmer() -> anyhow::Result<()> {
    let config = MarketConfig {
        bulk_payment_notifications: BulkNotificationPolicy::PerPayment,
        ..MarketConfig::default()
    };
    let (_dir, service) = service_with("bulk_payments_notify.db", config)?;

    let ids = vec![
        service.create_collection_payment("farmer_1", 1_000, None)?.id,
        service.create_collection_payment("farmer_2", 2_000, None)?.id,
    ];
    let report = service.process_payments_bulk(&ids, "admin_1")?;

    assert_eq!(report.applied.len(), 2);
    assert_eq!(service.notifications_for("farmer_1")?.len(), 1);
    assert_eq!(service.notifications_for("farmer_2")?.len(), 1);

    Ok(())
}

#[test]
fn orders_follow_the_fulfilment_chain() -> anyhow::Result<()> {
    let (_dir, service) = service("fulfilment_chain.db")?;
    let wheat = wheat(&service)?;
    let order = service.place_order(&order_for("buyer_1", &wheat.id, 10))?;

    let err = service
        .advance_order_status(&order.id, OrderStatus::Shipped, "admin_1")
        .unwrap_err();
    assert!(matches!(
        err,
        MarketError::Rule(RuleError::IllegalOrderTransition { .. })
    ));
    assert_eq!(service.order(&order.id)?.status, OrderStatus::Pending);

    for next in [
        OrderStatus::Confirmed,
        OrderStatus::Processing,
        OrderStatus::Shipped,
    ] {
        service.advance_order_status(&order.id, next, "admin_1")?;
    }
    let shipped = service.order(&order.id)?;
    let tracking = shipped.tracking_id.clone().unwrap_or_default();
    assert!(tracking.starts_with("TRK-"));

    let delivered = service.advance_order_status(&order.id, OrderStatus::Delivered, "admin_1")?;
    assert_eq!(delivered.tracking_id, shipped.tracking_id);

    // delivered is final
    assert!(service.cancel_order(&order.id, "admin_1").is_err());

    let inbox = service.notifications_for("buyer_1")?;
    assert_eq!(inbox.len(), 4);
    assert!(inbox.iter().all(|n| n.kind == NotificationKind::OrderUpdate));
    assert!(inbox.iter().any(|n| n.message.contains(&tracking)));

    Ok(())
}

#[test]
fn cancelling_returns_stock_once() -> anyhow::Result<()> {
    let config = MarketConfig {
        enforce_order_transitions: false,
        ..MarketConfig::default()
    };
    let (_dir, service) = service_with("cancel_restock.db", config)?;
    let wheat = wheat(&service)?;
    let order = service.place_order(&order_for("buyer_1", &wheat.id, 30))?;
    assert_eq!(service.aggregated_product(&wheat.id)?.total_quantity, 70);

    service.cancel_order(&order.id, "buyer_1")?;
    assert_eq!(service.aggregated_product(&wheat.id)?.total_quantity, 100);

    // permissive mode lets the admin cancel again, the stock does not come back twice
    service.cancel_order(&order.id, "admin_1")?;
    assert_eq!(service.aggregated_product(&wheat.id)?.total_quantity, 100);
    assert_eq!(
        service.orders_with_status(OrderStatus::Cancelled)?.len(),
        1
    );

    Ok(())
}

#[test]
fn reopened_order_takes_its_stock_again() -> anyhow::Result<()> {
    let config = MarketConfig {
        enforce_order_transitions: false,
        ..MarketConfig::default()
    };
    let (_dir, service) = service_with("reopen_restock.db", config)?;
    let wheat = wheat(&service)?;
    let order = service.place_order(&order_for("buyer_1", &wheat.id, 30))?;

    let cancelled = service.cancel_order(&order.id, "buyer_1")?;
    assert!(cancelled.restocked);
    assert_eq!(service.aggregated_product(&wheat.id)?.total_quantity, 100);

    let reopened = service.advance_order_status(&order.id, OrderStatus::Pending, "admin_1")?;
    assert!(!reopened.restocked);
    assert_eq!(service.aggregated_product(&wheat.id)?.total_quantity, 70);

    service.cancel_order(&order.id, "admin_1")?;
    assert_eq!(service.aggregated_product(&wheat.id)?.total_quantity, 100);

    // the pool never grows past what was registered
    let err = service
        .place_order(&order_for("buyer_2", &wheat.id, 130))
        .unwrap_err();
    assert!(matches!(
        err,
        MarketError::Rule(RuleError::ExceedsAvailableQuantity {
            requested: 130,
            available: 100
        })
    ));

    // once the stock is sold elsewhere the order cannot come back
    service.place_order(&order_for("buyer_2", &wheat.id, 90))?;
    let err = service
        .advance_order_status(&order.id, OrderStatus::Confirmed, "admin_1")
        .unwrap_err();
    assert!(matches!(
        err,
        MarketError::Rule(RuleError::ExceedsAvailableQuantity {
            requested: 30,
            available: 10
        })
    ));
    assert_eq!(service.order(&order.id)?.status, OrderStatus::Cancelled);
    assert_eq!(service.aggregated_product(&wheat.id)?.total_quantity, 10);

    Ok(())
}

#[test]
fn cancelled_order_is_never_paid_out() -> anyhow::Result<()> {
    let (_dir, service) = service("cancelled_payout.db")?;
    let wheat = wheat(&service)?;
    let first = service.place_order(&order_for("buyer_1", &wheat.id, 10))?;
    let second = service.place_order(&order_for("buyer_2", &wheat.id, 20))?;

    let mut payments = Vec::new();
    for order in [&first, &second] {
        service.advance_order_status(&order.id, OrderStatus::Confirmed, "admin_1")?;
        payments.push(service.create_order_payment(&order.id, "farmer_1")?.id);
    }
    service.cancel_order(&first.id, "buyer_1")?;
    service.cancel_order(&second.id, "buyer_2")?;
    assert_eq!(service.aggregated_product(&wheat.id)?.total_quantity, 100);

    let err = service.process_payment(&payments[0], "admin_1").unwrap_err();
    assert!(matches!(
        err,
        MarketError::Rule(RuleError::OrderNotPayable { ref id, .. }) if *id == first.id
    ));
    assert_eq!(service.payment(&payments[0])?.status, PaymentStatus::Pending);

    let report = service.process_payments_bulk(&payments, "admin_1")?;
    assert!(report.applied.is_empty());
    assert_eq!(report.skipped.len(), 2);
    assert!(report.skipped.iter().all(|s| s.reason.contains("cancelled")));
    assert_eq!(service.pending_payments()?.len(), 2);
    assert!(service.notifications_for("farmer_1")?.is_empty());

    Ok(())
}

#[test]
fn buyer_orders_come_back_newest_first() -> anyhow::Result<()> {
    let (_dir, service) = service("newest_first.db")?;
    let wheat = wheat(&service)?;

    let mut placed = Vec::new();
    for quantity in [3, 4, 5] {
        placed.push(service.place_order(&order_for("buyer_1", &wheat.id, quantity))?.id);
    }
    service.place_order(&order_for("buyer_2", &wheat.id, 1))?;

    let orders = service.orders_for_buyer("buyer_1")?;
    let ids: Vec<String> = orders.iter().map(|order| order.id.clone()).collect();
    placed.reverse();
    assert_eq!(ids, placed);
    assert!(orders.windows(2).all(|pair| pair[0].created_at >= pair[1].created_at));

    Ok(())
}

#[test]
fn permissive_mode_allows_any_jump() -> anyhow::Result<()> {
    let config = MarketConfig {
        enforce_order_transitions: false,
        notify_on_order_status: false,
        ..MarketConfig::default()
    };
    let (_dir, service) = service_with("permissive.db", config)?;
    let wheat = wheat(&service)?;
    let order = service.place_order(&order_for("buyer_1", &wheat.id, 1))?;

    let delivered = service.advance_order_status(&order.id, OrderStatus::Delivered, "admin_1")?;
    assert_eq!(delivered.status, OrderStatus::Delivered);

    let back = service.advance_order_status(&order.id, OrderStatus::Pending, "admin_1")?;
    assert_eq!(back.status, OrderStatus::Pending);
    assert!(service.notifications_for("buyer_1")?.is_empty());

    Ok(())
}

#[test]
fn bulk_order_update_reports_illegal_moves() -> anyhow::Result<()> {
    let (_dir, service) = service("bulk_orders.db")?;
    let wheat = wheat(&service)?;

    let first = service.place_order(&order_for("buyer_1", &wheat.id, 5))?;
    let second = service.place_order(&order_for("buyer_2", &wheat.id, 5))?;
    service.cancel_order(&second.id, "buyer_2")?;

    let ids = vec![first.id.clone(), second.id.clone()];
    let report = service.advance_orders_bulk(&ids, OrderStatus::Confirmed, "admin_1")?;

    assert_eq!(report.applied, vec![first.id.clone()]);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].id, second.id);
    assert_eq!(service.order(&first.id)?.status, OrderStatus::Confirmed);
    assert_eq!(service.order(&second.id)?.status, OrderStatus::Cancelled);

    Ok(())
}

#[test]
fn placement_notice_is_opt_in() -> anyhow::Result<()> {
    let config = MarketConfig {
        notify_on_order_placed: true,
        ..MarketConfig::default()
    };
    let (_dir, service) = service_with("placement_notice.db", config)?;
    let wheat = wheat(&service)?;
    let order = service.place_order(&order_for("buyer_1", &wheat.id, 2))?;

    let inbox = service.notifications_for("buyer_1")?;
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].order_id.as_deref(), Some(order.id.as_str()));

    Ok(())
}

#[test]
fn admin_can_reprice_and_restock() -> anyhow::Result<()> {
    let (_dir, service) = service("adjust_inventory.db")?;
    let wheat = wheat(&service)?;

    let adjusted = service.adjust_aggregated_product(&wheat.id, Some(26_000), Some(500))?;
    assert_eq!(adjusted.standard_price, 26_000);
    assert_eq!(adjusted.total_quantity, 500);
    assert_eq!(adjusted.regions, wheat.regions);

    assert!(service
        .adjust_aggregated_product(&wheat.id, Some(0), None)
        .is_err());
    assert_eq!(service.aggregated_products()?.len(), 1);

    let order = service.place_order(&order_for("buyer_1", &wheat.id, 2))?;
    assert_eq!(order.total_amount, 52_000);

    Ok(())
}
