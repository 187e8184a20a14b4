use super::{BulkReport, MarketService, distinct_ids};
use crate::error::MarketError;
use crate::notification::{NotificationKind, NotificationRequest, enqueue};
use crate::product::{Product, ProductDraft, ProductStatus, approval_note, rejection_note};
use crate::store::{TxResult, abort, tx_fetch, tx_load, tx_save};
use sled::Transactional;

impl MarketService {
    /// A farmer lists produce. It waits in `pending_review` until an admin acts.
    pub fn submit_product(&self, draft: ProductDraft) -> Result<Product, MarketError> {
        let product = draft.validate_and_finalise(Self::new_id("prod_")?)?;
        self.store.save(&self.store.products, &product)?;

        log::info!(
            "product {} submitted by farmer {}: {} {} of {}",
            product.id,
            product.farmer_id,
            product.quantity_available,
            product.quantity_unit,
            product.name
        );
        Ok(product)
    }

    pub fn begin_review(&self, product_id: &str, admin_id: &str) -> Result<Product, MarketError> {
        self.move_product(product_id, ProductStatus::AdminReview, admin_id, None)
    }

    /// Approve a listing. Without a note the farmer gets the stock approval text.
    pub fn approve_product(
        &self,
        product_id: &str,
        admin_id: &str,
        note: Option<&str>,
    ) -> Result<Product, MarketError> {
        let note = approval_note(note);
        self.move_product(product_id, ProductStatus::Approved, admin_id, Some(note))
    }

    /// Reject a listing. The note is checked before anything is read.
    pub fn reject_product(
        &self,
        product_id: &str,
        admin_id: &str,
        note: &str,
    ) -> Result<Product, MarketError> {
        let note = rejection_note(note)?;
        self.move_product(product_id, ProductStatus::Rejected, admin_id, Some(note))
    }

    pub fn approve_products_bulk(
        &self,
        product_ids: &[String],
        admin_id: &str,
        note: Option<&str>,
    ) -> Result<BulkReport, MarketError> {
        let note = approval_note(note);
        self.review_bulk(product_ids, ProductStatus::Approved, admin_id, note)
    }

    pub fn reject_products_bulk(
        &self,
        product_ids: &[String],
        admin_id: &str,
        note: &str,
    ) -> Result<BulkReport, MarketError> {
        let note = rejection_note(note)?;
        self.review_bulk(product_ids, ProductStatus::Rejected, admin_id, note)
    }

    pub fn schedule_collection(
        &self,
        product_id: &str,
        admin_id: &str,
        note: Option<&str>,
    ) -> Result<Product, MarketError> {
        let note = note.map(str::trim).filter(|n| !n.is_empty()).map(str::to_string);
        self.move_product(product_id, ProductStatus::ScheduledCollection, admin_id, note)
    }

    pub fn mark_collected(&self, product_id: &str, admin_id: &str) -> Result<Product, MarketError> {
        self.move_product(product_id, ProductStatus::Collected, admin_id, None)
    }

    pub fn mark_product_paid(
        &self,
        product_id: &str,
        admin_id: &str,
    ) -> Result<Product, MarketError> {
        self.move_product(product_id, ProductStatus::PaymentProcessed, admin_id, None)
    }

    pub fn product(&self, product_id: &str) -> Result<Product, MarketError> {
        self.store.fetch(&self.store.products, product_id)
    }

    /// A farmer's listings, newest first.
    pub fn products_for_farmer(&self, farmer_id: &str) -> Result<Vec<Product>, MarketError> {
        let mut products: Vec<Product> = self
            .store
            .scan::<Product>(&self.store.products)?
            .into_iter()
            .filter(|product| product.farmer_id == farmer_id)
            .collect();
        products.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(products)
    }

    pub fn products_with_status(&self, status: ProductStatus) -> Result<Vec<Product>, MarketError> {
        Ok(self
            .store
            .scan::<Product>(&self.store.products)?
            .into_iter()
            .filter(|product| product.status == status)
            .collect())
    }

    fn move_product(
        &self,
        product_id: &str,
        next: ProductStatus,
        admin_id: &str,
        note: Option<String>,
    ) -> Result<Product, MarketError> {
        let product = (&self.store.products, &self.store.outbox).transaction(
            |(products, outbox)| -> TxResult<Product> {
                let mut product: Product = tx_fetch(products, product_id)?;
                product
                    .transition(next, admin_id, note.clone())
                    .map_err(abort)?;
                tx_save(products, &product)?;
                enqueue(outbox, status_notification(&product))?;
                Ok(product)
            },
        )?;

        log::info!("product {} -> {} by {}", product.id, product.status, admin_id);
        self.deliver_notifications();
        Ok(product)
    }

    // Only products still under review take part; everything else is reported.
    fn review_bulk(
        &self,
        product_ids: &[String],
        next: ProductStatus,
        admin_id: &str,
        note: String,
    ) -> Result<BulkReport, MarketError> {
        let ids = distinct_ids(product_ids)?;

        let report = (&self.store.products, &self.store.outbox).transaction(
            |(products, outbox)| -> TxResult<BulkReport> {
                let mut report = BulkReport::default();
                for id in &ids {
                    let Some(mut product) = tx_load::<Product>(products, id)? else {
                        report.skip(id, "product not found");
                        continue;
                    };
                    if !product.status.is_reviewable() {
                        report.skip(id, format!("product is {}", product.status));
                        continue;
                    }
                    product
                        .transition(next, admin_id, Some(note.clone()))
                        .map_err(abort)?;
                    tx_save(products, &product)?;
                    enqueue(outbox, status_notification(&product))?;
                    report.applied.push(id.clone());
                }
                Ok(report)
            },
        )?;

        log::info!(
            "bulk review to {} by {}: {} applied, {} skipped",
            next,
            admin_id,
            report.applied.len(),
            report.skipped.len()
        );
        report.log_skipped();
        if !report.applied.is_empty() {
            self.deliver_notifications();
        }
        Ok(report)
    }
}

fn status_notification(product: &Product) -> NotificationRequest {
    let name = &product.name;
    let (kind, title, message) = match product.status {
        ProductStatus::AdminReview => (
            NotificationKind::ProductStatus,
            "Product Under Review",
            format!("Your product {name} is being reviewed by an admin"),
        ),
        ProductStatus::Approved => (
            NotificationKind::AdminMessage,
            "Product Approved",
            format!(
                "Your product {name} has been approved. {}",
                product.admin_notes.as_deref().unwrap_or_default()
            ),
        ),
        ProductStatus::Rejected => (
            NotificationKind::AdminMessage,
            "Product Rejected",
            format!(
                "Your product {name} has been rejected. Reason: {}",
                product.admin_notes.as_deref().unwrap_or_default()
            ),
        ),
        ProductStatus::ScheduledCollection => (
            NotificationKind::Collection,
            "Collection Scheduled",
            format!("Collection of your product {name} has been scheduled"),
        ),
        ProductStatus::Collected => (
            NotificationKind::Collection,
            "Produce Collected",
            format!("Your product {name} has been collected"),
        ),
        ProductStatus::PaymentProcessed => (
            NotificationKind::ProductStatus,
            "Product Payment Processed",
            format!("Payment for your product {name} has been processed"),
        ),
        ProductStatus::PendingReview => (
            NotificationKind::ProductStatus,
            "Product Submitted",
            format!("Your product {name} is awaiting review"),
        ),
    };
    NotificationRequest::new(&product.farmer_id, kind, title, message)
        .for_product(&product.id)
}
