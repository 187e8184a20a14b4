//! Farmer-submitted produce and its moderation lifecycle
use super::error::{RuleError, ValidationError};
use super::inventory::Stock;
use super::store::Record;
use super::types::{Category, QualityGrade, TimeStamp, required};
use chrono::Utc;
use std::fmt;

pub const DEFAULT_APPROVAL_NOTE: &str = "Product approved by admin";

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProductStatus {
    #[n(0)]
    PendingReview,
    #[n(1)]
    AdminReview,
    #[n(2)]
    Approved,
    #[n(3)]
    Rejected,
    #[n(4)]
    ScheduledCollection,
    #[n(5)]
    Collected,
    #[n(6)]
    PaymentProcessed,
}

impl ProductStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ProductStatus::PendingReview => "pending_review",
            ProductStatus::AdminReview => "admin_review",
            ProductStatus::Approved => "approved",
            ProductStatus::Rejected => "rejected",
            ProductStatus::ScheduledCollection => "scheduled_collection",
            ProductStatus::Collected => "collected",
            ProductStatus::PaymentProcessed => "payment_processed",
        }
    }

    /// Products still waiting on an approve/reject decision.
    pub fn is_reviewable(self) -> bool {
        matches!(self, ProductStatus::PendingReview | ProductStatus::AdminReview)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ProductStatus::Rejected | ProductStatus::PaymentProcessed)
    }

    pub fn can_transition_to(self, next: ProductStatus) -> bool {
        use ProductStatus::*;

        match (self, next) {
            (PendingReview, AdminReview) => true,
            (from, Approved | Rejected) => from.is_reviewable(),
            (Approved, ScheduledCollection) => true,
            (ScheduledCollection, Collected) => true,
            (Collected, PaymentProcessed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ProductStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Product {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub farmer_id: String,
    #[n(2)]
    pub name: String,
    #[n(3)]
    pub category: Category,
    #[n(4)]
    pub quantity_available: u64,
    #[n(5)]
    pub price_per_unit: u64,
    #[n(6)]
    pub quality_grade: QualityGrade,
    #[n(7)]
    pub quantity_unit: String,
    #[n(8)]
    pub status: ProductStatus,
    #[n(9)]
    pub admin_notes: Option<String>,
    #[n(10)]
    pub reviewed_by: Option<String>, // admin who made the last transition
    #[n(11)]
    pub created_at: TimeStamp<Utc>,
    #[n(12)]
    pub updated_at: TimeStamp<Utc>,
}

impl Record for Product {
    const KIND: &'static str = "product";

    fn id(&self) -> &str {
        &self.id
    }
}

impl Product {
    /// Move to `next`, recording who did it and any note for the farmer.
    pub fn transition(
        &mut self,
        next: ProductStatus,
        admin_id: &str,
        note: Option<String>,
    ) -> Result<(), RuleError> {
        if !self.status.can_transition_to(next) {
            return Err(RuleError::IllegalProductTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        self.reviewed_by = Some(admin_id.to_string());
        if note.is_some() {
            self.admin_notes = note;
        }
        self.updated_at = TimeStamp::new();
        Ok(())
    }
}

impl Stock for Product {
    fn available(&self) -> u64 {
        self.quantity_available
    }
    fn set_available(&mut self, quantity: u64) {
        self.quantity_available = quantity;
        self.updated_at = TimeStamp::new();
    }
    fn unit_price(&self) -> u64 {
        self.price_per_unit
    }
    fn display_name(&self) -> &str {
        &self.name
    }
    fn ensure_orderable(&self) -> Result<(), RuleError> {
        match self.status {
            ProductStatus::Approved => Ok(()),
            other => Err(RuleError::ProductNotOrderable(other.to_string())),
        }
    }
}

/// Rejections must tell the farmer why.
pub fn rejection_note(note: &str) -> Result<String, ValidationError> {
    let note = note.trim();
    if note.is_empty() {
        return Err(ValidationError::EmptyRejectionNote);
    }
    Ok(note.to_string())
}

/// Approvals fall back to a stock message when the admin leaves none.
pub fn approval_note(note: Option<&str>) -> String {
    match note.map(str::trim) {
        Some(n) if !n.is_empty() => n.to_string(),
        _ => DEFAULT_APPROVAL_NOTE.to_string(),
    }
}

// used by farmers to submit produce for review
#[derive(Debug, Default, Clone)]
pub struct ProductDraft {
    farmer_id: Option<String>,
    name: Option<String>,
    category: Option<Category>,
    quantity_available: u64,
    price_per_unit: u64,
    quality_grade: Option<QualityGrade>,
    quantity_unit: Option<String>,
}

impl ProductDraft {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_farmer(mut self, farmer_id: &str) -> Self {
        self.farmer_id = Some(farmer_id.to_string());
        self
    }
    pub fn set_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }
    pub fn set_category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }
    pub fn set_quantity(mut self, quantity: u64) -> Self {
        self.quantity_available = quantity;
        self
    }
    pub fn set_price_per_unit(mut self, price: u64) -> Self {
        self.price_per_unit = price;
        self
    }
    pub fn set_quality_grade(mut self, grade: QualityGrade) -> Self {
        self.quality_grade = Some(grade);
        self
    }
    pub fn set_quantity_unit(mut self, unit: &str) -> Self {
        self.quantity_unit = Some(unit.to_string());
        self
    }

    pub fn validate_and_finalise(self, id: String) -> Result<Product, ValidationError> {
        let farmer_id = required(&self.farmer_id, "farmer_id")?;
        let name = required(&self.name, "name")?;
        let category = self
            .category
            .ok_or(ValidationError::MissingField("category"))?;
        let quality_grade = self
            .quality_grade
            .ok_or(ValidationError::MissingField("quality_grade"))?;
        if self.quantity_available == 0 {
            return Err(ValidationError::NonPositiveQuantity);
        }
        if self.price_per_unit == 0 {
            return Err(ValidationError::ZeroAmount);
        }
        let now = TimeStamp::new();

        Ok(Product {
            id,
            farmer_id,
            name,
            category,
            quantity_available: self.quantity_available,
            price_per_unit: self.price_per_unit,
            quality_grade,
            quantity_unit: self.quantity_unit.unwrap_or_else(|| "kg".to_string()),
            status: ProductStatus::PendingReview,
            admin_notes: None,
            reviewed_by: None,
            created_at: now.clone(),
            updated_at: now,
        })
    }
}
