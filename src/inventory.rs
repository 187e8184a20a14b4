//! Pooled produce and the stock interface that orders draw from
use super::error::{RuleError, ValidationError};
use super::store::Record;
use super::types::{Category, QualityGrade, TimeStamp, required};
use chrono::Utc;
use std::collections::BTreeSet;

/// Anything an order can be placed against.
pub trait Stock {
    fn available(&self) -> u64;
    fn set_available(&mut self, quantity: u64);
    fn unit_price(&self) -> u64;
    fn display_name(&self) -> &str;

    fn ensure_orderable(&self) -> Result<(), RuleError> {
        Ok(())
    }

    /// Take `quantity` out of stock, refusing to go below zero.
    fn reserve(&mut self, quantity: u64) -> Result<(), RuleError> {
        self.ensure_orderable()?;
        let available = self.available();
        if quantity > available {
            return Err(RuleError::ExceedsAvailableQuantity {
                requested: quantity,
                available,
            });
        }
        self.set_available(available - quantity);
        Ok(())
    }

    fn restock(&mut self, quantity: u64) {
        let restored = self.available().saturating_add(quantity);
        self.set_available(restored);
    }
}

/// Produce pooled from several farmers and sold at one standard price.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct AggregatedProduct {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub product_name: String,
    #[n(2)]
    pub category: Category,
    #[n(3)]
    pub total_quantity: u64,
    #[n(4)]
    pub standard_price: u64, // per quantity_unit
    #[n(5)]
    pub quality_grade: QualityGrade,
    #[n(6)]
    pub farmer_count: u32,
    #[n(7)]
    pub regions: BTreeSet<String>,
    #[n(8)]
    pub admin_certified: bool,
    #[n(9)]
    pub quantity_unit: String,
    #[n(10)]
    pub updated_at: TimeStamp<Utc>,
}

impl Record for AggregatedProduct {
    const KIND: &'static str = "aggregated product";

    fn id(&self) -> &str {
        &self.id
    }
}

impl Stock for AggregatedProduct {
    fn available(&self) -> u64 {
        self.total_quantity
    }
    fn set_available(&mut self, quantity: u64) {
        self.total_quantity = quantity;
        self.updated_at = TimeStamp::new();
    }
    fn unit_price(&self) -> u64 {
        self.standard_price
    }
    fn display_name(&self) -> &str {
        &self.product_name
    }
}

// Draft used by aggregation tooling to register a pooled product
#[derive(Debug, Default, Clone)]
pub struct AggregatedProductDraft {
    product_name: Option<String>,
    category: Option<Category>,
    total_quantity: u64,
    standard_price: u64,
    quality_grade: Option<QualityGrade>,
    farmer_count: u32,
    regions: BTreeSet<String>,
    admin_certified: bool,
    quantity_unit: Option<String>,
}

impl AggregatedProductDraft {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_product_name(mut self, name: &str) -> Self {
        self.product_name = Some(name.to_string());
        self
    }
    pub fn set_category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }
    pub fn set_total_quantity(mut self, quantity: u64) -> Self {
        self.total_quantity = quantity;
        self
    }
    pub fn set_standard_price(mut self, price: u64) -> Self {
        self.standard_price = price;
        self
    }
    pub fn set_quality_grade(mut self, grade: QualityGrade) -> Self {
        self.quality_grade = Some(grade);
        self
    }
    pub fn set_farmer_count(mut self, count: u32) -> Self {
        self.farmer_count = count;
        self
    }
    pub fn add_region(mut self, region: &str) -> Self {
        let region = region.trim();
        if !region.is_empty() {
            self.regions.insert(region.to_string());
        }
        self
    }
    pub fn set_admin_certified(mut self, certified: bool) -> Self {
        self.admin_certified = certified;
        self
    }
    pub fn set_quantity_unit(mut self, unit: &str) -> Self {
        self.quantity_unit = Some(unit.to_string());
        self
    }

    /// Checks the draft and turns it into a record under `id`.
    pub fn validate_and_finalise(self, id: String) -> Result<AggregatedProduct, ValidationError> {
        let product_name = required(&self.product_name, "product_name")?;
        let category = self
            .category
            .ok_or(ValidationError::MissingField("category"))?;
        let quality_grade = self
            .quality_grade
            .ok_or(ValidationError::MissingField("quality_grade"))?;
        if self.standard_price == 0 {
            return Err(ValidationError::ZeroAmount);
        }
        let quantity_unit = self.quantity_unit.unwrap_or_else(|| "kg".to_string());

        Ok(AggregatedProduct {
            id,
            product_name,
            category,
            total_quantity: self.total_quantity,
            standard_price: self.standard_price,
            quality_grade,
            farmer_count: self.farmer_count,
            regions: self.regions,
            admin_certified: self.admin_certified,
            quantity_unit,
            updated_at: TimeStamp::new(),
        })
    }
}
