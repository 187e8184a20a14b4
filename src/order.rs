//! Buyer orders against farmer or pooled produce
use super::error::{RuleError, ValidationError};
use super::inventory::Stock;
use super::store::Record;
use super::types::{TimeStamp, required};
use super::utils;
use chrono::Utc;
use std::fmt;

/// What an order draws its stock from.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub enum ProductRef {
    /// A single farmer's approved product.
    #[n(0)]
    Direct(#[n(0)] String),
    /// A pooled product assembled from many farmers.
    #[n(1)]
    Aggregated(#[n(0)] String),
}

impl ProductRef {
    pub fn id(&self) -> &str {
        match self {
            ProductRef::Direct(id) | ProductRef::Aggregated(id) => id,
        }
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Confirmed,
    #[n(2)]
    Processing,
    #[n(3)]
    Shipped,
    #[n(4)]
    Delivered,
    #[n(5)]
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 6] = [
        OrderStatus::Pending,
        OrderStatus::Confirmed,
        OrderStatus::Processing,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    /// Forward one step at a time; cancellation from anything still open.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;

        match (self, next) {
            (Pending, Confirmed)
            | (Confirmed, Processing)
            | (Processing, Shipped)
            | (Shipped, Delivered) => true,
            (from, Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Order {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub buyer_id: String,
    #[n(2)]
    pub product: ProductRef,
    #[n(3)]
    pub product_name: String, // snapshot, pooled stock changes composition over time
    #[n(4)]
    pub quantity_ordered: u64,
    #[n(5)]
    pub unit_price: u64,
    #[n(6)]
    pub total_amount: u64,
    #[n(7)]
    pub delivery_address: String,
    #[n(8)]
    pub phone: Option<String>,
    #[n(9)]
    pub special_instructions: Option<String>,
    #[n(10)]
    pub status: OrderStatus,
    #[n(11)]
    pub tracking_id: Option<String>,
    #[n(12)]
    pub created_at: TimeStamp<Utc>,
    #[n(13)]
    pub updated_at: TimeStamp<Utc>,
    /// Set while the ordered quantity sits back in its source stock.
    #[n(14)]
    pub restocked: bool,
}

impl Record for Order {
    const KIND: &'static str = "order";

    fn id(&self) -> &str {
        &self.id
    }
}

impl Order {
    /// Price a validated request against the stock it draws from.
    pub fn new(
        id: String,
        terms: &PlacementTerms,
        stock: &impl Stock,
    ) -> Result<Self, ValidationError> {
        let unit_price = stock.unit_price();
        let total_amount = terms.quantity.checked_mul(unit_price).ok_or(
            ValidationError::AmountOverflow {
                quantity: terms.quantity,
                unit_price,
            },
        )?;
        let now = TimeStamp::new();

        Ok(Self {
            id,
            buyer_id: terms.buyer_id.clone(),
            product: terms.product.clone(),
            product_name: stock.display_name().to_string(),
            quantity_ordered: terms.quantity,
            unit_price,
            total_amount,
            delivery_address: terms.delivery_address.clone(),
            phone: terms.phone.clone(),
            special_instructions: terms.special_instructions.clone(),
            status: OrderStatus::Pending,
            tracking_id: None,
            created_at: now.clone(),
            updated_at: now,
            restocked: false,
        })
    }

    /// Move the order to `next`. With `enforce` off any status may follow any
    /// other.
    pub fn apply_status(&mut self, next: OrderStatus, enforce: bool) -> Result<(), RuleError> {
        if enforce && !self.status.can_transition_to(next) {
            return Err(RuleError::IllegalOrderTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        if next == OrderStatus::Shipped && self.tracking_id.is_none() {
            self.tracking_id = Some(utils::new_tracking_id());
        }
        self.status = next;
        self.updated_at = TimeStamp::new();
        Ok(())
    }
}

/// Parse a quantity typed by a buyer.
pub fn parse_quantity(raw: &str) -> Result<u64, ValidationError> {
    let value: i64 = raw
        .trim()
        .parse()
        .map_err(|_| ValidationError::NonNumericQuantity(raw.to_string()))?;
    positive(value)
}

fn positive(value: i64) -> Result<u64, ValidationError> {
    if value <= 0 {
        return Err(ValidationError::NonPositiveQuantity);
    }
    Ok(value as u64)
}

#[derive(Debug, Clone)]
enum RawQuantity {
    Number(i64),
    Text(String),
}

// Built by the buyer's checkout; validated before anything is stored
#[derive(Debug, Default, Clone)]
pub struct OrderRequest {
    buyer_id: Option<String>,
    product: Option<ProductRef>,
    quantity: Option<RawQuantity>,
    delivery_address: Option<String>,
    phone: Option<String>,
    special_instructions: Option<String>,
}

/// A request that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacementTerms {
    pub buyer_id: String,
    pub product: ProductRef,
    pub quantity: u64,
    pub delivery_address: String,
    pub phone: Option<String>,
    pub special_instructions: Option<String>,
}

impl OrderRequest {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_buyer(mut self, buyer_id: &str) -> Self {
        self.buyer_id = Some(buyer_id.to_string());
        self
    }
    pub fn set_aggregated_product(mut self, id: &str) -> Self {
        self.product = Some(ProductRef::Aggregated(id.to_string()));
        self
    }
    pub fn set_direct_product(mut self, id: &str) -> Self {
        self.product = Some(ProductRef::Direct(id.to_string()));
        self
    }
    pub fn set_quantity(mut self, quantity: i64) -> Self {
        self.quantity = Some(RawQuantity::Number(quantity));
        self
    }
    /// Quantity exactly as the buyer typed it.
    pub fn set_quantity_text(mut self, quantity: &str) -> Self {
        self.quantity = Some(RawQuantity::Text(quantity.to_string()));
        self
    }
    pub fn set_delivery_address(mut self, address: &str) -> Self {
        self.delivery_address = Some(address.to_string());
        self
    }
    pub fn set_phone(mut self, phone: &str) -> Self {
        self.phone = Some(phone.to_string());
        self
    }
    pub fn set_special_instructions(mut self, instructions: &str) -> Self {
        self.special_instructions = Some(instructions.to_string());
        self
    }

    pub fn validate(&self) -> Result<PlacementTerms, ValidationError> {
        let buyer_id = required(&self.buyer_id, "buyer_id")?;
        let product = self
            .product
            .clone()
            .ok_or(ValidationError::MissingField("product"))?;
        if product.id().trim().is_empty() {
            return Err(ValidationError::MissingField("product"));
        }
        let quantity = match &self.quantity {
            Some(RawQuantity::Number(n)) => positive(*n)?,
            Some(RawQuantity::Text(raw)) => parse_quantity(raw)?,
            None => return Err(ValidationError::MissingField("quantity")),
        };
        let delivery_address = required(&self.delivery_address, "delivery_address")?;

        Ok(PlacementTerms {
            buyer_id,
            product,
            quantity,
            delivery_address,
            phone: optional(&self.phone),
            special_instructions: optional(&self.special_instructions),
        })
    }
}

fn optional(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
