//! Settlement obligations: buyer money in, platform fee kept, farmer paid out
use super::error::{MarketError, RuleError, ValidationError};
use super::order::{Order, OrderStatus};
use super::store::Record;
use super::types::TimeStamp;
use chrono::Utc;
use std::fmt;

pub const BASIS_POINTS_DIVISOR: u32 = 10_000;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PaymentStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    PaidToFarmer,
    #[n(2)]
    Completed,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::PaidToFarmer => "paid_to_farmer",
            PaymentStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Payment {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub order_id: Option<String>, // None for a collection payout
    #[n(2)]
    pub buyer_id: Option<String>,
    #[n(3)]
    pub farmer_id: String,
    #[n(4)]
    pub product_id: Option<String>,
    #[n(5)]
    pub amount: Option<u64>, // what the buyer paid
    #[n(6)]
    pub farmer_amount: u64,
    #[n(7)]
    pub platform_fee: Option<u64>,
    #[n(8)]
    pub status: PaymentStatus,
    #[n(9)]
    pub transaction_id: Option<String>,
    #[n(10)]
    pub processed_at: Option<TimeStamp<Utc>>,
    #[n(11)]
    pub processed_by: Option<String>,
    #[n(12)]
    pub created_at: TimeStamp<Utc>,
}

impl Record for Payment {
    const KIND: &'static str = "payment";

    fn id(&self) -> &str {
        &self.id
    }
}

/// Farmer payout after taking `fee_bps` basis points off `amount`.
pub fn farmer_share(amount: u64, fee_bps: u32) -> Result<u64, ValidationError> {
    if fee_bps > BASIS_POINTS_DIVISOR {
        return Err(ValidationError::InvalidFeeRate(fee_bps));
    }
    let fee = (amount as u128 * fee_bps as u128 / BASIS_POINTS_DIVISOR as u128) as u64;
    Ok(amount - fee)
}

impl Payment {
    /// Settlement for a buyer order. The platform keeps `amount - farmer_amount`.
    pub fn for_order(
        id: String,
        order: &Order,
        farmer_id: &str,
        farmer_amount: u64,
    ) -> Result<Self, MarketError> {
        let farmer_id = farmer_id.trim();
        if farmer_id.is_empty() {
            return Err(ValidationError::MissingField("farmer_id").into());
        }
        if matches!(order.status, OrderStatus::Pending | OrderStatus::Cancelled) {
            return Err(RuleError::OrderNotPayable {
                id: order.id.clone(),
                status: order.status.to_string(),
            }
            .into());
        }
        let amount = order.total_amount;
        if farmer_amount > amount {
            return Err(ValidationError::PayoutExceedsAmount {
                payout: farmer_amount,
                amount,
            }
            .into());
        }

        Ok(Self {
            id,
            order_id: Some(order.id.clone()),
            buyer_id: Some(order.buyer_id.clone()),
            farmer_id: farmer_id.to_string(),
            product_id: Some(order.product.id().to_string()),
            amount: Some(amount),
            farmer_amount,
            platform_fee: Some(amount - farmer_amount),
            status: PaymentStatus::Pending,
            transaction_id: None,
            processed_at: None,
            processed_by: None,
            created_at: TimeStamp::new(),
        })
    }

    /// Payout to a farmer for produce collected outside any buyer order.
    pub fn collection(
        id: String,
        farmer_id: &str,
        farmer_amount: u64,
        product_id: Option<&str>,
    ) -> Result<Self, ValidationError> {
        let farmer_id = farmer_id.trim();
        if farmer_id.is_empty() {
            return Err(ValidationError::MissingField("farmer_id"));
        }
        if farmer_amount == 0 {
            return Err(ValidationError::ZeroAmount);
        }

        Ok(Self {
            id,
            order_id: None,
            buyer_id: None,
            farmer_id: farmer_id.to_string(),
            product_id: product_id.map(str::to_string),
            amount: None,
            farmer_amount,
            platform_fee: None,
            status: PaymentStatus::Pending,
            transaction_id: None,
            processed_at: None,
            processed_by: None,
            created_at: TimeStamp::new(),
        })
    }

    pub fn is_collection(&self) -> bool {
        self.order_id.is_none()
    }

    /// Pay the farmer. A payment is only ever processed once.
    pub fn mark_processed(&mut self, transaction_id: String, admin_id: &str) -> Result<(), RuleError> {
        if self.status != PaymentStatus::Pending {
            return Err(RuleError::PaymentNotPending {
                id: self.id.clone(),
                status: self.status.to_string(),
            });
        }
        self.status = PaymentStatus::PaidToFarmer;
        self.transaction_id = Some(transaction_id);
        self.processed_at = Some(TimeStamp::new());
        self.processed_by = Some(admin_id.to_string());
        Ok(())
    }

    pub fn mark_completed(&mut self) -> Result<(), RuleError> {
        if self.status != PaymentStatus::PaidToFarmer {
            return Err(RuleError::PaymentNotPaid {
                id: self.id.clone(),
                status: self.status.to_string(),
            });
        }
        self.status = PaymentStatus::Completed;
        Ok(())
    }
}
