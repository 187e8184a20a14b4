use sled::transaction::TransactionError;

/// Input that was rejected before anything was read or written.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Quantity '{0}' is not a whole number")]
    NonNumericQuantity(String),
    #[error("Quantity must be greater than zero")]
    NonPositiveQuantity,
    #[error("Required field '{0}' is missing or blank")]
    MissingField(&'static str),
    #[error("A rejection must include a note for the farmer")]
    EmptyRejectionNote,
    #[error("Farmer payout {payout} exceeds payment amount {amount}")]
    PayoutExceedsAmount { payout: u64, amount: u64 },
    #[error("Amount must be greater than zero")]
    ZeroAmount,
    #[error("Order total overflows: {quantity} x {unit_price}")]
    AmountOverflow { quantity: u64, unit_price: u64 },
    #[error("Platform fee of {0} basis points is above 100%")]
    InvalidFeeRate(u32),
    #[error("No ids were given")]
    EmptyBatch,
}

/// Well-formed requests that the current state of the ledgers refuses.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum RuleError {
    #[error("Requested quantity {requested} exceeds available quantity {available}")]
    ExceedsAvailableQuantity { requested: u64, available: u64 },
    #[error("Product is {0} and cannot be ordered")]
    ProductNotOrderable(String),
    #[error("Payment {id} is {status}, only pending payments can be processed")]
    PaymentNotPending { id: String, status: String },
    #[error("Payment {id} is {status}, only paid payments can be completed")]
    PaymentNotPaid { id: String, status: String },
    #[error("Order {id} is {status} and cannot be settled")]
    OrderNotPayable { id: String, status: String },
    #[error("Order {0} already has a payment")]
    OrderAlreadySettled(String),
    #[error("Order cannot move from {from} to {to}")]
    IllegalOrderTransition { from: String, to: String },
    #[error("Product cannot move from {from} to {to}")]
    IllegalProductTransition { from: String, to: String },
    #[error("Notification belongs to another user")]
    NotRecipient,
}

#[derive(thiserror::Error, Debug)]
pub enum MarketError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Rule(#[from] RuleError),
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },
    #[error("Storage unavailable: {0}")]
    Storage(#[from] sled::Error),
    #[error("Stored {kind} record could not be decoded: {reason}")]
    Codec { kind: &'static str, reason: String },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// What a caller should tell the user about a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The request itself was wrong; fix the input.
    BadInput,
    /// The request was understood but the current state forbids it.
    Rejected,
    /// The system could not complete the request.
    Unavailable,
}

impl MarketError {
    pub fn not_found(kind: &'static str, id: &str) -> Self {
        MarketError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            MarketError::Validation(_) => FailureKind::BadInput,
            MarketError::Rule(_) | MarketError::NotFound { .. } => FailureKind::Rejected,
            MarketError::Storage(_) | MarketError::Codec { .. } | MarketError::Internal(_) => {
                FailureKind::Unavailable
            }
        }
    }

    /// Only transient I/O failures are worth retrying. Constraint and codec
    /// failures will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MarketError::Storage(sled::Error::Io(_)))
    }
}

impl From<TransactionError<MarketError>> for MarketError {
    fn from(value: TransactionError<MarketError>) -> Self {
        match value {
            TransactionError::Abort(err) => err,
            TransactionError::Storage(err) => MarketError::Storage(err),
        }
    }
}
