//! Persistence layer: one sled tree per ledger, CBOR values keyed by record id.
use super::error::MarketError;
use sled::transaction::{ConflictableTransactionError, TransactionalTree};
use sled::{Db, Tree};
use std::sync::Arc;

pub const AGGREGATED_TREE: &str = "aggregated_products";
pub const PRODUCTS_TREE: &str = "products";
pub const ORDERS_TREE: &str = "orders";
pub const PAYMENTS_TREE: &str = "payments";
pub const NOTIFICATIONS_TREE: &str = "notifications";
pub const OUTBOX_TREE: &str = "notification_outbox";
/// order id -> payment id, at most one settlement per order
pub const SETTLEMENTS_TREE: &str = "order_payments";

/// A value stored under its own id in one of the ledger trees.
pub trait Record: minicbor::Encode<()> + for<'b> minicbor::Decode<'b, ()> + Sized {
    /// Used in not-found and codec errors.
    const KIND: &'static str;

    fn id(&self) -> &str;
}

pub(crate) type TxResult<T> = Result<T, ConflictableTransactionError<MarketError>>;

pub(crate) fn encode<R: Record>(record: &R) -> Result<Vec<u8>, MarketError> {
    minicbor::to_vec(record).map_err(|e| MarketError::Codec {
        kind: R::KIND,
        reason: e.to_string(),
    })
}

pub(crate) fn decode<R: Record>(bytes: &[u8]) -> Result<R, MarketError> {
    minicbor::decode(bytes).map_err(|e| MarketError::Codec {
        kind: R::KIND,
        reason: e.to_string(),
    })
}

pub(crate) fn abort<E: Into<MarketError>>(err: E) -> ConflictableTransactionError<MarketError> {
    ConflictableTransactionError::Abort(err.into())
}

pub(crate) fn tx_load<R: Record>(tree: &TransactionalTree, id: &str) -> TxResult<Option<R>> {
    match tree.get(id.as_bytes())? {
        Some(bytes) => decode(&bytes).map(Some).map_err(abort),
        None => Ok(None),
    }
}

pub(crate) fn tx_fetch<R: Record>(tree: &TransactionalTree, id: &str) -> TxResult<R> {
    tx_load(tree, id)?.ok_or_else(|| abort(MarketError::not_found(R::KIND, id)))
}

pub(crate) fn tx_save<R: Record>(tree: &TransactionalTree, record: &R) -> TxResult<()> {
    let bytes = encode(record).map_err(abort)?;
    tree.insert(record.id().as_bytes(), bytes)?;
    Ok(())
}

#[derive(Clone)]
pub struct Store {
    instance: Arc<Db>,
    pub(crate) aggregated: Tree,
    pub(crate) products: Tree,
    pub(crate) orders: Tree,
    pub(crate) payments: Tree,
    pub(crate) notifications: Tree,
    pub(crate) outbox: Tree,
    pub(crate) settlements: Tree,
}

impl Store {
    pub fn open(instance: Arc<Db>) -> Result<Self, MarketError> {
        Ok(Self {
            aggregated: instance.open_tree(AGGREGATED_TREE)?,
            products: instance.open_tree(PRODUCTS_TREE)?,
            orders: instance.open_tree(ORDERS_TREE)?,
            payments: instance.open_tree(PAYMENTS_TREE)?,
            notifications: instance.open_tree(NOTIFICATIONS_TREE)?,
            outbox: instance.open_tree(OUTBOX_TREE)?,
            settlements: instance.open_tree(SETTLEMENTS_TREE)?,
            instance,
        })
    }

    pub fn load<R: Record>(&self, tree: &Tree, id: &str) -> Result<Option<R>, MarketError> {
        match tree.get(id.as_bytes())? {
            Some(bytes) => decode(&bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Like [`Store::load`] but a missing record is an error.
    pub fn fetch<R: Record>(&self, tree: &Tree, id: &str) -> Result<R, MarketError> {
        self.load(tree, id)?
            .ok_or_else(|| MarketError::not_found(R::KIND, id))
    }

    pub fn save<R: Record>(&self, tree: &Tree, record: &R) -> Result<(), MarketError> {
        tree.insert(record.id().as_bytes(), encode(record)?)?;
        Ok(())
    }

    /// Decode every record in a tree. Ledgers are small enough to filter in memory.
    pub fn scan<R: Record>(&self, tree: &Tree) -> Result<Vec<R>, MarketError> {
        tree.iter()
            .values()
            .map(|value| decode(&value?))
            .collect()
    }

    pub fn flush(&self) -> Result<usize, MarketError> {
        Ok(self.instance.flush()?)
    }
}
