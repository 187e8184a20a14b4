//! Marketplace core: farmers list produce, admins moderate it, buyers order
//! from pooled or direct stock, and farmers are settled for what was sold.

pub mod config;
pub mod error;
pub mod inventory;
pub mod notification;
pub mod order;
pub mod payment;
pub mod product;
pub mod service;
pub mod store;
pub mod types;
pub mod utils;

pub use error::MarketError;
pub use service::MarketService;
