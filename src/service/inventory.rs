use super::MarketService;
use crate::error::{MarketError, ValidationError};
use crate::inventory::{AggregatedProduct, AggregatedProductDraft, Stock};
use crate::store::{TxResult, tx_fetch, tx_save};
use crate::types::TimeStamp;

impl MarketService {
    pub fn register_aggregated_product(
        &self,
        draft: AggregatedProductDraft,
    ) -> Result<AggregatedProduct, MarketError> {
        let product = draft.validate_and_finalise(Self::new_id("agg_")?)?;
        self.store.save(&self.store.aggregated, &product)?;

        log::info!(
            "aggregated product {} registered: {} {} of {} at {}",
            product.id,
            product.total_quantity,
            product.quantity_unit,
            product.product_name,
            product.standard_price
        );
        Ok(product)
    }

    /// Admin correction of price and/or stock level. `None` leaves a field as is.
    pub fn adjust_aggregated_product(
        &self,
        product_id: &str,
        standard_price: Option<u64>,
        total_quantity: Option<u64>,
    ) -> Result<AggregatedProduct, MarketError> {
        if standard_price == Some(0) {
            return Err(ValidationError::ZeroAmount.into());
        }

        let product = self
            .store
            .aggregated
            .transaction(|aggregated| -> TxResult<AggregatedProduct> {
                let mut product: AggregatedProduct = tx_fetch(aggregated, product_id)?;
                if let Some(price) = standard_price {
                    product.standard_price = price;
                    product.updated_at = TimeStamp::new();
                }
                if let Some(quantity) = total_quantity {
                    product.set_available(quantity);
                }
                tx_save(aggregated, &product)?;
                Ok(product)
            })?;

        log::info!(
            "aggregated product {} adjusted: price {}, quantity {}",
            product.id,
            product.standard_price,
            product.total_quantity
        );
        Ok(product)
    }

    pub fn aggregated_product(&self, product_id: &str) -> Result<AggregatedProduct, MarketError> {
        self.store.fetch(&self.store.aggregated, product_id)
    }

    pub fn aggregated_products(&self) -> Result<Vec<AggregatedProduct>, MarketError> {
        self.store.scan(&self.store.aggregated)
    }
}
