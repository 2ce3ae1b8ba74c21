use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A product proposed by catalog search, before validation.
///
/// Product selection is an external collaborator and its payload is loosely
/// shaped; every field is optional until it crosses into the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateProduct {
    pub product_id: Option<String>,
    pub name: Option<String>,
    pub price: Option<Decimal>,
    pub quantity: Option<u32>,
    pub image_url: Option<String>,
}

/// Validated order line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub product_id: String,
    pub name: String,
    /// Unit price
    pub price: Decimal,
    pub quantity: u32,
}

impl LineItem {
    pub fn new(
        product_id: impl Into<String>,
        name: impl Into<String>,
        price: Decimal,
        quantity: u32,
    ) -> Result<Self, LineItemError> {
        let item = Self {
            product_id: product_id.into(),
            name: name.into(),
            price,
            quantity,
        };
        item.validate()?;
        Ok(item)
    }

    pub fn validate(&self) -> Result<(), LineItemError> {
        if self.product_id.trim().is_empty() {
            return Err(LineItemError::MissingProductId);
        }
        if self.price <= Decimal::ZERO {
            return Err(LineItemError::InvalidPrice {
                product_id: self.product_id.clone(),
                price: self.price,
            });
        }
        if self.quantity == 0 {
            return Err(LineItemError::InvalidQuantity {
                product_id: self.product_id.clone(),
            });
        }
        Ok(())
    }

    pub fn subtotal(&self) -> Decimal {
        self.price * Decimal::from(self.quantity)
    }
}

impl TryFrom<CandidateProduct> for LineItem {
    type Error = LineItemError;

    fn try_from(candidate: CandidateProduct) -> Result<Self, Self::Error> {
        let product_id = candidate
            .product_id
            .filter(|id| !id.trim().is_empty())
            .ok_or(LineItemError::MissingProductId)?;
        let price = candidate.price.ok_or_else(|| LineItemError::MissingPrice {
            product_id: product_id.clone(),
        })?;
        let name = candidate.name.unwrap_or_else(|| product_id.clone());

        LineItem::new(product_id, name, price, candidate.quantity.unwrap_or(1))
    }
}

/// Sum of line subtotals
pub fn total_amount(items: &[LineItem]) -> Decimal {
    items.iter().map(LineItem::subtotal).sum()
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LineItemError {
    #[error("line item is missing a product id")]
    MissingProductId,

    #[error("product {product_id} has no price")]
    MissingPrice { product_id: String },

    #[error("product {product_id} has non-positive price {price}")]
    InvalidPrice { product_id: String, price: Decimal },

    #[error("product {product_id} has zero quantity")]
    InvalidQuantity { product_id: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_candidate_defaults_quantity_and_name() {
        let candidate = CandidateProduct {
            product_id: Some("sku-1".to_string()),
            price: Some(Decimal::from_str("19.99").unwrap()),
            ..Default::default()
        };

        let item = LineItem::try_from(candidate).unwrap();
        assert_eq!(item.quantity, 1);
        assert_eq!(item.name, "sku-1");
    }

    #[test]
    fn test_candidate_without_price_is_rejected() {
        let candidate = CandidateProduct {
            product_id: Some("sku-1".to_string()),
            ..Default::default()
        };

        assert!(matches!(
            LineItem::try_from(candidate),
            Err(LineItemError::MissingPrice { .. })
        ));
    }

    #[test]
    fn test_zero_price_is_rejected() {
        let result = LineItem::new("sku-1", "Mug", Decimal::ZERO, 1);
        assert!(matches!(result, Err(LineItemError::InvalidPrice { .. })));
    }

    #[test]
    fn test_total_amount() {
        let items = vec![
            LineItem::new("a", "A", Decimal::from_str("10.50").unwrap(), 2).unwrap(),
            LineItem::new("b", "B", Decimal::from_str("4.00").unwrap(), 1).unwrap(),
        ];
        assert_eq!(total_amount(&items), Decimal::from_str("25.00").unwrap());
    }
}
