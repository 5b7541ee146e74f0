// 💰 Price Validator - submitted unit prices vs. the catalog
//
// A line is flagged when |submitted - catalog| / catalog > tolerance.
// The comparison is strict: a price exactly on the boundary passes.
// Unmatched lines are always flagged (reason: unmatched_product, 100%).

use crate::config::PipelineConfig;
use crate::entities::{IncomingOrder, LineItem, MismatchReason, PriceMismatchLine, Product};
use crate::error::StoreResult;
use crate::store::CatalogStore;
use serde::{Deserialize, Serialize};

/// Absorbs float noise so `catalog * (1 + tolerance)` is not flagged.
const BOUNDARY_EPSILON: f64 = 1e-9;

// ============================================================================
// PRICE CHECK RESULT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PriceCheck {
    /// Every line resolved and within tolerance
    Clean,

    /// At least one line deviates or is unmatched
    Mismatch(Vec<PriceMismatchLine>),
}

impl PriceCheck {
    pub fn is_clean(&self) -> bool {
        matches!(self, PriceCheck::Clean)
    }

    pub fn mismatches(&self) -> &[PriceMismatchLine] {
        match self {
            PriceCheck::Clean => &[],
            PriceCheck::Mismatch(lines) => lines,
        }
    }

    pub fn into_details(self) -> Option<Vec<PriceMismatchLine>> {
        match self {
            PriceCheck::Clean => None,
            PriceCheck::Mismatch(lines) => Some(lines),
        }
    }
}

// ============================================================================
// PRICE VALIDATOR
// ============================================================================

pub struct PriceValidator {
    /// Allowed relative deviation (default: 0.05 = 5%)
    pub tolerance: f64,
}

impl PriceValidator {
    pub fn new() -> Self {
        PriceValidator { tolerance: 0.05 }
    }

    pub fn with_tolerance(tolerance: f64) -> Self {
        PriceValidator { tolerance }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::with_tolerance(config.price_tolerance)
    }

    /// Compare every line of `order` against the current catalog price.
    pub fn validate<S>(&self, store: &S, order: &IncomingOrder) -> StoreResult<PriceCheck>
    where
        S: CatalogStore + ?Sized,
    {
        let mut mismatches = Vec::new();

        for (index, line) in order.line_items.iter().enumerate() {
            let product = match &line.resolution {
                Some(resolution) => store.get_product(&resolution.product_id)?,
                None => None,
            };

            if let Some(mismatch) = self.check_line(index, line, product.as_ref()) {
                mismatches.push(mismatch);
            }
        }

        if mismatches.is_empty() {
            return Ok(PriceCheck::Clean);
        }

        tracing::info!(
            order_id = %order.id,
            mismatches = mismatches.len(),
            "price mismatches recorded"
        );
        Ok(PriceCheck::Mismatch(mismatches))
    }

    /// Check one line; `product` is the resolved catalog product, if any.
    pub fn check_line(
        &self,
        line_index: usize,
        line: &LineItem,
        product: Option<&Product>,
    ) -> Option<PriceMismatchLine> {
        let Some(product) = product else {
            return Some(PriceMismatchLine {
                line_index,
                line_description: line.description.clone(),
                external_code: line.external_code.clone(),
                expected_price: None,
                actual_price: line.unit_price,
                difference_percent: 100.0,
                reason: MismatchReason::UnmatchedProduct,
            });
        };

        let submitted = line.unit_price;
        let catalog = product.unit_price;

        let difference_percent = if catalog > 0.0 {
            let deviation = (submitted - catalog) / catalog;
            if deviation.abs() <= self.tolerance + BOUNDARY_EPSILON {
                return None;
            }
            deviation * 100.0
        } else if submitted == catalog {
            return None;
        } else {
            tracing::warn!(
                product_code = %product.internal_code,
                catalog_price = catalog,
                "catalog price is not positive, flagging priced line"
            );
            100.0
        };

        Some(PriceMismatchLine {
            line_index,
            line_description: line.description.clone(),
            external_code: line.external_code.clone(),
            expected_price: Some(catalog),
            actual_price: submitted,
            difference_percent,
            reason: MismatchReason::PriceDeviation,
        })
    }
}

impl Default for PriceValidator {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_product(price: f64) -> Product {
        Product::new("SR-10", "Steel Rod", "pcs", price)
    }

    #[test]
    fn test_boundary_not_flagged() {
        let validator = PriceValidator::new();
        let product = create_test_product(100.0);

        let at_boundary = LineItem::new("Steel Rod", Some("SR-10"), 1.0, 105.0);
        assert!(validator.check_line(0, &at_boundary, Some(&product)).is_none());

        let below_boundary = LineItem::new("Steel Rod", Some("SR-10"), 1.0, 95.0);
        assert!(validator.check_line(0, &below_boundary, Some(&product)).is_none());
    }

    #[test]
    fn test_one_unit_above_boundary_flagged() {
        let validator = PriceValidator::new();
        let product = create_test_product(100.0);
        let line = LineItem::new("Steel Rod", Some("SR-10"), 1.0, 106.0);

        let mismatch = validator.check_line(2, &line, Some(&product)).unwrap();

        assert_eq!(mismatch.line_index, 2);
        assert_eq!(mismatch.reason, MismatchReason::PriceDeviation);
        assert_eq!(mismatch.expected_price, Some(100.0));
        assert!((mismatch.difference_percent - 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_boundary_with_fractional_price() {
        let validator = PriceValidator::new();
        let product = create_test_product(19.99);
        let line = LineItem::new("Steel Rod", None, 1.0, 19.99 * 1.05);

        assert!(validator.check_line(0, &line, Some(&product)).is_none());
    }

    #[test]
    fn test_underpricing_is_negative() {
        let validator = PriceValidator::new();
        let product = create_test_product(50.0);
        let line = LineItem::new("Steel Rod", None, 1.0, 40.0);

        let mismatch = validator.check_line(0, &line, Some(&product)).unwrap();
        assert!((mismatch.difference_percent + 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_unmatched_line_always_flagged() {
        let validator = PriceValidator::new();
        let line = LineItem::new("Mystery", Some("X-1"), 1.0, 10.0);

        let mismatch = validator.check_line(0, &line, None).unwrap();

        assert_eq!(mismatch.reason, MismatchReason::UnmatchedProduct);
        assert_eq!(mismatch.difference_percent, 100.0);
        assert_eq!(mismatch.expected_price, None);
    }

    #[test]
    fn test_zero_quote_is_full_underpricing() {
        let validator = PriceValidator::new();
        let product = create_test_product(100.0);
        let line = LineItem::new("Steel Rod", None, 1.0, 0.0);

        let mismatch = validator.check_line(0, &line, Some(&product)).unwrap();

        assert_eq!(mismatch.reason, MismatchReason::PriceDeviation);
        assert_eq!(mismatch.actual_price, 0.0);
        assert!((mismatch.difference_percent + 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_catalog_price_flags_priced_line() {
        let validator = PriceValidator::new();
        let product = create_test_product(0.0);
        let line = LineItem::new("Steel Rod", None, 1.0, 5.0);

        let mismatch = validator.check_line(0, &line, Some(&product)).unwrap();
        assert_eq!(mismatch.difference_percent, 100.0);
    }

    #[test]
    fn test_price_check_accessors() {
        assert!(PriceCheck::Clean.is_clean());
        assert!(PriceCheck::Clean.mismatches().is_empty());
        assert_eq!(PriceCheck::Clean.into_details(), None);
    }
}
