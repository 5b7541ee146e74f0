// 📦 Quantity Normalizer - round requested quantities up to pack multiples
//
// Applied only when a sales order document is generated. Products sold in
// multiples of `m` get ceil(q / m) * m; everything else passes through.

use crate::entities::Product;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedQuantity {
    /// What the counterparty asked for
    pub requested: f64,
    /// What goes on the sales order
    pub quantity: f64,
    pub adjusted: bool,
}

/// Normalize `requested` for `product`.
///
/// A product flagged `sell_in_multiples` without a positive multiple is a
/// catalog data problem: it is logged and the requested quantity is kept.
pub fn normalize_quantity(product: &Product, requested: f64) -> NormalizedQuantity {
    let unchanged = NormalizedQuantity {
        requested,
        quantity: requested,
        adjusted: false,
    };

    if !product.sell_in_multiples {
        return unchanged;
    }

    let multiple = match product.multiple_quantity {
        Some(m) if m > 0 => m as f64,
        other => {
            tracing::warn!(
                product_code = %product.internal_code,
                multiple_quantity = ?other,
                "sell_in_multiples without a positive multiple, keeping requested quantity"
            );
            return unchanged;
        }
    };

    let quantity = round_up_to_multiple(requested, multiple);
    NormalizedQuantity {
        requested,
        quantity,
        adjusted: quantity != requested,
    }
}

/// Smallest multiple of `multiple` that is >= `quantity`.
pub fn round_up_to_multiple(quantity: f64, multiple: f64) -> f64 {
    let packs = quantity / multiple;
    // 0.1 * 3 / 0.1 style noise must not add a whole pack
    let rounded = packs.round();
    let packs = if (packs - rounded).abs() < 1e-9 {
        rounded
    } else {
        packs.ceil()
    };
    packs * multiple
}
