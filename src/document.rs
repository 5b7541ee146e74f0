// 🧾 Sales Order Document - what gets generated once an order is processed
//
// The document is assembled from the order plus the current catalog, with
// quantities normalized to pack multiples. Delivery is behind the
// `DocumentDispatcher` boundary; the crate ships a CSV writer.

use crate::entities::{IncomingOrder, Product};
use crate::error::{DispatchError, StoreResult};
use crate::quantity::{normalize_quantity, NormalizedQuantity};
use crate::store::CatalogStore;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

// ============================================================================
// DOCUMENT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalesOrderLine {
    pub description: String,
    /// `None` for lines a reviewer accepted without a catalog match
    pub product_code: Option<String>,
    pub product_name: Option<String>,
    pub unit: Option<String>,
    pub requested_quantity: f64,
    pub quantity: f64,
    pub unit_price: f64,
    /// Percent
    pub tax_rate: f64,
    pub line_total: f64,
    /// Quantity was rounded up to a pack multiple
    pub adjusted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalesOrderDocument {
    pub so_number: String,
    pub order_id: String,
    pub external_order_number: String,
    pub counterparty: String,
    pub order_date: Option<NaiveDate>,
    pub delivery_date: Option<NaiveDate>,
    pub currency: String,
    pub lines: Vec<SalesOrderLine>,
    pub subtotal: f64,
    pub tax_total: f64,
    pub total: f64,
    pub generated_at: DateTime<Utc>,
}

impl SalesOrderDocument {
    /// Assemble the document for `order`, looking products up in `store`.
    pub fn build<S>(store: &S, order: &IncomingOrder) -> StoreResult<Self>
    where
        S: CatalogStore + ?Sized,
    {
        let mut products = Vec::with_capacity(order.line_items.len());
        for line in &order.line_items {
            let product = match &line.resolution {
                Some(resolution) => {
                    let product = store.get_product(&resolution.product_id)?;
                    if product.is_none() {
                        tracing::warn!(
                            order_id = %order.id,
                            product_id = %resolution.product_id,
                            "resolved product no longer in catalog, line billed as submitted"
                        );
                    }
                    product
                }
                None => None,
            };
            products.push(product);
        }

        Ok(Self::from_parts(order, &products, Utc::now()))
    }

    /// Assemble from already loaded products (one entry per line item).
    pub fn from_parts(
        order: &IncomingOrder,
        products: &[Option<Product>],
        generated_at: DateTime<Utc>,
    ) -> Self {
        let lines: Vec<SalesOrderLine> = order
            .line_items
            .iter()
            .enumerate()
            .map(|(i, line)| {
                let product = products.get(i).and_then(Option::as_ref);

                let normalized = match product {
                    Some(p) => normalize_quantity(p, line.quantity),
                    None => NormalizedQuantity {
                        requested: line.quantity,
                        quantity: line.quantity,
                        adjusted: false,
                    },
                };

                let unit_price = line.unit_price;

                SalesOrderLine {
                    description: line.description.clone(),
                    product_code: product.map(|p| p.internal_code.clone()),
                    product_name: product.map(|p| p.name.clone()),
                    unit: product.map(|p| p.unit.clone()),
                    requested_quantity: normalized.requested,
                    quantity: normalized.quantity,
                    unit_price,
                    tax_rate: product.map_or(0.0, |p| p.tax_rate),
                    line_total: round_money(normalized.quantity * unit_price),
                    adjusted: normalized.adjusted,
                }
            })
            .collect();

        let subtotal = round_money(lines.iter().map(|l| l.line_total).sum());
        let tax_total = round_money(
            lines
                .iter()
                .map(|l| l.line_total * l.tax_rate / 100.0)
                .sum(),
        );

        SalesOrderDocument {
            so_number: so_number(&order.id, generated_at),
            order_id: order.id.clone(),
            external_order_number: order.external_order_number.clone(),
            counterparty: order.counterparty_name.clone(),
            order_date: order.order_date,
            delivery_date: order.delivery_date,
            currency: order.currency.clone(),
            lines,
            subtotal,
            tax_total,
            total: round_money(subtotal + tax_total),
            generated_at,
        }
    }
}

/// "SO-20240301-1a2b3c4d"
pub fn so_number(order_id: &str, generated_at: DateTime<Utc>) -> String {
    let suffix: String = order_id
        .chars()
        .filter(|c| c.is_ascii_hexdigit())
        .take(8)
        .collect::<String>()
        .to_lowercase();
    format!("SO-{}-{}", generated_at.format("%Y%m%d"), suffix)
}

fn round_money(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// ============================================================================
// DISPATCH BOUNDARY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchReceipt {
    pub so_number: String,
    /// Where the document went (file path, mailbox, ...)
    pub location: String,
}

/// External document channel. Called only for `processed` orders and never
/// twice concurrently for the same order.
pub trait DocumentDispatcher: Send + Sync {
    fn dispatch(&self, document: &SalesOrderDocument) -> Result<DispatchReceipt, DispatchError>;
}

/// Writes one CSV file per sales order into a directory.
pub struct CsvDocumentWriter {
    dir: PathBuf,
}

impl CsvDocumentWriter {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        CsvDocumentWriter {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn path_for(&self, so_number: &str) -> PathBuf {
        self.dir.join(format!("{}.csv", so_number))
    }
}

impl DocumentDispatcher for CsvDocumentWriter {
    fn dispatch(&self, document: &SalesOrderDocument) -> Result<DispatchReceipt, DispatchError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(&document.so_number);

        let mut writer = csv::Writer::from_path(&path)?;
        writer.write_record([
            "so_number",
            "order_number",
            "counterparty",
            "product_code",
            "description",
            "unit",
            "requested_quantity",
            "quantity",
            "unit_price",
            "tax_rate",
            "line_total",
        ])?;

        for line in &document.lines {
            writer.write_record([
                document.so_number.clone(),
                document.external_order_number.clone(),
                document.counterparty.clone(),
                line.product_code.clone().unwrap_or_default(),
                line.description.clone(),
                line.unit.clone().unwrap_or_default(),
                line.requested_quantity.to_string(),
                line.quantity.to_string(),
                format!("{:.2}", line.unit_price),
                line.tax_rate.to_string(),
                format!("{:.2}", line.line_total),
            ])?;
        }
        writer.flush()?;

        tracing::info!(
            so_number = %document.so_number,
            path = %path.display(),
            total = document.total,
            "sales order written"
        );

        Ok(DispatchReceipt {
            so_number: document.so_number.clone(),
            location: path.display().to_string(),
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================
