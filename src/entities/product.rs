// 📦 Product Entity - Canonical catalog + counterparty code mappings
//
// Products are never deleted, only deactivated: historical orders keep
// pointing at the product id they were resolved to.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// PRODUCT
// ============================================================================

/// Canonical catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    /// Stable identity (UUID)
    pub id: String,

    /// Company's own product code (unique, case-insensitive)
    pub internal_code: String,

    pub name: String,

    /// Unit of measure ("pcs", "kg", ...)
    pub unit: String,

    pub unit_price: f64,

    /// Tax rate as a percentage (18.0 = 18%)
    pub tax_rate: f64,

    /// Sales quantities round up to `multiple_quantity`
    pub sell_in_multiples: bool,

    pub multiple_quantity: Option<i64>,

    pub active: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Build a product from maintainer-supplied fields with a fresh UUID.
    pub fn from_new(new: NewProduct) -> Self {
        let now = Utc::now();

        Product {
            id: uuid::Uuid::new_v4().to_string(),
            internal_code: new.internal_code.trim().to_string(),
            name: new.name.trim().to_string(),
            unit: new.unit,
            unit_price: new.unit_price,
            tax_rate: new.tax_rate,
            sell_in_multiples: new.sell_in_multiples,
            multiple_quantity: new.multiple_quantity,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Convenience constructor used by importers and tests.
    pub fn new(internal_code: &str, name: &str, unit: &str, unit_price: f64) -> Self {
        Product::from_new(NewProduct {
            internal_code: internal_code.to_string(),
            name: name.to_string(),
            unit: unit.to_string(),
            unit_price,
            tax_rate: 0.0,
            sell_in_multiples: false,
            multiple_quantity: None,
        })
    }

    pub fn with_tax_rate(mut self, tax_rate: f64) -> Self {
        self.tax_rate = tax_rate;
        self
    }

    pub fn sold_in_multiples_of(mut self, multiple: i64) -> Self {
        self.sell_in_multiples = true;
        self.multiple_quantity = Some(multiple);
        self
    }

    /// All strings the resolver may compare against (code + name).
    pub fn match_names(&self) -> [&str; 2] {
        [&self.internal_code, &self.name]
    }
}

/// Fields a catalog maintainer (or a reviewer approving a code) supplies
/// when creating a product. Also the row shape of the catalog CSV import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProduct {
    pub internal_code: String,
    pub name: String,
    #[serde(default = "default_unit")]
    pub unit: String,
    pub unit_price: f64,
    #[serde(default)]
    pub tax_rate: f64,
    #[serde(default)]
    pub sell_in_multiples: bool,
    #[serde(default)]
    pub multiple_quantity: Option<i64>,
}

fn default_unit() -> String {
    "pcs".to_string()
}

// ============================================================================
// COUNTERPARTY PRODUCT MAPPING
// ============================================================================

/// (counterparty, external code) → canonical product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterpartyProductMapping {
    pub id: String,
    pub counterparty_id: String,
    pub external_code: String,
    pub product_id: String,

    /// The counterparty's own name for the item, if known
    pub external_name: Option<String>,

    pub active: bool,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CounterpartyProductMapping {
    pub fn new(counterparty_id: &str, external_code: &str, product_id: &str) -> Self {
        let now = Utc::now();

        CounterpartyProductMapping {
            id: uuid::Uuid::new_v4().to_string(),
            counterparty_id: counterparty_id.trim().to_string(),
            external_code: external_code.trim().to_string(),
            product_id: product_id.to_string(),
            external_name: None,
            active: true,
            notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_external_name(mut self, name: Option<String>) -> Self {
        self.external_name = name.filter(|n| !n.trim().is_empty());
        self
    }

    pub fn with_notes(mut self, notes: &str) -> Self {
        self.notes = Some(notes.to_string());
        self
    }
}

// ============================================================================
// TESTS
// ============================================================================
