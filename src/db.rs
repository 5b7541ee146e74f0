// 🗄️ SQLite persistence - catalog, review queue, orders, audit events
//
// One `SqliteStore` implements every repository trait in `store.rs`.
// Atomicity guarantees come from SQLite itself (ON CONFLICT upserts,
// conditional UPDATE/DELETE), with the connection behind a mutex.

use anyhow::Context;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::deduplication::normalize_order_number;
use crate::entities::{
    CounterpartyProductMapping, DocumentKind, IncomingOrder, NewProduct, OrderStatus, Product,
    ReviewStatus, UnresolvedCodeEntry, UnresolvedFilter,
};
use crate::error::{StoreError, StoreResult};
use crate::store::{AuditLog, CatalogStore, OrderStore, ReviewQueue};

// ============================================================================
// AUDIT EVENTS
// ============================================================================

/// Event for audit trail ("every change is an event")
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

// ============================================================================
// SCHEMA
// ============================================================================

pub fn setup_database(conn: &Connection) -> StoreResult<()> {
    // Other connections may hold the write lock while we set up
    conn.busy_timeout(Duration::from_secs(5))?;

    // Enable WAL mode for crash recovery (in-memory databases report "memory")
    let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS products (
            id TEXT PRIMARY KEY,
            internal_code TEXT NOT NULL UNIQUE COLLATE NOCASE,
            name TEXT NOT NULL,
            unit TEXT NOT NULL,
            unit_price REAL NOT NULL,
            tax_rate REAL NOT NULL DEFAULT 0,
            sell_in_multiples INTEGER NOT NULL DEFAULT 0,
            multiple_quantity INTEGER,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS counterparty_mappings (
            id TEXT PRIMARY KEY,
            counterparty_id TEXT NOT NULL,
            external_code TEXT NOT NULL COLLATE NOCASE,
            product_id TEXT NOT NULL REFERENCES products(id),
            external_name TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            notes TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (counterparty_id, external_code)
        );

        CREATE TABLE IF NOT EXISTS unresolved_codes (
            id TEXT PRIMARY KEY,
            source_document_id TEXT NOT NULL,
            source_document_type TEXT NOT NULL,
            counterparty_type TEXT NOT NULL,
            counterparty_id TEXT,
            external_code TEXT NOT NULL,
            external_description TEXT NOT NULL,
            external_unit_price REAL NOT NULL,
            suggested_product_id TEXT,
            suggestion_confidence REAL NOT NULL,
            suggestion_reason TEXT NOT NULL,
            status TEXT NOT NULL,
            resolved_product_id TEXT,
            created_at TEXT NOT NULL,
            reviewed_at TEXT
        );

        CREATE TABLE IF NOT EXISTS orders (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            external_order_number TEXT NOT NULL,
            normalized_number TEXT NOT NULL,
            counterparty_id TEXT,
            counterparty_name TEXT NOT NULL,
            counterparty_address TEXT,
            order_date TEXT,
            delivery_date TEXT,
            currency TEXT NOT NULL,
            total_amount REAL NOT NULL,
            line_items TEXT NOT NULL,
            source TEXT NOT NULL,
            status TEXT NOT NULL,
            duplicate_match TEXT,
            price_mismatch_details TEXT,
            converted_total REAL,
            dispatch_claimed_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        );

        -- Backstop for concurrent intake: one live document per normalized number
        CREATE UNIQUE INDEX IF NOT EXISTS idx_orders_live_number
            ON orders(kind, normalized_number)
            WHERE status != 'duplicate' AND normalized_number != '';

        CREATE INDEX IF NOT EXISTS idx_orders_status ON orders(status);
        CREATE INDEX IF NOT EXISTS idx_products_name ON products(name COLLATE NOCASE);
        CREATE INDEX IF NOT EXISTS idx_unresolved_document
            ON unresolved_codes(source_document_id, external_code COLLATE NOCASE);
        CREATE INDEX IF NOT EXISTS idx_unresolved_status ON unresolved_codes(status);
        CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id);",
    )?;

    Ok(())
}

// ============================================================================
// EVENT LOG
// ============================================================================

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> StoreResult<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Get events for a specific entity, oldest first
pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> StoreResult<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY id ASC",
    )?;

    let events = stmt
        .query_map(params![entity_type, entity_id], |row| {
            Ok(Event {
                event_id: row.get(0)?,
                timestamp: time_col(row, 1)?,
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: json_col(row, 5)?,
                actor: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}

// ============================================================================
// CATALOG CSV IMPORT
// ============================================================================

/// Load catalog rows from CSV (header: internal_code,name,unit,unit_price,
/// tax_rate,sell_in_multiples,multiple_quantity)
pub fn load_products_csv(csv_path: &Path) -> anyhow::Result<Vec<NewProduct>> {
    let mut rdr = csv::Reader::from_path(csv_path)
        .with_context(|| format!("Failed to open catalog CSV {:?}", csv_path))?;

    let mut products = Vec::new();
    for (line, result) in rdr.deserialize().enumerate() {
        let product: NewProduct =
            result.with_context(|| format!("Failed to deserialize catalog row {}", line + 2))?;
        products.push(product);
    }

    Ok(products)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportSummary {
    pub inserted: usize,
    /// Codes already present in the catalog
    pub skipped: usize,
}

// ============================================================================
// ROW HELPERS
// ============================================================================

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, err.into())
}

fn json_col<T: DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(idx, e))
}

fn opt_json_col<T: DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<Option<T>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|r| serde_json::from_str(&r).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn time_col(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn opt_time_col(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|r| {
        DateTime::parse_from_rfc3339(&r)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| conversion_error(idx, e))
    })
    .transpose()
}

fn date_col(row: &Row, idx: usize) -> rusqlite::Result<Option<NaiveDate>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|r| NaiveDate::parse_from_str(&r, "%Y-%m-%d").map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn enum_col<T: FromStr<Err = String>>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e: String| conversion_error(idx, e))
}

/// Fixed-width UTC timestamp so claims compare correctly as text.
fn claim_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn to_json<T: Serialize>(value: &T) -> StoreResult<String> {
    Ok(serde_json::to_string(value)?)
}

fn opt_to_json<T: Serialize>(value: &Option<T>) -> StoreResult<Option<String>> {
    value.as_ref().map(to_json).transpose()
}

/// Map UNIQUE / FK violations to `StoreError::Conflict`.
fn conflict_aware(result: rusqlite::Result<usize>) -> StoreResult<usize> {
    match result {
        Ok(changed) => Ok(changed),
        Err(rusqlite::Error::SqliteFailure(err, msg))
            if err.code == ErrorCode::ConstraintViolation =>
        {
            Err(StoreError::Conflict(
                msg.unwrap_or_else(|| "constraint violation".to_string()),
            ))
        }
        Err(e) => Err(e.into()),
    }
}

const PRODUCT_COLUMNS: &str = "id, internal_code, name, unit, unit_price, tax_rate,
    sell_in_multiples, multiple_quantity, active, created_at, updated_at";

fn product_from_row(row: &Row) -> rusqlite::Result<Product> {
    Ok(Product {
        id: row.get(0)?,
        internal_code: row.get(1)?,
        name: row.get(2)?,
        unit: row.get(3)?,
        unit_price: row.get(4)?,
        tax_rate: row.get(5)?,
        sell_in_multiples: row.get(6)?,
        multiple_quantity: row.get(7)?,
        active: row.get(8)?,
        created_at: time_col(row, 9)?,
        updated_at: time_col(row, 10)?,
    })
}

const MAPPING_COLUMNS: &str = "id, counterparty_id, external_code, product_id, external_name,
    active, notes, created_at, updated_at";

fn mapping_from_row(row: &Row) -> rusqlite::Result<CounterpartyProductMapping> {
    Ok(CounterpartyProductMapping {
        id: row.get(0)?,
        counterparty_id: row.get(1)?,
        external_code: row.get(2)?,
        product_id: row.get(3)?,
        external_name: row.get(4)?,
        active: row.get(5)?,
        notes: row.get(6)?,
        created_at: time_col(row, 7)?,
        updated_at: time_col(row, 8)?,
    })
}

const UNRESOLVED_COLUMNS: &str = "id, source_document_id, source_document_type, counterparty_type,
    counterparty_id, external_code, external_description, external_unit_price,
    suggested_product_id, suggestion_confidence, suggestion_reason, status,
    resolved_product_id, created_at, reviewed_at";

fn unresolved_from_row(row: &Row) -> rusqlite::Result<UnresolvedCodeEntry> {
    Ok(UnresolvedCodeEntry {
        id: row.get(0)?,
        source_document_id: row.get(1)?,
        source_document_type: row.get(2)?,
        counterparty_type: enum_col(row, 3)?,
        counterparty_id: row.get(4)?,
        external_code: row.get(5)?,
        external_description: row.get(6)?,
        external_unit_price: row.get(7)?,
        suggested_product_id: row.get(8)?,
        suggestion_confidence: row.get(9)?,
        suggestion_reason: row.get(10)?,
        status: enum_col(row, 11)?,
        resolved_product_id: row.get(12)?,
        created_at: time_col(row, 13)?,
        reviewed_at: opt_time_col(row, 14)?,
    })
}

const ORDER_COLUMNS: &str = "id, kind, external_order_number, counterparty_id, counterparty_name,
    counterparty_address, order_date, delivery_date, currency, total_amount, line_items,
    source, status, duplicate_match, price_mismatch_details, converted_total,
    created_at, updated_at";

fn order_from_row(row: &Row) -> rusqlite::Result<IncomingOrder> {
    Ok(IncomingOrder {
        id: row.get(0)?,
        kind: enum_col(row, 1)?,
        external_order_number: row.get(2)?,
        counterparty_id: row.get(3)?,
        counterparty_name: row.get(4)?,
        counterparty_address: row.get(5)?,
        order_date: date_col(row, 6)?,
        delivery_date: date_col(row, 7)?,
        currency: row.get(8)?,
        total_amount: row.get(9)?,
        line_items: json_col(row, 10)?,
        source: json_col(row, 11)?,
        status: enum_col(row, 12)?,
        duplicate_match: opt_json_col(row, 13)?,
        price_mismatch_details: opt_json_col(row, 14)?,
        converted_total: row.get(15)?,
        created_at: time_col(row, 16)?,
        updated_at: time_col(row, 17)?,
    })
}

// ============================================================================
// SQLITE STORE
// ============================================================================

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a database file and make sure the schema exists
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    pub fn from_connection(conn: Connection) -> StoreResult<Self> {
        setup_database(&conn)?;
        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic while holding the lock cannot leave SQLite half-written
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Bulk-create catalog products, skipping codes that already exist.
    pub fn import_products(&self, products: &[NewProduct]) -> StoreResult<ImportSummary> {
        let mut summary = ImportSummary::default();

        for new in products {
            let product = Product::from_new(new.clone());
            match self.create_product(&product) {
                Ok(()) => summary.inserted += 1,
                Err(StoreError::Conflict(_)) => {
                    tracing::debug!(code = %product.internal_code, "catalog code exists, skipping");
                    summary.skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!(
            inserted = summary.inserted,
            skipped = summary.skipped,
            "catalog import finished"
        );
        Ok(summary)
    }

    pub fn count_orders(&self) -> StoreResult<i64> {
        let count = self
            .conn()
            .query_row("SELECT COUNT(*) FROM orders", [], |row| row.get(0))?;
        Ok(count)
    }
}

impl CatalogStore for SqliteStore {
    fn get_product(&self, id: &str) -> StoreResult<Option<Product>> {
        let conn = self.conn();
        let product = conn
            .query_row(
                &format!("SELECT {} FROM products WHERE id = ?1", PRODUCT_COLUMNS),
                [id],
                product_from_row,
            )
            .optional()?;
        Ok(product)
    }

    fn get_product_by_code(&self, code: &str) -> StoreResult<Option<Product>> {
        let conn = self.conn();
        let product = conn
            .query_row(
                &format!(
                    "SELECT {} FROM products WHERE internal_code = ?1 AND active = 1",
                    PRODUCT_COLUMNS
                ),
                [code.trim()],
                product_from_row,
            )
            .optional()?;
        Ok(product)
    }

    fn find_products_by_name(&self, name: &str) -> StoreResult<Vec<Product>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM products
             WHERE name = ?1 COLLATE NOCASE AND active = 1
             ORDER BY internal_code",
            PRODUCT_COLUMNS
        ))?;
        let products = stmt
            .query_map([name.trim()], product_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(products)
    }

    fn list_active_products(&self) -> StoreResult<Vec<Product>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM products WHERE active = 1 ORDER BY internal_code",
            PRODUCT_COLUMNS
        ))?;
        let products = stmt
            .query_map([], product_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(products)
    }

    fn get_mapping(
        &self,
        counterparty_id: &str,
        external_code: &str,
    ) -> StoreResult<Option<Product>> {
        let conn = self.conn();
        let columns = PRODUCT_COLUMNS
            .split(',')
            .map(|c| format!("p.{}", c.trim()))
            .collect::<Vec<_>>()
            .join(", ");

        let product = conn
            .query_row(
                &format!(
                    "SELECT {} FROM counterparty_mappings m
                     JOIN products p ON p.id = m.product_id
                     WHERE m.counterparty_id = ?1 AND m.external_code = ?2
                       AND m.active = 1 AND p.active = 1",
                    columns
                ),
                params![counterparty_id.trim(), external_code.trim()],
                product_from_row,
            )
            .optional()?;
        Ok(product)
    }

    fn upsert_mapping(
        &self,
        mapping: &CounterpartyProductMapping,
    ) -> StoreResult<CounterpartyProductMapping> {
        let conn = self.conn();
        let now = Utc::now().to_rfc3339();

        conflict_aware(conn.execute(
            "INSERT INTO counterparty_mappings (
                id, counterparty_id, external_code, product_id, external_name,
                active, notes, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
            ON CONFLICT (counterparty_id, external_code) DO UPDATE SET
                product_id = excluded.product_id,
                external_name = COALESCE(excluded.external_name, counterparty_mappings.external_name),
                active = excluded.active,
                notes = COALESCE(excluded.notes, counterparty_mappings.notes),
                updated_at = excluded.updated_at",
            params![
                mapping.id,
                mapping.counterparty_id.trim(),
                mapping.external_code.trim(),
                mapping.product_id,
                mapping.external_name,
                mapping.active,
                mapping.notes,
                now,
            ],
        ))?;

        let stored = conn.query_row(
            &format!(
                "SELECT {} FROM counterparty_mappings
                 WHERE counterparty_id = ?1 AND external_code = ?2",
                MAPPING_COLUMNS
            ),
            params![mapping.counterparty_id.trim(), mapping.external_code.trim()],
            mapping_from_row,
        )?;
        Ok(stored)
    }

    fn set_mapping_active(
        &self,
        counterparty_id: &str,
        external_code: &str,
        active: bool,
    ) -> StoreResult<bool> {
        let changed = self.conn().execute(
            "UPDATE counterparty_mappings SET active = ?3, updated_at = ?4
             WHERE counterparty_id = ?1 AND external_code = ?2",
            params![
                counterparty_id.trim(),
                external_code.trim(),
                active,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(changed == 1)
    }

    fn list_mappings(&self, counterparty_id: &str) -> StoreResult<Vec<CounterpartyProductMapping>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM counterparty_mappings WHERE counterparty_id = ?1
             ORDER BY external_code",
            MAPPING_COLUMNS
        ))?;
        let mappings = stmt
            .query_map([counterparty_id.trim()], mapping_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(mappings)
    }

    fn create_product(&self, product: &Product) -> StoreResult<()> {
        conflict_aware(self.conn().execute(
            &format!(
                "INSERT INTO products ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                PRODUCT_COLUMNS
            ),
            params![
                product.id,
                product.internal_code,
                product.name,
                product.unit,
                product.unit_price,
                product.tax_rate,
                product.sell_in_multiples,
                product.multiple_quantity,
                product.active,
                product.created_at.to_rfc3339(),
                product.updated_at.to_rfc3339(),
            ],
        ))?;
        Ok(())
    }

    fn update_product(&self, product: &Product) -> StoreResult<bool> {
        let changed = conflict_aware(self.conn().execute(
            "UPDATE products SET
                internal_code = ?2, name = ?3, unit = ?4, unit_price = ?5, tax_rate = ?6,
                sell_in_multiples = ?7, multiple_quantity = ?8, active = ?9, updated_at = ?10
             WHERE id = ?1",
            params![
                product.id,
                product.internal_code,
                product.name,
                product.unit,
                product.unit_price,
                product.tax_rate,
                product.sell_in_multiples,
                product.multiple_quantity,
                product.active,
                Utc::now().to_rfc3339(),
            ],
        ))?;
        Ok(changed == 1)
    }

    fn set_product_active(&self, id: &str, active: bool) -> StoreResult<bool> {
        let changed = self.conn().execute(
            "UPDATE products SET active = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, active, Utc::now().to_rfc3339()],
        )?;
        Ok(changed == 1)
    }
}

impl OrderStore for SqliteStore {
    fn insert_order(&self, order: &IncomingOrder) -> StoreResult<()> {
        conflict_aware(self.conn().execute(
            &format!(
                "INSERT INTO orders ({}, normalized_number) VALUES
                 (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
                ORDER_COLUMNS
            ),
            params![
                order.id,
                order.kind.as_str(),
                order.external_order_number,
                order.counterparty_id,
                order.counterparty_name,
                order.counterparty_address,
                order.order_date.map(|d| d.to_string()),
                order.delivery_date.map(|d| d.to_string()),
                order.currency,
                order.total_amount,
                to_json(&order.line_items)?,
                to_json(&order.source)?,
                order.status.as_str(),
                opt_to_json(&order.duplicate_match)?,
                opt_to_json(&order.price_mismatch_details)?,
                order.converted_total,
                order.created_at.to_rfc3339(),
                order.updated_at.to_rfc3339(),
                normalize_order_number(&order.external_order_number),
            ],
        ))?;
        Ok(())
    }

    fn get_order(&self, id: &str) -> StoreResult<Option<IncomingOrder>> {
        let conn = self.conn();
        let order = conn
            .query_row(
                &format!("SELECT {} FROM orders WHERE id = ?1", ORDER_COLUMNS),
                [id],
                order_from_row,
            )
            .optional()?;
        Ok(order)
    }

    fn list_orders(
        &self,
        kind: Option<DocumentKind>,
        status: Option<OrderStatus>,
    ) -> StoreResult<Vec<IncomingOrder>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM orders
             WHERE (?1 IS NULL OR kind = ?1) AND (?2 IS NULL OR status = ?2)
             ORDER BY rowid ASC",
            ORDER_COLUMNS
        ))?;
        let orders = stmt
            .query_map(
                params![kind.map(|k| k.as_str()), status.map(|s| s.as_str())],
                order_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(orders)
    }

    fn update_order_if_status(
        &self,
        order: &IncomingOrder,
        expected: OrderStatus,
    ) -> StoreResult<bool> {
        let changed = conflict_aware(self.conn().execute(
            "UPDATE orders SET
                line_items = ?3, status = ?4, duplicate_match = ?5,
                price_mismatch_details = ?6, converted_total = ?7, updated_at = ?8,
                dispatch_claimed_at = NULL
             WHERE id = ?1 AND status = ?2",
            params![
                order.id,
                expected.as_str(),
                to_json(&order.line_items)?,
                order.status.as_str(),
                opt_to_json(&order.duplicate_match)?,
                opt_to_json(&order.price_mismatch_details)?,
                order.converted_total,
                Utc::now().to_rfc3339(),
            ],
        ))?;
        Ok(changed == 1)
    }

    fn delete_order_if_status(&self, id: &str, expected: OrderStatus) -> StoreResult<bool> {
        let changed = self.conn().execute(
            "DELETE FROM orders WHERE id = ?1 AND status = ?2",
            params![id, expected.as_str()],
        )?;
        Ok(changed == 1)
    }

    fn claim_dispatch(&self, id: &str, stale_before: DateTime<Utc>) -> StoreResult<bool> {
        let changed = self.conn().execute(
            "UPDATE orders SET dispatch_claimed_at = ?2
             WHERE id = ?1 AND status = 'processed'
               AND (dispatch_claimed_at IS NULL OR dispatch_claimed_at < ?3)",
            params![id, claim_time(Utc::now()), claim_time(stale_before)],
        )?;
        Ok(changed == 1)
    }

    fn release_dispatch(&self, id: &str) -> StoreResult<()> {
        self.conn().execute(
            "UPDATE orders SET dispatch_claimed_at = NULL WHERE id = ?1",
            [id],
        )?;
        Ok(())
    }
}

impl ReviewQueue for SqliteStore {
    fn insert_unresolved(&self, entry: &UnresolvedCodeEntry) -> StoreResult<()> {
        conflict_aware(self.conn().execute(
            &format!(
                "INSERT INTO unresolved_codes ({}) VALUES
                 (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                UNRESOLVED_COLUMNS
            ),
            params![
                entry.id,
                entry.source_document_id,
                entry.source_document_type,
                entry.counterparty_type.as_str(),
                entry.counterparty_id,
                entry.external_code,
                entry.external_description,
                entry.external_unit_price,
                entry.suggested_product_id,
                entry.suggestion_confidence,
                entry.suggestion_reason,
                entry.status.as_str(),
                entry.resolved_product_id,
                entry.created_at.to_rfc3339(),
                entry.reviewed_at.map(|t| t.to_rfc3339()),
            ],
        ))?;
        Ok(())
    }

    fn get_unresolved(&self, id: &str) -> StoreResult<Option<UnresolvedCodeEntry>> {
        let conn = self.conn();
        let entry = conn
            .query_row(
                &format!("SELECT {} FROM unresolved_codes WHERE id = ?1", UNRESOLVED_COLUMNS),
                [id],
                unresolved_from_row,
            )
            .optional()?;
        Ok(entry)
    }

    fn list_unresolved(&self, filter: &UnresolvedFilter) -> StoreResult<Vec<UnresolvedCodeEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM unresolved_codes
             WHERE (?1 IS NULL OR status = ?1)
               AND (?2 IS NULL OR counterparty_type = ?2)
               AND (?3 IS NULL OR counterparty_id = ?3)
               AND (?4 IS NULL OR source_document_id = ?4)
             ORDER BY rowid ASC",
            UNRESOLVED_COLUMNS
        ))?;
        let entries = stmt
            .query_map(
                params![
                    filter.status.map(|s| s.as_str()),
                    filter.counterparty_type.map(|t| t.as_str()),
                    filter.counterparty_id,
                    filter.source_document_id,
                ],
                unresolved_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    fn find_unresolved(
        &self,
        source_document_id: &str,
        external_code: &str,
    ) -> StoreResult<Option<UnresolvedCodeEntry>> {
        let conn = self.conn();
        let entry = conn
            .query_row(
                &format!(
                    "SELECT {} FROM unresolved_codes
                     WHERE source_document_id = ?1 AND external_code = ?2 COLLATE NOCASE
                     ORDER BY rowid DESC LIMIT 1",
                    UNRESOLVED_COLUMNS
                ),
                params![source_document_id, external_code.trim()],
                unresolved_from_row,
            )
            .optional()?;
        Ok(entry)
    }

    fn resolve_entry_if_pending(
        &self,
        id: &str,
        status: ReviewStatus,
        resolved_product_id: Option<&str>,
    ) -> StoreResult<bool> {
        let changed = self.conn().execute(
            "UPDATE unresolved_codes
             SET status = ?2, resolved_product_id = ?3, reviewed_at = ?4
             WHERE id = ?1 AND status = 'pending'",
            params![id, status.as_str(), resolved_product_id, Utc::now().to_rfc3339()],
        )?;
        Ok(changed == 1)
    }
}

impl AuditLog for SqliteStore {
    fn record(&self, event: &Event) -> StoreResult<()> {
        insert_event(&self.conn(), event)
    }

    fn events_for(&self, entity_type: &str, entity_id: &str) -> StoreResult<Vec<Event>> {
        get_events_for_entity(&self.conn(), entity_type, entity_id)
    }
}

// ============================================================================
// TESTS
// ============================================================================
