// 🧾 Incoming Order Entity - one inbound purchase order or vendor bill
//
// `status` is the single source of truth for the workflow stage:
//
//   pending ──► duplicate
//      │
//      ├──────► price_mismatch ──► (deleted by reviewer)
//      │              │
//      └──────────────┴──► processed ──► converted

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::review::CounterpartyType;

// ============================================================================
// DOCUMENT KIND
// ============================================================================

/// Which kind of inbound document this is. Duplicate detection only ever
/// compares documents of the same kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    /// Customer purchase order (becomes a sales order)
    PurchaseOrder,
    /// Vendor / supplier bill
    VendorBill,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::PurchaseOrder => "purchase_order",
            DocumentKind::VendorBill => "vendor_bill",
        }
    }

    /// Customers send purchase orders, vendors send bills.
    pub fn counterparty_type(&self) -> CounterpartyType {
        match self {
            DocumentKind::PurchaseOrder => CounterpartyType::Customer,
            DocumentKind::VendorBill => CounterpartyType::Vendor,
        }
    }

    /// Human label for the document number, used in explanations.
    pub fn number_label(&self) -> &'static str {
        match self {
            DocumentKind::PurchaseOrder => "PO number",
            DocumentKind::VendorBill => "bill number",
        }
    }
}

impl FromStr for DocumentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "purchase_order" => Ok(DocumentKind::PurchaseOrder),
            "vendor_bill" => Ok(DocumentKind::VendorBill),
            other => Err(format!("unknown document kind: {}", other)),
        }
    }
}

// ============================================================================
// ORDER STATUS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Just intaken, reconciliation not finished
    Pending,
    /// Re-submission of a stored document. Terminal unless force-deleted.
    Duplicate,
    /// Unmatched lines or price deviations, awaiting a reviewer
    PriceMismatch,
    /// Clean (or force-approved); ready for document generation
    Processed,
    /// Sales order generated and dispatched
    Converted,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Duplicate => "duplicate",
            OrderStatus::PriceMismatch => "price_mismatch",
            OrderStatus::Processed => "processed",
            OrderStatus::Converted => "converted",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "duplicate" => Ok(OrderStatus::Duplicate),
            "price_mismatch" => Ok(OrderStatus::PriceMismatch),
            "processed" => Ok(OrderStatus::Processed),
            "converted" => Ok(OrderStatus::Converted),
            other => Err(format!("unknown order status: {}", other)),
        }
    }
}

// ============================================================================
// SOURCE METADATA
// ============================================================================

/// Where the document came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "channel", rename_all = "snake_case")]
pub enum SourceMetadata {
    Email {
        #[serde(default)]
        subject: Option<String>,
        #[serde(default)]
        from: Option<String>,
        #[serde(default)]
        date: Option<String>,
        #[serde(default)]
        message_id: Option<String>,
        /// Attachment file name the document was extracted from
        #[serde(default)]
        attachment: Option<String>,
    },
    Manual,
}

impl Default for SourceMetadata {
    fn default() -> Self {
        SourceMetadata::Manual
    }
}

impl SourceMetadata {
    /// Identity of the source artifact (same email + same attachment).
    ///
    /// Manual entries and emails without an attachment name or message id
    /// carry no identity.
    pub fn identity(&self) -> Option<String> {
        match self {
            SourceMetadata::Manual => None,
            SourceMetadata::Email {
                subject,
                from,
                date,
                message_id,
                attachment,
            } => {
                let attachment = clean(attachment);
                let message_id = clean(message_id);

                if attachment.is_none() && message_id.is_none() {
                    return None;
                }

                let envelope = match message_id {
                    Some(id) => id,
                    None => {
                        let parts = [clean(from), clean(subject), clean(date)];
                        if parts.iter().all(Option::is_none) {
                            return None;
                        }
                        parts
                            .into_iter()
                            .map(Option::unwrap_or_default)
                            .collect::<Vec<_>>()
                            .join("|")
                    }
                };

                Some(format!("{}#{}", envelope, attachment.unwrap_or_default()))
            }
        }
    }
}

fn clean(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(|v| v.trim().to_lowercase())
        .filter(|v| !v.is_empty())
}

// ============================================================================
// LINE ITEMS
// ============================================================================

/// How a line item's external code was resolved to a catalog product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionMethod {
    CounterpartyMapping,
    InternalCode,
    ProductName,
    /// A reviewer approved the unresolved code for this document
    ReviewApproval,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineResolution {
    pub product_id: String,
    pub product_code: String,
    pub method: ResolutionMethod,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub description: String,

    #[serde(default)]
    pub external_code: Option<String>,

    pub quantity: f64,

    #[serde(default)]
    pub unit_price: f64,

    /// Filled in by the resolver; `None` means the line is unmatched
    #[serde(default)]
    pub resolution: Option<LineResolution>,
}

impl LineItem {
    pub fn new(description: &str, external_code: Option<&str>, quantity: f64, unit_price: f64) -> Self {
        LineItem {
            description: description.to_string(),
            external_code: external_code.map(str::to_string),
            quantity,
            unit_price,
            resolution: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolution.is_some()
    }

    /// The code used for lookups and review entries: the external code when
    /// present, otherwise the description.
    pub fn lookup_code(&self) -> &str {
        self.external_code
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| self.description.trim())
    }
}

// ============================================================================
// DUPLICATE / MISMATCH DETAIL
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    ExactOrderNumber,
    NormalizedOrderNumber,
    CounterpartyAmountDate,
    ContentFingerprint,
    SourceIdentity,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchType::ExactOrderNumber => "exact_order_number",
            MatchType::NormalizedOrderNumber => "normalized_order_number",
            MatchType::CounterpartyAmountDate => "counterparty_amount_date",
            MatchType::ContentFingerprint => "content_fingerprint",
            MatchType::SourceIdentity => "source_identity",
        }
    }
}

/// Coarse confidence band shown to operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

/// Verdict of the duplicate detector. Replaced wholesale on re-detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateMatchResult {
    pub matched_order_id: String,
    pub matched_order_number: String,
    pub match_type: MatchType,
    pub confidence: Confidence,
    pub explanation: String,
    /// More than one stored document matched the same strategy
    #[serde(default)]
    pub ambiguous: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MismatchReason {
    PriceDeviation,
    UnmatchedProduct,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceMismatchLine {
    pub line_index: usize,
    pub line_description: String,
    pub external_code: Option<String>,
    /// Catalog price; `None` for unmatched lines
    pub expected_price: Option<f64>,
    pub actual_price: f64,
    /// Positive = counterparty is above catalog
    pub difference_percent: f64,
    pub reason: MismatchReason,
}

// ============================================================================
// INCOMING ORDER
// ============================================================================

/// Record supplied by the intake collaborator (email ingestion, manual
/// form, PDF extractor).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderIntake {
    #[serde(default = "default_kind")]
    pub kind: DocumentKind,
    #[serde(default)]
    pub external_order_number: String,
    #[serde(default)]
    pub counterparty_id: Option<String>,
    #[serde(default)]
    pub counterparty_name: String,
    #[serde(default)]
    pub counterparty_address: Option<String>,
    #[serde(default)]
    pub order_date: Option<NaiveDate>,
    #[serde(default)]
    pub delivery_date: Option<NaiveDate>,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub total_amount: f64,
    #[serde(default)]
    pub line_items: Vec<LineItem>,
    #[serde(default)]
    pub source: SourceMetadata,
}

fn default_kind() -> DocumentKind {
    DocumentKind::PurchaseOrder
}

fn default_currency() -> String {
    "INR".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingOrder {
    pub id: String,
    pub kind: DocumentKind,
    pub external_order_number: String,
    pub counterparty_id: Option<String>,
    pub counterparty_name: String,
    pub counterparty_address: Option<String>,
    pub order_date: Option<NaiveDate>,
    pub delivery_date: Option<NaiveDate>,
    pub currency: String,
    pub total_amount: f64,
    pub line_items: Vec<LineItem>,
    pub source: SourceMetadata,
    pub status: OrderStatus,
    pub duplicate_match: Option<DuplicateMatchResult>,
    pub price_mismatch_details: Option<Vec<PriceMismatchLine>>,
    /// Sales order total recorded when the order was converted
    pub converted_total: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IncomingOrder {
    pub fn from_intake(intake: OrderIntake) -> Self {
        let now = Utc::now();

        IncomingOrder {
            id: uuid::Uuid::new_v4().to_string(),
            kind: intake.kind,
            external_order_number: intake.external_order_number.trim().to_string(),
            counterparty_id: intake.counterparty_id.filter(|id| !id.trim().is_empty()),
            counterparty_name: intake.counterparty_name.trim().to_string(),
            counterparty_address: intake.counterparty_address,
            order_date: intake.order_date,
            delivery_date: intake.delivery_date,
            currency: intake.currency,
            total_amount: intake.total_amount,
            line_items: intake.line_items,
            source: intake.source,
            status: OrderStatus::Pending,
            duplicate_match: None,
            price_mismatch_details: None,
            converted_total: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_order_number(&self) -> bool {
        !self.external_order_number.trim().is_empty()
    }

    pub fn unmatched_lines(&self) -> impl Iterator<Item = &LineItem> {
        self.line_items.iter().filter(|l| !l.is_resolved())
    }
}

// ============================================================================
// TESTS
// ============================================================================
