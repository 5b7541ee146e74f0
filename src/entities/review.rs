// 🔎 Unresolved Code Entry - the human review queue for product codes
//
// Resolution gaps are expected steady-state entries, not errors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterpartyType {
    Customer,
    Vendor,
}

impl CounterpartyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CounterpartyType::Customer => "customer",
            CounterpartyType::Vendor => "vendor",
        }
    }
}

impl FromStr for CounterpartyType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "customer" => Ok(CounterpartyType::Customer),
            "vendor" => Ok(CounterpartyType::Vendor),
            other => Err(format!("unknown counterparty type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Pending,
    Approved,
    Rejected,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::Pending => "pending",
            ReviewStatus::Approved => "approved",
            ReviewStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReviewStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ReviewStatus::Pending),
            "approved" => Ok(ReviewStatus::Approved),
            "rejected" => Ok(ReviewStatus::Rejected),
            other => Err(format!("unknown review status: {}", other)),
        }
    }
}

/// A product code the resolver could not confidently map.
///
/// Invariants: `Approved` always carries `resolved_product_id`; `Rejected`
/// never produces a mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnresolvedCodeEntry {
    pub id: String,
    pub source_document_id: String,
    pub source_document_type: String,
    pub counterparty_type: CounterpartyType,
    pub counterparty_id: Option<String>,
    pub external_code: String,
    pub external_description: String,
    pub external_unit_price: f64,
    pub suggested_product_id: Option<String>,
    /// 0.0 - 1.0
    pub suggestion_confidence: f64,
    pub suggestion_reason: String,
    pub status: ReviewStatus,
    pub resolved_product_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
}

impl UnresolvedCodeEntry {
    pub fn is_pending(&self) -> bool {
        self.status == ReviewStatus::Pending
    }
}

/// Filter for the review UI's queue listing. Empty filter = everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnresolvedFilter {
    #[serde(default)]
    pub status: Option<ReviewStatus>,
    #[serde(default)]
    pub counterparty_type: Option<CounterpartyType>,
    #[serde(default)]
    pub counterparty_id: Option<String>,
    #[serde(default)]
    pub source_document_id: Option<String>,
}

impl UnresolvedFilter {
    pub fn pending() -> Self {
        UnresolvedFilter {
            status: Some(ReviewStatus::Pending),
            ..Default::default()
        }
    }

    pub fn matches(&self, entry: &UnresolvedCodeEntry) -> bool {
        self.status.map_or(true, |s| s == entry.status)
            && self
                .counterparty_type
                .map_or(true, |t| t == entry.counterparty_type)
            && self
                .counterparty_id
                .as_ref()
                .map_or(true, |id| entry.counterparty_id.as_ref() == Some(id))
            && self
                .source_document_id
                .as_ref()
                .map_or(true, |id| &entry.source_document_id == id)
    }
}
