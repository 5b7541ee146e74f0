// 🔍 Duplicate Detector - is this document a re-submission?
//
// Five strategies, least ambiguous first. The first strategy with a hit
// decides the verdict; confidence reflects HOW it matched:
//   1. Exact document number          → high
//   2. Normalized document number     → high
//   3. Counterparty + amount + date   → medium
//   4. Content fingerprint            → medium  (one side lacks a number)
//   5. Source identity (email+file)   → low

use crate::entities::{
    Confidence, DocumentKind, DuplicateMatchResult, IncomingOrder, MatchType,
};
use chrono::NaiveDate;
use sha2::{Digest, Sha256};

/// Float noise allowed on top of the amount epsilon comparison.
const AMOUNT_NOISE: f64 = 1e-9;

const STRATEGIES: [MatchType; 5] = [
    MatchType::ExactOrderNumber,
    MatchType::NormalizedOrderNumber,
    MatchType::CounterpartyAmountDate,
    MatchType::ContentFingerprint,
    MatchType::SourceIdentity,
];

// ============================================================================
// FIELD EXTRACTION
// ============================================================================

/// The values the detector compares, pulled out per document kind.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchFields {
    pub number: String,
    pub normalized_number: String,
    pub counterparty: String,
    pub amount: f64,
    pub document_date: Option<NaiveDate>,
    pub fingerprint: Option<String>,
    pub source_identity: Option<String>,
}

impl MatchFields {
    pub fn extract(order: &IncomingOrder) -> Self {
        // Bills frequently carry only a due/receipt date
        let document_date = match order.kind {
            DocumentKind::PurchaseOrder => order.order_date,
            DocumentKind::VendorBill => order.order_date.or(order.delivery_date),
        };

        MatchFields {
            number: order.external_order_number.clone(),
            normalized_number: normalize_order_number(&order.external_order_number),
            counterparty: normalize_text(&order.counterparty_name),
            amount: order.total_amount,
            document_date,
            fingerprint: content_fingerprint(order),
            source_identity: order.source.identity(),
        }
    }

    fn has_number(&self) -> bool {
        !self.number.trim().is_empty()
    }
}

/// Strip whitespace and punctuation, lower-case, and drop leading zeros of
/// every digit run: "PO-0001001" → "po1001".
pub fn normalize_order_number(number: &str) -> String {
    let cleaned: Vec<char> = number
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect();

    let mut normalized = String::with_capacity(cleaned.len());
    let mut i = 0;
    while i < cleaned.len() {
        if cleaned[i].is_ascii_digit() {
            let start = i;
            while i < cleaned.len() && cleaned[i].is_ascii_digit() {
                i += 1;
            }
            let run: String = cleaned[start..i].iter().collect();
            let trimmed = run.trim_start_matches('0');
            normalized.push_str(if trimmed.is_empty() { "0" } else { trimmed });
        } else {
            normalized.push(cleaned[i]);
            i += 1;
        }
    }

    normalized
}

/// Lower-case, trim, collapse internal whitespace.
fn normalize_text(s: &str) -> String {
    s.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// SHA-256 over counterparty + sorted (description, quantity, unit price).
/// Numbers are hashed at full precision. `None` for documents without
/// line items.
pub fn content_fingerprint(order: &IncomingOrder) -> Option<String> {
    if order.line_items.is_empty() {
        return None;
    }

    let mut lines: Vec<String> = order
        .line_items
        .iter()
        .map(|l| {
            format!(
                "{}|{}|{}",
                normalize_text(&l.description),
                l.quantity,
                l.unit_price
            )
        })
        .collect();
    lines.sort();

    let mut hasher = Sha256::new();
    hasher.update(normalize_text(&order.counterparty_name));
    for line in &lines {
        hasher.update("\n");
        hasher.update(line);
    }
    Some(format!("{:x}", hasher.finalize()))
}

// ============================================================================
// DUPLICATE DETECTOR
// ============================================================================

pub struct DuplicateDetector {
    /// Two totals closer than this are equal (default: 0.01)
    pub amount_epsilon: f64,
}

impl DuplicateDetector {
    pub fn new() -> Self {
        DuplicateDetector {
            amount_epsilon: 0.01,
        }
    }

    pub fn with_epsilon(amount_epsilon: f64) -> Self {
        DuplicateDetector { amount_epsilon }
    }

    /// Compare `order` against previously stored documents.
    ///
    /// Only documents of the same kind are considered; `existing` is
    /// expected in intake order so the oldest match is reported.
    pub fn detect(
        &self,
        order: &IncomingOrder,
        existing: &[IncomingOrder],
    ) -> Option<DuplicateMatchResult> {
        let fields = MatchFields::extract(order);

        let candidates: Vec<(&IncomingOrder, MatchFields)> = existing
            .iter()
            .filter(|o| o.kind == order.kind && o.id != order.id)
            .map(|o| (o, MatchFields::extract(o)))
            .collect();

        for strategy in STRATEGIES {
            let hits: Vec<&(&IncomingOrder, MatchFields)> = candidates
                .iter()
                .filter(|(_, other)| self.strategy_matches(strategy, &fields, other))
                .collect();

            if let Some((matched, matched_fields)) = hits.first() {
                let verdict = self.verdict(
                    strategy,
                    order.kind,
                    &fields,
                    matched,
                    matched_fields,
                    hits.len(),
                );

                tracing::info!(
                    order_number = %order.external_order_number,
                    matched_order = %verdict.matched_order_id,
                    match_type = verdict.match_type.as_str(),
                    confidence = ?verdict.confidence,
                    "duplicate detected"
                );
                return Some(verdict);
            }
        }

        None
    }

    fn strategy_matches(&self, strategy: MatchType, a: &MatchFields, b: &MatchFields) -> bool {
        match strategy {
            MatchType::ExactOrderNumber => a.has_number() && a.number == b.number,

            MatchType::NormalizedOrderNumber => {
                !a.normalized_number.is_empty() && a.normalized_number == b.normalized_number
            }

            MatchType::CounterpartyAmountDate => {
                !a.counterparty.is_empty()
                    && a.counterparty == b.counterparty
                    && self.amounts_equal(a.amount, b.amount)
                    && a.document_date.is_some()
                    && a.document_date == b.document_date
            }

            MatchType::ContentFingerprint => {
                (!a.has_number() || !b.has_number())
                    && a.fingerprint.is_some()
                    && a.fingerprint == b.fingerprint
            }

            MatchType::SourceIdentity => {
                a.source_identity.is_some() && a.source_identity == b.source_identity
            }
        }
    }

    /// Strictly closer than epsilon; amounts a whole epsilon apart differ.
    fn amounts_equal(&self, a: f64, b: f64) -> bool {
        let diff = (a - b).abs();
        if self.amount_epsilon <= AMOUNT_NOISE {
            return diff <= AMOUNT_NOISE;
        }
        diff < self.amount_epsilon - AMOUNT_NOISE
    }

    fn verdict(
        &self,
        strategy: MatchType,
        kind: DocumentKind,
        fields: &MatchFields,
        matched: &IncomingOrder,
        matched_fields: &MatchFields,
        hit_count: usize,
    ) -> DuplicateMatchResult {
        let base = match strategy {
            MatchType::ExactOrderNumber | MatchType::NormalizedOrderNumber => Confidence::High,
            MatchType::CounterpartyAmountDate | MatchType::ContentFingerprint => Confidence::Medium,
            MatchType::SourceIdentity => Confidence::Low,
        };

        let mut explanation = match strategy {
            MatchType::ExactOrderNumber => format!(
                "Exact {} match: '{}' already recorded as order {}",
                kind.number_label(),
                fields.number,
                matched.id
            ),
            MatchType::NormalizedOrderNumber => format!(
                "Normalized {} match: '{}' ≈ '{}' (both '{}')",
                kind.number_label(),
                fields.number,
                matched_fields.number,
                fields.normalized_number
            ),
            MatchType::CounterpartyAmountDate => format!(
                "Same counterparty '{}', amount {:.2} ≈ {:.2}, date {}",
                matched.counterparty_name,
                fields.amount,
                matched_fields.amount,
                fields
                    .document_date
                    .map(|d| d.to_string())
                    .unwrap_or_default()
            ),
            MatchType::ContentFingerprint => format!(
                "Identical counterparty and line items as order {} ({} lines)",
                matched.id,
                matched.line_items.len()
            ),
            MatchType::SourceIdentity => format!(
                "Same source email and attachment as order {}",
                matched.id
            ),
        };

        let ambiguous = hit_count > 1;
        let confidence = if ambiguous {
            tracing::warn!(
                matched_order = %matched.id,
                hit_count,
                match_type = strategy.as_str(),
                "ambiguous duplicate: several stored documents match the same strategy"
            );
            explanation.push_str(&format!(
                " [ambiguous: {} stored documents match; review required]",
                hit_count
            ));
            base.min(Confidence::Medium)
        } else {
            base
        };

        DuplicateMatchResult {
            matched_order_id: matched.id.clone(),
            matched_order_number: matched.external_order_number.clone(),
            match_type: strategy,
            confidence,
            explanation,
            ambiguous,
        }
    }
}

impl Default for DuplicateDetector {
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
    use crate::entities::{LineItem, OrderIntake, SourceMetadata};

    fn create_test_order(number: &str, counterparty: &str, total: f64, date: (i32, u32, u32)) -> IncomingOrder {
        IncomingOrder::from_intake(OrderIntake {
            kind: DocumentKind::PurchaseOrder,
            external_order_number: number.to_string(),
            counterparty_id: None,
            counterparty_name: counterparty.to_string(),
            counterparty_address: None,
            order_date: NaiveDate::from_ymd_opt(date.0, date.1, date.2),
            delivery_date: None,
            currency: "INR".to_string(),
            total_amount: total,
            line_items: vec![LineItem::new("Steel Rod 10mm", Some("ACM-7"), 100.0, 50.0)],
            source: SourceMetadata::Manual,
        })
    }

    #[test]
    fn test_normalize_order_number() {
        assert_eq!(normalize_order_number("PO-1001"), "po1001");
        assert_eq!(normalize_order_number(" po 1001 "), "po1001");
        assert_eq!(normalize_order_number("PO/0001001"), "po1001");
        assert_eq!(normalize_order_number("INV-000"), "inv0");
        assert_eq!(normalize_order_number("--"), "");
    }

    #[test]
    fn test_exact_match() {
        let detector = DuplicateDetector::new();
        let first = create_test_order("PO-1001", "Acme", 5000.0, (2024, 3, 1));
        let second = create_test_order("PO-1001", "Other Co", 1.0, (2024, 4, 1));

        let verdict = detector.detect(&second, &[first.clone()]).unwrap();

        assert_eq!(verdict.match_type, MatchType::ExactOrderNumber);
        assert_eq!(verdict.confidence, Confidence::High);
        assert_eq!(verdict.matched_order_id, first.id);
        assert!(!verdict.ambiguous);
    }

    #[test]
    fn test_normalized_match_case_insensitive() {
        let detector = DuplicateDetector::new();
        let first = create_test_order("PO-1001", "Acme", 5000.0, (2024, 3, 1));
        let second = create_test_order("po1001", "Acme", 5000.0, (2024, 3, 1));

        let verdict = detector.detect(&second, &[first]).unwrap();

        assert_eq!(verdict.match_type, MatchType::NormalizedOrderNumber);
        assert_eq!(verdict.confidence, Confidence::High);
    }

    #[test]
    fn test_higher_priority_strategy_wins() {
        let detector = DuplicateDetector::new();
        // Matches by counterparty+amount+date AND by normalized number
        let by_amount = create_test_order("X-1", "Acme", 5000.0, (2024, 3, 1));
        let by_number = create_test_order("PO 1001", "Someone Else", 10.0, (2023, 1, 1));
        let incoming = create_test_order("po-1001", "Acme", 5000.0, (2024, 3, 1));

        let verdict = detector
            .detect(&incoming, &[by_amount, by_number.clone()])
            .unwrap();

        assert_eq!(verdict.match_type, MatchType::NormalizedOrderNumber);
        assert_eq!(verdict.matched_order_id, by_number.id);
    }

    #[test]
    fn test_counterparty_amount_date_match() {
        let detector = DuplicateDetector::new();
        let first = create_test_order("A-1", "  ACME  Industries ", 5000.004, (2024, 3, 1));
        let second = create_test_order("B-2", "acme industries", 5000.0, (2024, 3, 1));

        let verdict = detector.detect(&second, &[first]).unwrap();

        assert_eq!(verdict.match_type, MatchType::CounterpartyAmountDate);
        assert_eq!(verdict.confidence, Confidence::Medium);
    }

    #[test]
    fn test_no_match_amount_off_by_a_cent() {
        let detector = DuplicateDetector::new();
        let first = create_test_order("A-1", "Acme", 5000.01, (2024, 3, 1));
        let second = create_test_order("B-2", "Acme", 5000.00, (2024, 3, 1));

        assert!(detector.detect(&second, &[first]).is_none());
    }

    #[test]
    fn test_no_match_different_dates() {
        let detector = DuplicateDetector::new();
        let first = create_test_order("A-1", "Acme", 5000.0, (2024, 3, 1));
        let second = create_test_order("B-2", "Acme", 5000.0, (2024, 3, 2));

        assert!(detector.detect(&second, &[first]).is_none());
    }

    #[test]
    fn test_fingerprint_match_without_number() {
        let detector = DuplicateDetector::new();
        let first = create_test_order("", "Acme", 5000.0, (2024, 3, 1));
        let second = create_test_order("", "ACME", 4000.0, (2024, 5, 1));

        let verdict = detector.detect(&second, &[first]).unwrap();

        assert_eq!(verdict.match_type, MatchType::ContentFingerprint);
        assert_eq!(verdict.confidence, Confidence::Medium);
    }

    #[test]
    fn test_fingerprint_ignored_when_both_numbered() {
        let detector = DuplicateDetector::new();
        // Repeat order: same content, different PO numbers and dates
        let first = create_test_order("PO-1", "Acme", 5000.0, (2024, 3, 1));
        let second = create_test_order("PO-2", "Acme", 5000.0, (2024, 4, 1));

        assert!(detector.detect(&second, &[first]).is_none());
    }

    #[test]
    fn test_source_identity_is_low_confidence() {
        let detector = DuplicateDetector::new();
        let source = SourceMetadata::Email {
            subject: Some("Order".to_string()),
            from: Some("buyer@acme.test".to_string()),
            date: None,
            message_id: Some("<m1@acme.test>".to_string()),
            attachment: Some("order.pdf".to_string()),
        };
        let mut first = create_test_order("A-1", "Acme", 10.0, (2024, 3, 1));
        first.source = source.clone();
        let mut second = create_test_order("B-2", "Acme Corp", 20.0, (2024, 3, 2));
        second.source = source;

        let verdict = detector.detect(&second, &[first]).unwrap();

        assert_eq!(verdict.match_type, MatchType::SourceIdentity);
        assert_eq!(verdict.confidence, Confidence::Low);
    }

    #[test]
    fn test_tie_within_strategy_is_flagged() {
        let detector = DuplicateDetector::new();
        let first = create_test_order("PO-1001", "Acme", 5000.0, (2024, 3, 1));
        let second = create_test_order("PO-1001", "Acme", 5000.0, (2024, 3, 1));
        let incoming = create_test_order("PO-1001", "Acme", 5000.0, (2024, 3, 1));

        let verdict = detector
            .detect(&incoming, &[first.clone(), second])
            .unwrap();

        assert_eq!(verdict.match_type, MatchType::ExactOrderNumber);
        assert_eq!(verdict.confidence, Confidence::Medium);
        assert!(verdict.ambiguous);
        assert_eq!(verdict.matched_order_id, first.id);
    }

    #[test]
    fn test_other_document_kind_ignored() {
        let detector = DuplicateDetector::new();
        let mut bill = create_test_order("PO-1001", "Acme", 5000.0, (2024, 3, 1));
        bill.kind = DocumentKind::VendorBill;
        let incoming = create_test_order("PO-1001", "Acme", 5000.0, (2024, 3, 1));

        assert!(detector.detect(&incoming, &[bill]).is_none());
    }

    #[test]
    fn test_exact_match_compares_raw_number() {
        let detector = DuplicateDetector::new();
        let first = create_test_order("PO-1001", "Acme", 5000.0, (2024, 3, 1));
        let mut second = create_test_order("PO-1001", "Acme", 5000.0, (2024, 3, 1));
        second.external_order_number = "PO-1001 ".to_string();

        let verdict = detector.detect(&second, &[first]).unwrap();

        assert_eq!(verdict.match_type, MatchType::NormalizedOrderNumber);
    }

    #[test]
    fn test_fingerprint_keeps_full_precision() {
        let first = create_test_order("", "Acme", 5000.0, (2024, 3, 1));
        let mut second = first.clone();
        second.line_items[0].unit_price = 50.004;
        let mut third = first.clone();
        third.line_items[0].quantity = 100.0004;

        assert_ne!(content_fingerprint(&first), content_fingerprint(&second));
        assert_ne!(content_fingerprint(&first), content_fingerprint(&third));

        let detector = DuplicateDetector::new();
        second.id = "other".to_string();
        second.order_date = NaiveDate::from_ymd_opt(2024, 6, 1);
        assert!(detector.detect(&second, &[first]).is_none());
    }

    #[test]
    fn test_self_is_not_a_duplicate() {
        let detector = DuplicateDetector::new();
        let order = create_test_order("PO-1001", "Acme", 5000.0, (2024, 3, 1));

        assert!(detector.detect(&order, &[order.clone()]).is_none());
    }
}
