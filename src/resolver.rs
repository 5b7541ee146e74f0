// 🧭 Code Resolver - external product code → canonical catalog product
//
// Per line item, first hit wins:
//   0. A review decision already recorded for this document + code
//   1. Active counterparty mapping
//   2. Catalog internal code (case-insensitive)
//   3. Catalog product name == code or description (case-insensitive)
//   4. Otherwise queue an UnresolvedCodeEntry with the best fuzzy suggestion
//
// Suggestions never resolve a line on their own; a human has to approve them.

use crate::config::PipelineConfig;
use crate::entities::{
    Confidence, IncomingOrder, LineItem, LineResolution, Product, ResolutionMethod, ReviewStatus,
    UnresolvedCodeEntry,
};
use crate::error::StoreResult;
use crate::store::{CatalogStore, ReviewQueue};
use chrono::Utc;
use std::collections::BTreeSet;

// ============================================================================
// OUTCOMES
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum LineOutcome {
    Resolved(LineResolution),
    /// A new review entry was queued
    Queued(UnresolvedCodeEntry),
    /// A pending entry for this document + code already exists
    AwaitingReview { entry_id: String },
    /// A reviewer rejected this code for this document
    RejectedByReviewer { entry_id: String },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolutionSummary {
    pub resolved: usize,
    pub queued: Vec<String>,
    pub awaiting_review: usize,
    pub rejected: usize,
}

impl ResolutionSummary {
    pub fn unmatched(&self) -> usize {
        self.queued.len() + self.awaiting_review + self.rejected
    }
}

/// Best fuzzy candidate for an unresolved code.
#[derive(Debug, Clone, PartialEq)]
pub struct Suggestion {
    pub product_id: String,
    pub score: f64,
    pub band: Confidence,
    pub reason: String,
}

// ============================================================================
// CODE RESOLVER
// ============================================================================

pub struct CodeResolver {
    pub high_confidence: f64,
    pub medium_confidence: f64,
}

impl CodeResolver {
    pub fn new() -> Self {
        Self::from_config(&PipelineConfig::default())
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        CodeResolver {
            high_confidence: config.high_confidence,
            medium_confidence: config.medium_confidence,
        }
    }

    /// Resolve every line of `order` in place, queueing review entries for
    /// the lines that stay unmatched.
    pub fn resolve_order<S>(&self, store: &S, order: &mut IncomingOrder) -> StoreResult<ResolutionSummary>
    where
        S: CatalogStore + ReviewQueue + ?Sized,
    {
        let mut summary = ResolutionSummary::default();
        let mut catalog: Option<Vec<Product>> = None;

        for i in 0..order.line_items.len() {
            let outcome = {
                let line = &order.line_items[i];
                self.resolve_line_with(store, order, line, &mut catalog)?
            };

            order.line_items[i].resolution = None;
            match outcome {
                LineOutcome::Resolved(resolution) => {
                    order.line_items[i].resolution = Some(resolution);
                    summary.resolved += 1;
                }
                LineOutcome::Queued(entry) => summary.queued.push(entry.id),
                LineOutcome::AwaitingReview { .. } => summary.awaiting_review += 1,
                LineOutcome::RejectedByReviewer { .. } => summary.rejected += 1,
            }
        }

        tracing::debug!(
            order_id = %order.id,
            resolved = summary.resolved,
            unmatched = summary.unmatched(),
            "line items resolved"
        );

        Ok(summary)
    }

    /// Resolve a single line of `order`.
    pub fn resolve_line<S>(&self, store: &S, order: &IncomingOrder, line: &LineItem) -> StoreResult<LineOutcome>
    where
        S: CatalogStore + ReviewQueue + ?Sized,
    {
        let mut catalog = None;
        self.resolve_line_with(store, order, line, &mut catalog)
    }

    fn resolve_line_with<S>(
        &self,
        store: &S,
        order: &IncomingOrder,
        line: &LineItem,
        catalog: &mut Option<Vec<Product>>,
    ) -> StoreResult<LineOutcome>
    where
        S: CatalogStore + ReviewQueue + ?Sized,
    {
        let code = line.lookup_code();

        // 0. Earlier review decision for this document
        if let Some(entry) = store.find_unresolved(&order.id, code)? {
            match entry.status {
                ReviewStatus::Approved => {
                    if let Some(resolution) = approved_resolution(store, &entry)? {
                        return Ok(LineOutcome::Resolved(resolution));
                    }
                }
                ReviewStatus::Rejected => {
                    return Ok(LineOutcome::RejectedByReviewer { entry_id: entry.id });
                }
                ReviewStatus::Pending => {
                    if let Some(resolution) = self.lookup(store, order, line)? {
                        return Ok(LineOutcome::Resolved(resolution));
                    }
                    return Ok(LineOutcome::AwaitingReview { entry_id: entry.id });
                }
            }
        }

        // 1-3. Deterministic lookups
        if let Some(resolution) = self.lookup(store, order, line)? {
            return Ok(LineOutcome::Resolved(resolution));
        }

        // 4. Queue for review
        if catalog.is_none() {
            *catalog = Some(store.list_active_products()?);
        }
        let products = catalog.as_deref().unwrap_or_default();
        let suggestion = self.suggest(line, products);
        let entry = build_entry(order, line, suggestion.as_ref());
        store.insert_unresolved(&entry)?;

        tracing::info!(
            order_id = %order.id,
            external_code = %entry.external_code,
            suggested_product = ?entry.suggested_product_id,
            confidence = entry.suggestion_confidence,
            "unresolved code queued for review"
        );

        Ok(LineOutcome::Queued(entry))
    }

    /// Steps 1-3: mapping, internal code, product name.
    fn lookup<S>(&self, store: &S, order: &IncomingOrder, line: &LineItem) -> StoreResult<Option<LineResolution>>
    where
        S: CatalogStore + ?Sized,
    {
        let code = line.lookup_code();
        if code.is_empty() {
            return Ok(None);
        }

        if let Some(counterparty_id) = order.counterparty_id.as_deref() {
            if let Some(product) = store.get_mapping(counterparty_id, code)? {
                return Ok(Some(resolution(&product, ResolutionMethod::CounterpartyMapping)));
            }
        }

        if let Some(product) = store.get_product_by_code(code)? {
            return Ok(Some(resolution(&product, ResolutionMethod::InternalCode)));
        }

        let description = line.description.trim();
        for candidate in [code, description] {
            if candidate.is_empty() {
                continue;
            }
            let mut by_name = store.find_products_by_name(candidate)?;
            match by_name.len() {
                0 => {}
                1 => {
                    let product = by_name.remove(0);
                    return Ok(Some(resolution(&product, ResolutionMethod::ProductName)));
                }
                n => {
                    tracing::warn!(
                        name = candidate,
                        matches = n,
                        "several catalog products share this name, not resolving"
                    );
                }
            }
        }

        Ok(None)
    }

    /// Best fuzzy candidate across the catalog, if it clears the medium band.
    pub fn suggest(&self, line: &LineItem, products: &[Product]) -> Option<Suggestion> {
        let mut queries: Vec<&str> = Vec::new();
        if let Some(code) = line.external_code.as_deref().map(str::trim) {
            if !code.is_empty() {
                queries.push(code);
            }
        }
        if !line.description.trim().is_empty() {
            queries.push(line.description.trim());
        }

        let mut best: Option<(f64, &Product, Similarity, &str, &str)> = None;

        for product in products {
            for target in product.match_names() {
                for query in &queries {
                    let sim = similarity(query, target);
                    if best.as_ref().map_or(true, |(score, ..)| sim.score > *score) {
                        best = Some((sim.score, product, sim, *query, target));
                    }
                }
            }
        }

        let (score, product, sim, query, target) = best?;
        let band = if score >= self.high_confidence {
            Confidence::High
        } else if score >= self.medium_confidence {
            Confidence::Medium
        } else {
            return None;
        };

        Some(Suggestion {
            product_id: product.id.clone(),
            score,
            band,
            reason: format!(
                "{} '{}' ~ '{}' ({:.2}, {:?})",
                sim.metric.label(),
                query,
                target,
                score,
                band
            )
            .to_lowercase(),
        })
    }
}

impl Default for CodeResolver {
    fn default() -> Self {
        Self::new()
    }
}

fn resolution(product: &Product, method: ResolutionMethod) -> LineResolution {
    LineResolution {
        product_id: product.id.clone(),
        product_code: product.internal_code.clone(),
        method,
    }
}

fn approved_resolution<S>(store: &S, entry: &UnresolvedCodeEntry) -> StoreResult<Option<LineResolution>>
where
    S: CatalogStore + ?Sized,
{
    let Some(product_id) = entry.resolved_product_id.as_deref() else {
        tracing::warn!(entry_id = %entry.id, "approved entry without a resolved product");
        return Ok(None);
    };

    match store.get_product(product_id)? {
        Some(product) => Ok(Some(resolution(&product, ResolutionMethod::ReviewApproval))),
        None => {
            tracing::warn!(entry_id = %entry.id, product_id, "approved product no longer exists");
            Ok(None)
        }
    }
}

fn build_entry(order: &IncomingOrder, line: &LineItem, suggestion: Option<&Suggestion>) -> UnresolvedCodeEntry {
    UnresolvedCodeEntry {
        id: uuid::Uuid::new_v4().to_string(),
        source_document_id: order.id.clone(),
        source_document_type: order.kind.as_str().to_string(),
        counterparty_type: order.kind.counterparty_type(),
        counterparty_id: order.counterparty_id.clone(),
        external_code: line.lookup_code().to_string(),
        external_description: line.description.trim().to_string(),
        external_unit_price: line.unit_price,
        suggested_product_id: suggestion.map(|s| s.product_id.clone()),
        suggestion_confidence: suggestion.map_or(0.0, |s| s.score),
        suggestion_reason: suggestion
            .map(|s| s.reason.clone())
            .unwrap_or_else(|| "no catalog product is similar enough".to_string()),
        status: ReviewStatus::Pending,
        resolved_product_id: None,
        created_at: Utc::now(),
        reviewed_at: None,
    }
}

// ============================================================================
// SIMILARITY SCORING
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimilarityMetric {
    TokenOverlap,
    Substring,
    EditDistance,
}

impl SimilarityMetric {
    fn label(&self) -> &'static str {
        match self {
            SimilarityMetric::TokenOverlap => "token overlap",
            SimilarityMetric::Substring => "substring",
            SimilarityMetric::EditDistance => "edit distance",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Similarity {
    pub score: f64,
    pub metric: SimilarityMetric,
}

/// Score in 0.0..=1.0; the strongest of token overlap, substring
/// containment and edit distance.
pub fn similarity(a: &str, b: &str) -> Similarity {
    let tokens_a = tokens(a);
    let tokens_b = tokens(b);

    let candidates = [
        Similarity {
            score: token_overlap(&tokens_a, &tokens_b),
            metric: SimilarityMetric::TokenOverlap,
        },
        Similarity {
            score: containment(&tokens_a.join(" "), &tokens_b.join(" ")),
            metric: SimilarityMetric::Substring,
        },
        Similarity {
            score: edit_similarity(&tokens_a.concat(), &tokens_b.concat()),
            metric: SimilarityMetric::EditDistance,
        },
    ];

    let mut best = candidates[0];
    for candidate in &candidates[1..] {
        if candidate.score > best.score {
            best = *candidate;
        }
    }
    best
}

/// Lower-cased alphanumeric tokens in their original order.
fn tokens(s: &str) -> Vec<String> {
    s.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Dice coefficient over distinct tokens.
fn token_overlap(a: &[String], b: &[String]) -> f64 {
    let a: BTreeSet<&String> = a.iter().collect();
    let b: BTreeSet<&String> = b.iter().collect();
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let shared = a.intersection(&b).count();
    2.0 * shared as f64 / (a.len() + b.len()) as f64
}

/// Length ratio when one string contains the other.
fn containment(a: &str, b: &str) -> f64 {
    let (shorter, longer) = if a.chars().count() <= b.chars().count() {
        (a, b)
    } else {
        (b, a)
    };
    if shorter.is_empty() || !longer.contains(shorter) {
        return 0.0;
    }
    shorter.chars().count() as f64 / longer.chars().count() as f64
}

fn edit_similarity(a: &str, b: &str) -> f64 {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 0.0;
    }
    1.0 - levenshtein_distance(a, b) as f64 / longest as f64
}

/// Minimum number of single-character insertions, deletions or
/// substitutions turning `a` into `b`.
fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];

    for i in 1..=a.len() {
        current[0] = i;
        for j in 1..=b.len() {
            let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
            current[j] = (previous[j] + 1)
                .min(current[j - 1] + 1)
                .min(previous[j - 1] + cost);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[b.len()]
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteStore;
    use crate::entities::{CounterpartyProductMapping, DocumentKind, OrderIntake, SourceMetadata};

    fn create_test_store() -> (SqliteStore, Product) {
        let store = SqliteStore::open_in_memory().unwrap();
        let product = Product::new("SR-10-A", "Steel Rod 10mm — Grade A", "pcs", 50.0);
        store.create_product(&product).unwrap();
        (store, product)
    }

    fn create_test_order(lines: Vec<LineItem>) -> IncomingOrder {
        IncomingOrder::from_intake(OrderIntake {
            kind: DocumentKind::PurchaseOrder,
            external_order_number: "PO-1".to_string(),
            counterparty_id: Some("acme".to_string()),
            counterparty_name: "Acme".to_string(),
            counterparty_address: None,
            order_date: None,
            delivery_date: None,
            currency: "INR".to_string(),
            total_amount: 0.0,
            line_items: lines,
            source: SourceMetadata::Manual,
        })
    }

    #[test]
    fn test_levenshtein_distance() {
        assert_eq!(levenshtein_distance("kitten", "sitting"), 3);
        assert_eq!(levenshtein_distance("", "abc"), 3);
        assert_eq!(levenshtein_distance("acm7", "acm7"), 0);
    }

    #[test]
    fn test_similarity_token_overlap() {
        let sim = similarity("Steel Rod 10mm", "Steel Rod 10mm — Grade A");

        assert!((sim.score - 0.75).abs() < 1e-9);
        assert_eq!(sim.metric, SimilarityMetric::TokenOverlap);
    }

    #[test]
    fn test_similarity_unrelated_is_low() {
        assert!(similarity("Copper Wire", "Steel Rod 10mm").score < 0.3);
        assert_eq!(similarity("", "Steel Rod").score, 0.0);
    }

    #[test]
    fn test_mapping_resolves_first() {
        let (store, product) = create_test_store();
        let other = Product::new("ACM-7", "Something Else", "pcs", 10.0);
        store.create_product(&other).unwrap();
        store
            .upsert_mapping(&CounterpartyProductMapping::new("acme", "ACM-7", &product.id))
            .unwrap();

        let order = create_test_order(vec![LineItem::new("Rod", Some("acm-7"), 1.0, 50.0)]);
        let outcome = CodeResolver::new()
            .resolve_line(&store, &order, &order.line_items[0])
            .unwrap();

        match outcome {
            LineOutcome::Resolved(r) => {
                assert_eq!(r.product_id, product.id);
                assert_eq!(r.method, ResolutionMethod::CounterpartyMapping);
            }
            other => panic!("expected resolution, got {:?}", other),
        }
    }

    #[test]
    fn test_internal_code_case_insensitive() {
        let (store, product) = create_test_store();
        let order = create_test_order(vec![LineItem::new("", Some("sr-10-a"), 1.0, 50.0)]);

        let outcome = CodeResolver::new()
            .resolve_line(&store, &order, &order.line_items[0])
            .unwrap();

        assert_eq!(
            outcome,
            LineOutcome::Resolved(LineResolution {
                product_id: product.id.clone(),
                product_code: "SR-10-A".to_string(),
                method: ResolutionMethod::InternalCode,
            })
        );
    }

    #[test]
    fn test_description_matches_product_name() {
        let (store, product) = create_test_store();
        let order = create_test_order(vec![LineItem::new(
            "steel rod 10mm — grade a",
            Some("XYZ-1"),
            1.0,
            50.0,
        )]);

        let outcome = CodeResolver::new()
            .resolve_line(&store, &order, &order.line_items[0])
            .unwrap();

        match outcome {
            LineOutcome::Resolved(r) => {
                assert_eq!(r.product_id, product.id);
                assert_eq!(r.method, ResolutionMethod::ProductName);
            }
            other => panic!("expected resolution, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_code_queues_medium_suggestion() {
        let (store, product) = create_test_store();
        let mut order = create_test_order(vec![LineItem::new("Steel Rod 10mm", Some("ACM-7"), 5.0, 50.0)]);

        let summary = CodeResolver::new().resolve_order(&store, &mut order).unwrap();

        assert_eq!(summary.queued.len(), 1);
        assert!(!order.line_items[0].is_resolved());

        let entry = store.get_unresolved(&summary.queued[0]).unwrap().unwrap();
        assert_eq!(entry.status, ReviewStatus::Pending);
        assert_eq!(entry.external_code, "ACM-7");
        assert_eq!(entry.suggested_product_id, Some(product.id));
        assert!(entry.suggestion_confidence >= 0.60 && entry.suggestion_confidence < 0.85);
    }

    #[test]
    fn test_no_candidate_means_no_suggestion() {
        let (store, _) = create_test_store();
        let mut order = create_test_order(vec![LineItem::new("Copper Wire", Some("CW-9"), 5.0, 10.0)]);

        let summary = CodeResolver::new().resolve_order(&store, &mut order).unwrap();

        let entry = store.get_unresolved(&summary.queued[0]).unwrap().unwrap();
        assert_eq!(entry.suggested_product_id, None);
        assert_eq!(entry.suggestion_confidence, 0.0);
    }

    #[test]
    fn test_pending_entry_not_queued_twice() {
        let (store, _) = create_test_store();
        let mut order = create_test_order(vec![LineItem::new("Copper Wire", Some("CW-9"), 5.0, 10.0)]);
        let resolver = CodeResolver::new();

        resolver.resolve_order(&store, &mut order).unwrap();
        let second = resolver.resolve_order(&store, &mut order).unwrap();

        assert!(second.queued.is_empty());
        assert_eq!(second.awaiting_review, 1);
        let filter = crate::entities::UnresolvedFilter {
            source_document_id: Some(order.id.clone()),
            ..Default::default()
        };
        assert_eq!(store.list_unresolved(&filter).unwrap().len(), 1);
    }

    #[test]
    fn test_review_decisions_are_honoured() {
        let (store, product) = create_test_store();
        let mut order = create_test_order(vec![
            LineItem::new("Steel Rod 10mm", Some("ACM-7"), 5.0, 50.0),
            LineItem::new("Copper Wire", Some("CW-9"), 5.0, 10.0),
        ]);
        let resolver = CodeResolver::new();
        let first = resolver.resolve_order(&store, &mut order).unwrap();

        store
            .resolve_entry_if_pending(&first.queued[0], ReviewStatus::Approved, Some(&product.id))
            .unwrap();
        store
            .resolve_entry_if_pending(&first.queued[1], ReviewStatus::Rejected, None)
            .unwrap();

        let second = resolver.resolve_order(&store, &mut order).unwrap();

        assert_eq!(second.resolved, 1);
        assert_eq!(second.rejected, 1);
        assert!(second.queued.is_empty());
        assert_eq!(
            order.line_items[0].resolution.as_ref().map(|r| r.method),
            Some(ResolutionMethod::ReviewApproval)
        );
        assert!(!order.line_items[1].is_resolved());
    }
}
