// 📐 Validation - intake records and catalog invariants
//
// Intake validation failures reject the document entirely: the order is
// never created. Every problem is collected, not just the first.

use crate::entities::{CounterpartyProductMapping, OrderIntake, Product};
use std::fmt;

// ============================================================================
// VALIDATION ERRORS
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
    pub context: String,
}

impl ValidationError {
    fn new(context: &str, field: &str, message: impl Into<String>) -> Self {
        ValidationError {
            field: field.to_string(),
            message: message.into(),
            context: context.to_string(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.context, self.field, self.message)
    }
}

/// All problems found in one record.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationErrors(pub Vec<ValidationError>);

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reasons: Vec<String> = self.0.iter().map(|e| e.to_string()).collect();
        write!(f, "validation failed: {}", reasons.join("; "))
    }
}

impl std::error::Error for ValidationErrors {}

impl ValidationErrors {
    pub fn fields(&self) -> Vec<&str> {
        self.0.iter().map(|e| e.field.as_str()).collect()
    }
}

pub type ValidationResult = Result<(), ValidationErrors>;

fn finish(errors: Vec<ValidationError>) -> ValidationResult {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidationErrors(errors))
    }
}

// ============================================================================
// INTAKE
// ============================================================================

/// Validate a record handed over by the intake collaborator.
pub fn validate_intake(intake: &OrderIntake) -> ValidationResult {
    const CTX: &str = "Intake";
    let mut errors = Vec::new();

    if intake.counterparty_name.trim().is_empty() {
        errors.push(ValidationError::new(CTX, "counterparty_name", "Required field is empty"));
    }

    if intake.currency.trim().is_empty() {
        errors.push(ValidationError::new(CTX, "currency", "Required field is empty"));
    }

    if !intake.total_amount.is_finite() || intake.total_amount < 0.0 {
        errors.push(ValidationError::new(
            CTX,
            "total_amount",
            format!("Must be a non-negative amount, got {}", intake.total_amount),
        ));
    }

    if let (Some(order_date), Some(delivery_date)) = (intake.order_date, intake.delivery_date) {
        if delivery_date < order_date {
            errors.push(ValidationError::new(
                CTX,
                "delivery_date",
                format!("Delivery date {} precedes order date {}", delivery_date, order_date),
            ));
        }
    }

    if intake.line_items.is_empty() {
        errors.push(ValidationError::new(CTX, "line_items", "Order has no line items"));
    }

    for (i, line) in intake.line_items.iter().enumerate() {
        let has_code = line
            .external_code
            .as_deref()
            .is_some_and(|c| !c.trim().is_empty());

        if line.description.trim().is_empty() && !has_code {
            errors.push(ValidationError::new(
                CTX,
                &format!("line_items[{}]", i),
                "Line needs a description or a product code",
            ));
        }

        if !line.quantity.is_finite() || line.quantity <= 0.0 {
            errors.push(ValidationError::new(
                CTX,
                &format!("line_items[{}].quantity", i),
                format!("Must be positive, got {}", line.quantity),
            ));
        }

        if !line.unit_price.is_finite() || line.unit_price < 0.0 {
            errors.push(ValidationError::new(
                CTX,
                &format!("line_items[{}].unit_price", i),
                format!("Must not be negative, got {}", line.unit_price),
            ));
        }
    }

    finish(errors)
}

// ============================================================================
// CATALOG
// ============================================================================

/// Validate a catalog product before it is stored.
pub fn validate_product(product: &Product) -> ValidationResult {
    const CTX: &str = "Product";
    let mut errors = Vec::new();

    if product.internal_code.trim().is_empty() {
        errors.push(ValidationError::new(CTX, "internal_code", "Required field is empty"));
    }

    if product.name.trim().is_empty() {
        errors.push(ValidationError::new(CTX, "name", "Required field is empty"));
    }

    if !product.unit_price.is_finite() || product.unit_price < 0.0 {
        errors.push(ValidationError::new(
            CTX,
            "unit_price",
            format!("Must not be negative, got {}", product.unit_price),
        ));
    }

    if !(0.0..=100.0).contains(&product.tax_rate) {
        errors.push(ValidationError::new(
            CTX,
            "tax_rate",
            format!("Must be between 0 and 100, got {}", product.tax_rate),
        ));
    }

    if product.sell_in_multiples {
        match product.multiple_quantity {
            Some(n) if n > 0 => {}
            other => errors.push(ValidationError::new(
                CTX,
                "multiple_quantity",
                format!(
                    "Must be a positive integer when sell_in_multiples is set, got {:?}",
                    other
                ),
            )),
        }
    }

    finish(errors)
}

pub fn validate_mapping(mapping: &CounterpartyProductMapping) -> ValidationResult {
    const CTX: &str = "Mapping";
    let mut errors = Vec::new();

    for (field, value) in [
        ("counterparty_id", &mapping.counterparty_id),
        ("external_code", &mapping.external_code),
        ("product_id", &mapping.product_id),
    ] {
        if value.trim().is_empty() {
            errors.push(ValidationError::new(CTX, field, "Required field is empty"));
        }
    }

    finish(errors)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{DocumentKind, LineItem, SourceMetadata};
    use chrono::NaiveDate;

    fn create_valid_intake() -> OrderIntake {
        OrderIntake {
            kind: DocumentKind::PurchaseOrder,
            external_order_number: "PO-1001".to_string(),
            counterparty_id: Some("acme".to_string()),
            counterparty_name: "Acme".to_string(),
            counterparty_address: None,
            order_date: NaiveDate::from_ymd_opt(2024, 3, 1),
            delivery_date: NaiveDate::from_ymd_opt(2024, 3, 10),
            currency: "INR".to_string(),
            total_amount: 500.0,
            line_items: vec![LineItem::new("Steel Rod", Some("SR-10"), 10.0, 50.0)],
            source: SourceMetadata::Manual,
        }
    }

    #[test]
    fn test_valid_intake_passes() {
        assert!(validate_intake(&create_valid_intake()).is_ok());
    }

    #[test]
    fn test_missing_counterparty_rejected() {
        let mut intake = create_valid_intake();
        intake.counterparty_name = "  ".to_string();

        let errors = validate_intake(&intake).unwrap_err();
        assert_eq!(errors.fields(), vec!["counterparty_name"]);
        assert!(errors.to_string().contains("counterparty_name"));
    }

    #[test]
    fn test_collects_every_line_problem() {
        let mut intake = create_valid_intake();
        intake.line_items = vec![
            LineItem::new("", None, 0.0, 10.0),
            LineItem::new("Bolt", None, 2.0, -1.0),
        ];

        let errors = validate_intake(&intake).unwrap_err();
        assert_eq!(
            errors.fields(),
            vec!["line_items[0]", "line_items[0].quantity", "line_items[1].unit_price"]
        );
    }

    #[test]
    fn test_delivery_before_order_date_rejected() {
        let mut intake = create_valid_intake();
        intake.delivery_date = NaiveDate::from_ymd_opt(2024, 2, 1);

        assert_eq!(validate_intake(&intake).unwrap_err().fields(), vec!["delivery_date"]);
    }

    #[test]
    fn test_sell_in_multiples_requires_positive_multiple() {
        let mut product = Product::new("SR-10", "Steel Rod", "pcs", 50.0);
        product.sell_in_multiples = true;
        product.multiple_quantity = Some(0);

        assert_eq!(
            validate_product(&product).unwrap_err().fields(),
            vec!["multiple_quantity"]
        );

        product.multiple_quantity = Some(12);
        assert!(validate_product(&product).is_ok());
    }
}
