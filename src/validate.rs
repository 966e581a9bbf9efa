//! Pre-submission invoice validation.
//!
//! Pure function over the candidate invoice: schema-level checks (required
//! fields, bounded lengths, allowed VAT rates and currencies) and
//! cross-field arithmetic reconciliation to a one-cent tolerance. All
//! violations are collected in order — a form-filling caller renders them
//! at once — and every violation carries a stable message key for the
//! caller's localization layer.

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::error::{ValidationIssue, ValidationReport};
use crate::fa::types::InvoiceDocument;

const MAX_NUMBER_LEN: usize = 60;
const MAX_NAME_LEN: usize = 256;
const MAX_DESCRIPTION_LEN: usize = 256;

/// Allowed VAT rates, percent.
const ALLOWED_VAT_RATES: [Decimal; 4] = [dec!(0), dec!(5), dec!(8), dec!(23)];

/// Allowed invoice currencies.
const ALLOWED_CURRENCIES: [&str; 10] = [
    "PLN", "EUR", "USD", "GBP", "CHF", "CZK", "SEK", "NOK", "DKK", "HUF",
];

/// One-cent tolerance for all amount reconciliation.
const TOLERANCE: Decimal = dec!(0.01);

fn within_tolerance(a: Decimal, b: Decimal) -> bool {
    (a - b).abs() <= TOLERANCE
}

fn round2(d: Decimal) -> Decimal {
    d.round_dp(2)
}

/// Validate a candidate invoice before submission.
///
/// Never mutates its input; returns every violation found, not just the
/// first.
pub fn validate_invoice(invoice: &InvoiceDocument) -> ValidationReport {
    let mut issues = Vec::new();

    check_text(&invoice.number, "number", MAX_NUMBER_LEN, &mut issues);

    check_issue_date(&invoice.issue_date, &mut issues);

    if !ALLOWED_CURRENCIES.contains(&invoice.currency.as_str()) {
        issues.push(ValidationIssue::new("currency", "currency.not_allowed"));
    }

    check_party(&invoice.issuer.name, &invoice.issuer.tax_id, "issuer", &mut issues);
    check_party(
        &invoice.recipient.name,
        &invoice.recipient.tax_id,
        "recipient",
        &mut issues,
    );

    if invoice.items.is_empty() {
        issues.push(ValidationIssue::new("items", "items.empty"));
    }

    for (i, item) in invoice.items.iter().enumerate() {
        check_text(
            &item.description,
            &format!("items[{i}].description"),
            MAX_DESCRIPTION_LEN,
            &mut issues,
        );

        if item.quantity <= Decimal::ZERO {
            issues.push(ValidationIssue::new(
                format!("items[{i}].quantity"),
                "quantity.not_positive",
            ));
        }
        if item.unit_price < Decimal::ZERO {
            issues.push(ValidationIssue::new(
                format!("items[{i}].unit_price"),
                "price.negative",
            ));
        }
        if !ALLOWED_VAT_RATES.contains(&item.vat_rate) {
            issues.push(ValidationIssue::new(
                format!("items[{i}].vat_rate"),
                "vat_rate.not_allowed",
            ));
        }

        // net == quantity * unit_price, to the cent.
        let expected_net = round2(item.quantity * item.unit_price);
        if !within_tolerance(item.net_amount, expected_net) {
            issues.push(ValidationIssue::new(
                format!("items[{i}].net_amount"),
                "net.mismatch",
            ));
        }

        // vat == net * rate / 100, to the cent.
        let expected_vat = round2(item.net_amount * item.vat_rate / dec!(100));
        if !within_tolerance(item.vat_amount, expected_vat) {
            issues.push(ValidationIssue::new(
                format!("items[{i}].vat_amount"),
                "vat.mismatch",
            ));
        }
    }

    // Invoice level: summed item grosses must reconcile with net + VAT,
    // and the declared total must match the rounded item-gross sum.
    if !invoice.items.is_empty() {
        let gross_sum: Decimal = invoice.items.iter().map(|i| i.gross_amount).sum();
        let net_vat_sum: Decimal = invoice
            .items
            .iter()
            .map(|i| i.net_amount + i.vat_amount)
            .sum();
        if !within_tolerance(round2(gross_sum), round2(net_vat_sum)) {
            issues.push(ValidationIssue::new("items", "gross.mismatch"));
        }
        if !within_tolerance(invoice.gross_total, round2(gross_sum)) {
            issues.push(ValidationIssue::new("gross_total", "gross_total.mismatch"));
        }
    }

    ValidationReport { issues }
}

fn check_text(value: &str, field: &str, max_len: usize, issues: &mut Vec<ValidationIssue>) {
    if value.trim().is_empty() {
        issues.push(ValidationIssue::new(field, "field.required"));
    } else if value.chars().count() > max_len {
        issues.push(ValidationIssue::new(field, "field.too_long"));
    }
}

fn check_issue_date(date: &str, issues: &mut Vec<ValidationIssue>) {
    match NaiveDate::parse_from_str(date, "%Y-%m-%d") {
        Ok(parsed) => {
            // Not in the future, relative to end of today.
            if parsed > Utc::now().date_naive() {
                issues.push(ValidationIssue::new("issue_date", "date.future"));
            }
        }
        Err(_) => issues.push(ValidationIssue::new("issue_date", "date.format")),
    }
}

fn check_party(name: &str, tax_id: &str, field: &str, issues: &mut Vec<ValidationIssue>) {
    check_text(name, &format!("{field}.name"), MAX_NAME_LEN, issues);
    if tax_id.len() != 10 || !tax_id.bytes().all(|b| b.is_ascii_digit()) {
        issues.push(ValidationIssue::new(
            format!("{field}.tax_id"),
            "tax_id.invalid",
        ));
    }
}
