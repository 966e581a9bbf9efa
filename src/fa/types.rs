use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One invoice in its structured form — the input to [`crate::fa::build`]
/// and [`crate::validate::validate_invoice`], and the output of
/// [`crate::fa::parse`].
///
/// The issue date is kept as the `YYYY-MM-DD` string the caller supplied;
/// format and range are checked by the validator, not the type system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceDocument {
    /// Invoice number (e.g. "FV/1/2024").
    pub number: String,
    /// Issue date, `YYYY-MM-DD`.
    pub issue_date: String,
    /// ISO 4217 currency code.
    pub currency: String,
    /// Issuing party.
    pub issuer: InvoiceParty,
    /// Receiving party.
    pub recipient: InvoiceParty,
    /// Line items in document order.
    pub items: Vec<InvoiceItem>,
    /// Invoice-level gross total.
    pub gross_total: Decimal,
}

/// Counterparty identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceParty {
    pub name: String,
    /// Polish NIP, 10 digits.
    pub tax_id: String,
}

/// Issuer postal address, emitted in the document's first subject block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuerAddress {
    pub street: String,
    pub postal_code: String,
    pub city: String,
    /// ISO 3166-1 alpha-2, usually "PL".
    pub country_code: String,
}

/// One invoice line with its three derived amounts.
///
/// Within tolerance, `net_amount == quantity * unit_price`,
/// `vat_amount == net_amount * vat_rate / 100` and
/// `gross_amount == net_amount + vat_amount`; the validator enforces this
/// to one cent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceItem {
    /// 1-based row number, preserved through build/parse.
    pub position: u32,
    pub description: String,
    pub quantity: Decimal,
    /// Free-form unit, mapped through the fixed code table on build.
    pub unit: String,
    pub unit_price: Decimal,
    /// VAT rate in percent (0, 5, 8 or 23).
    pub vat_rate: Decimal,
    pub net_amount: Decimal,
    pub vat_amount: Decimal,
    pub gross_amount: Decimal,
}
