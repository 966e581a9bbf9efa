//! # ksef
//!
//! Client library for the Polish national e-invoice exchange (KSeF):
//! certificate handling, XAdES-signed and token-based authentication,
//! online sessions, invoice submission and retrieval, plus FA (2)
//! document generation, parsing, and pre-submission validation.
//!
//! All monetary values use [`rust_decimal::Decimal`] — never floating
//! point. Network access goes through the [`api::ExchangeApi`] trait, so
//! everything above the HTTP layer is testable offline.
//!
//! ## Quick Start
//!
//! ```rust
//! use ksef::fa::{InvoiceDocument, InvoiceItem, InvoiceParty};
//! use ksef::validate_invoice;
//! use rust_decimal_macros::dec;
//!
//! let invoice = InvoiceDocument {
//!     number: "FV/1/2024".into(),
//!     issue_date: "2024-06-15".into(),
//!     currency: "PLN".into(),
//!     issuer: InvoiceParty { name: "ACME Sp. z o.o.".into(), tax_id: "1111111111".into() },
//!     recipient: InvoiceParty { name: "Klient SA".into(), tax_id: "2222222222".into() },
//!     items: vec![InvoiceItem {
//!         position: 1,
//!         description: "Konsultacje".into(),
//!         quantity: dec!(10),
//!         unit: "godz".into(),
//!         unit_price: dec!(150),
//!         vat_rate: dec!(23),
//!         net_amount: dec!(1500.00),
//!         vat_amount: dec!(345.00),
//!         gross_amount: dec!(1845.00),
//!     }],
//!     gross_total: dec!(1845.00),
//! };
//!
//! assert!(validate_invoice(&invoice).is_valid());
//! ```
//!
//! Submission runs through [`KsefClient`]: authenticate with a KSeF token
//! or a signing certificate, open an online session, send the built FA
//! document, poll its status, close the session.

pub mod api;
pub mod auth;
pub mod client;
pub mod clock;
pub mod crypto;
pub mod environment;
pub mod error;
pub mod fa;
pub mod validate;

pub use crate::auth::{AuthTokens, Credential};
pub use crate::client::{
    InvoiceStatus, InvoiceSummary, KsefClient, SendInvoiceResult, SubjectRole,
};
pub use crate::environment::Environment;
pub use crate::error::{KsefError, ValidationIssue, ValidationReport};
pub use crate::validate::validate_invoice;
