//! FA invoice document codec: structured types, the fixed unit and VAT
//! rate code tables, deterministic XML generation and tolerant parsing.

pub mod build;
pub mod codes;
pub mod parse;
pub mod types;
mod xml;

pub use build::build;
pub use parse::parse;
pub use types::{InvoiceDocument, InvoiceItem, InvoiceParty, IssuerAddress};
