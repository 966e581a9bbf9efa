//! Tolerant FA document parsing.
//!
//! Retrieved documents arrive with whatever namespace prefix the issuing
//! software chose, so the parser matches local element names only. The
//! document is read into a generic node tree with typed accessors;
//! missing numeric fields default to zero, a missing quantity to one.
//! The only hard failure is a document with no invoice root at all.

use quick_xml::Reader;
use quick_xml::events::Event;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::types::{InvoiceDocument, InvoiceItem, InvoiceParty};
use crate::error::KsefError;

/// Generic element node: local name, direct text, children in order.
#[derive(Debug, Clone, Default)]
struct XmlNode {
    name: String,
    text: String,
    children: Vec<XmlNode>,
}

impl XmlNode {
    fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }

    fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlNode> {
        self.children.iter().filter(move |c| c.name == name)
    }

    fn descendant(&self, path: &[&str]) -> Option<&XmlNode> {
        let mut node = self;
        for name in path {
            node = node.child(name)?;
        }
        Some(node)
    }

    fn text_of(&self, name: &str) -> Option<&str> {
        self.child(name)
            .map(|c| c.text.trim())
            .filter(|t| !t.is_empty())
    }

    fn decimal_of(&self, name: &str) -> Option<Decimal> {
        self.text_of(name).and_then(|t| t.parse().ok())
    }
}

/// Read the whole document into a node tree under a virtual root.
fn build_tree(xml: &str) -> Result<XmlNode, KsefError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<XmlNode> = vec![XmlNode::default()];
    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                stack.push(XmlNode {
                    name: String::from_utf8_lossy(e.local_name().as_ref()).into_owned(),
                    ..XmlNode::default()
                });
            }
            Ok(Event::Empty(ref e)) => {
                let node = XmlNode {
                    name: String::from_utf8_lossy(e.local_name().as_ref()).into_owned(),
                    ..XmlNode::default()
                };
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(node);
                }
            }
            Ok(Event::Text(ref e)) => {
                let text = e.unescape().unwrap_or_default();
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&text);
                }
            }
            Ok(Event::End(_)) => {
                if stack.len() > 1 {
                    let node = stack.pop().unwrap_or_default();
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(node);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(KsefError::Xml(format!("XML read error: {e}"))),
        }
    }
    stack.pop()
        .ok_or_else(|| KsefError::Xml("XML tree underflow".into()))
}

/// Depth-first search for an element by local name.
fn find_named<'a>(node: &'a XmlNode, name: &str) -> Option<&'a XmlNode> {
    if node.name == name {
        return Some(node);
    }
    node.children.iter().find_map(|c| find_named(c, name))
}

fn round2(d: Decimal) -> Decimal {
    d.round_dp(2)
}

/// Parse a retrieved FA document back into structured invoice data.
///
/// Fails only when no invoice root element can be located.
pub fn parse(xml: &str) -> Result<InvoiceDocument, KsefError> {
    let tree = build_tree(xml)?;
    let faktura = find_named(&tree, "Faktura")
        .ok_or_else(|| KsefError::Xml("no invoice root element found".into()))?;

    let fa = faktura.child("Fa");

    let text = |name: &str| -> String {
        fa.and_then(|f| f.text_of(name)).unwrap_or_default().to_string()
    };

    let items: Vec<InvoiceItem> = fa
        .map(|f| {
            f.children_named("FaWiersz")
                .enumerate()
                .map(|(idx, row)| parse_item(idx, row))
                .collect()
        })
        .unwrap_or_default();

    let gross_total = fa
        .and_then(|f| f.decimal_of("P_15"))
        .unwrap_or_else(|| round2(items.iter().map(|i| i.gross_amount).sum()));

    Ok(InvoiceDocument {
        number: text("P_2"),
        issue_date: text("P_1"),
        currency: text("KodWaluty"),
        issuer: parse_party(faktura, "Podmiot1"),
        recipient: parse_party(faktura, "Podmiot2"),
        items,
        gross_total,
    })
}

fn parse_party(faktura: &XmlNode, subject: &str) -> InvoiceParty {
    let ident = faktura.descendant(&[subject, "DaneIdentyfikacyjne"]);
    InvoiceParty {
        name: ident
            .and_then(|n| n.text_of("Nazwa"))
            .unwrap_or_default()
            .to_string(),
        tax_id: ident
            .and_then(|n| n.text_of("NIP"))
            .unwrap_or_default()
            .to_string(),
    }
}

fn parse_item(idx: usize, row: &XmlNode) -> InvoiceItem {
    let net = row.decimal_of("P_11").unwrap_or(Decimal::ZERO);
    let vat = row.decimal_of("P_11Vat").unwrap_or(Decimal::ZERO);
    InvoiceItem {
        position: row
            .text_of("NrWierszaFa")
            .and_then(|t| t.parse().ok())
            .unwrap_or(idx as u32 + 1),
        description: row.text_of("P_7").unwrap_or_default().to_string(),
        quantity: row.decimal_of("P_8B").unwrap_or(dec!(1)),
        unit: row.text_of("P_8A").unwrap_or("szt").to_string(),
        unit_price: row.decimal_of("P_9A").unwrap_or(Decimal::ZERO),
        vat_rate: row.decimal_of("P_12").unwrap_or(Decimal::ZERO),
        net_amount: net,
        vat_amount: vat,
        gross_amount: round2(net + vat),
    }
}
