//! Deterministic FA document generation.

use rust_decimal::Decimal;

use super::codes::{unit_code, vat_rate_code};
use super::types::{InvoiceDocument, IssuerAddress};
use super::xml::{XmlWriter, format_decimal};
use crate::error::KsefError;

pub(crate) const FA_NAMESPACE: &str = "http://crd.gov.pl/wzor/2023/06/29/12648/";

/// Serialize an invoice into the FA document schema.
///
/// Output order is fixed: header, both subject blocks, one VAT summary
/// element per distinct rate (in the order rates first appear in the
/// items), the invoice gross total, then one row per line item numbered
/// from its stored position. All free text passes through the XML writer
/// and is escaped there.
pub fn build(
    invoice: &InvoiceDocument,
    issuer_address: &IssuerAddress,
) -> Result<String, KsefError> {
    let mut w = XmlWriter::new()?;

    w.start_element_with_attrs("Faktura", &[("xmlns", FA_NAMESPACE)])?;

    w.start_element("Naglowek")?;
    w.text_element("KodFormularza", "FA")?;
    w.text_element("WariantFormularza", "2")?;
    w.end_element("Naglowek")?;

    w.start_element("Podmiot1")?;
    w.start_element("DaneIdentyfikacyjne")?;
    w.text_element("NIP", &invoice.issuer.tax_id)?;
    w.text_element("Nazwa", &invoice.issuer.name)?;
    w.end_element("DaneIdentyfikacyjne")?;
    w.start_element("Adres")?;
    w.text_element("KodKraju", &issuer_address.country_code)?;
    w.text_element("AdresL1", &issuer_address.street)?;
    w.text_element(
        "AdresL2",
        &format!("{} {}", issuer_address.postal_code, issuer_address.city),
    )?;
    w.end_element("Adres")?;
    w.end_element("Podmiot1")?;

    w.start_element("Podmiot2")?;
    w.start_element("DaneIdentyfikacyjne")?;
    w.text_element("NIP", &invoice.recipient.tax_id)?;
    w.text_element("Nazwa", &invoice.recipient.name)?;
    w.end_element("DaneIdentyfikacyjne")?;
    w.end_element("Podmiot2")?;

    w.start_element("Fa")?;
    w.text_element("KodWaluty", &invoice.currency)?;
    w.text_element("P_1", &invoice.issue_date)?;
    w.text_element("P_2", &invoice.number)?;

    for (rate, net, vat) in aggregate_by_rate(invoice) {
        w.start_element("PodsumowanieStawki")?;
        w.text_element("Stawka", &vat_rate_code(rate))?;
        w.decimal_element("Netto", net)?;
        w.decimal_element("Vat", vat)?;
        w.end_element("PodsumowanieStawki")?;
    }

    w.decimal_element("P_15", invoice.gross_total)?;

    for item in &invoice.items {
        w.start_element("FaWiersz")?;
        w.text_element("NrWierszaFa", &item.position.to_string())?;
        w.text_element("P_7", &item.description)?;
        w.text_element("P_8A", unit_code(&item.unit))?;
        w.text_element("P_8B", &format_decimal(item.quantity))?;
        w.decimal_element("P_9A", item.unit_price)?;
        w.decimal_element("P_11", item.net_amount)?;
        w.decimal_element("P_11Vat", item.vat_amount)?;
        w.text_element("P_12", &vat_rate_code(item.vat_rate))?;
        w.end_element("FaWiersz")?;
    }

    w.end_element("Fa")?;
    w.end_element("Faktura")?;

    w.into_string()
}

/// Aggregate net and VAT amounts per distinct rate, keeping the order in
/// which rates are first encountered.
fn aggregate_by_rate(invoice: &InvoiceDocument) -> Vec<(Decimal, Decimal, Decimal)> {
    let mut totals: Vec<(Decimal, Decimal, Decimal)> = Vec::new();
    for item in &invoice.items {
        match totals.iter_mut().find(|(rate, _, _)| *rate == item.vat_rate) {
            Some((_, net, vat)) => {
                *net += item.net_amount;
                *vat += item.vat_amount;
            }
            None => totals.push((item.vat_rate, item.net_amount, item.vat_amount)),
        }
    }
    totals
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fa::types::{InvoiceItem, InvoiceParty};
    use rust_decimal_macros::dec;

    fn item(pos: u32, rate: Decimal, net: Decimal, vat: Decimal) -> InvoiceItem {
        InvoiceItem {
            position: pos,
            description: format!("Pozycja {pos}"),
            quantity: dec!(1),
            unit: "szt".into(),
            unit_price: net,
            vat_rate: rate,
            net_amount: net,
            vat_amount: vat,
            gross_amount: net + vat,
        }
    }

    fn invoice(items: Vec<InvoiceItem>) -> InvoiceDocument {
        let gross = items.iter().map(|i| i.gross_amount).sum();
        InvoiceDocument {
            number: "FV/1/2024".into(),
            issue_date: "2024-06-15".into(),
            currency: "PLN".into(),
            issuer: InvoiceParty {
                name: "Wystawca Sp. z o.o.".into(),
                tax_id: "1111111111".into(),
            },
            recipient: InvoiceParty {
                name: "Nabywca SA".into(),
                tax_id: "2222222222".into(),
            },
            items,
            gross_total: gross,
        }
    }

    fn address() -> IssuerAddress {
        IssuerAddress {
            street: "ul. Prosta 1".into(),
            postal_code: "00-001".into(),
            city: "Warszawa".into(),
            country_code: "PL".into(),
        }
    }

    #[test]
    fn rates_aggregate_in_first_encounter_order() {
        let inv = invoice(vec![
            item(1, dec!(23), dec!(100), dec!(23)),
            item(2, dec!(8), dec!(50), dec!(4)),
            item(3, dec!(23), dec!(200), dec!(46)),
        ]);
        let totals = aggregate_by_rate(&inv);
        assert_eq!(totals.len(), 2);
        assert_eq!(totals[0], (dec!(23), dec!(300), dec!(69)));
        assert_eq!(totals[1], (dec!(8), dec!(50), dec!(4)));
    }

    #[test]
    fn one_summary_block_per_rate() {
        let inv = invoice(vec![
            item(1, dec!(23), dec!(100), dec!(23)),
            item(2, dec!(23), dec!(100), dec!(23)),
        ]);
        let xml = build(&inv, &address()).unwrap();
        assert_eq!(xml.matches("<PodsumowanieStawki>").count(), 1);
        assert_eq!(xml.matches("<FaWiersz>").count(), 2);
        assert!(xml.contains("<P_15>246.00</P_15>"));
    }

    #[test]
    fn free_text_is_escaped() {
        let mut inv = invoice(vec![item(1, dec!(23), dec!(100), dec!(23))]);
        inv.recipient.name = "A & B <sp.j.>".into();
        let xml = build(&inv, &address()).unwrap();
        assert!(xml.contains("A &amp; B &lt;sp.j.&gt;"));
    }
}
