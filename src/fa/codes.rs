//! Fixed code tables for units of measure and VAT rates.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Map a free-form unit to the document unit code. Unrecognized units
/// fall back to the generic piece code.
pub fn unit_code(unit: &str) -> &'static str {
    match unit.trim().to_lowercase().as_str() {
        "szt" | "szt." | "sztuka" | "pc" | "pcs" | "piece" => "szt",
        "godz" | "godz." | "godzina" | "h" | "hour" => "godz",
        "dzień" | "dzien" | "day" => "dzień",
        "usł" | "usl" | "usługa" | "usluga" | "service" => "usł",
        "kg" => "kg",
        "g" | "gram" => "g",
        "t" | "tona" => "t",
        "l" | "litr" | "liter" => "l",
        "m" | "metr" | "meter" => "m",
        "m2" | "m²" => "m2",
        "m3" | "m³" => "m3",
        "km" => "km",
        "kpl" | "kpl." | "komplet" | "set" => "kpl",
        "opak" | "opak." | "opakowanie" | "package" => "opak",
        _ => "szt",
    }
}

/// Map a VAT rate to its document string. Rates outside the fixed table
/// fall back to their numeric form.
pub fn vat_rate_code(rate: Decimal) -> String {
    if rate == dec!(23) {
        "23".into()
    } else if rate == dec!(8) {
        "8".into()
    } else if rate == dec!(5) {
        "5".into()
    } else if rate == Decimal::ZERO {
        "0".into()
    } else {
        rate.normalize().to_string()
    }
}
