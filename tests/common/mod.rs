//! Shared fixtures: throwaway self-signed certificates generated per test
//! run, so no key material is checked into the repository.

#![allow(dead_code)]

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::x509::{X509, X509NameBuilder};

use ksef::api::ExchangeCertificate;

pub fn self_signed(common_name: &str, valid_days: u32) -> (X509, PKey<Private>) {
    let rsa = Rsa::generate(2048).unwrap();
    let key = PKey::from_rsa(rsa).unwrap();

    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_nid(Nid::COMMONNAME, common_name).unwrap();
    name.append_entry_by_nid(Nid::COUNTRYNAME, "PL").unwrap();
    let name = name.build();

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(&key).unwrap();
    builder.set_not_before(&Asn1Time::days_from_now(0).unwrap()).unwrap();
    builder.set_not_after(&Asn1Time::days_from_now(valid_days).unwrap()).unwrap();
    let mut serial = BigNum::new().unwrap();
    serial.rand(64, MsbOption::MAYBE_ZERO, false).unwrap();
    builder.set_serial_number(&serial.to_asn1_integer().unwrap()).unwrap();
    builder.sign(&key, MessageDigest::sha256()).unwrap();

    (builder.build(), key)
}

/// Certificate and private key as PEM strings.
pub fn self_signed_pem(common_name: &str) -> (String, String) {
    let (cert, key) = self_signed(common_name, 365);
    (
        String::from_utf8(cert.to_pem().unwrap()).unwrap(),
        String::from_utf8(key.private_key_to_pem_pkcs8().unwrap()).unwrap(),
    )
}

/// One exchange certificate-list entry carrying the token-encryption
/// usage, plus the matching private key for decrypting what was
/// encrypted against it.
pub fn token_encryption_entry(valid_days: u32) -> (ExchangeCertificate, PKey<Private>) {
    let (cert, key) = self_signed("KSeF Token Encryption", valid_days);
    let entry = ExchangeCertificate {
        certificate: B64.encode(cert.to_der().unwrap()),
        usage: vec!["KsefTokenEncryption".into()],
    };
    (entry, key)
}

/// A minimal JWT-shaped access token whose `exp` claim is `exp_secs`.
pub fn jwt_with_exp(exp_secs: i64) -> String {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"RS256"}"#);
    let claims = URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{exp_secs}}}"#));
    format!("{header}.{claims}.fakesig")
}
