//! Parsing of signing-certificate containers: PKCS#12 and PEM pairs.

use chrono::{DateTime, Utc};
use openssl::asn1::{Asn1Time, Asn1TimeRef};
use openssl::nid::Nid;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{PKey, Private};
use openssl::x509::X509;

use crate::error::KsefError;

/// Signing material extracted from an uploaded certificate container.
///
/// Both PEM fields are re-serialized from the decoded objects, so the
/// stored form is normalized regardless of the upload format.
#[derive(Debug, Clone)]
pub struct CertificateMaterial {
    pub certificate_pem: String,
    pub private_key_pem: String,
    /// Subject CN, if the certificate carries one.
    pub common_name: Option<String>,
    /// End of the certificate's validity period.
    pub not_after: DateTime<Utc>,
}

/// Decode a PKCS#12 container and extract the certificate/key pair.
///
/// Handles both shrouded and plain key bags (delegated to OpenSSL's
/// container parser). A wrong password surfaces as a container decode
/// failure — PKCS#12 gives no way to tell it apart from corruption.
pub fn parse_pkcs12(der: &[u8], password: &str) -> Result<CertificateMaterial, KsefError> {
    let container = Pkcs12::from_der(der)
        .map_err(|e| KsefError::Certificate(format!("not a PKCS#12 container: {e}")))?;
    let parsed = container
        .parse2(password)
        .map_err(|e| KsefError::Certificate(format!("PKCS#12 decode failed: {e}")))?;

    let cert = parsed.cert.ok_or(KsefError::NoCertificate)?;
    let key = parsed.pkey.ok_or(KsefError::NoPrivateKey)?;

    material_from_parts(&cert, &key)
}

/// Validate a certificate/key pair supplied as separate PEM blocks.
///
/// `key_password` is required when the key PEM is encrypted; decryption
/// failure is a [`KsefError::Certificate`] error.
pub fn parse_pem_pair(
    cert_pem: &str,
    key_pem: &str,
    key_password: Option<&str>,
) -> Result<CertificateMaterial, KsefError> {
    let cert = X509::from_pem(cert_pem.as_bytes())
        .map_err(|e| KsefError::Certificate(format!("invalid certificate PEM: {e}")))?;

    let key: PKey<Private> = match key_password {
        Some(pass) => PKey::private_key_from_pem_passphrase(key_pem.as_bytes(), pass.as_bytes())
            .map_err(|e| KsefError::Certificate(format!("private key decryption failed: {e}")))?,
        None => PKey::private_key_from_pem(key_pem.as_bytes())
            .map_err(|e| KsefError::Certificate(format!("invalid private key PEM: {e}")))?,
    };

    material_from_parts(&cert, &key)
}

fn material_from_parts(
    cert: &X509,
    key: &PKey<Private>,
) -> Result<CertificateMaterial, KsefError> {
    let certificate_pem = String::from_utf8(cert.to_pem()?)
        .map_err(|e| KsefError::Certificate(format!("certificate PEM is not UTF-8: {e}")))?;
    let private_key_pem = String::from_utf8(key.private_key_to_pem_pkcs8()?)
        .map_err(|e| KsefError::Certificate(format!("key PEM is not UTF-8: {e}")))?;

    let common_name = cert
        .subject_name()
        .entries_by_nid(Nid::COMMONNAME)
        .next()
        .and_then(|e| e.data().as_utf8().ok())
        .map(|s| s.to_string());

    Ok(CertificateMaterial {
        certificate_pem,
        private_key_pem,
        common_name,
        not_after: asn1_time_to_utc(cert.not_after())?,
    })
}

/// Convert an ASN.1 time to `DateTime<Utc>` via its offset from the epoch.
pub(crate) fn asn1_time_to_utc(time: &Asn1TimeRef) -> Result<DateTime<Utc>, KsefError> {
    let epoch = Asn1Time::from_unix(0)?;
    let diff = epoch.diff(time)?;
    let secs = i64::from(diff.days) * 86_400 + i64::from(diff.secs);
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| KsefError::Certificate("certificate validity out of range".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use openssl::asn1::Asn1Time;

    #[test]
    fn asn1_epoch_offset_conversion() {
        let t = Asn1Time::from_unix(1_700_000_000).unwrap();
        let dt = asn1_time_to_utc(&t).unwrap();
        assert_eq!(dt.timestamp(), 1_700_000_000);
    }

    #[test]
    fn garbage_is_not_a_container() {
        let err = parse_pkcs12(b"definitely not DER", "pass").unwrap_err();
        assert!(matches!(err, KsefError::Certificate(_)));
    }

    #[test]
    fn pem_pair_rejects_garbage() {
        let err = parse_pem_pair("not a cert", "not a key", None).unwrap_err();
        assert!(matches!(err, KsefError::Certificate(_)));
    }
}
