//! Enveloped XMLDSig signing with a XAdES qualifying-properties block,
//! as required for certificate-based exchange authentication.
//!
//! Signing runs in two explicit phases. Phase one renders the
//! `SignedProperties` and `SignedInfo` subtrees in their exclusive-C14N
//! form, digests them and computes the RSA-SHA256 signature. Phase two
//! assembles the complete `ds:Signature` element (with the qualifying
//! properties as a child of the signature, inside `ds:Object`) and splices
//! it into the document root by streaming XML events — the signature is
//! never glued in with string concatenation.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use chrono::{DateTime, Utc};
use openssl::hash::MessageDigest;
use openssl::pkey::PKey;
use openssl::sign::Signer;
use openssl::x509::X509;
use quick_xml::Writer;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Reader;
use std::io::Cursor;

use crate::error::KsefError;

const NS_DS: &str = "http://www.w3.org/2000/09/xmldsig#";
const NS_XADES: &str = "http://uri.etsi.org/01903/v1.3.2#";
const ALG_C14N_EXC: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";
const ALG_ENVELOPED: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";
const ALG_RSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
const ALG_SHA256: &str = "http://www.w3.org/2001/04/xmlenc#sha256";
const TYPE_SIGNED_PROPS: &str = "http://uri.etsi.org/01903#SignedProperties";

/// Sign an authentication request document.
///
/// Produces the input document with an enveloped `ds:Signature` appended
/// to the root element. The signature covers two references: the document
/// itself (enveloped-signature + exclusive C14N) and the XAdES
/// `SignedProperties` block asserting signing time and a SHA-256 digest of
/// the signing certificate.
pub fn sign_auth_request(
    xml: &str,
    certificate_pem: &str,
    private_key_pem: &str,
) -> Result<String, KsefError> {
    sign_auth_request_at(xml, certificate_pem, private_key_pem, Utc::now())
}

/// As [`sign_auth_request`], with an explicit signing time.
pub fn sign_auth_request_at(
    xml: &str,
    certificate_pem: &str,
    private_key_pem: &str,
    signing_time: DateTime<Utc>,
) -> Result<String, KsefError> {
    let cert = X509::from_pem(certificate_pem.as_bytes())
        .map_err(|e| KsefError::Certificate(format!("invalid signing certificate: {e}")))?;
    let key = PKey::private_key_from_pem(private_key_pem.as_bytes())
        .map_err(|e| KsefError::Certificate(format!("invalid signing key: {e}")))?;

    let cert_digest_b64 = B64.encode(cert.digest(MessageDigest::sha256())?);
    let cert_b64 = B64.encode(cert.to_der()?);
    let issuer = issuer_name_string(&cert)?;
    let serial = cert
        .serial_number()
        .to_bn()?
        .to_dec_str()?
        .to_string();

    // Phase 1: canonical renderings, digests, signature value.
    let doc_c14n = canonicalize_document(xml)?;
    let doc_digest = B64.encode(openssl::sha::sha256(doc_c14n.as_bytes()));

    let props = SignedPropertiesParts {
        signing_time,
        cert_digest_b64: &cert_digest_b64,
        issuer: &issuer,
        serial: &serial,
    };
    let props_c14n = render_signed_properties(&props, true)?;
    let props_digest = B64.encode(openssl::sha::sha256(props_c14n.as_bytes()));

    let signed_info_c14n = render_signed_info(&doc_digest, &props_digest, true)?;
    let mut signer = Signer::new(MessageDigest::sha256(), &key)?;
    signer.update(signed_info_c14n.as_bytes())?;
    let signature_value = B64.encode(signer.sign_to_vec()?);

    // Phase 2: assemble the signature element and splice it into the root.
    let signed_info = render_signed_info(&doc_digest, &props_digest, false)?;
    let signed_props = render_signed_properties(&props, false)?;
    let signature = render_signature(&signed_info, &signature_value, &cert_b64, &signed_props)?;

    splice_into_root(xml, &signature)
}

struct SignedPropertiesParts<'a> {
    signing_time: DateTime<Utc>,
    cert_digest_b64: &'a str,
    issuer: &'a str,
    serial: &'a str,
}

fn wio(e: std::io::Error) -> KsefError {
    KsefError::Xml(format!("XML write error: {e}"))
}

fn wrd(e: quick_xml::Error) -> KsefError {
    KsefError::Xml(format!("XML read error: {e}"))
}

fn new_writer() -> Writer<Cursor<Vec<u8>>> {
    Writer::new(Cursor::new(Vec::new()))
}

fn writer_into_string(writer: Writer<Cursor<Vec<u8>>>) -> Result<String, KsefError> {
    String::from_utf8(writer.into_inner().into_inner())
        .map_err(|e| KsefError::Xml(format!("XML UTF-8 error: {e}")))
}

fn start<'a>(name: &'a str, attrs: &[(&str, &str)]) -> BytesStart<'a> {
    let mut elem = BytesStart::new(name);
    for (k, v) in attrs {
        elem.push_attribute((*k, *v));
    }
    elem
}

fn text_element(
    w: &mut Writer<Cursor<Vec<u8>>>,
    name: &str,
    text: &str,
) -> Result<(), KsefError> {
    w.write_event(Event::Start(BytesStart::new(name))).map_err(wio)?;
    w.write_event(Event::Text(BytesText::new(text))).map_err(wio)?;
    w.write_event(Event::End(BytesEnd::new(name))).map_err(wio)?;
    Ok(())
}

/// Empty element written as start+end, the form exclusive C14N produces.
fn empty_element(
    w: &mut Writer<Cursor<Vec<u8>>>,
    name: &str,
    attrs: &[(&str, &str)],
) -> Result<(), KsefError> {
    w.write_event(Event::Start(start(name, attrs))).map_err(wio)?;
    w.write_event(Event::End(BytesEnd::new(name))).map_err(wio)?;
    Ok(())
}

/// Render the XAdES `SignedProperties` subtree.
///
/// With `canonical`, namespace declarations for the visibly-used `ds` and
/// `xades` prefixes are emitted on the element itself (sorted by prefix),
/// matching what an exclusive-C14N pass over the final document yields for
/// this subset. Without it, the declarations are inherited from the
/// enclosing signature.
fn render_signed_properties(
    parts: &SignedPropertiesParts<'_>,
    canonical: bool,
) -> Result<String, KsefError> {
    let mut w = new_writer();

    let mut root_attrs: Vec<(&str, &str)> = Vec::new();
    if canonical {
        root_attrs.push(("xmlns:ds", NS_DS));
        root_attrs.push(("xmlns:xades", NS_XADES));
    }
    root_attrs.push(("Id", "SignedProperties"));

    w.write_event(Event::Start(start("xades:SignedProperties", &root_attrs)))
        .map_err(wio)?;
    w.write_event(Event::Start(BytesStart::new(
        "xades:SignedSignatureProperties",
    )))
    .map_err(wio)?;

    let time = parts.signing_time.format("%Y-%m-%dT%H:%M:%SZ").to_string();
    text_element(&mut w, "xades:SigningTime", &time)?;

    w.write_event(Event::Start(BytesStart::new("xades:SigningCertificate")))
        .map_err(wio)?;
    w.write_event(Event::Start(BytesStart::new("xades:Cert")))
        .map_err(wio)?;

    w.write_event(Event::Start(BytesStart::new("xades:CertDigest")))
        .map_err(wio)?;
    empty_element(&mut w, "ds:DigestMethod", &[("Algorithm", ALG_SHA256)])?;
    text_element(&mut w, "ds:DigestValue", parts.cert_digest_b64)?;
    w.write_event(Event::End(BytesEnd::new("xades:CertDigest")))
        .map_err(wio)?;

    w.write_event(Event::Start(BytesStart::new("xades:IssuerSerial")))
        .map_err(wio)?;
    text_element(&mut w, "ds:X509IssuerName", parts.issuer)?;
    text_element(&mut w, "ds:X509SerialNumber", parts.serial)?;
    w.write_event(Event::End(BytesEnd::new("xades:IssuerSerial")))
        .map_err(wio)?;

    w.write_event(Event::End(BytesEnd::new("xades:Cert"))).map_err(wio)?;
    w.write_event(Event::End(BytesEnd::new("xades:SigningCertificate")))
        .map_err(wio)?;
    w.write_event(Event::End(BytesEnd::new("xades:SignedSignatureProperties")))
        .map_err(wio)?;
    w.write_event(Event::End(BytesEnd::new("xades:SignedProperties")))
        .map_err(wio)?;

    writer_into_string(w)
}

/// Render `ds:SignedInfo` with its two references.
fn render_signed_info(
    doc_digest_b64: &str,
    props_digest_b64: &str,
    canonical: bool,
) -> Result<String, KsefError> {
    let mut w = new_writer();

    let root_attrs: &[(&str, &str)] = if canonical {
        &[("xmlns:ds", NS_DS)]
    } else {
        &[]
    };
    w.write_event(Event::Start(start("ds:SignedInfo", root_attrs)))
        .map_err(wio)?;

    empty_element(
        &mut w,
        "ds:CanonicalizationMethod",
        &[("Algorithm", ALG_C14N_EXC)],
    )?;
    empty_element(
        &mut w,
        "ds:SignatureMethod",
        &[("Algorithm", ALG_RSA_SHA256)],
    )?;

    // Reference 1: the enveloping document.
    w.write_event(Event::Start(start("ds:Reference", &[("URI", "")])))
        .map_err(wio)?;
    w.write_event(Event::Start(BytesStart::new("ds:Transforms")))
        .map_err(wio)?;
    empty_element(&mut w, "ds:Transform", &[("Algorithm", ALG_ENVELOPED)])?;
    empty_element(&mut w, "ds:Transform", &[("Algorithm", ALG_C14N_EXC)])?;
    w.write_event(Event::End(BytesEnd::new("ds:Transforms")))
        .map_err(wio)?;
    empty_element(&mut w, "ds:DigestMethod", &[("Algorithm", ALG_SHA256)])?;
    text_element(&mut w, "ds:DigestValue", doc_digest_b64)?;
    w.write_event(Event::End(BytesEnd::new("ds:Reference")))
        .map_err(wio)?;

    // Reference 2: the qualifying SignedProperties block.
    // Attribute order (Type before URI) follows C14N lexicographic sorting.
    w.write_event(Event::Start(start(
        "ds:Reference",
        &[("Type", TYPE_SIGNED_PROPS), ("URI", "#SignedProperties")],
    )))
    .map_err(wio)?;
    w.write_event(Event::Start(BytesStart::new("ds:Transforms")))
        .map_err(wio)?;
    empty_element(&mut w, "ds:Transform", &[("Algorithm", ALG_C14N_EXC)])?;
    w.write_event(Event::End(BytesEnd::new("ds:Transforms")))
        .map_err(wio)?;
    empty_element(&mut w, "ds:DigestMethod", &[("Algorithm", ALG_SHA256)])?;
    text_element(&mut w, "ds:DigestValue", props_digest_b64)?;
    w.write_event(Event::End(BytesEnd::new("ds:Reference")))
        .map_err(wio)?;

    w.write_event(Event::End(BytesEnd::new("ds:SignedInfo")))
        .map_err(wio)?;

    writer_into_string(w)
}

/// Assemble the full `ds:Signature` element. The qualifying properties
/// land inside `ds:Object`, a child of the signature — nesting the
/// exchange's verifier requires.
fn render_signature(
    signed_info: &str,
    signature_value: &str,
    cert_b64: &str,
    signed_props: &str,
) -> Result<String, KsefError> {
    let mut w = new_writer();

    w.write_event(Event::Start(start(
        "ds:Signature",
        &[("xmlns:ds", NS_DS), ("Id", "Signature")],
    )))
    .map_err(wio)?;

    write_fragment(&mut w, signed_info)?;
    text_element(&mut w, "ds:SignatureValue", signature_value)?;

    w.write_event(Event::Start(BytesStart::new("ds:KeyInfo")))
        .map_err(wio)?;
    w.write_event(Event::Start(BytesStart::new("ds:X509Data")))
        .map_err(wio)?;
    text_element(&mut w, "ds:X509Certificate", cert_b64)?;
    w.write_event(Event::End(BytesEnd::new("ds:X509Data")))
        .map_err(wio)?;
    w.write_event(Event::End(BytesEnd::new("ds:KeyInfo")))
        .map_err(wio)?;

    w.write_event(Event::Start(BytesStart::new("ds:Object")))
        .map_err(wio)?;
    w.write_event(Event::Start(start(
        "xades:QualifyingProperties",
        &[("xmlns:xades", NS_XADES), ("Target", "#Signature")],
    )))
    .map_err(wio)?;
    write_fragment(&mut w, signed_props)?;
    w.write_event(Event::End(BytesEnd::new("xades:QualifyingProperties")))
        .map_err(wio)?;
    w.write_event(Event::End(BytesEnd::new("ds:Object")))
        .map_err(wio)?;

    w.write_event(Event::End(BytesEnd::new("ds:Signature")))
        .map_err(wio)?;

    writer_into_string(w)
}

/// Pipe the events of a pre-rendered fragment into a writer.
fn write_fragment(
    w: &mut Writer<Cursor<Vec<u8>>>,
    fragment: &str,
) -> Result<(), KsefError> {
    let mut reader = Reader::from_str(fragment);
    loop {
        match reader.read_event().map_err(wrd)? {
            Event::Eof => return Ok(()),
            event => w.write_event(event).map_err(wio)?,
        }
    }
}

/// Canonical form of the document for the enveloped reference: no XML
/// declaration, no comments or processing instructions, empty elements
/// expanded, everything else passed through untouched.
fn canonicalize_document(xml: &str) -> Result<String, KsefError> {
    let mut reader = Reader::from_str(xml);
    let mut w = new_writer();
    loop {
        match reader.read_event().map_err(wrd)? {
            Event::Eof => break,
            Event::Decl(_) | Event::Comment(_) | Event::PI(_) | Event::DocType(_) => {}
            Event::Empty(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                w.write_event(Event::Start(e)).map_err(wio)?;
                w.write_event(Event::End(BytesEnd::new(name))).map_err(wio)?;
            }
            event => w.write_event(event).map_err(wio)?,
        }
    }
    Ok(writer_into_string(w)?.trim().to_string())
}

/// Insert a signature fragment as the last child of the document root,
/// streaming the original events through untouched.
fn splice_into_root(xml: &str, signature: &str) -> Result<String, KsefError> {
    let mut reader = Reader::from_str(xml);
    let mut w = new_writer();
    let mut depth: usize = 0;
    let mut spliced = false;
    loop {
        match reader.read_event().map_err(wrd)? {
            Event::Eof => break,
            Event::Start(e) => {
                depth += 1;
                w.write_event(Event::Start(e)).map_err(wio)?;
            }
            Event::End(e) => {
                depth = depth.saturating_sub(1);
                if depth == 0 && !spliced {
                    write_fragment(&mut w, signature)?;
                    spliced = true;
                }
                w.write_event(Event::End(e)).map_err(wio)?;
            }
            event => w.write_event(event).map_err(wio)?,
        }
    }
    if !spliced {
        return Err(KsefError::Xml("document has no root element".into()));
    }
    writer_into_string(w)
}

/// RFC 4514-style issuer string, most specific RDN first.
fn issuer_name_string(cert: &X509) -> Result<String, KsefError> {
    let mut parts: Vec<String> = Vec::new();
    for entry in cert.issuer_name().entries() {
        let key = entry.object().nid().short_name().unwrap_or("UNKNOWN");
        let value = entry
            .data()
            .as_utf8()
            .map_err(|e| KsefError::Certificate(format!("issuer name not UTF-8: {e}")))?;
        parts.push(format!("{key}={value}"));
    }
    parts.reverse();
    Ok(parts.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;
    use openssl::asn1::Asn1Time;
    use openssl::bn::{BigNum, MsbOption};
    use openssl::nid::Nid;
    use openssl::rsa::Rsa;
    use openssl::sign::Verifier;
    use openssl::x509::X509NameBuilder;

    fn self_signed() -> (String, String) {
        let rsa = Rsa::generate(2048).unwrap();
        let key = PKey::from_rsa(rsa).unwrap();

        let mut name = X509NameBuilder::new().unwrap();
        name.append_entry_by_nid(Nid::COUNTRYNAME, "PL").unwrap();
        name.append_entry_by_nid(Nid::COMMONNAME, "Signing Test").unwrap();
        let name = name.build();

        let mut builder = X509::builder().unwrap();
        builder.set_version(2).unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder.set_pubkey(&key).unwrap();
        builder
            .set_not_before(&Asn1Time::days_from_now(0).unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::days_from_now(365).unwrap())
            .unwrap();
        let mut serial = BigNum::new().unwrap();
        serial.rand(64, MsbOption::MAYBE_ZERO, false).unwrap();
        builder
            .set_serial_number(&serial.to_asn1_integer().unwrap())
            .unwrap();
        builder.sign(&key, MessageDigest::sha256()).unwrap();
        let cert = builder.build();

        (
            String::from_utf8(cert.to_pem().unwrap()).unwrap(),
            String::from_utf8(key.private_key_to_pem_pkcs8().unwrap()).unwrap(),
        )
    }

    const DOC: &str = "<AuthTokenRequest xmlns=\"http://ksef.mf.gov.pl/auth/token/2.0\">\
                       <Challenge>abc123</Challenge>\
                       <ContextIdentifier><Nip>1234567890</Nip></ContextIdentifier>\
                       </AuthTokenRequest>";

    #[test]
    fn signature_is_child_of_root_and_holds_qualifying_block() {
        let (cert, key) = self_signed();
        let signed = sign_auth_request(DOC, &cert, &key).unwrap();

        let sig_start = signed.find("<ds:Signature ").unwrap();
        let root_end = signed.rfind("</AuthTokenRequest>").unwrap();
        assert!(sig_start < root_end, "signature must be inside the root");

        let obj = signed.find("<ds:Object>").unwrap();
        let sig_end = signed.find("</ds:Signature>").unwrap();
        assert!(obj < sig_end, "qualifying properties must be inside the signature");
        assert!(signed.contains("<xades:QualifyingProperties"));
        assert!(signed.contains("Id=\"SignedProperties\""));
        assert_eq!(signed.matches("<ds:Reference").count(), 2);
    }

    #[test]
    fn signature_value_verifies_over_canonical_signed_info() {
        let (cert_pem, key_pem) = self_signed();
        let time = DateTime::parse_from_rfc3339("2024-06-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let signed = sign_auth_request_at(DOC, &cert_pem, &key_pem, time).unwrap();

        // Recompute phase-1 artifacts with the same inputs.
        let cert = X509::from_pem(cert_pem.as_bytes()).unwrap();
        let doc_digest = B64.encode(openssl::sha::sha256(
            canonicalize_document(DOC).unwrap().as_bytes(),
        ));
        let parts = SignedPropertiesParts {
            signing_time: time,
            cert_digest_b64: &B64.encode(cert.digest(MessageDigest::sha256()).unwrap()),
            issuer: &issuer_name_string(&cert).unwrap(),
            serial: &cert.serial_number().to_bn().unwrap().to_dec_str().unwrap().to_string(),
        };
        let props_c14n = render_signed_properties(&parts, true).unwrap();
        let props_digest = B64.encode(openssl::sha::sha256(props_c14n.as_bytes()));
        let signed_info = render_signed_info(&doc_digest, &props_digest, true).unwrap();

        let value_start = signed.find("<ds:SignatureValue>").unwrap() + "<ds:SignatureValue>".len();
        let value_end = signed.find("</ds:SignatureValue>").unwrap();
        let signature = B64.decode(&signed[value_start..value_end]).unwrap();

        let key = PKey::private_key_from_pem(key_pem.as_bytes()).unwrap();
        let mut verifier = Verifier::new(MessageDigest::sha256(), &key).unwrap();
        verifier.update(signed_info.as_bytes()).unwrap();
        assert!(verifier.verify(&signature).unwrap());
    }

    #[test]
    fn canonical_form_drops_declaration_and_expands_empties() {
        let c14n = canonicalize_document(
            "<?xml version=\"1.0\"?><A><B/><!-- note --><C>x</C></A>",
        )
        .unwrap();
        assert_eq!(c14n, "<A><B></B><C>x</C></A>");
    }

    #[test]
    fn splice_requires_a_root() {
        assert!(matches!(
            splice_into_root("   ", "<x></x>"),
            Err(KsefError::Xml(_))
        ));
    }
}
