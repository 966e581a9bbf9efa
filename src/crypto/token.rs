//! RSA-OAEP encryption of short-lived authentication tokens.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use openssl::encrypt::Encrypter;
use openssl::hash::MessageDigest;
use openssl::pkey::PKey;
use openssl::rsa::Padding;

use crate::error::KsefError;

/// Encrypt `"{token}|{timestamp_ms}"` with RSA-OAEP (SHA-256 for both the
/// main digest and MGF1) under the exchange's token-encryption public key.
///
/// The plaintext layout is fixed by the exchange; the ciphertext itself is
/// randomized by OAEP padding.
pub fn encrypt_auth_token(
    token: &str,
    timestamp_ms: i64,
    public_key_pem: &str,
) -> Result<String, KsefError> {
    let pkey = PKey::public_key_from_pem(public_key_pem.as_bytes())
        .map_err(|e| KsefError::Crypto(format!("invalid exchange public key: {e}")))?;

    let mut encrypter = Encrypter::new(&pkey)?;
    encrypter.set_rsa_padding(Padding::PKCS1_OAEP)?;
    encrypter.set_rsa_oaep_md(MessageDigest::sha256())?;
    encrypter.set_rsa_mgf1_md(MessageDigest::sha256())?;

    let plaintext = format!("{token}|{timestamp_ms}");
    let mut ciphertext = vec![0u8; encrypter.encrypt_len(plaintext.as_bytes())?];
    let written = encrypter.encrypt(plaintext.as_bytes(), &mut ciphertext)?;
    ciphertext.truncate(written);

    Ok(B64.encode(ciphertext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use openssl::encrypt::Decrypter;
    use openssl::rsa::Rsa;

    #[test]
    fn oaep_round_trip_against_own_key() {
        let rsa = Rsa::generate(2048).unwrap();
        let pkey = PKey::from_rsa(rsa).unwrap();
        let pub_pem = String::from_utf8(pkey.public_key_to_pem().unwrap()).unwrap();

        let ciphertext_b64 = encrypt_auth_token("token-abc", 1_700_000_000_000, &pub_pem).unwrap();
        let ciphertext = B64.decode(ciphertext_b64).unwrap();

        let mut decrypter = Decrypter::new(&pkey).unwrap();
        decrypter.set_rsa_padding(Padding::PKCS1_OAEP).unwrap();
        decrypter.set_rsa_oaep_md(MessageDigest::sha256()).unwrap();
        decrypter.set_rsa_mgf1_md(MessageDigest::sha256()).unwrap();
        let mut plain = vec![0u8; decrypter.decrypt_len(&ciphertext).unwrap()];
        let n = decrypter.decrypt(&ciphertext, &mut plain).unwrap();
        plain.truncate(n);

        assert_eq!(plain, b"token-abc|1700000000000");
    }

    #[test]
    fn rejects_non_pem_key() {
        let err = encrypt_auth_token("t", 0, "not a pem").unwrap_err();
        assert!(matches!(err, KsefError::Crypto(_)));
    }
}
