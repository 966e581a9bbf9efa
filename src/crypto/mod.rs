//! Certificate handling, at-rest key encryption, token encryption and
//! XAdES document signing.

pub mod certificate;
pub mod keystore;
pub mod public_key_cache;
pub mod token;
pub mod xmldsig;

pub use certificate::{CertificateMaterial, parse_pem_pair, parse_pkcs12};
pub use keystore::AtRestCipher;
pub use public_key_cache::{CachedPublicKey, PublicKeyCache};
pub use token::encrypt_auth_token;
pub use xmldsig::sign_auth_request;
