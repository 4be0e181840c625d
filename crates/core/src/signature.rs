use hmac::{Hmac, Mac};
use sha2::Sha512;

use crate::config::Secret;

type HmacSha512 = Hmac<Sha512>;

/// Signs and verifies bridge payloads with HMAC-SHA512.
#[derive(Clone)]
pub struct Signer {
    key: Vec<u8>,
}

impl Signer {
    pub fn new(secret: &Secret) -> Self { Self::from_key(secret.expose().as_bytes()) }

    pub fn from_key(key: &[u8]) -> Self { Self { key: key.to_vec() } }

    fn mac(&self, payload: &[u8]) -> HmacSha512 {
        let mut mac = HmacSha512::new_from_slice(&self.key).expect("HMAC can take key of any size");
        mac.update(payload);
        mac
    }

    /// Lowercase hex signature over `payload`.
    pub fn sign(&self, payload: &[u8]) -> String {
        hex::encode(self.mac(payload).finalize().into_bytes())
    }

    /// Constant-time check of `signature` against `payload`.
    ///
    /// Only the lowercase hex that [`Signer::sign`] produces is accepted.
    /// Uppercase digits or malformed hex are a mismatch.
    pub fn verify(&self, payload: &[u8], signature: &str) -> bool {
        if signature.bytes().any(|b| b.is_ascii_uppercase()) {
            return false;
        }
        let Ok(signature) = hex::decode(signature) else {
            return false;
        };
        self.mac(payload).verify_slice(&signature).is_ok()
    }
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer").finish_non_exhaustive()
    }
}
