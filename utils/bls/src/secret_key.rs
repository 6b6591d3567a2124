use core::fmt;

use milagro_bls::SecretKey as RawSecretKey;
use ssz::DecodeError;

use crate::BLS_SECRET_KEY_BYTE_SIZE;

#[derive(Clone)]
pub struct SecretKey(RawSecretKey);

impl SecretKey {
    pub fn random() -> Self {
        Self(RawSecretKey::random(&mut rand::thread_rng()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() != BLS_SECRET_KEY_BYTE_SIZE {
            return Err(DecodeError::InvalidByteLength {
                len: bytes.len(),
                expected: BLS_SECRET_KEY_BYTE_SIZE,
            });
        }
        RawSecretKey::from_bytes(bytes)
            .map(Self)
            .map_err(|e| DecodeError::BytesInvalid(format!("invalid secret key: {:?}", e)))
    }

    pub fn as_raw(&self) -> &RawSecretKey {
        &self.0
    }
}

impl PartialEq for SecretKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_bytes()[..] == other.0.as_bytes()[..]
    }
}

impl Eq for SecretKey {}

impl fmt::Debug for SecretKey {
    // Never print key material.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "SecretKey(..)")
    }
}
