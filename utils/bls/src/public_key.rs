use core::fmt;
use core::hash::{Hash, Hasher};

use milagro_bls::PublicKey as RawPublicKey;
use ssz::DecodeError;

use crate::secret_key::SecretKey;

#[derive(Clone)]
pub struct PublicKey(RawPublicKey);

impl PublicKey {
    pub fn from_secret_key(secret_key: &SecretKey) -> Self {
        Self(RawPublicKey::from_secret_key(secret_key.as_raw()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        RawPublicKey::from_bytes(bytes)
            .map(Self)
            .map_err(|e| DecodeError::BytesInvalid(format!("invalid public key: {:?}", e)))
    }

    /// The compressed 48-byte representation.
    pub fn as_bytes(&self) -> Vec<u8> {
        self.0.as_bytes().to_vec()
    }

    pub fn as_raw(&self) -> &RawPublicKey {
        &self.0
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for PublicKey {}

impl Hash for PublicKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_bytes().hash(state)
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.as_bytes()))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "PublicKey({})", self)
    }
}
