use core::fmt;

use milagro_bls::Signature as RawSignature;
use ssz::DecodeError;

use crate::public_key::PublicKey;
use crate::secret_key::SecretKey;

#[derive(Clone)]
pub struct Signature(RawSignature);

impl Signature {
    pub fn new(message: &[u8], secret_key: &SecretKey) -> Self {
        Self(RawSignature::new(message, secret_key.as_raw()))
    }

    pub fn verify(&self, message: &[u8], pubkey: &PublicKey) -> bool {
        self.0.verify(message, pubkey.as_raw())
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        RawSignature::from_bytes(bytes)
            .map(Self)
            .map_err(|e| DecodeError::BytesInvalid(format!("invalid signature: {:?}", e)))
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        self.0.as_bytes().to_vec()
    }

    pub fn as_raw(&self) -> &RawSignature {
        &self.0
    }
}

impl PartialEq for Signature {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for Signature {}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Signature(0x{})", hex::encode(&self.as_bytes()[..8]))
    }
}
