use core::fmt;

use milagro_bls::AggregateSignature as RawAggregateSignature;
use ssz::DecodeError;

use crate::public_key::PublicKey;
use crate::signature::Signature;

#[derive(Clone)]
pub struct AggregateSignature(RawAggregateSignature);

impl AggregateSignature {
    pub fn new() -> Self {
        Self(RawAggregateSignature::new())
    }

    pub fn add(&mut self, signature: &Signature) {
        self.0.add(signature.as_raw())
    }

    /// Verify this aggregate against one message signed by all `pubkeys`.
    pub fn fast_aggregate_verify(&self, message: &[u8], pubkeys: &[PublicKey]) -> bool {
        let pubkey_refs = pubkeys.iter().map(PublicKey::as_raw).collect::<Vec<_>>();
        self.0.fast_aggregate_verify(message, &pubkey_refs)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        RawAggregateSignature::from_bytes(bytes)
            .map(Self)
            .map_err(|e| DecodeError::BytesInvalid(format!("invalid aggregate signature: {:?}", e)))
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        self.0.as_bytes().to_vec()
    }
}

impl Default for AggregateSignature {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for AggregateSignature {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for AggregateSignature {}

impl fmt::Debug for AggregateSignature {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "AggregateSignature(0x{})", hex::encode(&self.as_bytes()[..8]))
    }
}
