use core::convert::TryFrom;

use ssz::DecodeError;

use crate::aggregate_signature::AggregateSignature;
use crate::public_key::PublicKey;
use crate::signature::Signature;
use crate::{BLS_PUBLIC_KEY_BYTE_SIZE, BLS_SIG_BYTE_SIZE};

/// A compressed public key that has not been checked for validity.
///
/// States and blocks carry keys in this form; decompression to a
/// [`PublicKey`] happens only at verification sites.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PublicKeyBytes {
    bytes: [u8; BLS_PUBLIC_KEY_BYTE_SIZE],
}

impl PublicKeyBytes {
    pub fn empty() -> Self {
        Self {
            bytes: [0; BLS_PUBLIC_KEY_BYTE_SIZE],
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() != BLS_PUBLIC_KEY_BYTE_SIZE {
            return Err(DecodeError::InvalidByteLength {
                len: bytes.len(),
                expected: BLS_PUBLIC_KEY_BYTE_SIZE,
            });
        }
        let mut array = [0; BLS_PUBLIC_KEY_BYTE_SIZE];
        array.copy_from_slice(bytes);
        Ok(Self { bytes: array })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl From<&PublicKey> for PublicKeyBytes {
    fn from(pubkey: &PublicKey) -> Self {
        let mut bytes = [0; BLS_PUBLIC_KEY_BYTE_SIZE];
        bytes.copy_from_slice(pubkey.as_bytes().as_slice());
        Self { bytes }
    }
}

impl TryFrom<&PublicKeyBytes> for PublicKey {
    type Error = DecodeError;

    fn try_from(bytes: &PublicKeyBytes) -> Result<Self, Self::Error> {
        PublicKey::from_bytes(&bytes.bytes)
    }
}

bytes_struct_impls!(PublicKeyBytes, BLS_PUBLIC_KEY_BYTE_SIZE);

/// A possibly-aggregated signature that has not been checked for validity.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SignatureBytes {
    bytes: [u8; BLS_SIG_BYTE_SIZE],
}

impl SignatureBytes {
    pub fn empty() -> Self {
        Self {
            bytes: [0; BLS_SIG_BYTE_SIZE],
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() != BLS_SIG_BYTE_SIZE {
            return Err(DecodeError::InvalidByteLength {
                len: bytes.len(),
                expected: BLS_SIG_BYTE_SIZE,
            });
        }
        let mut array = [0; BLS_SIG_BYTE_SIZE];
        array.copy_from_slice(bytes);
        Ok(Self { bytes: array })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl From<&Signature> for SignatureBytes {
    fn from(signature: &Signature) -> Self {
        let mut bytes = [0; BLS_SIG_BYTE_SIZE];
        bytes.copy_from_slice(signature.as_bytes().as_slice());
        Self { bytes }
    }
}

impl From<&AggregateSignature> for SignatureBytes {
    fn from(signature: &AggregateSignature) -> Self {
        let mut bytes = [0; BLS_SIG_BYTE_SIZE];
        bytes.copy_from_slice(signature.as_bytes().as_slice());
        Self { bytes }
    }
}

impl TryFrom<&SignatureBytes> for Signature {
    type Error = DecodeError;

    fn try_from(bytes: &SignatureBytes) -> Result<Self, Self::Error> {
        Signature::from_bytes(&bytes.bytes)
    }
}

impl TryFrom<&SignatureBytes> for AggregateSignature {
    type Error = DecodeError;

    fn try_from(bytes: &SignatureBytes) -> Result<Self, Self::Error> {
        AggregateSignature::from_bytes(&bytes.bytes)
    }
}

bytes_struct_impls!(SignatureBytes, BLS_SIG_BYTE_SIZE);
