use core::ops::Index;

use derive_more::Display;
use ethereum_types::H32;
use serde::{Deserialize, Serialize};
use ssz::{Decode, DecodeError, Encode};
use tree_hash::{TreeHash, TreeHashType};

pub use bls::{AggregatePublicKey, AggregateSignature, PublicKey, SecretKey, Signature};
pub use bls::{PublicKeyBytes, SignatureBytes};
pub use ethereum_types::H256;

pub type AggregateSignatureBytes = SignatureBytes;
pub type Epoch = u64;
pub type Gwei = u64;
pub type Slot = u64;
pub type CommitteeIndex = u64;
pub type ValidatorIndex = u64;
pub type UnixSeconds = u64;

/// A BLS signature domain: four domain-type bytes followed by the first 28
/// bytes of the fork data root.
pub type Domain = H256;

/// The four bytes distinguishing proposals, attestations, randao reveals,
/// deposits and exits from one another.
pub type DomainType = [u8; 4];

type VersionAsArray = [u8; 4];

#[derive(Clone, Copy, PartialEq, Eq, Default, Debug, Display, Deserialize, Serialize)]
#[display(fmt = "{}", _0)]
pub struct Version(H32);

impl Version {
    pub fn as_array(&self) -> &VersionAsArray {
        self.0.as_fixed_bytes()
    }
}

impl From<VersionAsArray> for Version {
    fn from(array: VersionAsArray) -> Self {
        Self(array.into())
    }
}

impl From<Version> for VersionAsArray {
    fn from(version: Version) -> Self {
        version.0.to_fixed_bytes()
    }
}

impl Index<usize> for Version {
    type Output = u8;

    fn index(&self, index: usize) -> &Self::Output {
        self.as_array().index(index)
    }
}

impl Decode for Version {
    fn is_ssz_fixed_len() -> bool {
        <VersionAsArray as Decode>::is_ssz_fixed_len()
    }

    fn ssz_fixed_len() -> usize {
        <VersionAsArray as Decode>::ssz_fixed_len()
    }

    fn from_ssz_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        VersionAsArray::from_ssz_bytes(bytes).map(Self::from)
    }
}

impl Encode for Version {
    fn is_ssz_fixed_len() -> bool {
        <VersionAsArray as Encode>::is_ssz_fixed_len()
    }

    fn ssz_fixed_len() -> usize {
        <VersionAsArray as Encode>::ssz_fixed_len()
    }

    fn ssz_append(&self, buf: &mut Vec<u8>) {
        self.as_array().ssz_append(buf)
    }
}

impl TreeHash for Version {
    fn tree_hash_type() -> TreeHashType {
        VersionAsArray::tree_hash_type()
    }

    fn tree_hash_packed_encoding(&self) -> Vec<u8> {
        self.as_array().tree_hash_packed_encoding()
    }

    fn tree_hash_packing_factor() -> usize {
        VersionAsArray::tree_hash_packing_factor()
    }

    fn tree_hash_root(&self) -> Vec<u8> {
        self.as_array().tree_hash_root()
    }
}
