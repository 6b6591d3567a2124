#[macro_use]
mod macros;

mod aggregate_signature;
mod bytes_types;
mod keypair;
mod public_key;
mod secret_key;
mod signature;

pub use aggregate_signature::AggregateSignature;
pub use bytes_types::{PublicKeyBytes, SignatureBytes};
pub use keypair::Keypair;
pub use milagro_bls::AggregatePublicKey;
pub use public_key::PublicKey;
pub use secret_key::SecretKey;
pub use signature::Signature;

pub const BLS_PUBLIC_KEY_BYTE_SIZE: usize = 48;
pub const BLS_SIG_BYTE_SIZE: usize = 96;
pub const BLS_SECRET_KEY_BYTE_SIZE: usize = 32;

use core::convert::TryInto;

/// Verify a single signature. Malformed keys or signatures verify as
/// `false`; this function never fails.
pub fn verify(pubkey: &PublicKeyBytes, message: &[u8], signature: &SignatureBytes) -> bool {
    let pubkey: PublicKey = match pubkey.try_into() {
        Ok(pubkey) => pubkey,
        Err(_) => return false,
    };
    let signature: Signature = match signature.try_into() {
        Ok(signature) => signature,
        Err(_) => return false,
    };
    signature.verify(message, &pubkey)
}

/// Verify an aggregate signature over a single message signed by every one
/// of `pubkeys`. Malformed input verifies as `false`; this function never
/// fails.
pub fn fast_aggregate_verify(
    pubkeys: &[PublicKey],
    message: &[u8],
    signature: &SignatureBytes,
) -> bool {
    if pubkeys.is_empty() {
        return false;
    }
    let signature: AggregateSignature = match signature.try_into() {
        Ok(signature) => signature,
        Err(_) => return false,
    };
    signature.fast_aggregate_verify(message, pubkeys)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_round_trip() {
        let keypair = Keypair::random();
        let message = b"beacon block at slot 3";
        let signature = Signature::new(message, &keypair.sk);

        let pubkey_bytes = PublicKeyBytes::from(&keypair.pk);
        let signature_bytes = SignatureBytes::from(&signature);

        assert!(verify(&pubkey_bytes, message, &signature_bytes));
        assert!(!verify(&pubkey_bytes, b"another message", &signature_bytes));
    }

    #[test]
    fn verify_rejects_empty_signature() {
        let keypair = Keypair::random();
        let pubkey_bytes = PublicKeyBytes::from(&keypair.pk);
        assert!(!verify(&pubkey_bytes, b"msg", &SignatureBytes::empty()));
    }

    #[test]
    fn fast_aggregate_verify_two_signers() {
        let keypairs = [Keypair::random(), Keypair::random()];
        let message = b"attestation data root";

        let mut aggregate = AggregateSignature::new();
        for keypair in &keypairs {
            aggregate.add(&Signature::new(message, &keypair.sk));
        }
        let signature_bytes = SignatureBytes::from(&aggregate);
        let pubkeys = [keypairs[0].pk.clone(), keypairs[1].pk.clone()];

        assert!(fast_aggregate_verify(&pubkeys, message, &signature_bytes));
        assert!(!fast_aggregate_verify(&pubkeys[..1], message, &signature_bytes));
    }

    #[test]
    fn fast_aggregate_verify_rejects_no_pubkeys() {
        assert!(!fast_aggregate_verify(&[], b"msg", &SignatureBytes::empty()));
    }
}
