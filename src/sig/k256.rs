//! Signer using the k256 Rust crate (implementation of ecdsa in Rust).

use core::fmt;

use crate::abiencode::types::{Address, Hash, Signature};
use k256::{
    ecdsa::{
        recoverable,
        signature::{hazmat::PrehashSigner, Signature as _},
        SigningKey, VerifyingKey,
    },
    elliptic_curve::sec1::ToEncodedPoint,
};

use super::{hash_to_eth_signed_msg_hash, public_key_to_address, recovery_id, Error, Signer};

pub struct K256Signer {
    key: SigningKey,
    addr: Address,
}

impl From<VerifyingKey> for Address {
    fn from(key: VerifyingKey) -> Self {
        public_key_to_address(key.to_encoded_point(false).as_bytes())
    }
}

impl fmt::Debug for K256Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("K256Signer")
            .field("addr", &self.addr)
            .finish_non_exhaustive()
    }
}

impl K256Signer {
    pub fn new<R: rand::Rng + rand::CryptoRng>(rng: &mut R) -> Self {
        // Out of range scalars are astronomically unlikely, just draw again.
        loop {
            let bytes: [u8; 32] = rng.gen();
            if let Ok(signer) = Self::from_private_key(&bytes) {
                return signer;
            }
        }
    }

    pub fn from_private_key(bytes: &[u8; 32]) -> Result<Self, Error> {
        let key = SigningKey::from_bytes(bytes).map_err(|_| Error::InvalidKey)?;
        let addr = key.verifying_key().into();
        Ok(Self { key, addr })
    }
}

impl Signer for K256Signer {
    fn address(&self) -> Address {
        self.addr
    }

    fn sign_eth(&self, msg: Hash) -> Result<Signature, Error> {
        // "\x19Ethereum Signed Message:\n32" format
        let hash = hash_to_eth_signed_msg_hash(msg);

        let sig: recoverable::Signature = self
            .key
            .sign_prehash(&hash.0)
            .map_err(|e| Error::Signing(e.to_string()))?;

        // Luckily for us, this Signature type already has the format we need:
        // - 65 bytes containing r, s and v in this order
        //
        // But we still have to add 27 to v for the signature to be valid in the
        // EVM.
        let mut sig_bytes = [0u8; 65];
        sig_bytes.copy_from_slice(sig.as_bytes());
        debug_assert!(sig_bytes[32] & 0x80 == 0);
        sig_bytes[64] += 27;

        Ok(Signature(sig_bytes))
    }
}

/// `hash` already carries the `Ethereum Signed Message` prefix.
pub(super) fn recover(hash: Hash, eth_sig: Signature) -> Result<Address, Error> {
    // Undo adding the 27, to go back to the format expected below
    let mut sig_bytes: [u8; 65] = eth_sig.0;
    sig_bytes[64] = recovery_id(&eth_sig)?;

    let sig = recoverable::Signature::from_bytes(&sig_bytes)
        .map_err(|e| Error::InvalidSignature(e.to_string()))?;

    let verifying_key = sig
        .recover_verifying_key_from_digest_bytes(&hash.0.into())
        .map_err(|e| Error::InvalidSignature(e.to_string()))?;
    Ok(verifying_key.into())
}
