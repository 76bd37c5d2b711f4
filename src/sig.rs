//! Handles the creation and verification of (Ethereum) Signatures.
//!
//! Everything signed by this crate uses the `\x19Ethereum Signed Message`
//! format over a keccak256 hash, which is what the settlement contracts
//! recover with `ECDSA.recover`.

use core::fmt;

use crate::abiencode::{
    keccak256,
    types::{Address, Hash, Signature},
};

#[cfg(feature = "k256")]
mod k256;
#[cfg(feature = "k256")]
pub use self::k256::K256Signer;

#[cfg(feature = "secp256k1")]
mod secp256k1;
#[cfg(feature = "secp256k1")]
pub use self::secp256k1::Secp256k1Signer;

// Both backends produce identical signatures (RFC 6979 nonces, low s), so
// which one does recovery does not matter. libsecp256k1 wins if enabled.
#[cfg(feature = "secp256k1")]
pub type LocalSigner = Secp256k1Signer;
#[cfg(all(feature = "k256", not(feature = "secp256k1")))]
pub type LocalSigner = K256Signer;

#[cfg(feature = "secp256k1")]
use self::secp256k1::recover as backend_recover;
#[cfg(all(feature = "k256", not(feature = "secp256k1")))]
use self::k256::recover as backend_recover;

#[cfg(not(any(feature = "k256", feature = "secp256k1")))]
compile_error!("either the `k256` or the `secp256k1` feature must be enabled");

#[cfg(test)]
mod tests;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("invalid private key")]
    InvalidKey,
    #[error("invalid signature: {0}")]
    InvalidSignature(String),
    #[error("signing failed: {0}")]
    Signing(String),
}

/// Anything able to produce Ethereum signatures for one address.
///
/// Implemented by the local key backends, wallets and session keys plug in
/// through the same trait.
pub trait Signer: Send + Sync + fmt::Debug {
    fn address(&self) -> Address;

    /// Sign a hash in the `\x19Ethereum Signed Message:\n32` format.
    fn sign_eth(&self, msg: Hash) -> Result<Signature, Error>;

    /// Sign `keccak256(msg)`.
    fn sign(&self, msg: &[u8]) -> Result<Signature, Error> {
        self.sign_eth(keccak256(msg))
    }
}

impl<S: Signer + ?Sized> Signer for std::sync::Arc<S> {
    fn address(&self) -> Address {
        (**self).address()
    }

    fn sign_eth(&self, msg: Hash) -> Result<Signature, Error> {
        (**self).sign_eth(msg)
    }
}

/// Add the `\x19Ethereum Signed Message\n<length>` prefix to hash.
///
/// This is the format expected by the Solidity contracts.
fn hash_to_eth_signed_msg_hash(hash: Hash) -> Hash {
    // Packed encoding => We can't use the serializer
    let mut buf = [0u8; 28 + 32];
    buf[..28].copy_from_slice(b"\x19Ethereum Signed Message:\n32");
    buf[28..].copy_from_slice(&hash.0);
    keccak256(&buf)
}

/// Undo the `+ 27` of Ethereum signatures, rejecting anything that is not a
/// valid recovery id.
fn recovery_id(eth_sig: &Signature) -> Result<u8, Error> {
    match eth_sig.0[64] {
        v @ (27 | 28) => Ok(v - 27),
        v => Err(Error::InvalidSignature(format!("invalid v value {}", v))),
    }
}

fn public_key_to_address(uncompressed: &[u8]) -> Address {
    // Throw away the first byte, which is not part of the public key. It is
    // the tag of the SEC1 encoding.
    let hash = keccak256(&uncompressed[1..]);
    let mut addr = Address::ZERO;
    addr.0.copy_from_slice(&hash.0[32 - 20..]);
    addr
}

/// Recover the address that signed `msg` with [Signer::sign_eth].
///
/// `msg` is the hash given to the signer, without the `Ethereum Signed
/// Message` prefix.
pub fn recover_eth(msg: Hash, eth_sig: Signature) -> Result<Address, Error> {
    backend_recover(hash_to_eth_signed_msg_hash(msg), eth_sig)
}

/// Recover the address that signed `msg` with [Signer::sign].
pub fn recover_signer(msg: &[u8], eth_sig: Signature) -> Result<Address, Error> {
    recover_eth(keccak256(msg), eth_sig)
}
