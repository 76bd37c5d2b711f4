//! Signer using libsecp256k1 (via the secp256k1 crate).

use core::fmt;

use crate::abiencode::types::{Address, Hash, Signature};
use secp256k1::{
    ecdsa::{RecoverableSignature, RecoveryId},
    All, Message, PublicKey, Secp256k1, SecretKey,
};

use super::{hash_to_eth_signed_msg_hash, public_key_to_address, recovery_id, Error, Signer};

pub struct Secp256k1Signer {
    secp: Secp256k1<All>,
    key: SecretKey,
    addr: Address,
}

impl From<PublicKey> for Address {
    fn from(pk: PublicKey) -> Self {
        public_key_to_address(&pk.serialize_uncompressed())
    }
}

impl fmt::Debug for Secp256k1Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secp256k1Signer")
            .field("addr", &self.addr)
            .finish_non_exhaustive()
    }
}

impl Secp256k1Signer {
    pub fn new<R: rand::Rng + rand::CryptoRng>(rng: &mut R) -> Self {
        let secp = Secp256k1::new();
        let key = SecretKey::new(rng);
        let addr = PublicKey::from_secret_key(&secp, &key).into();
        Self { secp, key, addr }
    }

    pub fn from_private_key(bytes: &[u8; 32]) -> Result<Self, Error> {
        let secp = Secp256k1::new();
        let key = SecretKey::from_slice(bytes).map_err(|_| Error::InvalidKey)?;
        let addr = PublicKey::from_secret_key(&secp, &key).into();
        Ok(Self { secp, key, addr })
    }
}

impl Signer for Secp256k1Signer {
    fn address(&self) -> Address {
        self.addr
    }

    /// Sign a hash using a Ethereum 65-byte recoverable signature.
    fn sign_eth(&self, msg: Hash) -> Result<Signature, Error> {
        // "\x19Ethereum Signed Message:\n32" format
        let hash = hash_to_eth_signed_msg_hash(msg);
        let message = Message::from_slice(&hash.0).map_err(|e| Error::Signing(e.to_string()))?;

        // We have to use sign_ecdsa_recoverable because the smart contract must
        // be able to recover the address. This gives us the additional
        // information needed for v.
        let sig = self.secp.sign_ecdsa_recoverable(&message, &self.key);
        let (v, rs) = sig.serialize_compact();

        // [EIP-2](https://eips.ethereum.org/EIPS/eip-2) makes all signatures
        // with a non-canonical solution (s starts with the bit 1) invalid.
        // libsecp256k1 only produces canonical signatures, fail early if that
        // ever changes.
        debug_assert!(rs[32] & 0x80 == 0);

        // Ethereum kept the offset of 27 for v from Bitcoin. Compact
        // signatures (EIP-2098) and EIP-155 chain ids in v are not used by the
        // contracts.
        let v = 27 + v.to_i32() as u8;

        Ok(Signature::new(&rs, v))
    }
}

/// `hash` already carries the `Ethereum Signed Message` prefix.
pub(super) fn recover(hash: Hash, eth_sig: Signature) -> Result<Address, Error> {
    let invalid = |e: secp256k1::Error| Error::InvalidSignature(e.to_string());

    let recid = RecoveryId::from_i32(recovery_id(&eth_sig)?.into()).map_err(invalid)?;
    let sig = RecoverableSignature::from_compact(&eth_sig.0[..64], recid).map_err(invalid)?;

    let message = Message::from_slice(&hash.0).map_err(invalid)?;
    let pk = Secp256k1::verification_only()
        .recover_ecdsa(&message, &sig)
        .map_err(invalid)?;

    Ok(pk.into())
}
