use super::*;
use rand::{rngs::StdRng, SeedableRng};

// Test key from the web3.js documentation, do not use it for anything else.
const PRIVATE_KEY: &str = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
const ADDRESS: &str = "0x2c7536e3605d9c16a7a3d7b1898e529396a65c23";

fn private_key() -> [u8; 32] {
    let mut key = [0u8; 32];
    hex::decode_to_slice(PRIVATE_KEY, &mut key).unwrap();
    key
}

macro_rules! make_compare_hardcoded {
    ($name:ident, $signer:ty) => {
        #[test]
        fn $name() {
            // This test may break in the future (e.g. if the dependency changes
            // internally), it exists to allow checking if a signature is valid
            // on-chain without needing a real blockchain.
            let signer = <$signer>::from_private_key(&private_key()).unwrap();
            let sig = signer.sign(b"nitrolink").unwrap();

            assert_eq!(signer.address().to_string(), ADDRESS);
            assert_eq!(
                sig.to_string(),
                "0xfa3d51e95462cc1f6d65fd1584eb23bae7e6776eaf758016321f8f452faa905708bf4ef85288a576a1006e0321afe24342df82d9dec2690fc38a5195d0003c2b1b"
            );
        }
    };
}

macro_rules! make_a_to_b {
    ($name:ident, $signer:ty, $recover:path) => {
        #[test]
        fn $name() {
            // Do not use that on any real device, this is just for testing.
            let mut rng = StdRng::seed_from_u64(0);
            let signer = <$signer>::new(&mut rng);
            let msg: Hash = rand::Rng::gen(&mut rng);
            let sig = signer.sign_eth(msg).unwrap();

            let address = $recover(hash_to_eth_signed_msg_hash(msg), sig).unwrap();

            assert_eq!(address, signer.address());
        }
    };
}

#[cfg(feature = "k256")]
make_compare_hardcoded!(k256_sign, K256Signer);

#[cfg(feature = "secp256k1")]
make_compare_hardcoded!(secp256k1_sign, Secp256k1Signer);

#[cfg(feature = "k256")]
make_a_to_b!(k256_to_k256, K256Signer, super::k256::recover);

#[cfg(feature = "secp256k1")]
make_a_to_b!(secp256k1_to_secp256k1, Secp256k1Signer, super::secp256k1::recover);

#[cfg(all(feature = "secp256k1", feature = "k256"))]
make_a_to_b!(secp256k1_to_k256, Secp256k1Signer, super::k256::recover);

#[cfg(all(feature = "secp256k1", feature = "k256"))]
make_a_to_b!(k256_to_secp256k1, K256Signer, super::secp256k1::recover);

#[test]
fn recover_signer_round_trip() {
    let signer = LocalSigner::new(&mut StdRng::seed_from_u64(1));
    let sig = signer.sign(b"some message").unwrap();
    assert_eq!(recover_signer(b"some message", sig).unwrap(), signer.address());
    assert_ne!(recover_signer(b"other message", sig).unwrap(), signer.address());
}

#[test]
fn rejects_invalid_v() {
    let signer = LocalSigner::new(&mut StdRng::seed_from_u64(2));
    let mut sig = signer.sign(b"data").unwrap();
    sig.0[64] = 1;
    assert!(matches!(
        recover_signer(b"data", sig),
        Err(Error::InvalidSignature(_))
    ));
}

#[test]
fn rejects_invalid_key() {
    assert_eq!(
        LocalSigner::from_private_key(&[0u8; 32]).unwrap_err(),
        Error::InvalidKey
    );
}

#[test]
fn shared_signers_sign_the_same() {
    let signer = std::sync::Arc::new(LocalSigner::from_private_key(&private_key()).unwrap());
    let dyn_signer: std::sync::Arc<dyn Signer> = signer.clone();
    assert_eq!(dyn_signer.address(), signer.address());
    assert_eq!(
        dyn_signer.sign(b"x").unwrap(),
        signer.sign(b"x").unwrap()
    );
}
