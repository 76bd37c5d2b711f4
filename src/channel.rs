//! Channel states and the identifiers derived from them.
//!
//! All identifiers are keccak256 hashes over abi encodings, so the settlement
//! contracts can derive the same values on-chain.

mod definition;
mod intent;
mod ledger;
mod packer;
mod signed;
mod state;
mod transition;

#[cfg(test)]
mod tests;

use serde::Serialize;

use crate::abiencode::{
    self, keccak256,
    types::{Address, Hash, U256},
};

pub use definition::{ChannelDefinition, SignatureValidator};
pub use intent::Intent;
pub use ledger::Ledger;
pub use packer::{pack_state, packed_state, PackError, PackedLedger, PackedState, PackedTransition};
pub use signed::ChannelSignature;
pub use state::State;
pub use transition::{Transition, TransitionType, UnknownTransitionType};

/// Channel metadata: the first 8 bytes of `keccak256(asset)`, right padded
/// with zeros.
pub fn channel_metadata(asset: &str) -> Hash {
    let hash = keccak256(asset.as_bytes());
    let mut metadata = Hash::ZERO;
    metadata.0[..8].copy_from_slice(&hash.0[..8]);
    metadata
}

#[derive(Serialize)]
struct HomeChannelPreimage {
    challenge: u32,
    user: Address,
    node: Address,
    nonce: u64,
    approved_sig_validators: U256,
    metadata: Hash,
}

/// Id of the home channel between `user` and `node` for `asset`.
pub fn home_channel_id(
    node: Address,
    user: Address,
    asset: &str,
    definition: &ChannelDefinition,
) -> Result<Hash, abiencode::Error> {
    abiencode::to_hash(&HomeChannelPreimage {
        challenge: definition.challenge,
        user,
        node,
        nonce: definition.nonce,
        approved_sig_validators: definition.approved_sig_validators,
        metadata: channel_metadata(asset),
    })
}

/// Id of the escrow channel opened from `home_channel_id` at `version`.
pub fn escrow_channel_id(home_channel_id: Hash, version: u64) -> Result<Hash, abiencode::Error> {
    abiencode::to_hash(&(home_channel_id, version))
}

#[derive(Serialize)]
struct StatePreimage<'a> {
    user_wallet: Address,
    asset: &'a str,
    epoch: u64,
    version: u64,
}

/// Id of the state of `user_wallet`'s `asset` channel at `epoch`/`version`.
pub fn state_id(
    user_wallet: Address,
    asset: &str,
    epoch: u64,
    version: u64,
) -> Result<Hash, abiencode::Error> {
    abiencode::to_hash(&StatePreimage {
        user_wallet,
        asset,
        epoch,
        version,
    })
}

/// Id of the `index`th transition of the state `state_id`.
pub fn transaction_id(
    state_id: Hash,
    kind: TransitionType,
    account_id: Hash,
    index: u64,
) -> Result<Hash, abiencode::Error> {
    abiencode::to_hash(&(state_id, kind, account_id, index))
}
