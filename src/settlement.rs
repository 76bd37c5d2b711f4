//! On-chain settlement.
//!
//! Submitting transactions is left to the embedding application, which
//! implements [SettlementChain] for its chain client. The engine only ever
//! hands it [CoSignedState]s, so nothing reaches the chain that the node did
//! not sign as well.

use async_trait::async_trait;

use crate::{
    abiencode::types::{Address, Hash, U256},
    asset::AssetDecimals,
    channel::{pack_state, ChannelDefinition, ChannelSignature, State},
    error::{Error, SettlementError},
};

/// A state signed by both parties, together with its packed encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoSignedState {
    state: State,
    channel_id: Hash,
    packed: Vec<u8>,
    user_sig: ChannelSignature,
    node_sig: ChannelSignature,
}

impl CoSignedState {
    /// Fails with [SettlementError::NotCoSigned] unless both signatures are
    /// attached. The signatures themselves are not checked again.
    pub fn new<A>(state: &State, assets: &A) -> Result<Self, Error>
    where
        A: AssetDecimals + ?Sized,
    {
        let (Some(user_sig), Some(node_sig)) = (state.user_sig(), state.node_sig()) else {
            return Err(SettlementError::NotCoSigned(state.id()).into());
        };
        let channel_id = state
            .home_channel_id
            .ok_or(SettlementError::NotCoSigned(state.id()))?;
        Ok(CoSignedState {
            packed: pack_state(state, assets)?,
            user_sig: *user_sig,
            node_sig: *node_sig,
            channel_id,
            state: state.clone(),
        })
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    /// The home channel the state belongs to.
    pub fn channel_id(&self) -> Hash {
        self.channel_id
    }

    /// `abi.encode` of the state as the contract verifies it.
    pub fn packed(&self) -> &[u8] {
        &self.packed
    }

    pub fn user_sig(&self) -> ChannelSignature {
        self.user_sig
    }

    pub fn node_sig(&self) -> ChannelSignature {
        self.node_sig
    }
}

/// The settlement contract, as seen from the client. Every method returns
/// the hash of the submitted transaction.
///
/// Token amounts are raw integers in the token's smallest unit.
#[async_trait]
pub trait SettlementChain: Send + Sync {
    /// Open the channel on-chain with its first state.
    async fn create(&self, definition: &ChannelDefinition, state: &CoSignedState) -> Result<Hash, SettlementError>;

    /// Record a newer state without closing.
    async fn checkpoint(&self, state: &CoSignedState) -> Result<Hash, SettlementError>;

    /// Start a dispute with the latest state the user holds.
    async fn challenge(&self, state: &CoSignedState) -> Result<Hash, SettlementError>;

    /// Close with a final state and pay out.
    async fn close(&self, state: &CoSignedState) -> Result<Hash, SettlementError>;

    /// How much of `token` the settlement contract may pull from `owner`.
    async fn allowance(&self, blockchain_id: u64, token: Address, owner: Address) -> Result<U256, SettlementError>;

    async fn balance(&self, blockchain_id: u64, token: Address, owner: Address) -> Result<U256, SettlementError>;

    /// Allow the settlement contract to pull `amount` of `token`.
    async fn approve(&self, blockchain_id: u64, token: Address, amount: U256) -> Result<Hash, SettlementError>;
}
