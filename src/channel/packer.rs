//! The binary layout of a state the settlement contract verifies.
//!
//! ```solidity
//! struct Ledger {
//!     uint64 chainId;
//!     address token;
//!     uint8 decimals;
//!     uint256 userAllocation;
//!     int256 userNetFlow;
//!     uint256 nodeAllocation;
//!     int256 nodeNetFlow;
//! }
//! abi.encode(bytes32 channelId, uint64 version, uint8 intent, bytes32 metadata, Ledger home, Ledger nonHome)
//! ```

use serde::Serialize;

use super::{Intent, Ledger, State, TransitionType};
use crate::{
    abiencode::{
        self,
        types::{Address, Hash, I256, U256},
    },
    asset::{AssetDecimals, AssetNotFound},
    decimal::DecimalError,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PackError {
    #[error("state has no home channel")]
    MissingHomeChannel,
    #[error(transparent)]
    AssetNotFound(#[from] AssetNotFound),
    #[error(transparent)]
    Amount(#[from] DecimalError),
    #[error(transparent)]
    Encoding(#[from] abiencode::Error),
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackedLedger {
    pub chain_id: u64,
    pub token: Address,
    pub decimals: u8,
    pub user_allocation: U256,
    pub user_net_flow: I256,
    pub node_allocation: U256,
    pub node_net_flow: I256,
}

impl PackedLedger {
    /// Stands in for the missing escrow ledger. `decimals` is zero as well,
    /// this is not a real token.
    pub const EMPTY: PackedLedger = PackedLedger {
        chain_id: 0,
        token: Address::ZERO,
        decimals: 0,
        user_allocation: U256([0; 4]),
        user_net_flow: I256([0; 32]),
        node_allocation: U256([0; 4]),
        node_net_flow: I256([0; 32]),
    };

    fn new<A>(ledger: &Ledger, assets: &A) -> Result<Self, PackError>
    where
        A: AssetDecimals + ?Sized,
    {
        let decimals = assets.token_decimals(ledger.blockchain_id, &ledger.token_address)?;
        Ok(PackedLedger {
            chain_id: ledger.blockchain_id,
            token: ledger.token_address,
            decimals,
            user_allocation: ledger.user_balance.to_u256(decimals)?,
            user_net_flow: ledger.user_net_flow.to_i256(decimals)?,
            node_allocation: ledger.node_balance.to_u256(decimals)?,
            node_net_flow: ledger.node_net_flow.to_i256(decimals)?,
        })
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackedTransition {
    pub kind: TransitionType,
    pub tx_id: Hash,
    pub account_id: Hash,
    pub amount: I256,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackedState {
    pub channel_id: Hash,
    pub version: u64,
    pub intent: Intent,
    pub metadata: Hash,
    pub home: PackedLedger,
    pub non_home: PackedLedger,
}

/// The values [pack_state] encodes.
pub fn packed_state<A>(state: &State, assets: &A) -> Result<PackedState, PackError>
where
    A: AssetDecimals + ?Sized,
{
    let channel_id = state.home_channel_id.ok_or(PackError::MissingHomeChannel)?;
    let home = PackedLedger::new(&state.home_ledger, assets)?;
    let non_home = match &state.escrow_ledger {
        Some(ledger) => PackedLedger::new(ledger, assets)?,
        None => PackedLedger::EMPTY,
    };

    // Transition amounts are in units of the home token.
    let transitions = state
        .transitions
        .iter()
        .map(|t| {
            Ok(PackedTransition {
                kind: t.kind,
                tx_id: t.tx_id,
                account_id: t.account_id,
                amount: t.amount.to_i256(home.decimals)?,
            })
        })
        .collect::<Result<Vec<_>, PackError>>()?;

    Ok(PackedState {
        channel_id,
        version: state.version(),
        intent: state.intent(),
        metadata: abiencode::to_hash(&transitions)?,
        home,
        non_home,
    })
}

/// Encode `state` exactly like the settlement contract does. This is what
/// both parties sign.
pub fn pack_state<A>(state: &State, assets: &A) -> Result<Vec<u8>, PackError>
where
    A: AssetDecimals + ?Sized,
{
    Ok(abiencode::to_vec(&packed_state(state, assets)?)?)
}
