//! Client engine for an off-chain payment channel network.
//!
//! A [Client] keeps one wallet's channel states with a node: it builds the
//! next state, signs it, has the node counter-sign it over the [rpc]
//! connection and hands co-signed states to a
//! [SettlementChain](settlement::SettlementChain) when funds have to move
//! on-chain. [app] coordinates multi-party app sessions funded from those
//! channels.
//!
//! Everything signed is the Solidity abi encoding of the data, produced by
//! the serde serializer in `abiencode`, so the settlement contracts can
//! verify the same bytes.

mod abiencode {
    mod error;
    mod hashing;
    mod ser;

    pub mod types;

    pub use error::Error;
    pub use hashing::{keccak256, to_hash};
    pub use ser::{to_vec, to_writer, Writer};

    #[cfg(test)]
    pub mod tests;
}

pub mod app;
pub mod asset;
pub mod channel;
pub mod config;
pub mod decimal;
pub mod error;
pub mod rpc;
pub mod session_key;
pub mod settlement;
pub mod sig;

mod client;

pub use abiencode::{
    keccak256,
    types::{Address, Hash, ParseError, Signature, I256, U256},
    Error as EncodingError,
};
pub use client::{Client, StateReceipt};
pub use config::Config;
pub use decimal::Decimal;
pub use error::Error;
