//! Errors shared across the crate.
//!
//! Each layer has its own enum, [Error] wraps all of them for the
//! [Client](crate::Client). Validation and signature errors are always
//! raised before anything is sent to the node.

use crate::{
    abiencode::{
        self,
        types::{Address, Hash},
    },
    asset::AssetNotFound,
    config::ConfigError,
    channel::PackError,
    decimal::{Decimal, DecimalError},
    rpc::{ConnectionError, ProtocolError, RpcError},
    sig,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{amount} has more fractional digits than the {decimals} the token supports")]
    PrecisionExceeded { amount: Decimal, decimals: u8 },
    #[error("amount must be positive, got {0}")]
    NonPositiveAmount(Decimal),
    #[error("{field} would become negative ({balance} - {amount})")]
    NegativeBalance {
        field: &'static str,
        balance: Decimal,
        amount: Decimal,
    },
    #[error("missing {0}")]
    MissingField(&'static str),
    #[error(transparent)]
    AssetNotFound(#[from] AssetNotFound),
    #[error("asset {asset} is not supported on blockchain {blockchain_id}")]
    UnsupportedAsset { asset: String, blockchain_id: u64 },
    #[error("amount out of range: {0}")]
    AmountOutOfRange(DecimalError),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("invalid definition: {0}")]
    InvalidDefinition(String),
    #[error("invalid allocations: {0}")]
    InvalidAllocations(String),
    #[error("invalid intent: {0}")]
    InvalidIntent(String),
    #[error("expected version {expected}, got {got}")]
    InvalidVersion { expected: u64, got: u64 },
    #[error("unknown app session {0}")]
    UnknownAppSession(Hash),
    #[error("app session {0} already exists")]
    AppSessionExists(Hash),
    #[error("app session {0} is closed")]
    AppSessionClosed(Hash),
    #[error(transparent)]
    Encoding(#[from] abiencode::Error),
}

impl From<DecimalError> for ValidationError {
    fn from(e: DecimalError) -> Self {
        match e {
            DecimalError::PrecisionExceeded {
                amount, decimals, ..
            } => ValidationError::PrecisionExceeded { amount, decimals },
            e => ValidationError::AmountOutOfRange(e),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("missing {0} signature")]
    Missing(&'static str),
    #[error(transparent)]
    Signer(#[from] sig::Error),
    #[error("malformed signature: {0}")]
    Malformed(String),
    #[error("signed by {recovered}, expected {expected}")]
    SignerMismatch { expected: Address, recovered: Address },
    #[error("signature validator {0} is not approved for this channel")]
    UnapprovedValidator(u8),
    #[error("{0} is not an authorized session key")]
    UnauthorizedSessionKey(Address),
    #[error("session key {key} expired at {expires_at}")]
    SessionKeyExpired { key: Address, expires_at: u64 },
    #[error("{0} is not a participant")]
    UnknownSigner(Address),
    #[error("{0} signed more than once")]
    DuplicateSigner(Address),
    #[error("participant {0} did not sign")]
    MissingParticipant(Address),
    #[error("signature weight {weight} does not reach quorum {quorum}")]
    QuorumNotMet { weight: u64, quorum: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettlementError {
    /// Returned by the chain, passed on verbatim.
    #[error("settlement failed: {0}")]
    Chain(String),
    #[error("state {0} is not signed by both parties")]
    NotCoSigned(Hash),
    #[error("no settlement chain configured")]
    NotConfigured,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Pack(#[from] PackError),
    #[error(transparent)]
    Signature(#[from] SignatureError),
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error(transparent)]
    Settlement(#[from] SettlementError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Error::Rpc(e.into())
    }
}

impl From<ConnectionError> for Error {
    fn from(e: ConnectionError) -> Self {
        Error::Rpc(e.into())
    }
}

impl From<sig::Error> for Error {
    fn from(e: sig::Error) -> Self {
        Error::Signature(e.into())
    }
}

impl From<AssetNotFound> for Error {
    fn from(e: AssetNotFound) -> Self {
        Error::Validation(e.into())
    }
}

impl From<abiencode::Error> for Error {
    fn from(e: abiencode::Error) -> Self {
        Error::Validation(e.into())
    }
}
