use core::fmt;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::{abiencode::types::Hash, decimal::Decimal};

/// Kind of a [Transition], with the numeric code the contracts and the node
/// use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransitionType {
    Void,
    Acknowledgement,
    HomeDeposit,
    HomeWithdrawal,
    EscrowDeposit,
    EscrowWithdraw,
    TransferSend,
    TransferReceive,
    Commit,
    Release,
    Migrate,
    EscrowLock,
    MutualLock,
    Finalize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unknown transition type {0}")]
pub struct UnknownTransitionType(pub u8);

impl TransitionType {
    pub const fn code(self) -> u8 {
        use TransitionType::*;
        match self {
            Void => 0,
            Acknowledgement => 1,
            HomeDeposit => 10,
            HomeWithdrawal => 11,
            EscrowDeposit => 20,
            EscrowWithdraw => 21,
            TransferSend => 30,
            TransferReceive => 31,
            Commit => 40,
            Release => 41,
            Migrate => 100,
            EscrowLock => 110,
            MutualLock => 120,
            Finalize => 200,
        }
    }
}

impl TryFrom<u8> for TransitionType {
    type Error = UnknownTransitionType;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        use TransitionType::*;
        Ok(match code {
            0 => Void,
            1 => Acknowledgement,
            10 => HomeDeposit,
            11 => HomeWithdrawal,
            20 => EscrowDeposit,
            21 => EscrowWithdraw,
            30 => TransferSend,
            31 => TransferReceive,
            40 => Commit,
            41 => Release,
            100 => Migrate,
            110 => EscrowLock,
            120 => MutualLock,
            200 => Finalize,
            code => return Err(UnknownTransitionType(code)),
        })
    }
}

impl fmt::Display for TransitionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// Encoded as its code, both as `uint8` in abi encodings and on the wire.
impl Serialize for TransitionType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for TransitionType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let code = u8::deserialize(deserializer)?;
        TransitionType::try_from(code).map_err(de::Error::custom)
    }
}

/// One atomic change of a channel state.
///
/// `account_id` references the other side of the change: a wallet (right
/// aligned), a channel id or an app session id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    #[serde(rename = "type")]
    pub kind: TransitionType,
    pub tx_id: Hash,
    pub account_id: Hash,
    pub amount: Decimal,
}
