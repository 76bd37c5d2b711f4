use serde::{Serialize, Serializer};

use super::TransitionType;

/// What the settlement contract does with a state, derived from its last
/// transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Intent {
    Operate = 0,
    Close = 1,
    Deposit = 2,
    Withdraw = 3,
    InitiateEscrowDeposit = 4,
    FinalizeEscrowDeposit = 5,
    InitiateEscrowWithdrawal = 6,
    FinalizeEscrowWithdrawal = 7,
    InitiateMigration = 8,
}

impl Intent {
    pub const fn code(self) -> u8 {
        self as u8
    }
}

impl From<TransitionType> for Intent {
    fn from(kind: TransitionType) -> Self {
        use TransitionType::*;
        match kind {
            Void | Acknowledgement | TransferSend | TransferReceive | Commit | Release => {
                Intent::Operate
            }
            HomeDeposit => Intent::Deposit,
            HomeWithdrawal => Intent::Withdraw,
            EscrowDeposit => Intent::FinalizeEscrowDeposit,
            EscrowWithdraw => Intent::FinalizeEscrowWithdrawal,
            Migrate => Intent::InitiateMigration,
            EscrowLock => Intent::InitiateEscrowWithdrawal,
            MutualLock => Intent::InitiateEscrowDeposit,
            Finalize => Intent::Close,
        }
    }
}

impl Serialize for Intent {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u8(self.code())
    }
}
