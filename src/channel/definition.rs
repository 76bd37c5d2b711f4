use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};

use crate::{abiencode::types::U256, error::SignatureError};

/// Who vouches for a channel signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SignatureValidator {
    /// Signed by the wallet itself.
    Default = 0,
    /// Signed by a session key the wallet delegated to.
    SessionKey = 1,
}

impl SignatureValidator {
    pub const fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for SignatureValidator {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(SignatureValidator::Default),
            1 => Ok(SignatureValidator::SessionKey),
            code => Err(code),
        }
    }
}

/// Immutable parameters a channel is created with.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelDefinition {
    #[serde_as(as = "DisplayFromStr")]
    pub nonce: u64,
    /// Dispute window in seconds.
    pub challenge: u32,
    /// Bit `i` set approves [SignatureValidator] with code `i`.
    pub approved_sig_validators: U256,
}

impl ChannelDefinition {
    pub fn new(nonce: u64, challenge: u32) -> Self {
        ChannelDefinition {
            nonce,
            challenge,
            approved_sig_validators: U256::one(),
        }
    }

    pub fn approve(mut self, validator: SignatureValidator) -> Self {
        self.approved_sig_validators =
            self.approved_sig_validators | (U256::one() << validator.code() as usize);
        self
    }

    pub fn approves(&self, validator: SignatureValidator) -> bool {
        self.approved_sig_validators.bit(validator.code() as usize)
    }

    /// Fails with [SignatureError::UnapprovedValidator] unless `validator`
    /// is approved.
    pub fn check_approved(&self, validator: SignatureValidator) -> Result<(), SignatureError> {
        if self.approves(validator) {
            Ok(())
        } else {
            Err(SignatureError::UnapprovedValidator(validator.code()))
        }
    }
}
