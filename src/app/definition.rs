use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};

use crate::{
    abiencode::{
        self,
        types::{Address, Hash},
    },
    error::ValidationError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppParticipant {
    pub wallet_address: Address,
    pub signature_weight: u8,
}

/// The immutable parameters of an app session.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppDefinition {
    pub application: String,
    pub participants: Vec<AppParticipant>,
    /// Signature weight an update needs.
    pub quorum: u8,
    #[serde_as(as = "DisplayFromStr")]
    pub nonce: u64,
}

/// `(string application, (address, uint8)[] participants, uint8 quorum,
/// uint64 nonce)`
#[derive(Serialize)]
pub(super) struct AppDefinitionPreimage<'a> {
    application: &'a str,
    participants: &'a [AppParticipant],
    quorum: u8,
    nonce: u64,
}

impl<'a> From<&'a AppDefinition> for AppDefinitionPreimage<'a> {
    fn from(definition: &'a AppDefinition) -> Self {
        AppDefinitionPreimage {
            application: &definition.application,
            participants: &definition.participants,
            quorum: definition.quorum,
            nonce: definition.nonce,
        }
    }
}

/// `keccak256(abi.encode(definition))`
pub fn app_session_id(definition: &AppDefinition) -> Result<Hash, abiencode::Error> {
    abiencode::to_hash(&AppDefinitionPreimage::from(definition))
}

impl AppDefinition {
    pub fn id(&self) -> Result<Hash, abiencode::Error> {
        app_session_id(self)
    }

    pub fn participant(&self, wallet: &Address) -> Option<&AppParticipant> {
        self.participants.iter().find(|p| p.wallet_address == *wallet)
    }

    pub fn total_weight(&self) -> u64 {
        self.participants
            .iter()
            .map(|p| u64::from(p.signature_weight))
            .sum()
    }

    /// Participants must be unique and non-empty, the quorum must be
    /// positive and reachable.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.application.is_empty() {
            return Err(ValidationError::InvalidDefinition("empty application".into()));
        }
        if self.participants.is_empty() {
            return Err(ValidationError::InvalidDefinition("no participants".into()));
        }
        let mut seen = HashSet::new();
        for p in &self.participants {
            if !seen.insert(p.wallet_address) {
                return Err(ValidationError::InvalidDefinition(format!(
                    "duplicate participant {}",
                    p.wallet_address
                )));
            }
        }
        if self.quorum == 0 {
            return Err(ValidationError::InvalidDefinition("quorum is zero".into()));
        }
        if u64::from(self.quorum) > self.total_weight() {
            return Err(ValidationError::InvalidDefinition(format!(
                "quorum {} exceeds total weight {}",
                self.quorum,
                self.total_weight()
            )));
        }
        Ok(())
    }
}
