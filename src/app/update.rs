use core::{fmt, str::FromStr};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_with::{serde_as, DisplayFromStr};

use super::definition::{AppDefinition, AppDefinitionPreimage};
use crate::{
    abiencode::{
        self,
        types::{Address, Hash, Signature},
    },
    channel::State,
    decimal::Decimal,
    error::{Error, SignatureError},
    sig::Signer,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AppStateIntent {
    Operate = 0,
    Deposit = 1,
    Withdraw = 2,
    Close = 3,
    Rebalance = 4,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown app state intent {0:?}")]
pub struct UnknownAppStateIntent(pub String);

impl AppStateIntent {
    pub const fn code(self) -> u8 {
        self as u8
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            AppStateIntent::Operate => "operate",
            AppStateIntent::Deposit => "deposit",
            AppStateIntent::Withdraw => "withdraw",
            AppStateIntent::Close => "close",
            AppStateIntent::Rebalance => "rebalance",
        }
    }
}

impl fmt::Display for AppStateIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppStateIntent {
    type Err = UnknownAppStateIntent;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "operate" => AppStateIntent::Operate,
            "deposit" => AppStateIntent::Deposit,
            "withdraw" => AppStateIntent::Withdraw,
            "close" => AppStateIntent::Close,
            "rebalance" => AppStateIntent::Rebalance,
            _ => return Err(UnknownAppStateIntent(s.to_string())),
        })
    }
}

// A name on the wire, its code in abi encodings.
impl Serialize for AppStateIntent {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if serializer.is_human_readable() {
            serializer.serialize_str(self.as_str())
        } else {
            serializer.serialize_u8(self.code())
        }
    }
}

impl<'de> Deserialize<'de> for AppStateIntent {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// `amount` of `asset` held by `participant` inside the session.
///
/// Amounts are abi encoded as their decimal string, the session ledger is
/// not tied to a token and therefore has no decimals to scale with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppAllocation {
    pub participant: Address,
    pub asset: String,
    pub amount: Decimal,
}

impl AppAllocation {
    pub fn new(participant: Address, asset: impl Into<String>, amount: Decimal) -> Self {
        AppAllocation {
            participant,
            asset: asset.into(),
            amount,
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppStateUpdate {
    pub app_session_id: Hash,
    pub intent: AppStateIntent,
    #[serde_as(as = "DisplayFromStr")]
    pub version: u64,
    pub allocations: Vec<AppAllocation>,
    #[serde(default)]
    pub session_data: String,
}

/// `(bytes32 app_session_id, uint8 intent, uint64 version,
/// (address, string, string)[] allocations, string session_data)`
#[derive(Serialize)]
struct AppStateUpdatePreimage<'a> {
    app_session_id: Hash,
    intent: AppStateIntent,
    version: u64,
    allocations: &'a [AppAllocation],
    session_data: &'a str,
}

impl AppStateUpdate {
    /// The abi encoding participants sign.
    pub fn pack(&self) -> Result<Vec<u8>, abiencode::Error> {
        abiencode::to_vec(&AppStateUpdatePreimage {
            app_session_id: self.app_session_id,
            intent: self.intent,
            version: self.version,
            allocations: &self.allocations,
            session_data: &self.session_data,
        })
    }

    pub fn sign<S>(&self, signer: &S) -> Result<Signature, Error>
    where
        S: Signer + ?Sized,
    {
        let packed = self
            .pack()
            .map_err(|e| SignatureError::Malformed(e.to_string()))?;
        Ok(signer.sign(&packed)?)
    }

    pub fn amount_of(&self, participant: &Address, asset: &str) -> Decimal {
        allocated(&self.allocations, participant, asset)
    }
}

/// Sum of `participant`'s allocations of `asset`, zero if there are none.
pub(super) fn allocated(allocations: &[AppAllocation], participant: &Address, asset: &str) -> Decimal {
    allocations
        .iter()
        .filter(|a| a.participant == *participant && a.asset.eq_ignore_ascii_case(asset))
        .map(|a| &a.amount)
        .sum()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedAppStateUpdate {
    pub app_state_update: AppStateUpdate,
    pub quorum_sigs: Vec<Signature>,
}

impl SignedAppStateUpdate {
    pub fn new(app_state_update: AppStateUpdate) -> Self {
        SignedAppStateUpdate {
            app_state_update,
            quorum_sigs: Vec::new(),
        }
    }

    /// Add `signer`'s signature.
    pub fn sign<S>(&mut self, signer: &S) -> Result<(), Error>
    where
        S: Signer + ?Sized,
    {
        let sig = self.app_state_update.sign(signer)?;
        self.quorum_sigs.push(sig);
        Ok(())
    }
}

/// Parameters of `app_sessions.v1.create_app_session`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateAppSessionRequest {
    pub definition: AppDefinition,
    #[serde(default)]
    pub session_data: String,
    pub quorum_sigs: Vec<Signature>,
}

impl CreateAppSessionRequest {
    /// `abi.encode((definition, session_data))`, what every participant signs.
    pub fn pack(definition: &AppDefinition, session_data: &str) -> Result<Vec<u8>, abiencode::Error> {
        abiencode::to_vec(&(AppDefinitionPreimage::from(definition), session_data))
    }

    pub fn sign<S>(definition: &AppDefinition, session_data: &str, signer: &S) -> Result<Signature, Error>
    where
        S: Signer + ?Sized,
    {
        let packed = Self::pack(definition, session_data)
            .map_err(|e| SignatureError::Malformed(e.to_string()))?;
        Ok(signer.sign(&packed)?)
    }
}

/// Parameters of `app_sessions.v1.submit_deposit_state`: the session update
/// together with the depositor's channel state committing the funds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitDepositStateRequest {
    pub app_state_update: AppStateUpdate,
    pub quorum_sigs: Vec<Signature>,
    pub user_state: State,
}
