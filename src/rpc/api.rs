//! Typed methods of the node's RPC interface.
//!
//! Every method is a marker type implementing [RpcMethod], which ties the
//! wire name to its parameter and result types, e.g.
//! `client.call::<GetLatestState>(&params)`.

use core::{fmt, str::FromStr};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};

use super::ProtocolError;
use crate::{
    abiencode::types::{Address, Hash, U256},
    app::{
        AppDefinition, AppSession, AppSessionStatus, AppSessionVersion, CreateAppSessionRequest,
        RebalanceBatch, SignedAppStateUpdate, SubmitDepositStateRequest,
    },
    asset::Asset,
    channel::{ChannelDefinition, ChannelSignature, State, TransitionType},
    decimal::Decimal,
    session_key::{AppSessionKeyState, ChannelSessionKeyState},
};

macro_rules! methods {
    ( $( $variant:ident => $name:literal, )* ) => {
        /// Every method the node understands.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Method {
            $( $variant, )*
        }

        impl Method {
            pub const ALL: &'static [Method] = &[ $( Method::$variant, )* ];

            pub const fn as_str(self) -> &'static str {
                match self {
                    $( Method::$variant => $name, )*
                }
            }
        }

        impl FromStr for Method {
            type Err = ProtocolError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $name => Ok(Method::$variant), )*
                    _ => Err(ProtocolError::UnknownMethod(s.to_string())),
                }
            }
        }
    };
}

methods! {
    Ping => "node.v1.ping",
    GetConfig => "node.v1.get_config",
    GetAssets => "node.v1.get_assets",
    GetBalances => "user.v1.get_balances",
    GetTransactions => "user.v1.get_transactions",
    GetHomeChannel => "channels.v1.get_home_channel",
    GetEscrowChannel => "channels.v1.get_escrow_channel",
    GetChannels => "channels.v1.get_channels",
    GetLatestState => "channels.v1.get_latest_state",
    GetStates => "channels.v1.get_states",
    RequestCreation => "channels.v1.request_creation",
    SubmitState => "channels.v1.submit_state",
    SubmitChannelSessionKeyState => "channels.v1.submit_session_key_state",
    GetChannelSessionKeyStates => "channels.v1.get_last_key_states",
    CreateAppSession => "app_sessions.v1.create_app_session",
    SubmitAppState => "app_sessions.v1.submit_app_state",
    SubmitDepositState => "app_sessions.v1.submit_deposit_state",
    RebalanceAppSessions => "app_sessions.v1.rebalance_app_sessions",
    GetAppDefinition => "app_sessions.v1.get_app_definition",
    GetAppSessions => "app_sessions.v1.get_app_sessions",
    SubmitAppSessionKeyState => "app_sessions.v1.submit_session_key_state",
    GetAppSessionKeyStates => "app_sessions.v1.get_last_key_states",
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait RpcMethod {
    const METHOD: Method;
    type Params: Serialize + Send + Sync;
    type Result: DeserializeOwned + Send;
}

macro_rules! rpc_method {
    ( $( $(#[$meta:meta])* $marker:ident: $params:ty => $result:ty; )* ) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy)]
            pub struct $marker;

            impl RpcMethod for $marker {
                const METHOD: Method = Method::$marker;
                type Params = $params;
                type Result = $result;
            }
        )*
    };
}

/// `{}`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Empty {}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockchainInfo {
    pub name: String,
    #[serde_as(as = "DisplayFromStr")]
    pub blockchain_id: u64,
    pub contract_address: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub node_address: Address,
    pub node_version: String,
    #[serde(default)]
    pub blockchains: Vec<BlockchainInfo>,
}

#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetAssetsParams {
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blockchain_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetList {
    pub assets: Vec<Asset>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletParams {
    pub wallet: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub asset: String,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceList {
    pub balances: Vec<Balance>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetTransactionsParams {
    pub wallet: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset: Option<String>,
    #[serde(flatten)]
    pub pagination: Pagination,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: Hash,
    pub asset: String,
    pub tx_type: TransitionType,
    /// Wallet, channel or app session, depending on `tx_type`.
    pub from_account: String,
    pub to_account: String,
    pub amount: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_new_state_id: Option<Hash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_new_state_id: Option<Hash>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionList {
    pub transactions: Vec<TransactionRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    Home,
    Escrow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelStatus {
    Void,
    Open,
    Challenged,
    Closed,
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub channel_id: Hash,
    pub user_wallet: Address,
    #[serde(rename = "type")]
    pub kind: ChannelType,
    #[serde_as(as = "DisplayFromStr")]
    pub blockchain_id: u64,
    pub token_address: Address,
    pub challenge_duration: u32,
    #[serde_as(as = "DisplayFromStr")]
    pub nonce: u64,
    /// Missing on older nodes, which only approve the wallet's own key.
    #[serde(default = "U256::one")]
    pub approved_sig_validators: U256,
    pub status: ChannelStatus,
    #[serde_as(as = "DisplayFromStr")]
    pub state_version: u64,
}

impl ChannelInfo {
    /// The definition the channel was created with.
    pub fn definition(&self) -> ChannelDefinition {
        ChannelDefinition {
            nonce: self.nonce,
            challenge: self.challenge_duration,
            approved_sig_validators: self.approved_sig_validators,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelResponse {
    pub channel: ChannelInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelList {
    pub channels: Vec<ChannelInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletAssetParams {
    pub wallet: Address,
    pub asset: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetEscrowChannelParams {
    pub escrow_channel_id: Hash,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetChannelsParams {
    pub wallet: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ChannelStatus>,
    #[serde(flatten)]
    pub pagination: Pagination,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetLatestStateParams {
    pub wallet: Address,
    pub asset: String,
    /// Only return states signed by both parties.
    #[serde(default)]
    pub only_signed: bool,
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetStatesParams {
    pub wallet: Address,
    pub asset: String,
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub epoch: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<Hash>,
    #[serde(default)]
    pub only_signed: bool,
    #[serde(flatten)]
    pub pagination: Pagination,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateResponse {
    pub state: State,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateList {
    pub states: Vec<State>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestCreationParams {
    pub state: State,
    pub channel_definition: ChannelDefinition,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitStateParams {
    pub state: State,
}

/// The node's counter-signature of a submitted state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSignature {
    pub signature: ChannelSignature,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionKeyStateParams<T> {
    pub state: T,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetKeyStatesParams {
    pub user_address: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_key: Option<Address>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyStateList<T> {
    pub states: Vec<T>,
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSessionCreated {
    pub app_session_id: Hash,
    #[serde_as(as = "DisplayFromStr")]
    pub version: u64,
    pub status: AppSessionStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebalanceAccepted {
    pub sessions: Vec<AppSessionVersion>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSessionIdParams {
    pub app_session_id: Hash,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppDefinitionResponse {
    pub definition: AppDefinition,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetAppSessionsParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_session_id: Option<Hash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<AppSessionStatus>,
    #[serde(flatten)]
    pub pagination: Pagination,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSessionList {
    pub app_sessions: Vec<AppSession>,
}

rpc_method! {
    Ping: Empty => Empty;
    GetConfig: Empty => NodeConfig;
    GetAssets: GetAssetsParams => AssetList;
    GetBalances: WalletParams => BalanceList;
    GetTransactions: GetTransactionsParams => TransactionList;
    GetHomeChannel: WalletAssetParams => ChannelResponse;
    GetEscrowChannel: GetEscrowChannelParams => ChannelResponse;
    GetChannels: GetChannelsParams => ChannelList;
    GetLatestState: GetLatestStateParams => StateResponse;
    GetStates: GetStatesParams => StateList;
    /// Ask the node to co-sign the first state of a new home channel.
    RequestCreation: RequestCreationParams => NodeSignature;
    SubmitState: SubmitStateParams => NodeSignature;
    SubmitChannelSessionKeyState: SessionKeyStateParams<ChannelSessionKeyState> => Empty;
    GetChannelSessionKeyStates: GetKeyStatesParams => KeyStateList<ChannelSessionKeyState>;
    CreateAppSession: CreateAppSessionRequest => AppSessionCreated;
    SubmitAppState: SignedAppStateUpdate => Empty;
    /// The node counter-signs the depositor's channel state.
    SubmitDepositState: SubmitDepositStateRequest => NodeSignature;
    RebalanceAppSessions: RebalanceBatch => RebalanceAccepted;
    GetAppDefinition: AppSessionIdParams => AppDefinitionResponse;
    GetAppSessions: GetAppSessionsParams => AppSessionList;
    SubmitAppSessionKeyState: SessionKeyStateParams<AppSessionKeyState> => Empty;
    GetAppSessionKeyStates: GetKeyStatesParams => KeyStateList<AppSessionKeyState>;
}
