use std::{
    collections::HashMap,
    fmt,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use futures::{stream, Stream};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::{
    abiencode::types::{Address, Hash, Signature, U256},
    app::{
        AppDefinition, AppSessionEngine, CreateAppSessionRequest, RebalanceBatch,
        SignedAppStateUpdate,
    },
    asset::{AssetTable, Token},
    channel::{ChannelDefinition, SignatureValidator, State},
    config::Config,
    decimal::Decimal,
    error::{Error, SettlementError, ValidationError},
    rpc::{
        self,
        api::{
            self, Empty, GetAssetsParams, GetLatestStateParams, NodeSignature,
            RequestCreationParams, SessionKeyStateParams, SubmitStateParams,
            WalletAssetParams,
        },
        Event, RpcClient,
    },
    session_key::AppSessionKeyState,
    settlement::{CoSignedState, SettlementChain},
    sig::Signer,
};

#[cfg(test)]
mod tests;

/// Unix seconds, used for session key expiry.
fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

/// A state the node counter-signed, and the settlement transaction it was
/// submitted with, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateReceipt {
    pub state: State,
    pub tx_hash: Option<Hash>,
}

/// The main object of the crate: one wallet's connection to a node.
///
/// Every channel operation builds the next state locally, signs it, submits
/// it and only keeps it once the node's counter-signature verified. Amount
/// and signature errors surface before anything is sent.
///
/// Operations on the same asset must not run concurrently, each builds on
/// the latest stored state.
pub struct Client {
    rpc: RpcClient,
    signer: Arc<dyn Signer>,
    node_address: Address,
    assets: AssetTable,
    apps: Mutex<AppSessionEngine>,
    /// Latest co-signed state per lowercased asset.
    states: Mutex<HashMap<String, State>>,
    /// Home channel definitions per lowercased asset.
    definitions: Mutex<HashMap<String, ChannelDefinition>>,
    settlement: Option<Arc<dyn SettlementChain>>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("wallet", &self.signer.address())
            .field("node", &self.node_address)
            .field("rpc", &self.rpc)
            .finish_non_exhaustive()
    }
}

impl Client {
    pub fn new(rpc: RpcClient, signer: Arc<dyn Signer>, node_address: Address, assets: AssetTable) -> Self {
        Client {
            rpc,
            signer,
            node_address,
            assets,
            apps: Mutex::new(AppSessionEngine::new()),
            states: Mutex::new(HashMap::new()),
            definitions: Mutex::new(HashMap::new()),
            settlement: None,
        }
    }

    /// Connect to the node at `config.url`, fetch its address (unless
    /// configured) and the supported assets.
    pub async fn connect(config: &Config, signer: Arc<dyn Signer>) -> Result<Self, Error> {
        config.validate()?;
        let rpc = rpc::connect(config).await?;
        let node_address = match config.node_address {
            Some(address) => address,
            None => {
                let node = rpc.call::<api::GetConfig>(&Empty {}).await?;
                info!(node = %node.node_address, version = %node.node_version, "connected to node");
                node.node_address
            }
        };
        let assets = rpc
            .call::<api::GetAssets>(&GetAssetsParams::default())
            .await?
            .assets;
        debug!(assets = assets.len(), "loaded assets");
        Ok(Client::new(rpc, signer, node_address, AssetTable::new(assets)))
    }

    /// Submit co-signed states on-chain through `chain` from now on.
    pub fn with_settlement(mut self, chain: Arc<dyn SettlementChain>) -> Self {
        self.settlement = Some(chain);
        self
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    pub fn node_address(&self) -> Address {
        self.node_address
    }

    pub fn assets(&self) -> &AssetTable {
        &self.assets
    }

    pub fn rpc(&self) -> &RpcClient {
        &self.rpc
    }

    /// The last state stored for `asset`, without asking the node.
    pub fn stored_state(&self, asset: &str) -> Option<State> {
        self.states.lock().get(&asset.to_lowercase()).cloned()
    }

    /// Fetch the latest state of `asset` from the node. A state carrying the
    /// node's signature is checked and stored.
    pub async fn latest_state(&self, asset: &str) -> Result<State, Error> {
        let params = GetLatestStateParams {
            wallet: self.address(),
            asset: asset.to_string(),
            only_signed: false,
        };
        let state = self.rpc.call::<api::GetLatestState>(&params).await?.state;
        state.validate()?;
        if state.user_wallet != self.address() {
            return Err(ValidationError::InvalidState(format!(
                "node returned a state of {}",
                state.user_wallet
            ))
            .into());
        }
        if state.node_sig().is_some() {
            state.verify_node_sig(self.node_address, &self.assets)?;
            self.store(&state);
        }
        Ok(state)
    }

    async fn current_state(&self, asset: &str) -> Result<State, Error> {
        match self.stored_state(asset) {
            Some(state) => Ok(state),
            None => self.latest_state(asset).await,
        }
    }

    fn store(&self, state: &State) {
        let mut states = self.states.lock();
        let key = state.asset.to_lowercase();
        match states.get(&key) {
            Some(known) if (known.epoch(), known.version()) >= (state.epoch(), state.version()) => {}
            _ => {
                states.insert(key, state.clone());
            }
        }
    }

    /// The definition of the home channel of `asset`, asked from the node
    /// unless the channel was created by this client.
    async fn channel_definition(&self, asset: &str) -> Result<ChannelDefinition, Error> {
        let known = self.definitions.lock().get(&asset.to_lowercase()).cloned();
        if let Some(definition) = known {
            return Ok(definition);
        }
        let params = WalletAssetParams {
            wallet: self.address(),
            asset: asset.to_string(),
        };
        let definition = self.rpc.call::<api::GetHomeChannel>(&params).await?.channel.definition();
        self.definitions
            .lock()
            .insert(asset.to_lowercase(), definition.clone());
        Ok(definition)
    }

    fn token(&self, asset: &str, blockchain_id: u64) -> Result<&Token, ValidationError> {
        self.assets
            .token(asset, blockchain_id)
            .ok_or_else(|| ValidationError::UnsupportedAsset {
                asset: asset.to_string(),
                blockchain_id,
            })
    }

    /// Sign `state`, have the node counter-sign it and store it.
    async fn submit(&self, mut state: State, definition: Option<&ChannelDefinition>) -> Result<State, Error> {
        let sig = state.sign(self.signer.as_ref(), SignatureValidator::Default, &self.assets)?;
        state.set_user_sig(sig);

        let NodeSignature { signature } = match definition {
            Some(definition) => {
                let params = RequestCreationParams {
                    state: state.clone(),
                    channel_definition: definition.clone(),
                };
                self.rpc.call::<api::RequestCreation>(&params).await?
            }
            None => {
                let params = SubmitStateParams {
                    state: state.clone(),
                };
                self.rpc.call::<api::SubmitState>(&params).await?
            }
        };
        state.set_node_sig(signature);
        state.verify_node_sig(self.node_address, &self.assets)?;

        debug!(state = %state.id(), version = state.version(), intent = ?state.intent(), "state co-signed");
        self.store(&state);
        Ok(state)
    }

    fn chain(&self) -> Result<&Arc<dyn SettlementChain>, SettlementError> {
        self.settlement.as_ref().ok_or(SettlementError::NotConfigured)
    }

    /// Open a home channel for `asset` on `blockchain_id`, funded with
    /// `amount`.
    pub async fn create_channel(
        &self,
        asset: &str,
        blockchain_id: u64,
        definition: ChannelDefinition,
        amount: &Decimal,
    ) -> Result<StateReceipt, Error> {
        definition.check_approved(SignatureValidator::Default)?;
        let token = self.token(asset, blockchain_id)?.address;
        let mut state = self.current_state(asset).await?.next_state()?;
        let channel = state.attach_home_channel(&definition, self.node_address, blockchain_id, token)?;
        state.apply_home_deposit(&self.assets, amount)?;

        let state = self.submit(state, Some(&definition)).await?;
        self.definitions
            .lock()
            .insert(asset.to_lowercase(), definition.clone());
        let tx_hash = match &self.settlement {
            Some(chain) => Some(
                chain
                    .create(&definition, &CoSignedState::new(&state, &self.assets)?)
                    .await?,
            ),
            None => None,
        };
        info!(%channel, asset, %amount, "channel created");
        Ok(StateReceipt { state, tx_hash })
    }

    /// Submit a co-signed state changing on-chain funds, if a settlement
    /// chain is configured.
    async fn settle_checkpoint(&self, state: State) -> Result<StateReceipt, Error> {
        let tx_hash = match &self.settlement {
            Some(chain) => Some(
                chain
                    .checkpoint(&CoSignedState::new(&state, &self.assets)?)
                    .await?,
            ),
            None => None,
        };
        Ok(StateReceipt { state, tx_hash })
    }

    pub async fn deposit(&self, asset: &str, amount: &Decimal) -> Result<StateReceipt, Error> {
        let mut state = self.current_state(asset).await?.next_state()?;
        state.apply_home_deposit(&self.assets, amount)?;
        let state = self.submit(state, None).await?;
        debug!(asset, %amount, "deposited");
        self.settle_checkpoint(state).await
    }

    pub async fn withdraw(&self, asset: &str, amount: &Decimal) -> Result<StateReceipt, Error> {
        let mut state = self.current_state(asset).await?.next_state()?;
        state.apply_home_withdrawal(&self.assets, amount)?;
        let state = self.submit(state, None).await?;
        debug!(asset, %amount, "withdrawn");
        self.settle_checkpoint(state).await
    }

    /// Send `amount` off-chain to `recipient`.
    pub async fn transfer(&self, asset: &str, recipient: Address, amount: &Decimal) -> Result<State, Error> {
        let mut state = self.current_state(asset).await?.next_state()?;
        state.apply_transfer_send(&self.assets, recipient, amount)?;
        let state = self.submit(state, None).await?;
        debug!(asset, %recipient, %amount, "transferred");
        Ok(state)
    }

    /// Finalize the channel and, with a settlement chain, close it on-chain.
    pub async fn close_channel(&self, asset: &str) -> Result<StateReceipt, Error> {
        let mut state = self.current_state(asset).await?.next_state()?;
        state.apply_finalize()?;
        let state = self.submit(state, None).await?;
        let tx_hash = match &self.settlement {
            Some(chain) => Some(chain.close(&CoSignedState::new(&state, &self.assets)?).await?),
            None => None,
        };
        info!(asset, state = %state.id(), "channel closed");
        Ok(StateReceipt { state, tx_hash })
    }

    async fn stored_co_signed(&self, asset: &str) -> Result<CoSignedState, Error> {
        let state = self.current_state(asset).await?;
        CoSignedState::new(&state, &self.assets)
    }

    /// Record the latest co-signed state of `asset` on-chain.
    pub async fn checkpoint(&self, asset: &str) -> Result<Hash, Error> {
        let chain = self.chain()?;
        let state = self.stored_co_signed(asset).await?;
        let tx = chain.checkpoint(&state).await?;
        info!(asset, channel = %state.channel_id(), %tx, "checkpointed");
        Ok(tx)
    }

    /// Dispute on-chain with the latest co-signed state of `asset`.
    pub async fn challenge(&self, asset: &str) -> Result<Hash, Error> {
        let chain = self.chain()?;
        let state = self.stored_co_signed(asset).await?;
        let tx = chain.challenge(&state).await?;
        warn!(asset, channel = %state.channel_id(), %tx, "channel challenged");
        Ok(tx)
    }

    /// On-chain balance of this wallet in `asset` on `blockchain_id`.
    pub async fn wallet_balance(&self, asset: &str, blockchain_id: u64) -> Result<Decimal, Error> {
        let token = self.token(asset, blockchain_id)?;
        let raw = self
            .chain()?
            .balance(blockchain_id, token.address, self.address())
            .await?;
        Ok(Decimal::from_u256(raw, token.decimals))
    }

    /// Make sure the settlement contract may pull at least `amount`,
    /// approving it if not. Returns the approval transaction, if one was
    /// needed.
    pub async fn ensure_allowance(&self, asset: &str, blockchain_id: u64, amount: &Decimal) -> Result<Option<Hash>, Error> {
        let token = self.token(asset, blockchain_id)?;
        let needed: U256 = amount
            .to_u256(token.decimals)
            .map_err(ValidationError::from)?;
        let chain = self.chain()?;
        let allowance = chain
            .allowance(blockchain_id, token.address, self.address())
            .await?;
        if allowance >= needed {
            return Ok(None);
        }
        let tx = chain.approve(blockchain_id, token.address, needed).await?;
        debug!(asset, blockchain_id, %amount, %tx, "approved");
        Ok(Some(tx))
    }

    /// A known app session.
    pub fn app_session(&self, app_session_id: &Hash) -> Option<crate::app::AppSession> {
        self.apps.lock().session(app_session_id).cloned()
    }

    /// This wallet's signature for creating a session, to be collected by
    /// whoever submits it.
    pub fn sign_app_definition(&self, definition: &AppDefinition, session_data: &str) -> Result<Signature, Error> {
        CreateAppSessionRequest::sign(definition, session_data, self.signer.as_ref())
    }

    /// Add this wallet's signature to `update`.
    pub fn sign_app_update(&self, update: &mut SignedAppStateUpdate) -> Result<(), Error> {
        update.sign(self.signer.as_ref())
    }

    /// Create an app session. `signatures` are the other participants'
    /// signatures, this wallet signs itself if it participates.
    pub async fn create_app_session(
        &self,
        definition: AppDefinition,
        session_data: String,
        mut signatures: Vec<Signature>,
    ) -> Result<Hash, Error> {
        if definition.participant(&self.address()).is_some() {
            signatures.insert(0, self.sign_app_definition(&definition, &session_data)?);
        }
        let request = self
            .apps
            .lock()
            .create_app_session(definition, session_data, signatures, now())?;

        let created = self.rpc.call::<api::CreateAppSession>(&request).await?;
        self.apps
            .lock()
            .commit_created(&request, created.app_session_id)?;
        info!(app_session = %created.app_session_id, application = %request.definition.application, "app session created");
        Ok(created.app_session_id)
    }

    /// Submit an operate, withdraw or close update carrying enough
    /// signatures.
    pub async fn submit_app_state(&self, update: SignedAppStateUpdate) -> Result<(), Error> {
        let quorum = self.apps.lock().submit_app_state(&update, now())?;
        self.rpc.call::<api::SubmitAppState>(&update).await?;
        self.apps.lock().commit_update(&update.app_state_update)?;
        debug!(
            app_session = %update.app_state_update.app_session_id,
            version = update.app_state_update.version,
            weight = quorum.weight,
            "app state submitted"
        );
        Ok(())
    }

    /// Move `amount` of `asset` from this wallet's channel into an app
    /// session. `update` must give this wallet exactly `amount` more.
    pub async fn submit_app_session_deposit(
        &self,
        update: SignedAppStateUpdate,
        asset: &str,
        amount: &Decimal,
    ) -> Result<State, Error> {
        let app_session_id = update.app_state_update.app_session_id;
        let definition = self.channel_definition(asset).await?;
        let mut state = self.current_state(asset).await?.next_state()?;
        state.apply_commit(&self.assets, app_session_id, amount)?;
        let sig = state.sign(self.signer.as_ref(), SignatureValidator::Default, &self.assets)?;
        state.set_user_sig(sig);

        let request = self.apps.lock().submit_app_session_deposit(
            &update,
            &state,
            &definition,
            &self.assets,
            &[],
            now(),
        )?;
        let NodeSignature { signature } = self.rpc.call::<api::SubmitDepositState>(&request).await?;
        state.set_node_sig(signature);
        state.verify_node_sig(self.node_address, &self.assets)?;

        self.store(&state);
        self.apps.lock().commit_update(&request.app_state_update)?;
        debug!(app_session = %app_session_id, asset, %amount, "deposited into app session");
        Ok(state)
    }

    /// Atomically apply rebalance updates to several sessions.
    pub async fn rebalance_app_sessions(&self, updates: Vec<SignedAppStateUpdate>) -> Result<RebalanceBatch, Error> {
        let batch = self.apps.lock().rebalance_app_sessions(updates, now())?;
        let accepted = self.rpc.call::<api::RebalanceAppSessions>(&batch).await?;
        self.apps.lock().commit_rebalance(&batch, &accepted.sessions)?;
        debug!(sessions = batch.signed_updates.len(), "app sessions rebalanced");
        Ok(batch)
    }

    /// Sign `key` as this wallet, register it with the node and accept it as
    /// a proxy from now on.
    pub async fn register_app_session_key(&self, mut key: AppSessionKeyState) -> Result<(), Error> {
        key.sign(self.signer.as_ref())?;
        let params = SessionKeyStateParams { state: key.clone() };
        self.rpc.call::<api::SubmitAppSessionKeyState>(&params).await?;
        self.apps.lock().register_session_key(key, now())?;
        Ok(())
    }

    /// Update local bookkeeping from a node event.
    fn observe(&self, event: &Event) {
        if let Event::AppSessionUpdate(session) = event {
            if let Err(e) = self.apps.lock().track(session.clone()) {
                warn!(app_session = %session.app_session_id, error = %e, "ignoring app session update");
            }
        }
    }

    /// Events pushed by the node, in order. Ends when the connection
    /// closes.
    pub fn events(&self) -> impl Stream<Item = Event> + '_ {
        stream::unfold(self, |client| async move {
            let event = client.rpc.next_event().await?;
            client.observe(&event);
            Some((event, client))
        })
    }
}
