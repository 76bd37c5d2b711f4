use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};
use tracing::{debug, warn};

use super::{
    update::allocated, verify_quorum, AppAllocation, AppDefinition, AppStateIntent,
    AppStateUpdate, CreateAppSessionRequest, Quorum, SignedAppStateUpdate,
    SubmitDepositStateRequest,
};
use crate::{
    abiencode::types::{Address, Hash, Signature},
    asset::AssetDecimals,
    channel::{ChannelDefinition, State, TransitionType},
    decimal::Decimal,
    error::{Error, SignatureError, ValidationError},
    rpc::ProtocolError,
    session_key::{AppSessionKeyState, ChannelSessionKeyState},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppSessionStatus {
    Open,
    Closed,
}

/// The last accepted state of an app session.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSession {
    pub app_session_id: Hash,
    pub definition: AppDefinition,
    pub status: AppSessionStatus,
    #[serde_as(as = "DisplayFromStr")]
    pub version: u64,
    #[serde(default)]
    pub allocations: Vec<AppAllocation>,
    #[serde(default)]
    pub session_data: String,
}

#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AppSessionVersion {
    pub app_session_id: Hash,
    #[serde_as(as = "DisplayFromStr")]
    pub version: u64,
}

/// Validated updates of several sessions which the node has to apply
/// together or not at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebalanceBatch {
    pub signed_updates: Vec<SignedAppStateUpdate>,
}

impl RebalanceBatch {
    /// Session versions after the batch is applied.
    pub fn expected_versions(&self) -> impl Iterator<Item = AppSessionVersion> + '_ {
        self.signed_updates.iter().map(|s| AppSessionVersion {
            app_session_id: s.app_state_update.app_session_id,
            version: s.app_state_update.version,
        })
    }
}

type AllocationKey = (Address, String);

/// Non-zero changes per participant and asset between two allocation lists.
fn allocation_changes(old: &[AppAllocation], new: &[AppAllocation]) -> BTreeMap<AllocationKey, Decimal> {
    let keys: HashSet<AllocationKey> = old
        .iter()
        .chain(new)
        .map(|a| (a.participant, a.asset.to_lowercase()))
        .collect();
    keys.into_iter()
        .filter_map(|(participant, asset)| {
            let change = allocated(new, &participant, &asset) - allocated(old, &participant, &asset);
            (!change.is_zero()).then(|| ((participant, asset), change))
        })
        .collect()
}

/// Add the per asset sums of `changes` to `totals`.
fn accumulate(totals: &mut BTreeMap<String, Decimal>, changes: &BTreeMap<AllocationKey, Decimal>) {
    for ((_, asset), change) in changes {
        let total = totals.entry(asset.clone()).or_default();
        *total = &*total + change;
    }
}

fn check_conserved(totals: &BTreeMap<String, Decimal>) -> Result<(), ValidationError> {
    match totals.iter().find(|(_, total)| !total.is_zero()) {
        Some((asset, total)) => Err(ValidationError::InvalidAllocations(format!(
            "total of {} changes by {}",
            asset, total
        ))),
        None => Ok(()),
    }
}

/// Client side bookkeeping and validation of app sessions.
///
/// The `submit_*`/`create_*` methods only validate, sessions change when the
/// node's acceptance is committed with the matching `commit_*` method.
#[derive(Debug, Default)]
pub struct AppSessionEngine {
    sessions: HashMap<Hash, AppSession>,
    session_keys: Vec<AppSessionKeyState>,
}

impl AppSessionEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&self, app_session_id: &Hash) -> Option<&AppSession> {
        self.sessions.get(app_session_id)
    }

    pub fn sessions(&self) -> impl Iterator<Item = &AppSession> {
        self.sessions.values()
    }

    pub fn session_keys(&self) -> &[AppSessionKeyState] {
        &self.session_keys
    }

    /// Accept signatures of `key` in place of its user. Replaces the same
    /// or an older version of the delegation, an older one is rejected.
    pub fn register_session_key(&mut self, key: AppSessionKeyState, now: u64) -> Result<(), SignatureError> {
        key.verify(now)?;
        if let Some(existing) = self
            .session_keys
            .iter_mut()
            .find(|k| k.user_address == key.user_address && k.session_key == key.session_key)
        {
            if key.version < existing.version {
                return Err(SignatureError::Malformed(format!(
                    "stale session key version {}, registered is {}",
                    key.version, existing.version
                )));
            }
            *existing = key;
            return Ok(());
        }
        debug!(user = %key.user_address, key = %key.session_key, "registered app session key");
        self.session_keys.push(key);
        Ok(())
    }

    /// Start tracking a session created elsewhere, e.g. fetched with
    /// `get_app_sessions`. Keeps the newer version if it is already known.
    pub fn track(&mut self, session: AppSession) -> Result<(), ValidationError> {
        let id = session.definition.id()?;
        if id != session.app_session_id {
            return Err(ValidationError::InvalidDefinition(format!(
                "definition hashes to {}, not {}",
                id, session.app_session_id
            )));
        }
        match self.sessions.get(&id) {
            Some(known) if known.version >= session.version => {}
            _ => {
                self.sessions.insert(id, session);
            }
        }
        Ok(())
    }

    /// Validate a new session signed by all participants.
    pub fn create_app_session(
        &self,
        definition: AppDefinition,
        session_data: String,
        quorum_sigs: Vec<Signature>,
        now: u64,
    ) -> Result<CreateAppSessionRequest, Error> {
        definition.validate()?;
        let id = definition.id()?;
        if self.sessions.contains_key(&id) {
            return Err(ValidationError::AppSessionExists(id).into());
        }

        let packed = CreateAppSessionRequest::pack(&definition, &session_data)?;
        let quorum = verify_quorum(&definition, &id, &packed, &quorum_sigs, &self.session_keys, now)?;
        if let Some(missing) = definition
            .participants
            .iter()
            .find(|p| !quorum.signers.contains(&p.wallet_address))
        {
            return Err(SignatureError::MissingParticipant(missing.wallet_address).into());
        }

        debug!(app_session = %id, application = %definition.application, "app session ready for creation");
        Ok(CreateAppSessionRequest {
            definition,
            session_data,
            quorum_sigs,
        })
    }

    /// Register the session once the node created it under `app_session_id`.
    pub fn commit_created(&mut self, request: &CreateAppSessionRequest, app_session_id: Hash) -> Result<(), Error> {
        let id = request.definition.id()?;
        if id != app_session_id {
            return Err(ProtocolError::Violation(format!(
                "node created app session {}, expected {}",
                app_session_id, id
            ))
            .into());
        }
        self.sessions.insert(
            id,
            AppSession {
                app_session_id: id,
                definition: request.definition.clone(),
                status: AppSessionStatus::Open,
                version: 1,
                allocations: Vec::new(),
                session_data: request.session_data.clone(),
            },
        );
        debug!(app_session = %id, "app session created");
        Ok(())
    }

    fn open_session(&self, app_session_id: &Hash) -> Result<&AppSession, ValidationError> {
        let session = self
            .sessions
            .get(app_session_id)
            .ok_or(ValidationError::UnknownAppSession(*app_session_id))?;
        if session.status == AppSessionStatus::Closed {
            return Err(ValidationError::AppSessionClosed(*app_session_id));
        }
        Ok(session)
    }

    /// Version and allocation checks every update has to pass.
    fn check_update(session: &AppSession, update: &AppStateUpdate) -> Result<(), ValidationError> {
        let expected = session.version + 1;
        if update.version != expected {
            return Err(ValidationError::InvalidVersion {
                expected,
                got: update.version,
            });
        }

        let mut seen = HashSet::new();
        for allocation in &update.allocations {
            if session.definition.participant(&allocation.participant).is_none() {
                return Err(ValidationError::InvalidAllocations(format!(
                    "{} is not a participant",
                    allocation.participant
                )));
            }
            if allocation.amount.is_negative() {
                return Err(ValidationError::InvalidAllocations(format!(
                    "negative amount {} for {}",
                    allocation.amount, allocation.participant
                )));
            }
            if !seen.insert((allocation.participant, allocation.asset.to_lowercase())) {
                return Err(ValidationError::InvalidAllocations(format!(
                    "{} listed twice for {}",
                    allocation.participant, allocation.asset
                )));
            }
        }
        Ok(())
    }

    fn check_quorum(&self, session: &AppSession, signed: &SignedAppStateUpdate, now: u64) -> Result<Quorum, Error> {
        let packed = signed.app_state_update.pack()?;
        Ok(verify_quorum(
            &session.definition,
            &session.app_session_id,
            &packed,
            &signed.quorum_sigs,
            &self.session_keys,
            now,
        )?)
    }

    /// Validate an operate, withdraw or close update.
    pub fn submit_app_state(&self, signed: &SignedAppStateUpdate, now: u64) -> Result<Quorum, Error> {
        let update = &signed.app_state_update;
        let session = self.open_session(&update.app_session_id)?;
        Self::check_update(session, update)?;

        let changes = allocation_changes(&session.allocations, &update.allocations);
        match update.intent {
            AppStateIntent::Operate | AppStateIntent::Close => {
                let mut totals = BTreeMap::new();
                accumulate(&mut totals, &changes);
                check_conserved(&totals)?;
            }
            AppStateIntent::Withdraw => {
                if let Some(((participant, asset), change)) =
                    changes.iter().find(|(_, change)| change.is_positive())
                {
                    return Err(ValidationError::InvalidAllocations(format!(
                        "withdrawal increases {} of {} by {}",
                        asset, participant, change
                    ))
                    .into());
                }
            }
            intent @ (AppStateIntent::Deposit | AppStateIntent::Rebalance) => {
                return Err(ValidationError::InvalidIntent(format!(
                    "{} updates have their own operation",
                    intent
                ))
                .into());
            }
        }

        self.check_quorum(session, signed, now)
    }

    /// Validate a deposit into a session together with the depositor's
    /// channel state that commits the funds.
    ///
    /// Exactly one allocation may grow, by the amount of the channel state's
    /// last transition, which must be a commit to this session. The channel
    /// state has to carry a valid user signature, made with a validator
    /// `definition` approves.
    pub fn submit_app_session_deposit<A>(
        &self,
        signed: &SignedAppStateUpdate,
        channel_state: &State,
        definition: &ChannelDefinition,
        assets: &A,
        channel_keys: &[ChannelSessionKeyState],
        now: u64,
    ) -> Result<SubmitDepositStateRequest, Error>
    where
        A: AssetDecimals + ?Sized,
    {
        let update = &signed.app_state_update;
        if update.intent != AppStateIntent::Deposit {
            return Err(ValidationError::InvalidIntent(format!("expected deposit, got {}", update.intent)).into());
        }
        let session = self.open_session(&update.app_session_id)?;
        Self::check_update(session, update)?;

        let changes = allocation_changes(&session.allocations, &update.allocations);
        let mut changes = changes.into_iter();
        let ((depositor, asset), amount) = match (changes.next(), changes.next()) {
            (Some(change), None) if change.1.is_positive() => change,
            _ => {
                return Err(ValidationError::InvalidAllocations(
                    "a deposit increases exactly one allocation".into(),
                )
                .into())
            }
        };
        if depositor != channel_state.user_wallet || !asset.eq_ignore_ascii_case(&channel_state.asset) {
            return Err(ValidationError::InvalidAllocations(format!(
                "deposit of {} by {} does not match the {} channel of {}",
                asset, depositor, channel_state.asset, channel_state.user_wallet
            ))
            .into());
        }

        let commit = channel_state
            .last_transition()
            .filter(|t| t.kind == TransitionType::Commit)
            .ok_or_else(|| ValidationError::InvalidState("channel state does not end with a commit".into()))?;
        if commit.account_id != update.app_session_id || commit.amount != amount {
            return Err(ValidationError::InvalidState(format!(
                "commit of {} to {} does not match deposit of {}",
                commit.amount, commit.account_id, amount
            ))
            .into());
        }
        channel_state.validate()?;
        channel_state.verify_user_sig(definition, assets, channel_keys, now)?;

        self.check_quorum(session, signed, now)?;
        debug!(app_session = %update.app_session_id, %depositor, %amount, "deposit ready");
        Ok(SubmitDepositStateRequest {
            app_state_update: update.clone(),
            quorum_sigs: signed.quorum_sigs.clone(),
            user_state: channel_state.clone(),
        })
    }

    /// Validate updates moving funds between sessions. Every session may
    /// appear once, the per asset totals over all sessions stay the same.
    pub fn rebalance_app_sessions(
        &self,
        signed_updates: Vec<SignedAppStateUpdate>,
        now: u64,
    ) -> Result<RebalanceBatch, Error> {
        if signed_updates.len() < 2 {
            return Err(ValidationError::InvalidAllocations(
                "a rebalance needs at least two sessions".into(),
            )
            .into());
        }

        let mut ids = HashSet::new();
        let mut totals = BTreeMap::new();
        for signed in &signed_updates {
            let update = &signed.app_state_update;
            if update.intent != AppStateIntent::Rebalance {
                return Err(ValidationError::InvalidIntent(format!(
                    "expected rebalance, got {} for {}",
                    update.intent, update.app_session_id
                ))
                .into());
            }
            if !ids.insert(update.app_session_id) {
                return Err(ValidationError::InvalidAllocations(format!(
                    "app session {} appears twice",
                    update.app_session_id
                ))
                .into());
            }
            let session = self.open_session(&update.app_session_id)?;
            Self::check_update(session, update)?;
            accumulate(&mut totals, &allocation_changes(&session.allocations, &update.allocations));
            self.check_quorum(session, signed, now)?;
        }
        check_conserved(&totals)?;

        Ok(RebalanceBatch { signed_updates })
    }

    fn apply(session: &mut AppSession, update: &AppStateUpdate) {
        session.version = update.version;
        session.allocations = update.allocations.clone();
        session.session_data = update.session_data.clone();
        if update.intent == AppStateIntent::Close {
            session.status = AppSessionStatus::Closed;
        }
    }

    /// Apply an update the node accepted.
    pub fn commit_update(&mut self, update: &AppStateUpdate) -> Result<(), Error> {
        let session = self.open_session(&update.app_session_id)?;
        let expected = session.version + 1;
        if update.version != expected {
            return Err(ValidationError::InvalidVersion {
                expected,
                got: update.version,
            }
            .into());
        }
        if let Some(session) = self.sessions.get_mut(&update.app_session_id) {
            Self::apply(session, update);
            debug!(app_session = %update.app_session_id, version = update.version, intent = %update.intent, "app state committed");
        }
        Ok(())
    }

    /// Apply a rebalance the node accepted. `accepted` must list exactly the
    /// sessions of the batch at their new versions, anything else is a
    /// protocol violation and leaves every session untouched.
    pub fn commit_rebalance(&mut self, batch: &RebalanceBatch, accepted: &[AppSessionVersion]) -> Result<(), Error> {
        let accepted_set: HashSet<_> = accepted.iter().copied().collect();
        let expected: HashSet<_> = batch.expected_versions().collect();
        if accepted_set != expected || accepted.len() != expected.len() {
            warn!(?accepted, "node applied a partial rebalance");
            return Err(ProtocolError::Violation(format!(
                "rebalance of {} sessions accepted as {:?}",
                expected.len(),
                accepted
            ))
            .into());
        }
        for signed in &batch.signed_updates {
            let update = &signed.app_state_update;
            let session = self.open_session(&update.app_session_id)?;
            if session.version + 1 != update.version {
                return Err(ValidationError::InvalidVersion {
                    expected: session.version + 1,
                    got: update.version,
                }
                .into());
            }
        }

        for signed in &batch.signed_updates {
            let update = &signed.app_state_update;
            if let Some(session) = self.sessions.get_mut(&update.app_session_id) {
                Self::apply(session, update);
            }
        }
        debug!(sessions = batch.signed_updates.len(), "rebalance committed");
        Ok(())
    }
}
