use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};
use tracing::trace;

use super::{
    escrow_channel_id, home_channel_id,
    ledger::{credit, debit, subtract},
    state_id, transaction_id, ChannelDefinition, ChannelSignature, Intent, Ledger, Transition,
    TransitionType,
};
use crate::{
    abiencode::types::{Address, Hash},
    asset::AssetDecimals,
    decimal::Decimal,
    error::ValidationError,
};

/// Snapshot of a user's channel for one asset.
///
/// States are never changed after signing: [State::next_state] creates the
/// successor, the `apply_*` methods then add one transition each. A state
/// signed by both the user and the node is co-signed and can be enforced
/// on-chain.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    id: Hash,
    pub asset: String,
    pub user_wallet: Address,
    #[serde_as(as = "DisplayFromStr")]
    epoch: u64,
    #[serde_as(as = "DisplayFromStr")]
    version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home_channel_id: Option<Hash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escrow_channel_id: Option<Hash>,
    pub home_ledger: Ledger,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escrow_ledger: Option<Ledger>,
    #[serde(default)]
    pub transitions: Vec<Transition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(super) user_sig: Option<ChannelSignature>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(super) node_sig: Option<ChannelSignature>,
}

/// Which ledger a precision check applies to.
enum Token<'a> {
    Home,
    Escrow(&'a Ledger),
}

impl State {
    /// The state before a channel exists.
    pub fn new_void(asset: impl Into<String>, user_wallet: Address) -> Result<Self, ValidationError> {
        let asset = asset.into();
        Ok(State {
            id: state_id(user_wallet, &asset, 0, 0)?,
            asset,
            user_wallet,
            epoch: 0,
            version: 0,
            home_channel_id: None,
            escrow_channel_id: None,
            home_ledger: Ledger::default(),
            escrow_ledger: None,
            transitions: Vec::new(),
            user_sig: None,
            node_sig: None,
        })
    }

    pub fn id(&self) -> Hash {
        self.id
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn user_sig(&self) -> Option<&ChannelSignature> {
        self.user_sig.as_ref()
    }

    pub fn node_sig(&self) -> Option<&ChannelSignature> {
        self.node_sig.as_ref()
    }

    pub fn is_co_signed(&self) -> bool {
        self.user_sig.is_some() && self.node_sig.is_some()
    }

    pub fn last_transition(&self) -> Option<&Transition> {
        self.transitions.last()
    }

    pub fn intent(&self) -> Intent {
        self.last_transition()
            .map_or(Intent::Operate, |t| t.kind.into())
    }

    /// Whether this state closed the channel for the current epoch.
    pub fn is_final(&self) -> bool {
        self.intent() == Intent::Close
    }

    /// Successor of this state: next version, same ledgers and transitions,
    /// no signatures.
    ///
    /// A finalized state starts a new epoch without channel. A finalized
    /// escrow operation drops the escrow ledger.
    pub fn next_state(&self) -> Result<State, ValidationError> {
        let mut next = self.clone();
        next.user_sig = None;
        next.node_sig = None;

        match self.last_transition().map(|t| t.kind) {
            Some(TransitionType::Finalize) => {
                next.epoch += 1;
                next.transitions.clear();
                next.home_channel_id = None;
                next.escrow_channel_id = None;
                next.home_ledger = Ledger::default();
                next.escrow_ledger = None;
            }
            Some(TransitionType::EscrowDeposit | TransitionType::EscrowWithdraw) => {
                next.escrow_channel_id = None;
                next.escrow_ledger = None;
            }
            _ => {}
        }

        next.version = self
            .version
            .checked_add(1)
            .ok_or_else(|| ValidationError::InvalidState("version overflow".into()))?;
        next.id = state_id(next.user_wallet, &next.asset, next.epoch, next.version)?;
        trace!(state = %next.id, version = next.version, epoch = next.epoch, "next state");
        Ok(next)
    }

    /// Derive the home channel id for `definition` and point the home ledger
    /// at `token` on `blockchain_id`.
    pub fn attach_home_channel(
        &mut self,
        definition: &ChannelDefinition,
        node: Address,
        blockchain_id: u64,
        token: Address,
    ) -> Result<Hash, ValidationError> {
        if let Some(id) = self.home_channel_id {
            return Err(ValidationError::InvalidState(format!(
                "state already belongs to channel {}",
                id
            )));
        }
        let id = home_channel_id(node, self.user_wallet, &self.asset, definition)?;
        self.home_channel_id = Some(id);
        self.home_ledger.blockchain_id = blockchain_id;
        self.home_ledger.token_address = token;
        Ok(id)
    }

    /// Check the id and the ledger invariants, e.g. of a state received from
    /// the node.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let expected = state_id(self.user_wallet, &self.asset, self.epoch, self.version)?;
        if expected != self.id {
            return Err(ValidationError::InvalidState(format!(
                "id {} does not match derived id {}",
                self.id, expected
            )));
        }
        self.home_ledger.validate()?;
        if let Some(escrow) = &self.escrow_ledger {
            escrow.validate()?;
        }
        Ok(())
    }

    fn home_channel(&self) -> Result<Hash, ValidationError> {
        self.home_channel_id
            .ok_or(ValidationError::MissingField("home_channel_id"))
    }

    fn check_amount<A>(&self, assets: &A, token: Token, amount: &Decimal) -> Result<(), ValidationError>
    where
        A: AssetDecimals + ?Sized,
    {
        if !amount.is_positive() {
            return Err(ValidationError::NonPositiveAmount(amount.clone()));
        }
        // Transition amounts are always encoded with the home token's
        // decimals, amounts landing in the escrow ledger need to fit both.
        let home = &self.home_ledger;
        amount.validate_precision(assets.token_decimals(home.blockchain_id, &home.token_address)?)?;
        if let Token::Escrow(ledger) = token {
            amount.validate_precision(
                assets.token_decimals(ledger.blockchain_id, &ledger.token_address)?,
            )?;
        }
        Ok(())
    }

    /// Run `update` on copies of the ledgers and only keep the result (plus
    /// the new transition) if it succeeds.
    fn apply<F>(
        &mut self,
        kind: TransitionType,
        account_id: Hash,
        amount: Decimal,
        update: F,
    ) -> Result<(), ValidationError>
    where
        F: FnOnce(&mut Ledger, &mut Option<Ledger>) -> Result<(), ValidationError>,
    {
        let mut home = self.home_ledger.clone();
        let mut escrow = self.escrow_ledger.clone();
        update(&mut home, &mut escrow)?;
        debug_assert!(home.is_balanced());

        let index = self.transitions.len() as u64;
        let tx_id = transaction_id(self.id, kind, account_id, index)?;
        trace!(state = %self.id, %kind, %amount, %tx_id, "apply transition");

        self.home_ledger = home;
        self.escrow_ledger = escrow;
        self.transitions.push(Transition {
            kind,
            tx_id,
            account_id,
            amount,
        });
        self.user_sig = None;
        self.node_sig = None;
        Ok(())
    }

    pub fn apply_acknowledgement(&mut self) -> Result<(), ValidationError> {
        let account = self.home_channel_id.unwrap_or_else(|| self.user_wallet.into());
        self.apply(
            TransitionType::Acknowledgement,
            account,
            Decimal::zero(),
            |_, _| Ok(()),
        )
    }

    pub fn apply_home_deposit<A>(&mut self, assets: &A, amount: &Decimal) -> Result<(), ValidationError>
    where
        A: AssetDecimals + ?Sized,
    {
        let channel = self.home_channel()?;
        self.check_amount(assets, Token::Home, amount)?;
        self.apply(TransitionType::HomeDeposit, channel, amount.clone(), |home, _| {
            credit(&mut home.user_balance, amount);
            credit(&mut home.user_net_flow, amount);
            Ok(())
        })
    }

    pub fn apply_home_withdrawal<A>(
        &mut self,
        assets: &A,
        amount: &Decimal,
    ) -> Result<(), ValidationError>
    where
        A: AssetDecimals + ?Sized,
    {
        let channel = self.home_channel()?;
        self.check_amount(assets, Token::Home, amount)?;
        self.apply(TransitionType::HomeWithdrawal, channel, amount.clone(), |home, _| {
            debit("user_balance", &mut home.user_balance, amount)?;
            subtract(&mut home.user_net_flow, amount);
            Ok(())
        })
    }

    fn apply_outgoing<A>(
        &mut self,
        assets: &A,
        kind: TransitionType,
        account_id: Hash,
        amount: &Decimal,
    ) -> Result<(), ValidationError>
    where
        A: AssetDecimals + ?Sized,
    {
        self.home_channel()?;
        self.check_amount(assets, Token::Home, amount)?;
        self.apply(kind, account_id, amount.clone(), |home, _| {
            debit("user_balance", &mut home.user_balance, amount)?;
            subtract(&mut home.node_net_flow, amount);
            Ok(())
        })
    }

    fn apply_incoming<A>(
        &mut self,
        assets: &A,
        kind: TransitionType,
        account_id: Hash,
        amount: &Decimal,
    ) -> Result<(), ValidationError>
    where
        A: AssetDecimals + ?Sized,
    {
        self.home_channel()?;
        self.check_amount(assets, Token::Home, amount)?;
        self.apply(kind, account_id, amount.clone(), |home, _| {
            credit(&mut home.user_balance, amount);
            credit(&mut home.node_net_flow, amount);
            Ok(())
        })
    }

    pub fn apply_transfer_send<A>(
        &mut self,
        assets: &A,
        recipient: Address,
        amount: &Decimal,
    ) -> Result<(), ValidationError>
    where
        A: AssetDecimals + ?Sized,
    {
        self.apply_outgoing(assets, TransitionType::TransferSend, recipient.into(), amount)
    }

    pub fn apply_transfer_receive<A>(
        &mut self,
        assets: &A,
        sender: Address,
        amount: &Decimal,
    ) -> Result<(), ValidationError>
    where
        A: AssetDecimals + ?Sized,
    {
        self.apply_incoming(assets, TransitionType::TransferReceive, sender.into(), amount)
    }

    /// Move funds from the channel into an app session.
    pub fn apply_commit<A>(
        &mut self,
        assets: &A,
        app_session_id: Hash,
        amount: &Decimal,
    ) -> Result<(), ValidationError>
    where
        A: AssetDecimals + ?Sized,
    {
        self.apply_outgoing(assets, TransitionType::Commit, app_session_id, amount)
    }

    /// Move funds from an app session back into the channel.
    pub fn apply_release<A>(
        &mut self,
        assets: &A,
        app_session_id: Hash,
        amount: &Decimal,
    ) -> Result<(), ValidationError>
    where
        A: AssetDecimals + ?Sized,
    {
        self.apply_incoming(assets, TransitionType::Release, app_session_id, amount)
    }

    fn open_escrow(&self, blockchain_id: u64, token: Address) -> Result<(Hash, Ledger), ValidationError> {
        let home = self.home_channel()?;
        if let Some(id) = self.escrow_channel_id {
            return Err(ValidationError::InvalidState(format!(
                "escrow channel {} is still open",
                id
            )));
        }
        Ok((
            escrow_channel_id(home, self.version)?,
            Ledger::new(blockchain_id, token),
        ))
    }

    fn escrow_channel(&self) -> Result<Hash, ValidationError> {
        match (self.escrow_channel_id, &self.escrow_ledger) {
            (Some(id), Some(_)) => Ok(id),
            _ => Err(ValidationError::MissingField("escrow_ledger")),
        }
    }

    fn escrow_check<A>(&self, assets: &A, amount: &Decimal) -> Result<(), ValidationError>
    where
        A: AssetDecimals + ?Sized,
    {
        let ledger = self
            .escrow_ledger
            .as_ref()
            .ok_or(ValidationError::MissingField("escrow_ledger"))?;
        self.check_amount(assets, Token::Escrow(ledger), amount)
    }

    /// Start depositing on a non-home chain: the node locks `amount` on the
    /// home chain, the user deposits it into the escrow channel.
    pub fn apply_mutual_lock<A>(
        &mut self,
        assets: &A,
        blockchain_id: u64,
        token: Address,
        amount: &Decimal,
    ) -> Result<(), ValidationError>
    where
        A: AssetDecimals + ?Sized,
    {
        let (escrow_id, ledger) = self.open_escrow(blockchain_id, token)?;
        self.check_amount(assets, Token::Escrow(&ledger), amount)?;
        self.apply(TransitionType::MutualLock, escrow_id, amount.clone(), |home, escrow| {
            credit(&mut home.node_balance, amount);
            credit(&mut home.node_net_flow, amount);
            let mut ledger = ledger;
            ledger.user_balance = amount.clone();
            ledger.user_net_flow = amount.clone();
            *escrow = Some(ledger);
            Ok(())
        })?;
        self.escrow_channel_id = Some(escrow_id);
        Ok(())
    }

    /// Finish an escrow deposit: the locked funds become the user's on the
    /// home chain, the escrowed funds the node's.
    pub fn apply_escrow_deposit<A>(&mut self, assets: &A, amount: &Decimal) -> Result<(), ValidationError>
    where
        A: AssetDecimals + ?Sized,
    {
        let escrow_id = self.escrow_channel()?;
        self.escrow_check(assets, amount)?;
        self.apply(TransitionType::EscrowDeposit, escrow_id, amount.clone(), |home, escrow| {
            let escrow = escrow
                .as_mut()
                .ok_or(ValidationError::MissingField("escrow_ledger"))?;
            debit("node_balance", &mut home.node_balance, amount)?;
            credit(&mut home.user_balance, amount);
            debit("escrow user_balance", &mut escrow.user_balance, amount)?;
            credit(&mut escrow.node_balance, amount);
            Ok(())
        })
    }

    /// Start withdrawing on a non-home chain: the node locks `amount` in the
    /// escrow channel.
    pub fn apply_escrow_lock<A>(
        &mut self,
        assets: &A,
        blockchain_id: u64,
        token: Address,
        amount: &Decimal,
    ) -> Result<(), ValidationError>
    where
        A: AssetDecimals + ?Sized,
    {
        let (escrow_id, ledger) = self.open_escrow(blockchain_id, token)?;
        self.check_amount(assets, Token::Escrow(&ledger), amount)?;
        if &self.home_ledger.user_balance < amount {
            return Err(ValidationError::NegativeBalance {
                field: "user_balance",
                balance: self.home_ledger.user_balance.clone(),
                amount: amount.clone(),
            });
        }
        self.apply(TransitionType::EscrowLock, escrow_id, amount.clone(), |_, escrow| {
            let mut ledger = ledger;
            ledger.node_balance = amount.clone();
            ledger.node_net_flow = amount.clone();
            *escrow = Some(ledger);
            Ok(())
        })?;
        self.escrow_channel_id = Some(escrow_id);
        Ok(())
    }

    /// Finish an escrow withdrawal: the user leaves the home chain with
    /// `amount` and receives it from the escrow channel.
    pub fn apply_escrow_withdraw<A>(&mut self, assets: &A, amount: &Decimal) -> Result<(), ValidationError>
    where
        A: AssetDecimals + ?Sized,
    {
        let escrow_id = self.escrow_channel()?;
        self.escrow_check(assets, amount)?;
        self.apply(TransitionType::EscrowWithdraw, escrow_id, amount.clone(), |home, escrow| {
            let escrow = escrow
                .as_mut()
                .ok_or(ValidationError::MissingField("escrow_ledger"))?;
            debit("user_balance", &mut home.user_balance, amount)?;
            subtract(&mut home.node_net_flow, amount);
            debit("escrow node_balance", &mut escrow.node_balance, amount)?;
            subtract(&mut escrow.user_net_flow, amount);
            Ok(())
        })
    }

    /// Start moving the channel to another chain, the node mirrors the user's
    /// balance there.
    pub fn apply_migrate<A>(
        &mut self,
        assets: &A,
        blockchain_id: u64,
        token: Address,
    ) -> Result<(), ValidationError>
    where
        A: AssetDecimals + ?Sized,
    {
        let (escrow_id, ledger) = self.open_escrow(blockchain_id, token)?;
        let amount = self.home_ledger.user_balance.clone();
        if !amount.is_zero() {
            self.check_amount(assets, Token::Escrow(&ledger), &amount)?;
        }
        let mirrored = amount.clone();
        self.apply(TransitionType::Migrate, escrow_id, amount, |_, escrow| {
            let mut ledger = ledger;
            ledger.node_balance = mirrored.clone();
            ledger.node_net_flow = mirrored;
            *escrow = Some(ledger);
            Ok(())
        })?;
        self.escrow_channel_id = Some(escrow_id);
        Ok(())
    }

    /// Close the channel, paying out the user's balance.
    pub fn apply_finalize(&mut self) -> Result<(), ValidationError> {
        let channel = self.home_channel()?;
        let amount = self.home_ledger.user_balance.clone();
        self.apply(TransitionType::Finalize, channel, amount, |_, _| Ok(()))
    }
}
