use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};

use crate::{abiencode::types::Address, decimal::Decimal, error::ValidationError};

/// Balances of one channel on one blockchain.
///
/// Balances never go negative, net flows (what each side moved in or out of
/// the channel contract) may. Every change keeps
/// `user_balance + node_balance == user_net_flow + node_net_flow`.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Ledger {
    pub token_address: Address,
    #[serde_as(as = "DisplayFromStr")]
    pub blockchain_id: u64,
    pub user_balance: Decimal,
    pub user_net_flow: Decimal,
    pub node_balance: Decimal,
    pub node_net_flow: Decimal,
}

impl Ledger {
    pub fn new(blockchain_id: u64, token_address: Address) -> Self {
        Ledger {
            token_address,
            blockchain_id,
            ..Default::default()
        }
    }

    pub fn is_balanced(&self) -> bool {
        &self.user_balance + &self.node_balance == &self.user_net_flow + &self.node_net_flow
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        for (field, balance) in [
            ("user_balance", &self.user_balance),
            ("node_balance", &self.node_balance),
        ] {
            if balance.is_negative() {
                return Err(ValidationError::InvalidState(format!(
                    "{} is negative: {}",
                    field, balance
                )));
            }
        }
        if !self.is_balanced() {
            return Err(ValidationError::InvalidState(
                "balances do not match net flows".into(),
            ));
        }
        Ok(())
    }
}

/// `*balance -= amount`, refusing to go below zero.
pub(super) fn debit(
    field: &'static str,
    balance: &mut Decimal,
    amount: &Decimal,
) -> Result<(), ValidationError> {
    if &*balance < amount {
        return Err(ValidationError::NegativeBalance {
            field,
            balance: balance.clone(),
            amount: amount.clone(),
        });
    }
    *balance = &*balance - amount;
    Ok(())
}

pub(super) fn credit(value: &mut Decimal, amount: &Decimal) {
    *value = &*value + amount;
}

pub(super) fn subtract(value: &mut Decimal, amount: &Decimal) {
    *value = &*value - amount;
}
