//! Token decimals lookup.
//!
//! Every conversion between [Decimal](crate::Decimal) amounts and on-chain
//! integers needs the token's decimals. The lookup is abstracted by
//! [AssetDecimals] so callers can plug in their own table, [AssetTable] is the
//! one built from the node's `node.v1.get_assets` response.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};

use crate::abiencode::types::Address;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("no token {token} on blockchain {blockchain_id}")]
pub struct AssetNotFound {
    pub blockchain_id: u64,
    pub token: Address,
}

pub trait AssetDecimals {
    fn token_decimals(&self, blockchain_id: u64, token: &Address) -> Result<u8, AssetNotFound>;
}

/// Closures work as lookup, e.g. for tests or fixed configurations.
impl<F> AssetDecimals for F
where
    F: Fn(u64, &Address) -> Option<u8>,
{
    fn token_decimals(&self, blockchain_id: u64, token: &Address) -> Result<u8, AssetNotFound> {
        self(blockchain_id, token).ok_or(AssetNotFound {
            blockchain_id,
            token: *token,
        })
    }
}

/// One deployment of an asset.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub name: String,
    pub symbol: String,
    pub address: Address,
    #[serde_as(as = "DisplayFromStr")]
    pub blockchain_id: u64,
    pub decimals: u8,
}

/// An asset (e.g. `usdc`) with its deployments on the supported chains.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    #[serde_as(as = "DisplayFromStr")]
    pub suggested_blockchain_id: u64,
    pub tokens: Vec<Token>,
}

/// Memoized lookup built from the asset list.
#[derive(Debug, Clone, Default)]
pub struct AssetTable {
    assets: HashMap<String, Asset>,
    decimals: HashMap<(u64, Address), u8>,
}

impl AssetTable {
    pub fn new(assets: impl IntoIterator<Item = Asset>) -> Self {
        let mut table = AssetTable::default();
        for asset in assets {
            for token in &asset.tokens {
                table
                    .decimals
                    .insert((token.blockchain_id, token.address), token.decimals);
            }
            table.assets.insert(asset.symbol.to_lowercase(), asset);
        }
        table
    }

    /// Look up an asset by its (case insensitive) symbol.
    pub fn asset(&self, symbol: &str) -> Option<&Asset> {
        self.assets.get(&symbol.to_lowercase())
    }

    /// The deployment of `symbol` on `blockchain_id`.
    pub fn token(&self, symbol: &str, blockchain_id: u64) -> Option<&Token> {
        self.asset(symbol)?
            .tokens
            .iter()
            .find(|t| t.blockchain_id == blockchain_id)
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}

impl AssetDecimals for AssetTable {
    fn token_decimals(&self, blockchain_id: u64, token: &Address) -> Result<u8, AssetNotFound> {
        self.decimals
            .get(&(blockchain_id, *token))
            .copied()
            .ok_or(AssetNotFound {
                blockchain_id,
                token: *token,
            })
    }
}
