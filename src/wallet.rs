//! Wallet store: one balance-holding wallet per user or agent.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::Amount;
use crate::model::PrincipalId;

/// Machine generated wallet identifier, e.g. `WLT-RAH1432075121`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct WalletId(String);

impl WalletId {
    /// Build an id from the owner's name and the creation time plus a random suffix.
    pub fn generate(owner_name: &str, at: DateTime<Utc>) -> Self {
        let mut prefix: String = owner_name
            .chars()
            .filter(|c| !c.is_whitespace())
            .take(3)
            .collect::<String>()
            .to_uppercase();
        if prefix.is_empty() {
            prefix = "ZZZ".to_string();
        }
        let suffix = Uuid::new_v4().as_u128() % 1000;
        WalletId(format!("WLT-{prefix}{}{suffix}", at.format("%H%M%S%3f")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for WalletId {
    fn from(value: &str) -> Self {
        WalletId(value.to_string())
    }
}

impl fmt::Display for WalletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Supported wallet currencies. A deployment runs on exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    #[default]
    Bdt,
    Usd,
}

impl Currency {
    pub fn code(self) -> &'static str {
        match self {
            Currency::Bdt => "BDT",
            Currency::Usd => "USD",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WalletError {
    #[error("wallet {0}: balance {1} cannot absorb change {2}")]
    NegativeBalance(WalletId, Amount, Amount),
    #[error("wallet {0}: balance overflow")]
    Overflow(WalletId),
}

/// A principal's wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Wallet {
    pub id: WalletId,
    pub owner: PrincipalId,
    pub balance: Amount,
    pub currency: Currency,
    /// Administratively frozen: rejects debits and credits.
    pub is_blocked: bool,
    /// Soft deleted, terminal.
    pub is_deleted: bool,
}

impl Wallet {
    pub fn new(id: WalletId, owner: PrincipalId, balance: Amount, currency: Currency) -> Self {
        Self {
            id,
            owner,
            balance,
            currency,
            is_blocked: false,
            is_deleted: false,
        }
    }

    /// Apply a signed change to the balance. The balance never goes negative.
    pub(crate) fn apply_delta(&mut self, delta: Amount) -> Result<(), WalletError> {
        let next = self
            .balance
            .checked_add(delta)
            .ok_or_else(|| WalletError::Overflow(self.id.clone()))?;
        if next.is_negative() {
            return Err(WalletError::NegativeBalance(
                self.id.clone(),
                self.balance,
                delta,
            ));
        }
        self.balance = next;
        Ok(())
    }

    pub(crate) fn soft_delete(&mut self) {
        self.is_deleted = true;
        self.is_blocked = true;
    }
}

/// In-memory wallet table indexed by id and by owner.
///
/// Only the store's unit of work writes here, so every balance change is
/// published together with its ledger row.
#[derive(Debug, Default)]
pub struct WalletStore {
    wallets: HashMap<WalletId, Wallet>,
    by_owner: HashMap<PrincipalId, WalletId>,
}

impl WalletStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find_by_id(&self, id: &WalletId) -> Option<&Wallet> {
        self.wallets.get(id)
    }

    pub fn find_by_owner(&self, owner: PrincipalId) -> Option<&Wallet> {
        self.by_owner.get(&owner).and_then(|id| self.wallets.get(id))
    }

    pub fn id_for_owner(&self, owner: PrincipalId) -> Option<&WalletId> {
        self.by_owner.get(&owner)
    }

    pub fn contains(&self, id: &WalletId) -> bool {
        self.wallets.contains_key(id)
    }

    /// All wallets ordered by owner.
    pub fn all(&self) -> Vec<&Wallet> {
        let mut wallets: Vec<_> = self.wallets.values().collect();
        wallets.sort_by_key(|w| w.owner);
        wallets
    }

    /// Build a wallet for a new principal with a collision-free id. Not yet stored.
    pub(crate) fn create_for(
        &self,
        owner: PrincipalId,
        owner_name: &str,
        initial_balance: Amount,
        currency: Currency,
    ) -> Wallet {
        let mut id = WalletId::generate(owner_name, Utc::now());
        while self.contains(&id) {
            id = WalletId::generate(owner_name, Utc::now());
        }
        Wallet::new(id, owner, initial_balance, currency)
    }

    pub(crate) fn put(&mut self, wallet: Wallet) {
        self.by_owner.insert(wallet.owner, wallet.id.clone());
        self.wallets.insert(wallet.id.clone(), wallet);
    }
}
