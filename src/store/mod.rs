//! Shared ledger state and the atomic unit of work.
//!
//! The directory, the wallet store and the ledger live behind one async
//! mutex. A [`UnitOfWork`] holds that mutex for the duration of a transfer,
//! stages every write on the side and publishes them together on
//! [`UnitOfWork::commit`]. Dropping the unit without committing discards all
//! staged writes, so readers never see a half-applied transfer.

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::Amount;
use crate::config::Settings;
use crate::directory::{Directory, Principal};
use crate::ledger::{Ledger, Transaction, TransactionId};
use crate::model::{PrincipalId, Role};
use crate::wallet::{Currency, Wallet, WalletError, WalletId, WalletStore};

mod accounts;
pub use accounts::{AccountError, NewAccount};

/// Failures of the storage layer itself. None of these are the caller's fault.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("timed out after {0:?} waiting for the ledger")]
    LockTimeout(Duration),
    #[error("transaction id {0} already recorded")]
    DuplicateTransactionId(TransactionId),
    #[error("wallet {0} disappeared")]
    WalletMissing(WalletId),
    #[error(transparent)]
    Wallet(#[from] WalletError),
}

#[derive(Debug, Default)]
struct State {
    directory: Directory,
    wallets: WalletStore,
    ledger: Ledger,
}

/// Headline figures across the directory and the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Overview {
    /// Users and agents not soft deleted.
    pub total_users: usize,
    pub total_agents: usize,
    pub transaction_count: usize,
    /// Sum of every ledger row's amount.
    pub transaction_volume: Amount,
}

/// Durable state of the system.
#[derive(Debug)]
pub struct Store {
    state: Mutex<State>,
    initial_balance: Amount,
    currency: Currency,
    lock_timeout: Duration,
}

impl Store {
    pub fn new(settings: &Settings) -> Self {
        Self {
            state: Mutex::new(State::default()),
            initial_balance: settings.initial_wallet_balance,
            currency: settings.currency,
            lock_timeout: settings.lock_timeout(),
        }
    }

    /// Open a unit of work, waiting at most the configured lock timeout.
    pub async fn begin(&self) -> Result<UnitOfWork<'_>, StoreError> {
        let state = tokio::time::timeout(self.lock_timeout, self.state.lock())
            .await
            .map_err(|_| StoreError::LockTimeout(self.lock_timeout))?;
        Ok(UnitOfWork {
            state,
            principals: HashMap::new(),
            wallets: HashMap::new(),
            appended: Vec::new(),
        })
    }

    pub async fn principal(&self, id: PrincipalId) -> Option<Principal> {
        self.state.lock().await.directory.find_by_id(id).cloned()
    }

    pub async fn principal_by_phone(&self, phone: &str) -> Option<Principal> {
        self.state.lock().await.directory.find_by_phone(phone).cloned()
    }

    pub async fn wallet(&self, id: &WalletId) -> Option<Wallet> {
        self.state.lock().await.wallets.find_by_id(id).cloned()
    }

    pub async fn wallet_of(&self, owner: PrincipalId) -> Option<Wallet> {
        self.state.lock().await.wallets.find_by_owner(owner).cloned()
    }

    /// Snapshot of every wallet, ordered by owner.
    pub async fn wallets(&self) -> Vec<Wallet> {
        let state = self.state.lock().await;
        state.wallets.all().into_iter().cloned().collect()
    }

    /// Every ledger row in append order.
    pub async fn transactions(&self) -> Vec<Transaction> {
        self.state.lock().await.ledger.list_all().to_vec()
    }

    pub async fn overview(&self) -> Overview {
        let state = self.state.lock().await;
        let live = |role: Role| {
            state
                .directory
                .iter()
                .filter(|p| p.role == role && !p.is_deleted)
                .count()
        };
        let rows = state.ledger.list_all();
        Overview {
            total_users: live(Role::User),
            total_agents: live(Role::Agent),
            transaction_count: rows.len(),
            transaction_volume: rows.iter().fold(Amount::ZERO, |sum, row| sum + row.amount),
        }
    }

    /// Ledger rows with the wallet on either side.
    pub async fn transactions_for_wallet(&self, wallet: &WalletId) -> Vec<Transaction> {
        let state = self.state.lock().await;
        state.ledger.list_by_wallet(wallet).cloned().collect()
    }
}

/// Exclusive, all-or-nothing view over the store.
pub struct UnitOfWork<'a> {
    state: MutexGuard<'a, State>,
    principals: HashMap<PrincipalId, Principal>,
    wallets: HashMap<WalletId, Wallet>,
    appended: Vec<Transaction>,
}

impl UnitOfWork<'_> {
    pub fn principal(&self, id: PrincipalId) -> Option<&Principal> {
        self.principals
            .get(&id)
            .or_else(|| self.state.directory.find_by_id(id))
    }

    pub fn principal_by_phone(&self, phone: &str) -> Option<&Principal> {
        let id = self.state.directory.id_for_phone(phone)?;
        self.principal(id)
    }

    pub fn wallet(&self, id: &WalletId) -> Option<&Wallet> {
        self.wallets
            .get(id)
            .or_else(|| self.state.wallets.find_by_id(id))
    }

    pub fn wallet_of(&self, owner: PrincipalId) -> Option<&Wallet> {
        let id = self.state.wallets.id_for_owner(owner)?;
        self.wallet(id)
    }

    /// Stage a signed balance change. Fails without staging anything if the
    /// wallet would go negative.
    pub fn adjust_balance(&mut self, id: &WalletId, delta: Amount) -> Result<&Wallet, StoreError> {
        let wallet = self.staged_wallet(id)?;
        let mut next = wallet.clone();
        next.apply_delta(delta)?;
        *wallet = next;
        Ok(wallet)
    }

    pub fn set_blocked(&mut self, id: &WalletId, blocked: bool) -> Result<&Wallet, StoreError> {
        let wallet = self.staged_wallet(id)?;
        wallet.is_blocked = blocked;
        Ok(wallet)
    }

    pub fn soft_delete_wallet(&mut self, id: &WalletId) -> Result<&Wallet, StoreError> {
        let wallet = self.staged_wallet(id)?;
        wallet.soft_delete();
        Ok(wallet)
    }

    pub fn update_principal(&mut self, principal: Principal) {
        self.principals.insert(principal.id, principal);
    }

    /// Stage a ledger row. A reused transaction id aborts the unit.
    pub fn append(&mut self, row: Transaction) -> Result<(), StoreError> {
        let id = &row.transaction_id;
        if self.state.ledger.contains(id) || self.appended.iter().any(|r| &r.transaction_id == id) {
            return Err(StoreError::DuplicateTransactionId(id.clone()));
        }
        self.appended.push(row);
        Ok(())
    }

    /// Publish every staged write at once.
    pub fn commit(mut self) {
        debug!(
            principals = self.principals.len(),
            wallets = self.wallets.len(),
            rows = self.appended.len(),
            "committing unit of work"
        );
        let state = &mut *self.state;
        for (_, principal) in self.principals.drain() {
            state.directory.put(principal);
        }
        for (_, wallet) in self.wallets.drain() {
            state.wallets.put(wallet);
        }
        for row in self.appended.drain(..) {
            state.ledger.push(row);
        }
    }

    fn staged_wallet(&mut self, id: &WalletId) -> Result<&mut Wallet, StoreError> {
        if !self.wallets.contains_key(id) {
            let current = self
                .state
                .wallets
                .find_by_id(id)
                .cloned()
                .ok_or_else(|| StoreError::WalletMissing(id.clone()))?;
            self.wallets.insert(id.clone(), current);
        }
        self.wallets
            .get_mut(id)
            .ok_or_else(|| StoreError::WalletMissing(id.clone()))
    }
}
