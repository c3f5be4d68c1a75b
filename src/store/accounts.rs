//! Account lifecycle. Every status change that affects whether a principal
//! may transact also updates its wallet flags in the same unit of work.

use thiserror::Error;
use tracing::info;

use super::{Store, StoreError, UnitOfWork};
use crate::directory::Principal;
use crate::model::{PrincipalId, Role, Status};
use crate::wallet::Wallet;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccountError {
    #[error("phone number must not be empty")]
    EmptyPhone,
    #[error("phone number {0} is already registered")]
    DuplicatePhone(String),
    #[error("principal {0} not found")]
    NotFound(PrincipalId),
    #[error("principal {0} is a {1}, expected {2}")]
    WrongRole(PrincipalId, Role, Role),
    #[error("principal {0} is already deleted")]
    AlreadyDeleted(PrincipalId),
    #[error("wallet of principal {0} not found")]
    MissingWallet(PrincipalId),
    #[error(transparent)]
    Storage(#[from] StoreError),
}

/// Registration data for a new principal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAccount {
    pub name: String,
    pub phone: String,
    pub role: Role,
}

impl NewAccount {
    pub fn new(name: impl Into<String>, phone: impl Into<String>, role: Role) -> Self {
        Self {
            name: name.into(),
            phone: phone.into(),
            role,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum WalletChange {
    Block,
    Unblock,
    SoftDelete,
}

impl Store {
    /// Register a principal and, for users and agents, its wallet seeded with
    /// the configured initial balance. Both appear together or not at all.
    pub async fn open_account(
        &self,
        account: NewAccount,
    ) -> Result<(Principal, Option<Wallet>), AccountError> {
        let phone = account.phone.trim().to_string();
        if phone.is_empty() {
            return Err(AccountError::EmptyPhone);
        }

        let mut unit = self.begin().await?;
        if unit.state.directory.contains_phone(&phone) {
            return Err(AccountError::DuplicatePhone(phone));
        }

        let principal = Principal {
            id: unit.state.directory.allocate_id(),
            name: account.name.trim().to_string(),
            phone,
            role: account.role,
            status: Principal::initial_status(account.role),
            is_deleted: false,
        };
        let wallet = account.role.holds_wallet().then(|| {
            unit.state.wallets.create_for(
                principal.id,
                &principal.name,
                self.initial_balance,
                self.currency,
            )
        });

        unit.update_principal(principal.clone());
        if let Some(wallet) = &wallet {
            unit.wallets.insert(wallet.id.clone(), wallet.clone());
        }
        unit.commit();

        info!(
            principal = principal.id,
            role = %principal.role,
            status = %principal.status,
            wallet = ?wallet.as_ref().map(|w| w.id.as_str()),
            "account opened"
        );
        Ok((principal, wallet))
    }

    /// Move a pending (or suspended) agent to active and unblock its wallet.
    pub async fn approve_agent(
        &self,
        id: PrincipalId,
    ) -> Result<(Principal, Option<Wallet>), AccountError> {
        self.transition(id, Some(Role::Agent), None, Status::Active, WalletChange::Unblock)
            .await
    }

    /// Turn down an agent application: the principal becomes an active user
    /// and keeps its wallet, unblocked.
    pub async fn reject_agent(
        &self,
        id: PrincipalId,
    ) -> Result<(Principal, Option<Wallet>), AccountError> {
        self.transition(
            id,
            Some(Role::Agent),
            Some(Role::User),
            Status::Active,
            WalletChange::Unblock,
        )
        .await
    }

    pub async fn suspend_agent(
        &self,
        id: PrincipalId,
    ) -> Result<(Principal, Option<Wallet>), AccountError> {
        self.transition(id, Some(Role::Agent), None, Status::Suspended, WalletChange::Block)
            .await
    }

    pub async fn block_user(
        &self,
        id: PrincipalId,
    ) -> Result<(Principal, Option<Wallet>), AccountError> {
        self.transition(id, Some(Role::User), None, Status::Blocked, WalletChange::Block)
            .await
    }

    pub async fn unblock_user(
        &self,
        id: PrincipalId,
    ) -> Result<(Principal, Option<Wallet>), AccountError> {
        self.transition(id, Some(Role::User), None, Status::Active, WalletChange::Unblock)
            .await
    }

    /// Soft delete a principal: it is suspended and its wallet is soft
    /// deleted and blocked. Nothing is ever removed.
    pub async fn delete_account(
        &self,
        id: PrincipalId,
    ) -> Result<(Principal, Option<Wallet>), AccountError> {
        self.transition(id, None, None, Status::Suspended, WalletChange::SoftDelete)
            .await
    }

    async fn transition(
        &self,
        id: PrincipalId,
        role: Option<Role>,
        becomes: Option<Role>,
        status: Status,
        change: WalletChange,
    ) -> Result<(Principal, Option<Wallet>), AccountError> {
        let mut unit = self.begin().await?;
        let mut principal = unit
            .principal(id)
            .cloned()
            .ok_or(AccountError::NotFound(id))?;

        if let Some(expected) = role {
            if principal.role != expected {
                return Err(AccountError::WrongRole(id, principal.role, expected));
            }
        }
        if principal.is_deleted {
            return Err(AccountError::AlreadyDeleted(id));
        }

        principal.status = status;
        if let Some(next) = becomes {
            principal.role = next;
        }
        if matches!(change, WalletChange::SoftDelete) {
            principal.is_deleted = true;
        }

        let wallet = if principal.role.holds_wallet() {
            Some(apply_wallet_change(&mut unit, id, change)?)
        } else {
            None
        };
        unit.update_principal(principal.clone());
        unit.commit();

        info!(
            principal = id,
            role = %principal.role,
            status = %principal.status,
            deleted = principal.is_deleted,
            wallet_blocked = ?wallet.as_ref().map(|w| w.is_blocked),
            "account status changed"
        );
        Ok((principal, wallet))
    }
}

fn apply_wallet_change(
    unit: &mut UnitOfWork<'_>,
    owner: PrincipalId,
    change: WalletChange,
) -> Result<Wallet, AccountError> {
    let wallet_id = unit
        .wallet_of(owner)
        .map(|w| w.id.clone())
        .ok_or(AccountError::MissingWallet(owner))?;
    let wallet = match change {
        WalletChange::Block => unit.set_blocked(&wallet_id, true)?,
        WalletChange::Unblock => unit.set_blocked(&wallet_id, false)?,
        WalletChange::SoftDelete => unit.soft_delete_wallet(&wallet_id)?,
    };
    Ok(wallet.clone())
}
