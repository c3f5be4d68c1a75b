//! Append-only transaction ledger.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::Amount;
use crate::model::{PrincipalId, TransactionKind};
use crate::wallet::WalletId;

/// Unique identifier of a ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TransactionId(String);

impl TransactionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TransactionId {
    fn from(value: &str) -> Self {
        TransactionId(value.to_string())
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Source of fresh transaction ids. A retry must always draw a new one.
pub trait TransactionIds: Send + Sync {
    fn next_id(&self) -> TransactionId;
}

/// Random `TXN-<uuid>` ids.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidTransactionIds;

impl TransactionIds for UuidTransactionIds {
    fn next_id(&self) -> TransactionId {
        let uuid = Uuid::new_v4().simple().to_string().to_uppercase();
        TransactionId(format!("TXN-{uuid}"))
    }
}

/// Ledger row status. Synchronous transfers are always written as `Completed`;
/// the other states are reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
    Refunded,
}

/// An immutable record of one completed transfer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub transaction_id: TransactionId,
    pub transaction_type: TransactionKind,
    pub initiated_by: PrincipalId,
    pub from_wallet: WalletId,
    pub to_wallet: WalletId,
    pub amount: Amount,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fee: Option<Amount>,
    pub status: TransactionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    pub fn completed(
        transaction_id: TransactionId,
        transaction_type: TransactionKind,
        initiated_by: PrincipalId,
        from_wallet: WalletId,
        to_wallet: WalletId,
        amount: Amount,
        description: Option<String>,
    ) -> Self {
        Self {
            transaction_id,
            transaction_type,
            initiated_by,
            from_wallet,
            to_wallet,
            amount,
            fee: None,
            status: TransactionStatus::Completed,
            description,
            created_at: Utc::now(),
        }
    }

    /// True if the wallet is on either side of this row.
    pub fn touches(&self, wallet: &WalletId) -> bool {
        &self.from_wallet == wallet || &self.to_wallet == wallet
    }
}

/// Rows in append order. No update or delete is exposed.
#[derive(Debug, Default)]
pub struct Ledger {
    rows: Vec<Transaction>,
    ids: HashSet<TransactionId>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &TransactionId) -> bool {
        self.ids.contains(id)
    }

    pub fn list_all(&self) -> &[Transaction] {
        &self.rows
    }

    pub fn list_by_wallet<'a>(
        &'a self,
        wallet: &'a WalletId,
    ) -> impl Iterator<Item = &'a Transaction> + 'a {
        self.rows.iter().filter(move |row| row.touches(wallet))
    }

    /// Callers have already checked the id is unused.
    pub(crate) fn push(&mut self, row: Transaction) {
        self.ids.insert(row.transaction_id.clone());
        self.rows.push(row);
    }
}
