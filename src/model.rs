//! Core domain types for the wallet ledger.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Amount;

/// Principal identifier, assigned by the account directory.
pub type PrincipalId = u32;

/// Role of an account holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    User,
    Agent,
    Admin,
}

impl Role {
    /// Users and agents hold a wallet, admins don't.
    pub fn holds_wallet(self) -> bool {
        matches!(self, Role::User | Role::Agent)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "USER",
            Role::Agent => "AGENT",
            Role::Admin => "ADMIN",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Account status of a principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Active,
    Pending,
    Blocked,
    Suspended,
}

impl Status {
    /// Blocked and suspended principals may never take part in a transfer.
    pub fn is_barred(self) -> bool {
        matches!(self, Status::Blocked | Status::Suspended)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Active => "ACTIVE",
            Status::Pending => "PENDING",
            Status::Blocked => "BLOCKED",
            Status::Suspended => "SUSPENDED",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Semantic direction of a ledger row. Never chosen freely by the caller:
/// it follows from the [`TransferRequest`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    AddMoney,
    Withdraw,
    SendMoney,
    CashIn,
    CashOut,
    AdminTopup,
}

impl TransactionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionKind::AddMoney => "ADD_MONEY",
            TransactionKind::Withdraw => "WITHDRAW",
            TransactionKind::SendMoney => "SEND_MONEY",
            TransactionKind::CashIn => "CASH_IN",
            TransactionKind::CashOut => "CASH_OUT",
            TransactionKind::AdminTopup => "ADMIN_TOPUP",
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A transfer between two principals where the counterparty is looked up by phone.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerTransfer {
    pub initiator: PrincipalId,
    pub counterparty_phone: String,
    pub amount: Amount,
    pub description: Option<String>,
}

/// Funds created by an administrator into a target principal's wallet.
#[derive(Debug, Clone, PartialEq)]
pub struct TopUp {
    pub admin: PrincipalId,
    pub target: PrincipalId,
    pub amount: Amount,
    pub description: Option<String>,
}

/// A request representing the possible inputs of the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferRequest {
    /// An agent funds the initiator's wallet.
    AddMoney(PeerTransfer),
    /// The initiator moves funds to an agent.
    Withdraw(PeerTransfer),
    /// The initiator pays any active principal.
    SendMoney(PeerTransfer),
    /// An agent credits a principal's wallet from its own float.
    CashIn(PeerTransfer),
    /// An agent debits a principal's wallet into its own float.
    CashOut(PeerTransfer),
    /// An admin creates funds in a wallet; there is no debited source.
    AdminTopUp(TopUp),
}

impl TransferRequest {
    pub fn kind(&self) -> TransactionKind {
        match self {
            TransferRequest::AddMoney(_) => TransactionKind::AddMoney,
            TransferRequest::Withdraw(_) => TransactionKind::Withdraw,
            TransferRequest::SendMoney(_) => TransactionKind::SendMoney,
            TransferRequest::CashIn(_) => TransactionKind::CashIn,
            TransferRequest::CashOut(_) => TransactionKind::CashOut,
            TransferRequest::AdminTopUp(_) => TransactionKind::AdminTopup,
        }
    }

    pub fn initiator(&self) -> PrincipalId {
        match self {
            TransferRequest::AddMoney(p)
            | TransferRequest::Withdraw(p)
            | TransferRequest::SendMoney(p)
            | TransferRequest::CashIn(p)
            | TransferRequest::CashOut(p) => p.initiator,
            TransferRequest::AdminTopUp(t) => t.admin,
        }
    }

    pub fn amount(&self) -> Amount {
        match self {
            TransferRequest::AddMoney(p)
            | TransferRequest::Withdraw(p)
            | TransferRequest::SendMoney(p)
            | TransferRequest::CashIn(p)
            | TransferRequest::CashOut(p) => p.amount,
            TransferRequest::AdminTopUp(t) => t.amount,
        }
    }

    pub fn description(&self) -> Option<&str> {
        match self {
            TransferRequest::AddMoney(p)
            | TransferRequest::Withdraw(p)
            | TransferRequest::SendMoney(p)
            | TransferRequest::CashIn(p)
            | TransferRequest::CashOut(p) => p.description.as_deref(),
            TransferRequest::AdminTopUp(t) => t.description.as_deref(),
        }
    }
}
