use crate::model::{Role, TransactionKind};

/// Which way value moves between the initiator and the counterparty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Initiator is debited, counterparty credited.
    InitiatorToCounterparty,
    /// Counterparty is debited, initiator credited.
    CounterpartyToInitiator,
    /// Counterparty is credited from nowhere.
    Mint,
}

/// Per-kind rules shared by the single transfer pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindPolicy {
    pub initiator_roles: &'static [Role],
    /// Role the counterparty must hold, if the kind requires one.
    pub counterparty_role: Option<Role>,
    pub flow: Flow,
}

impl KindPolicy {
    pub fn for_kind(kind: TransactionKind) -> Self {
        const PEERS: &[Role] = &[Role::User, Role::Agent];
        const AGENTS: &[Role] = &[Role::Agent];
        const ADMINS: &[Role] = &[Role::Admin];

        match kind {
            TransactionKind::AddMoney => KindPolicy {
                initiator_roles: PEERS,
                counterparty_role: Some(Role::Agent),
                flow: Flow::CounterpartyToInitiator,
            },
            TransactionKind::Withdraw => KindPolicy {
                initiator_roles: PEERS,
                counterparty_role: Some(Role::Agent),
                flow: Flow::InitiatorToCounterparty,
            },
            TransactionKind::SendMoney => KindPolicy {
                initiator_roles: PEERS,
                counterparty_role: None,
                flow: Flow::InitiatorToCounterparty,
            },
            TransactionKind::CashIn => KindPolicy {
                initiator_roles: AGENTS,
                counterparty_role: None,
                flow: Flow::InitiatorToCounterparty,
            },
            TransactionKind::CashOut => KindPolicy {
                initiator_roles: AGENTS,
                counterparty_role: None,
                flow: Flow::CounterpartyToInitiator,
            },
            TransactionKind::AdminTopup => KindPolicy {
                initiator_roles: ADMINS,
                counterparty_role: None,
                flow: Flow::Mint,
            },
        }
    }

    pub fn allows_initiator(&self, role: Role) -> bool {
        self.initiator_roles.contains(&role)
    }

    /// Minted transfers have no initiator wallet.
    pub fn initiator_holds_wallet(&self) -> bool {
        self.flow != Flow::Mint
    }
}
