//! Transfer engine.
//!
//! Every transfer kind goes through one pipeline: input checks, then, inside
//! a single unit of work, the initiator, its wallet, the counterparty and its
//! wallet are validated, the debited wallet is checked for funds, both
//! balances are adjusted and one ledger row is appended. The unit commits
//! only if every step succeeded.
//! Also supports async stream of transfer requests.

use std::sync::Arc;

use serde::Serialize;
use tokio_stream::{Stream, StreamExt};
use tracing::{info, warn};

use crate::Amount;
use crate::config::Settings;
use crate::directory::Principal;
use crate::ledger::{Transaction, TransactionIds, UuidTransactionIds};
use crate::model::{
    PeerTransfer, PrincipalId, Role, Status, TopUp, TransactionKind, TransferRequest,
};
use crate::store::{Store, UnitOfWork};
use crate::wallet::Wallet;

mod error;
pub use error::{EngineError, ErrorKind, ErrorReport, Forbidden, InvalidInput, NotFound};

mod policy;
pub use policy::{Flow, KindPolicy};

/// Result of a successful transfer: both wallets after the move and the new ledger row.
///
/// For an admin top-up there is no source wallet, so `debited` is the
/// credited wallet again.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferReceipt {
    pub debited: Wallet,
    pub credited: Wallet,
    pub transaction: Transaction,
}

/// The transfer engine. Cheap to clone; clones share the same store.
#[derive(Clone)]
pub struct Engine {
    store: Arc<Store>,
    settings: Arc<Settings>,
    ids: Arc<dyn TransactionIds>,
}

/// Public API
impl Engine {
    pub fn new(store: Arc<Store>, settings: Settings) -> Self {
        Self {
            store,
            settings: Arc::new(settings),
            ids: Arc::new(UuidTransactionIds),
        }
    }

    /// Replace the transaction id source.
    pub fn with_transaction_ids(mut self, ids: impl TransactionIds + 'static) -> Self {
        self.ids = Arc::new(ids);
        self
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Run the engine with the given request stream
    pub async fn run(&self, mut stream: impl Stream<Item = TransferRequest> + Unpin) {
        while let Some(request) = stream.next().await {
            // a rejected transfer should not stop the engine, it is already logged
            let _ = self.execute(request).await;
        }
    }

    /// Execute a single transfer request.
    pub async fn execute(&self, request: TransferRequest) -> Result<TransferReceipt, EngineError> {
        let result = self.transfer(&request).await;
        Self::log_result(&request, &result);
        result
    }

    pub async fn add_money(&self, transfer: PeerTransfer) -> Result<TransferReceipt, EngineError> {
        self.execute(TransferRequest::AddMoney(transfer)).await
    }

    pub async fn withdraw(&self, transfer: PeerTransfer) -> Result<TransferReceipt, EngineError> {
        self.execute(TransferRequest::Withdraw(transfer)).await
    }

    pub async fn send_money(&self, transfer: PeerTransfer) -> Result<TransferReceipt, EngineError> {
        self.execute(TransferRequest::SendMoney(transfer)).await
    }

    pub async fn cash_in(&self, transfer: PeerTransfer) -> Result<TransferReceipt, EngineError> {
        self.execute(TransferRequest::CashIn(transfer)).await
    }

    pub async fn cash_out(&self, transfer: PeerTransfer) -> Result<TransferReceipt, EngineError> {
        self.execute(TransferRequest::CashOut(transfer)).await
    }

    pub async fn admin_top_up(&self, top_up: TopUp) -> Result<TransferReceipt, EngineError> {
        self.execute(TransferRequest::AdminTopUp(top_up)).await
    }

    /// Ledger rows touching the principal's wallet.
    pub async fn history(&self, principal: PrincipalId) -> Result<Vec<Transaction>, EngineError> {
        let account = self
            .store
            .principal(principal)
            .await
            .ok_or(NotFound::Principal(principal))?;
        if account.status.is_barred() {
            return Err(Forbidden::InitiatorStatus(account.status).into());
        }
        let wallet = self
            .store
            .wallet_of(principal)
            .await
            .ok_or(NotFound::Wallet(principal))?;
        Ok(self.store.transactions_for_wallet(&wallet.id).await)
    }
}

/// Private API
impl Engine {
    fn log_result(request: &TransferRequest, result: &Result<TransferReceipt, EngineError>) {
        let kind = request.kind();
        let initiator = request.initiator();
        let amount = request.amount();
        match result {
            Ok(receipt) => {
                info!(
                    kind = %kind,
                    initiator = initiator,
                    amount = %amount,
                    tx = %receipt.transaction.transaction_id,
                    "transfer applied"
                );
            }
            Err(e) if e.is_retryable() => {
                warn!(
                    kind = %kind,
                    initiator = initiator,
                    amount = %amount,
                    reason = %e,
                    "transfer aborted"
                );
            }
            Err(e) => {
                info!(
                    kind = %kind,
                    initiator = initiator,
                    amount = %amount,
                    reason = %e,
                    "transfer rejected"
                );
            }
        }
    }

    /// The shared pipeline behind every transfer kind.
    async fn transfer(&self, request: &TransferRequest) -> Result<TransferReceipt, EngineError> {
        let kind = request.kind();
        let policy = KindPolicy::for_kind(kind);
        let amount = request.amount();

        self.check_input(request)?;

        let mut unit = self.store.begin().await?;

        let initiator = Self::check_initiator(&unit, request.initiator(), kind, &policy)?;
        let initiator_wallet = if policy.initiator_holds_wallet() {
            Some(Self::check_initiator_wallet(&unit, &initiator)?)
        } else {
            None
        };

        let counterparty = Self::resolve_counterparty(&unit, request)?;
        if counterparty.id == initiator.id {
            return Err(Forbidden::SelfTransfer.into());
        }
        Self::check_counterparty(&counterparty, kind, &policy)?;
        let counterparty_wallet = Self::check_counterparty_wallet(&unit, &counterparty)?;

        let (debited, credited) = match (policy.flow, initiator_wallet) {
            (Flow::InitiatorToCounterparty, Some(own)) => (Some(own), counterparty_wallet),
            (Flow::CounterpartyToInitiator, Some(own)) => (Some(counterparty_wallet), own),
            _ => (None, counterparty_wallet),
        };

        if let Some(source) = &debited {
            if source.balance < amount {
                return Err(EngineError::InsufficientFunds {
                    wallet: source.id.clone(),
                    balance: source.balance,
                    requested: amount,
                });
            }
        }

        // From here on nothing is visible until commit; any error drops the unit.
        let debited_after = match &debited {
            Some(source) => Some(unit.adjust_balance(&source.id, -amount)?.clone()),
            None => None,
        };
        let credited_after = unit.adjust_balance(&credited.id, amount)?.clone();

        let from_wallet = debited.map_or_else(|| credited.id.clone(), |source| source.id);
        let description = self.describe(request, &counterparty, amount);
        let row = Transaction::completed(
            self.ids.next_id(),
            kind,
            initiator.id,
            from_wallet,
            credited.id,
            amount,
            description,
        );
        unit.append(row.clone())?;
        unit.commit();

        Ok(TransferReceipt {
            debited: debited_after.unwrap_or_else(|| credited_after.clone()),
            credited: credited_after,
            transaction: row,
        })
    }

    /// Required fields and amount bounds, checked before touching the store.
    fn check_input(&self, request: &TransferRequest) -> Result<(), InvalidInput> {
        let amount = request.amount();
        match request {
            TransferRequest::AdminTopUp(_) => {
                if !amount.is_positive() {
                    return Err(InvalidInput::NonPositiveAmount(amount));
                }
                if amount <= self.settings.admin_topup_min {
                    return Err(InvalidInput::TopUpTooSmall(
                        amount,
                        self.settings.admin_topup_min,
                    ));
                }
                if amount > self.settings.admin_topup_max {
                    return Err(InvalidInput::TopUpTooLarge(
                        amount,
                        self.settings.admin_topup_max,
                    ));
                }
            }
            TransferRequest::AddMoney(peer)
            | TransferRequest::Withdraw(peer)
            | TransferRequest::SendMoney(peer)
            | TransferRequest::CashIn(peer)
            | TransferRequest::CashOut(peer) => {
                if peer.counterparty_phone.trim().is_empty() {
                    return Err(InvalidInput::MissingCounterparty);
                }
                if !amount.is_positive() {
                    return Err(InvalidInput::NonPositiveAmount(amount));
                }
                if amount < self.settings.min_transfer_amount {
                    return Err(InvalidInput::BelowMinimum(
                        request.kind(),
                        amount,
                        self.settings.min_transfer_amount,
                    ));
                }
            }
        }
        Ok(())
    }

    fn check_initiator(
        unit: &UnitOfWork<'_>,
        id: PrincipalId,
        kind: TransactionKind,
        policy: &KindPolicy,
    ) -> Result<Principal, EngineError> {
        let initiator = unit.principal(id).ok_or(NotFound::Principal(id))?;
        if initiator.status.is_barred() {
            return Err(Forbidden::InitiatorStatus(initiator.status).into());
        }
        if initiator.is_deleted {
            return Err(Forbidden::InitiatorDeleted.into());
        }
        if !policy.allows_initiator(initiator.role) {
            return Err(Forbidden::InitiatorRole(kind, initiator.role).into());
        }
        if initiator.role == Role::Agent && initiator.status == Status::Pending {
            return Err(Forbidden::InitiatorPendingApproval.into());
        }
        Ok(initiator.clone())
    }

    fn check_initiator_wallet(
        unit: &UnitOfWork<'_>,
        initiator: &Principal,
    ) -> Result<Wallet, EngineError> {
        let wallet = unit
            .wallet_of(initiator.id)
            .ok_or(NotFound::Wallet(initiator.id))?;
        if wallet.is_blocked || wallet.is_deleted {
            return Err(Forbidden::InitiatorWalletBlocked.into());
        }
        Ok(wallet.clone())
    }

    fn resolve_counterparty(
        unit: &UnitOfWork<'_>,
        request: &TransferRequest,
    ) -> Result<Principal, NotFound> {
        let counterparty = match request {
            TransferRequest::AdminTopUp(top_up) => unit
                .principal(top_up.target)
                .ok_or(NotFound::Principal(top_up.target))?,
            TransferRequest::AddMoney(peer)
            | TransferRequest::Withdraw(peer)
            | TransferRequest::SendMoney(peer)
            | TransferRequest::CashIn(peer)
            | TransferRequest::CashOut(peer) => {
                let phone = peer.counterparty_phone.trim();
                unit.principal_by_phone(phone)
                    .ok_or_else(|| NotFound::Counterparty(phone.to_string()))?
            }
        };
        Ok(counterparty.clone())
    }

    fn check_counterparty(
        counterparty: &Principal,
        kind: TransactionKind,
        policy: &KindPolicy,
    ) -> Result<(), Forbidden> {
        if let Some(required) = policy.counterparty_role {
            if counterparty.role != required {
                return Err(Forbidden::CounterpartyRole(kind, counterparty.role));
            }
        }
        if counterparty.status.is_barred() {
            return Err(Forbidden::CounterpartyStatus(counterparty.status));
        }
        if counterparty.is_deleted {
            return Err(Forbidden::CounterpartyDeleted);
        }
        // Top-ups may fund an agent still waiting for approval.
        if counterparty.status == Status::Pending && policy.flow != Flow::Mint {
            return Err(Forbidden::CounterpartyPendingApproval);
        }
        Ok(())
    }

    fn check_counterparty_wallet(
        unit: &UnitOfWork<'_>,
        counterparty: &Principal,
    ) -> Result<Wallet, EngineError> {
        let wallet = unit
            .wallet_of(counterparty.id)
            .ok_or(NotFound::Wallet(counterparty.id))?;
        if wallet.is_deleted {
            return Err(Forbidden::CounterpartyWalletDeleted.into());
        }
        if wallet.is_blocked {
            return Err(Forbidden::CounterpartyWalletBlocked.into());
        }
        Ok(wallet.clone())
    }

    fn describe(
        &self,
        request: &TransferRequest,
        counterparty: &Principal,
        amount: Amount,
    ) -> Option<String> {
        let given = request
            .description()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string);
        match request {
            TransferRequest::AdminTopUp(_) => {
                let prefix = given.as_deref().unwrap_or("Admin balance top-up");
                Some(format!(
                    "{prefix} - {amount} {} added to {}'s wallet",
                    self.settings.currency, counterparty.name
                ))
            }
            _ => given,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::ledger::TransactionId;
    use crate::store::{NewAccount, StoreError};

    // test utils

    struct Fixture {
        engine: Engine,
        alice: Principal,
        bob: Principal,
        agent: Principal,
        pending_agent: Principal,
        admin: Principal,
    }

    const ALICE: &str = "01700000001";
    const BOB: &str = "01700000002";
    const AGENT: &str = "01800000001";
    const PENDING_AGENT: &str = "01800000002";
    const ADMIN: &str = "01900000001";

    async fn open(store: &Store, name: &str, phone: &str, role: Role) -> Principal {
        store
            .open_account(NewAccount::new(name, phone, role))
            .await
            .unwrap()
            .0
    }

    /// Wallets start empty; balances are set up with admin top-ups.
    async fn fixture() -> Fixture {
        let settings = Settings {
            initial_wallet_balance: Amount::ZERO,
            ..Settings::default()
        };
        let store = Arc::new(Store::new(&settings));
        let alice = open(&store, "Alice", ALICE, Role::User).await;
        let bob = open(&store, "Bob", BOB, Role::User).await;
        let agent = open(&store, "Agent", AGENT, Role::Agent).await;
        let agent = store.approve_agent(agent.id).await.unwrap().0;
        let pending_agent = open(&store, "Newbie", PENDING_AGENT, Role::Agent).await;
        let admin = open(&store, "Root", ADMIN, Role::Admin).await;
        Fixture {
            engine: Engine::new(store, settings),
            alice,
            bob,
            agent,
            pending_agent,
            admin,
        }
    }

    impl Fixture {
        async fn fund(&self, principal: &Principal, amount: i64) {
            self.engine
                .admin_top_up(TopUp {
                    admin: self.admin.id,
                    target: principal.id,
                    amount: Amount::units(amount),
                    description: None,
                })
                .await
                .unwrap();
        }

        async fn balance(&self, principal: &Principal) -> Amount {
            self.engine
                .store()
                .wallet_of(principal.id)
                .await
                .unwrap()
                .balance
        }

        async fn ledger_len(&self) -> usize {
            self.engine.store().transactions().await.len()
        }
    }

    fn peer(initiator: &Principal, phone: &str, amount: i64) -> PeerTransfer {
        PeerTransfer {
            initiator: initiator.id,
            counterparty_phone: phone.to_string(),
            amount: Amount::units(amount),
            description: None,
        }
    }

    struct FixedIds;

    impl TransactionIds for FixedIds {
        fn next_id(&self) -> TransactionId {
            TransactionId::from("TXN-FIXED")
        }
    }

    // Send money

    #[tokio::test]
    async fn send_money_moves_funds_and_records_one_row() {
        let f = fixture().await;
        f.fund(&f.alice, 100).await;
        f.fund(&f.bob, 50).await;
        let rows_before = f.ledger_len().await;

        let receipt = f.engine.send_money(peer(&f.alice, BOB, 30)).await.unwrap();

        assert_eq!(f.balance(&f.alice).await, Amount::units(70));
        assert_eq!(f.balance(&f.bob).await, Amount::units(80));
        assert_eq!(receipt.debited.balance, Amount::units(70));
        assert_eq!(receipt.credited.balance, Amount::units(80));
        assert_eq!(f.ledger_len().await, rows_before + 1);

        let row = &receipt.transaction;
        assert_eq!(row.transaction_type, TransactionKind::SendMoney);
        assert_eq!(row.amount, Amount::units(30));
        assert_eq!(row.initiated_by, f.alice.id);
        assert_eq!(row.from_wallet, receipt.debited.id);
        assert_eq!(row.to_wallet, receipt.credited.id);
        assert_eq!(row.status, crate::ledger::TransactionStatus::Completed);
    }

    #[tokio::test]
    async fn send_money_exact_balance_succeeds() {
        let f = fixture().await;
        f.fund(&f.alice, 40).await;

        f.engine.send_money(peer(&f.alice, BOB, 40)).await.unwrap();

        assert_eq!(f.balance(&f.alice).await, Amount::ZERO);
        assert_eq!(f.balance(&f.bob).await, Amount::units(40));
    }

    #[tokio::test]
    async fn send_money_keeps_description() {
        let f = fixture().await;
        f.fund(&f.alice, 40).await;
        let mut transfer = peer(&f.alice, BOB, 20);
        transfer.description = Some("  lunch ".to_string());

        let receipt = f.engine.send_money(transfer).await.unwrap();
        assert_eq!(receipt.transaction.description.as_deref(), Some("lunch"));
    }

    // Agent kinds

    #[tokio::test]
    async fn cash_in_with_insufficient_funds_changes_nothing() {
        let f = fixture().await;
        f.fund(&f.agent, 20).await;
        let rows_before = f.ledger_len().await;

        let result = f.engine.cash_in(peer(&f.agent, ALICE, 50)).await;

        assert!(matches!(
            result,
            Err(EngineError::InsufficientFunds { balance, requested, .. })
                if balance == Amount::units(20) && requested == Amount::units(50)
        ));
        assert_eq!(f.balance(&f.agent).await, Amount::units(20));
        assert_eq!(f.balance(&f.alice).await, Amount::ZERO);
        assert_eq!(f.ledger_len().await, rows_before);
    }

    #[tokio::test]
    async fn cash_in_credits_counterparty_from_agent() {
        let f = fixture().await;
        f.fund(&f.agent, 500).await;

        let receipt = f.engine.cash_in(peer(&f.agent, ALICE, 120)).await.unwrap();

        assert_eq!(receipt.debited.owner, f.agent.id);
        assert_eq!(receipt.credited.owner, f.alice.id);
        assert_eq!(f.balance(&f.agent).await, Amount::units(380));
        assert_eq!(f.balance(&f.alice).await, Amount::units(120));
    }

    #[tokio::test]
    async fn cash_out_debits_counterparty_into_agent() {
        let f = fixture().await;
        f.fund(&f.alice, 100).await;

        let receipt = f.engine.cash_out(peer(&f.agent, ALICE, 60)).await.unwrap();

        assert_eq!(receipt.debited.owner, f.alice.id);
        assert_eq!(receipt.credited.owner, f.agent.id);
        assert_eq!(receipt.transaction.transaction_type, TransactionKind::CashOut);
        assert_eq!(f.balance(&f.alice).await, Amount::units(40));
        assert_eq!(f.balance(&f.agent).await, Amount::units(60));
    }

    #[tokio::test]
    async fn pending_agent_cannot_cash_out() {
        let f = fixture().await;
        f.fund(&f.alice, 100).await;

        let result = f.engine.cash_out(peer(&f.pending_agent, ALICE, 10)).await;

        assert_eq!(
            result,
            Err(EngineError::Forbidden(Forbidden::InitiatorPendingApproval))
        );
        assert!(result.unwrap_err().to_string().contains("pending approval"));
        assert_eq!(f.balance(&f.alice).await, Amount::units(100));
    }

    #[tokio::test]
    async fn users_cannot_cash_in_or_out() {
        let f = fixture().await;
        f.fund(&f.alice, 100).await;

        assert_eq!(
            f.engine.cash_in(peer(&f.alice, BOB, 10)).await,
            Err(EngineError::Forbidden(Forbidden::InitiatorRole(
                TransactionKind::CashIn,
                Role::User
            )))
        );
        assert_eq!(
            f.engine.cash_out(peer(&f.alice, BOB, 10)).await,
            Err(EngineError::Forbidden(Forbidden::InitiatorRole(
                TransactionKind::CashOut,
                Role::User
            )))
        );
    }

    // Add money / withdraw

    #[tokio::test]
    async fn add_money_debits_agent_and_credits_initiator() {
        let f = fixture().await;
        f.fund(&f.agent, 200).await;

        let receipt = f.engine.add_money(peer(&f.alice, AGENT, 75)).await.unwrap();

        assert_eq!(receipt.debited.owner, f.agent.id);
        assert_eq!(receipt.credited.owner, f.alice.id);
        assert_eq!(receipt.transaction.initiated_by, f.alice.id);
        assert_eq!(f.balance(&f.agent).await, Amount::units(125));
        assert_eq!(f.balance(&f.alice).await, Amount::units(75));
    }

    #[tokio::test]
    async fn withdraw_debits_initiator_and_credits_agent() {
        let f = fixture().await;
        f.fund(&f.alice, 200).await;

        let receipt = f.engine.withdraw(peer(&f.alice, AGENT, 50)).await.unwrap();

        assert_eq!(receipt.transaction.transaction_type, TransactionKind::Withdraw);
        assert_eq!(f.balance(&f.alice).await, Amount::units(150));
        assert_eq!(f.balance(&f.agent).await, Amount::units(50));
    }

    #[tokio::test]
    async fn add_money_and_withdraw_require_agent_counterparty() {
        let f = fixture().await;
        f.fund(&f.alice, 100).await;
        f.fund(&f.bob, 100).await;

        assert_eq!(
            f.engine.add_money(peer(&f.alice, BOB, 10)).await,
            Err(EngineError::Forbidden(Forbidden::CounterpartyRole(
                TransactionKind::AddMoney,
                Role::User
            )))
        );
        assert_eq!(
            f.engine.withdraw(peer(&f.alice, BOB, 10)).await,
            Err(EngineError::Forbidden(Forbidden::CounterpartyRole(
                TransactionKind::Withdraw,
                Role::User
            )))
        );
    }

    #[tokio::test]
    async fn pending_agent_cannot_be_counterparty() {
        let f = fixture().await;
        f.fund(&f.alice, 100).await;

        assert_eq!(
            f.engine.withdraw(peer(&f.alice, PENDING_AGENT, 10)).await,
            Err(EngineError::Forbidden(Forbidden::CounterpartyPendingApproval))
        );
        assert_eq!(f.balance(&f.alice).await, Amount::units(100));
    }

    #[tokio::test]
    async fn rejected_agent_transacts_as_user() {
        let f = fixture().await;
        f.engine
            .store()
            .reject_agent(f.pending_agent.id)
            .await
            .unwrap();
        f.fund(&f.pending_agent, 50).await;

        f.engine
            .send_money(peer(&f.pending_agent, ALICE, 20))
            .await
            .unwrap();
        assert_eq!(f.balance(&f.alice).await, Amount::units(20));
        assert_eq!(
            f.engine.cash_in(peer(&f.pending_agent, ALICE, 10)).await,
            Err(EngineError::Forbidden(Forbidden::InitiatorRole(
                TransactionKind::CashIn,
                Role::User
            )))
        );
    }

    // Admin top-up

    #[tokio::test]
    async fn admin_top_up_mints_into_target() {
        let f = fixture().await;
        let receipt = f
            .engine
            .admin_top_up(TopUp {
                admin: f.admin.id,
                target: f.bob.id,
                amount: Amount::units(250),
                description: None,
            })
            .await
            .unwrap();

        assert_eq!(f.balance(&f.bob).await, Amount::units(250));
        assert_eq!(receipt.debited, receipt.credited);
        let row = &receipt.transaction;
        assert_eq!(row.transaction_type, TransactionKind::AdminTopup);
        assert_eq!(row.from_wallet, row.to_wallet);
        assert_eq!(row.initiated_by, f.admin.id);
        assert_eq!(
            row.description.as_deref(),
            Some("Admin balance top-up - 250.0000 BDT added to Bob's wallet")
        );
    }

    #[tokio::test]
    async fn admin_top_up_keeps_caller_prefix() {
        let f = fixture().await;
        let receipt = f
            .engine
            .admin_top_up(TopUp {
                admin: f.admin.id,
                target: f.alice.id,
                amount: Amount::units(40),
                description: Some("Bonus".to_string()),
            })
            .await
            .unwrap();

        assert_eq!(
            receipt.transaction.description.as_deref(),
            Some("Bonus - 40.0000 BDT added to Alice's wallet")
        );
    }

    #[tokio::test]
    async fn admin_top_up_reaches_pending_agent() {
        let f = fixture().await;
        let receipt = f
            .engine
            .admin_top_up(TopUp {
                admin: f.admin.id,
                target: f.pending_agent.id,
                amount: Amount::units(100),
                description: None,
            })
            .await
            .unwrap();

        assert_eq!(receipt.credited.owner, f.pending_agent.id);
        assert_eq!(f.balance(&f.pending_agent).await, Amount::units(100));

        // The agent itself still can't transact until approved.
        assert_eq!(
            f.engine.cash_in(peer(&f.pending_agent, ALICE, 10)).await,
            Err(EngineError::Forbidden(Forbidden::InitiatorPendingApproval))
        );
    }

    #[tokio::test]
    async fn admin_top_up_skips_suspended_target() {
        let f = fixture().await;
        f.engine.store().suspend_agent(f.agent.id).await.unwrap();

        let result = f
            .engine
            .admin_top_up(TopUp {
                admin: f.admin.id,
                target: f.agent.id,
                amount: Amount::units(100),
                description: None,
            })
            .await;
        assert_eq!(
            result,
            Err(EngineError::Forbidden(Forbidden::CounterpartyStatus(
                Status::Suspended
            )))
        );
    }

    #[tokio::test]
    async fn admin_top_up_over_maximum_is_rejected_before_mutation() {
        let f = fixture().await;
        let result = f
            .engine
            .admin_top_up(TopUp {
                admin: f.admin.id,
                target: f.alice.id,
                amount: Amount::units(200_000),
                description: None,
            })
            .await;

        assert_eq!(
            result,
            Err(EngineError::InvalidInput(InvalidInput::TopUpTooLarge(
                Amount::units(200_000),
                Amount::units(100_000)
            )))
        );
        assert_eq!(f.balance(&f.alice).await, Amount::ZERO);
        assert_eq!(f.ledger_len().await, 0);
    }

    #[tokio::test]
    async fn admin_top_up_minimum_is_exclusive() {
        let f = fixture().await;
        let top_up = |amount| TopUp {
            admin: f.admin.id,
            target: f.alice.id,
            amount: Amount::units(amount),
            description: None,
        };

        assert!(matches!(
            f.engine.admin_top_up(top_up(10)).await,
            Err(EngineError::InvalidInput(InvalidInput::TopUpTooSmall(..)))
        ));
        assert!(f.engine.admin_top_up(top_up(11)).await.is_ok());
        assert!(f.engine.admin_top_up(top_up(100_000)).await.is_ok());
    }

    #[tokio::test]
    async fn only_admins_top_up() {
        let f = fixture().await;
        let result = f
            .engine
            .admin_top_up(TopUp {
                admin: f.agent.id,
                target: f.alice.id,
                amount: Amount::units(50),
                description: None,
            })
            .await;

        assert_eq!(
            result,
            Err(EngineError::Forbidden(Forbidden::InitiatorRole(
                TransactionKind::AdminTopup,
                Role::Agent
            )))
        );
    }

    // Self transfers

    #[tokio::test]
    async fn self_transfer_is_forbidden_for_every_kind() {
        let f = fixture().await;
        f.fund(&f.agent, 1_000).await;

        let requests = [
            TransferRequest::AddMoney(peer(&f.agent, AGENT, 10)),
            TransferRequest::Withdraw(peer(&f.agent, AGENT, 10)),
            TransferRequest::SendMoney(peer(&f.agent, AGENT, 10)),
            TransferRequest::CashIn(peer(&f.agent, AGENT, 10)),
            TransferRequest::CashOut(peer(&f.agent, AGENT, 10)),
            TransferRequest::AdminTopUp(TopUp {
                admin: f.admin.id,
                target: f.admin.id,
                amount: Amount::units(50),
                description: None,
            }),
        ];
        for request in requests {
            let kind = request.kind();
            assert_eq!(
                f.engine.execute(request).await,
                Err(EngineError::Forbidden(Forbidden::SelfTransfer)),
                "{kind}"
            );
        }
        assert_eq!(f.balance(&f.agent).await, Amount::units(1_000));
    }

    // Input checks

    #[tokio::test]
    async fn input_errors_are_reported_first() {
        let f = fixture().await;

        assert_eq!(
            f.engine.send_money(peer(&f.alice, "  ", 10)).await,
            Err(EngineError::InvalidInput(InvalidInput::MissingCounterparty))
        );
        assert_eq!(
            f.engine.send_money(peer(&f.alice, BOB, 0)).await,
            Err(EngineError::InvalidInput(InvalidInput::NonPositiveAmount(
                Amount::ZERO
            )))
        );
        assert_eq!(
            f.engine.send_money(peer(&f.alice, BOB, -5)).await,
            Err(EngineError::InvalidInput(InvalidInput::NonPositiveAmount(
                Amount::units(-5)
            )))
        );
        assert_eq!(
            f.engine.send_money(peer(&f.alice, BOB, 4)).await,
            Err(EngineError::InvalidInput(InvalidInput::BelowMinimum(
                TransactionKind::SendMoney,
                Amount::units(4),
                Amount::units(5)
            )))
        );
    }

    #[tokio::test]
    async fn unknown_principals_are_not_found() {
        let f = fixture().await;

        assert_eq!(
            f.engine.send_money(peer(&f.alice, "01000000000", 10)).await,
            Err(EngineError::NotFound(NotFound::Counterparty(
                "01000000000".to_string()
            )))
        );

        let mut ghost = f.alice.clone();
        ghost.id = 999;
        assert_eq!(
            f.engine.send_money(peer(&ghost, BOB, 10)).await,
            Err(EngineError::NotFound(NotFound::Principal(999)))
        );
    }

    #[tokio::test]
    async fn admin_counterparty_has_no_wallet() {
        let f = fixture().await;
        f.fund(&f.alice, 100).await;

        assert_eq!(
            f.engine.send_money(peer(&f.alice, ADMIN, 10)).await,
            Err(EngineError::NotFound(NotFound::Wallet(f.admin.id)))
        );
    }

    // Status checks

    #[tokio::test]
    async fn blocked_initiator_is_forbidden() {
        let f = fixture().await;
        f.fund(&f.alice, 100).await;
        f.engine.store().block_user(f.alice.id).await.unwrap();

        let result = f.engine.send_money(peer(&f.alice, BOB, 10)).await;
        assert_eq!(
            result,
            Err(EngineError::Forbidden(Forbidden::InitiatorStatus(
                Status::Blocked
            )))
        );
        assert!(result.unwrap_err().to_string().contains("BLOCKED"));
    }

    #[tokio::test]
    async fn suspended_or_deleted_counterparty_is_forbidden() {
        let f = fixture().await;
        f.fund(&f.alice, 100).await;
        f.engine.store().suspend_agent(f.agent.id).await.unwrap();
        f.engine.store().delete_account(f.bob.id).await.unwrap();

        assert_eq!(
            f.engine.withdraw(peer(&f.alice, AGENT, 10)).await,
            Err(EngineError::Forbidden(Forbidden::CounterpartyStatus(
                Status::Suspended
            )))
        );
        assert_eq!(
            f.engine.send_money(peer(&f.alice, BOB, 10)).await,
            Err(EngineError::Forbidden(Forbidden::CounterpartyStatus(
                Status::Suspended
            )))
        );
        assert_eq!(f.balance(&f.alice).await, Amount::units(100));
    }

    #[tokio::test]
    async fn blocked_wallets_reject_both_directions() {
        let f = fixture().await;
        f.fund(&f.alice, 100).await;
        f.fund(&f.bob, 100).await;

        // Block Bob's wallet only, leaving his account active.
        let store = f.engine.store();
        let bob_wallet = store.wallet_of(f.bob.id).await.unwrap();
        let mut unit = store.begin().await.unwrap();
        unit.set_blocked(&bob_wallet.id, true).unwrap();
        unit.commit();

        assert_eq!(
            f.engine.send_money(peer(&f.alice, BOB, 10)).await,
            Err(EngineError::Forbidden(Forbidden::CounterpartyWalletBlocked))
        );
        assert_eq!(
            f.engine.send_money(peer(&f.bob, ALICE, 10)).await,
            Err(EngineError::Forbidden(Forbidden::InitiatorWalletBlocked))
        );
    }

    #[tokio::test]
    async fn approved_agent_can_transact_again_after_suspension_lifted() {
        let f = fixture().await;
        f.fund(&f.agent, 100).await;
        f.engine.store().suspend_agent(f.agent.id).await.unwrap();
        assert!(matches!(
            f.engine.cash_in(peer(&f.agent, ALICE, 10)).await,
            Err(EngineError::Forbidden(Forbidden::InitiatorStatus(
                Status::Suspended
            )))
        ));

        f.engine.store().approve_agent(f.agent.id).await.unwrap();
        f.engine.cash_in(peer(&f.agent, ALICE, 10)).await.unwrap();
        assert_eq!(f.balance(&f.alice).await, Amount::units(10));
    }

    // Atomicity and identity

    #[tokio::test]
    async fn failed_ledger_append_rolls_back_both_wallets() {
        let f = fixture().await;
        f.fund(&f.alice, 100).await;
        let fixed = f.engine.clone().with_transaction_ids(FixedIds);

        fixed.send_money(peer(&f.alice, BOB, 10)).await.unwrap();
        let rows_before = f.ledger_len().await;

        let result = fixed.send_money(peer(&f.alice, BOB, 20)).await;

        assert_eq!(
            result,
            Err(EngineError::Storage(StoreError::DuplicateTransactionId(
                TransactionId::from("TXN-FIXED")
            )))
        );
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Conflict);
        assert_eq!(f.balance(&f.alice).await, Amount::units(90));
        assert_eq!(f.balance(&f.bob).await, Amount::units(10));
        assert_eq!(f.ledger_len().await, rows_before);
    }

    #[tokio::test]
    async fn every_transfer_gets_a_fresh_transaction_id() {
        let f = fixture().await;
        f.fund(&f.alice, 1_000).await;
        for _ in 0..10 {
            f.engine.send_money(peer(&f.alice, BOB, 10)).await.unwrap();
        }

        let rows = f.engine.store().transactions().await;
        let ids: HashSet<_> = rows.iter().map(|r| r.transaction_id.clone()).collect();
        assert_eq!(ids.len(), rows.len());
        assert_eq!(rows.len(), 11);
    }

    // History

    #[tokio::test]
    async fn history_lists_rows_on_either_side() {
        let f = fixture().await;
        f.fund(&f.alice, 100).await;
        f.engine.send_money(peer(&f.alice, BOB, 10)).await.unwrap();
        f.engine.send_money(peer(&f.alice, BOB, 10)).await.unwrap();

        assert_eq!(f.engine.history(f.alice.id).await.unwrap().len(), 3);
        assert_eq!(f.engine.history(f.bob.id).await.unwrap().len(), 2);
        assert_eq!(
            f.engine.history(f.admin.id).await,
            Err(EngineError::NotFound(NotFound::Wallet(f.admin.id)))
        );

        f.engine.store().block_user(f.bob.id).await.unwrap();
        assert!(matches!(
            f.engine.history(f.bob.id).await,
            Err(EngineError::Forbidden(_))
        ));
    }

    //  Async run()

    #[tokio::test]
    async fn run_skips_failed_requests_and_continues() {
        let f = fixture().await;
        f.fund(&f.alice, 100).await;
        let requests = vec![
            TransferRequest::SendMoney(peer(&f.alice, BOB, 30)),
            TransferRequest::SendMoney(peer(&f.alice, BOB, 500)), // insufficient funds
            TransferRequest::CashIn(peer(&f.alice, BOB, 10)),     // wrong role
            TransferRequest::SendMoney(peer(&f.bob, ALICE, 10)),
        ];

        f.engine.run(tokio_stream::iter(requests)).await;

        assert_eq!(f.balance(&f.alice).await, Amount::units(80));
        assert_eq!(f.balance(&f.bob).await, Amount::units(20));
    }
}
