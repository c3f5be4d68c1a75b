use std::env;
use std::io;
use std::process::ExitCode;
use std::sync::Arc;

use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use wallet_ledger::csv::{AccountRow, CsvError, read_accounts, read_transfers, write_wallets};
use wallet_ledger::directory::Principal;
use wallet_ledger::store::AccountError;
use wallet_ledger::{Engine, PrincipalId, Role, Settings, Status, Store};

const USAGE: &str = "usage: wallet-ledger <accounts.csv> <transfers.csv>";

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let mut args = env::args().skip(1);
    let (Some(accounts_path), Some(transfers_path)) = (args.next(), args.next()) else {
        eprintln!("{USAGE}");
        return ExitCode::from(2);
    };
    for path in [&accounts_path, &transfers_path] {
        if !path.ends_with(".csv") {
            warn!(path, "input file seems to not be a csv file");
        }
    }

    let settings = match Settings::new() {
        Ok(settings) => settings,
        Err(e) => {
            error!("invalid settings: {e}");
            return ExitCode::FAILURE;
        }
    };
    let store = Arc::new(Store::new(&settings));

    if let Err(e) = seed_accounts(&store, &accounts_path).await {
        error!("{e}");
        return ExitCode::FAILURE;
    }

    let transfers = match read_transfers(transfers_path) {
        Ok(transfers) => transfers,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let engine = Engine::new(Arc::clone(&store), settings);
    let (request_sender, request_receiver) = tokio::sync::mpsc::channel(16);

    tokio::spawn(async move {
        for result in transfers {
            match result {
                Ok(request) => {
                    if request_sender.send(request).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("{e}");
                }
            }
        }
    });

    engine.run(ReceiverStream::new(request_receiver)).await;

    let overview = store.overview().await;
    info!(
        users = overview.total_users,
        agents = overview.total_agents,
        transactions = overview.transaction_count,
        volume = %overview.transaction_volume,
        "batch finished"
    );

    let mut rows = Vec::new();
    for wallet in store.wallets().await {
        let phone = store
            .principal(wallet.owner)
            .await
            .map(|p| p.phone)
            .unwrap_or_default();
        rows.push((wallet, phone));
    }
    let stdout = io::stdout();
    if let Err(e) = write_wallets(stdout.lock(), rows.iter().map(|(w, p)| (w, p.as_str()))) {
        error!("{e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

/// Open every account in the file, then move it to its listed status.
/// Bad rows are logged and skipped.
async fn seed_accounts(store: &Store, path: &str) -> Result<(), CsvError> {
    for result in read_accounts(path)? {
        let AccountRow { account, status } = match result {
            Ok(row) => row,
            Err(e) => {
                warn!("{e}");
                continue;
            }
        };
        let phone = account.phone.clone();
        let outcome = match store.open_account(account).await {
            Ok((principal, _)) => apply_status(store, principal.id, principal.role, status).await,
            Err(e) => Err(e),
        };
        if let Err(e) = outcome {
            warn!(phone, "account not seeded: {e}");
        }
    }
    Ok(())
}

async fn apply_status(
    store: &Store,
    id: PrincipalId,
    role: Role,
    status: Option<Status>,
) -> Result<(), AccountError> {
    match (role, status) {
        (Role::Agent, Some(Status::Active)) => store.approve_agent(id).await.map(drop),
        (Role::Agent, Some(Status::Suspended)) => store.suspend_agent(id).await.map(drop),
        (Role::User, Some(Status::Blocked)) => store.block_user(id).await.map(drop),
        (_, None) => Ok(()),
        (role, Some(status)) => {
            if status != Principal::initial_status(role) {
                warn!(principal = id, %role, %status, "status not applicable, left as is");
            }
            Ok(())
        }
    }
}
