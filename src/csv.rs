use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use thiserror::Error;

use crate::store::NewAccount;
use crate::wallet::Wallet;
use crate::{Amount, PeerTransfer, PrincipalId, Role, Status, TopUp, TransferRequest};

/// Errors that can occur when reading or writing csv files
#[derive(Debug, Error)]
pub enum CsvError {
    #[error("failed to open {path}: {source}")]
    Open { path: String, source: csv::Error },

    #[error("line {line}: failed to parse row: {source}")]
    Parse { line: usize, source: csv::Error },

    #[error("line {line}: unrecognized transaction type '{tx_type}'")]
    UnrecognizedType { line: usize, tx_type: String },

    #[error("line {line}: unrecognized role '{role}'")]
    UnrecognizedRole { line: usize, role: String },

    #[error("line {line}: unrecognized status '{status}'")]
    UnrecognizedStatus { line: usize, status: String },

    #[error("line {line}: {tx_type} missing amount")]
    MissingAmount { line: usize, tx_type: String },

    #[error("line {line}: admin_topup target '{target}' is not an account id")]
    InvalidTarget { line: usize, target: String },

    #[error("failed to write output: {0}")]
    Write(#[from] csv::Error),

    #[error("failed to flush output: {0}")]
    Flush(#[from] io::Error),
}

/// An account to seed, with the status it should end up in.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountRow {
    pub account: NewAccount,
    pub status: Option<Status>,
}

#[derive(Debug, Deserialize)]
struct AccountInput {
    name: String,
    phone: String,
    role: String,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TransferInput {
    r#type: String,
    initiator: PrincipalId,
    counterparty: String,
    amount: Option<f64>,
    description: Option<String>,
}

#[derive(Debug, Serialize)]
struct OutputRow<'a> {
    owner: PrincipalId,
    phone: &'a str,
    balance: String,
    currency: &'static str,
    blocked: bool,
}

fn open(path: &Path) -> Result<csv::Reader<std::fs::File>, CsvError> {
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)
        .map_err(|source| CsvError::Open {
            path: path.display().to_string(),
            source,
        })
}

fn parse_role(line: usize, role: &str) -> Result<Role, CsvError> {
    match role.to_ascii_lowercase().as_str() {
        "user" => Ok(Role::User),
        "agent" => Ok(Role::Agent),
        "admin" => Ok(Role::Admin),
        _ => Err(CsvError::UnrecognizedRole {
            line,
            role: role.to_string(),
        }),
    }
}

fn parse_status(line: usize, status: &str) -> Result<Status, CsvError> {
    match status.to_ascii_lowercase().as_str() {
        "active" => Ok(Status::Active),
        "pending" => Ok(Status::Pending),
        "blocked" => Ok(Status::Blocked),
        "suspended" => Ok(Status::Suspended),
        _ => Err(CsvError::UnrecognizedStatus {
            line,
            status: status.to_string(),
        }),
    }
}

/// Read accounts to seed from a csv file
pub fn read_accounts(
    path: impl AsRef<Path>,
) -> Result<impl Iterator<Item = Result<AccountRow, CsvError>>, CsvError> {
    let reader = open(path.as_ref())?;

    Ok(reader
        .into_deserialize::<AccountInput>()
        .enumerate()
        .map(|(idx, result)| {
            let line = idx + 2; // 1-indexed, skip header
            let row = result.map_err(|source| CsvError::Parse { line, source })?;
            let role = parse_role(line, &row.role)?;
            let status = match row.status.as_deref() {
                None | Some("") => None,
                Some(status) => Some(parse_status(line, status)?),
            };
            Ok(AccountRow {
                account: NewAccount::new(row.name, row.phone, role),
                status,
            })
        }))
}

/// Read transfer requests from a csv file
pub fn read_transfers(
    path: impl AsRef<Path>,
) -> Result<impl Iterator<Item = Result<TransferRequest, CsvError>>, CsvError> {
    let reader = open(path.as_ref())?;

    Ok(reader
        .into_deserialize::<TransferInput>()
        .enumerate()
        .map(|(idx, result)| {
            let line = idx + 2; // 1-indexed, skip header
            let row = result.map_err(|source| CsvError::Parse { line, source })?;
            let tx_type = row.r#type.to_ascii_lowercase();
            let amount = row
                .amount
                .map(Amount::from_float)
                .ok_or_else(|| CsvError::MissingAmount {
                    line,
                    tx_type: tx_type.clone(),
                })?;
            let description = row.description.filter(|d| !d.is_empty());

            if tx_type == "admin_topup" {
                let target = row
                    .counterparty
                    .parse()
                    .map_err(|_| CsvError::InvalidTarget {
                        line,
                        target: row.counterparty.clone(),
                    })?;
                return Ok(TransferRequest::AdminTopUp(TopUp {
                    admin: row.initiator,
                    target,
                    amount,
                    description,
                }));
            }

            let peer = PeerTransfer {
                initiator: row.initiator,
                counterparty_phone: row.counterparty,
                amount,
                description,
            };
            match tx_type.as_str() {
                "add_money" => Ok(TransferRequest::AddMoney(peer)),
                "withdraw" => Ok(TransferRequest::Withdraw(peer)),
                "send_money" => Ok(TransferRequest::SendMoney(peer)),
                "cash_in" => Ok(TransferRequest::CashIn(peer)),
                "cash_out" => Ok(TransferRequest::CashOut(peer)),
                _ => Err(CsvError::UnrecognizedType {
                    line,
                    tx_type: row.r#type,
                }),
            }
        }))
}

/// Write wallets with their owner's phone number in csv format
pub fn write_wallets<'a>(
    writer: impl io::Write,
    wallets: impl IntoIterator<Item = (&'a Wallet, &'a str)>,
) -> Result<(), CsvError> {
    let mut writer = csv::Writer::from_writer(writer);

    for (wallet, phone) in wallets {
        let row = OutputRow {
            owner: wallet.owner,
            phone,
            balance: wallet.balance.to_string(),
            currency: wallet.currency.code(),
            blocked: wallet.is_blocked,
        };
        writer.serialize(&row)?;
    }

    writer.flush()?;
    Ok(())
}
