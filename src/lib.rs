pub mod amount;
pub mod config;
pub mod csv;
pub mod directory;
pub mod engine;
pub mod ledger;
pub mod model;
pub mod store;
pub mod wallet;

pub use amount::Amount;
pub use config::Settings;
pub use engine::{Engine, EngineError, ErrorKind, TransferReceipt};
pub use model::{PeerTransfer, PrincipalId, Role, Status, TopUp, TransactionKind, TransferRequest};
pub use store::Store;
