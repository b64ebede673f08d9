//! Transactions and timestamp issuance.
//!
//! Tessera offers four isolation levels:
//! - **Unisolated**: no transaction object; tasks write the live indices
//! - **Read-committed**: every resolution follows the latest commit
//! - **Read-only**: the state as of one historical commit, forever
//! - **Read-write**: a private write set over the last commit, validated
//!   against concurrent commits and merged into the live indices at commit

mod manager;
mod state;
mod timestamps;

pub use manager::TransactionManager;
pub use state::{Tx, TxState};
pub use timestamps::TimestampService;
