//! Portfolio ledger: capital, positions, history and drawdown.

mod ledger;

pub use ledger::{LedgerError, OpenRequest, PortfolioLedger};
