pub mod ledger;
pub mod model;

pub use ledger::BidLedger;
