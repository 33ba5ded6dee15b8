//! Tasks for the usual lifetime value flow: read transactions, summarise
//! them per customer, then value each customer.
//!
//! ```text
//! CsvRead --transactions--> Rfm --rfm-summary--> Ltv
//! ```

mod csv;
mod ltv;
mod rfm;

use crate::engine::Capability;

pub use self::csv::{ColumnMap, CsvRead};
pub use self::ltv::Ltv;
pub use self::rfm::{Period, Rfm};

/// Provided by tasks which output one row per transaction with the columns
/// `id`, `date` and `monetary`.
pub const TRANSACTIONS: &str = "transactions";

/// Provided by tasks which output one row per customer with the columns
/// `id`, `frequency`, `recency`, `T` and `monetary_value`.
pub const RFM_SUMMARY: &str = "rfm-summary";

pub fn transactions() -> Capability {
    Capability::tag(TRANSACTIONS)
}

pub fn rfm_summary() -> Capability {
    Capability::tag(RFM_SUMMARY)
}
