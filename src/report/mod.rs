//! Test result reporting
//!
//! The device renders results with a [`TestReporter`]; the host only sees
//! the resulting text, which [`ResultTally`] counts as it is relayed.

mod reporter;
mod summary;
mod tally;

pub use reporter::{DefaultTestReporter, TestKind, TestOutcome, TestReporter, TestStatus};
pub use summary::{RunOutcome, RunSummary};
pub use tally::ResultTally;
