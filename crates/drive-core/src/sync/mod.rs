//! Reconciliation, dispatch and the monitor loop

mod dispatcher;
mod monitor;
mod reconciler;
mod report;

pub use dispatcher::Dispatcher;
pub use monitor::{Engine, Monitor};
pub use reconciler::{Outcome, PathState, Reconciled, Reconciler};
pub use report::SyncReport;
