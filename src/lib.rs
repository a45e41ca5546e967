//! hostsync - conflict-aware, backed-up editing of the system hosts file.

pub mod backup;
pub mod classify;
pub mod cli;
pub mod config;
pub mod doctor;
pub mod error;
pub mod hosts;
pub mod logging;
pub mod model;
pub mod parser;
pub mod platform;
pub mod reconcile;
pub mod store;
pub mod writer;

pub use error::{ReadError, SaveError};
pub use hosts::{HostsFile, SaveOutcome};
pub use model::{EntryId, HostEntry, Snapshot};
