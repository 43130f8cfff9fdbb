pub mod asset;
pub mod classify;
pub mod cli;
pub mod config;
pub mod fingerprint;
pub mod index;
mod metrics;
pub mod scanner;
mod server;
pub mod store;
pub mod utils;

pub use asset::{AssetRef, AssetSource, Authorization, Authorizer};
pub use classify::{Classifier, Group, GroupTable};
pub use config::{Opts, ScannerConfig};
pub use fingerprint::{Fingerprint, FingerprintAlgo, Fingerprinter};
pub use index::{GroupIndex, ScanCursor};
pub use scanner::{Progress, Scanner, ScannerBuilder, StartOutcome};
pub use store::{FileStore, StateStore};
