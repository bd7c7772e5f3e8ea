pub mod comparator;
pub mod digest;
pub mod engine;
pub mod selector;
pub mod transfer;

pub use comparator::{reconcile, ActionSummary, Direction, TransferDirective, TransferReason};
pub use digest::{calculate_hash, HashAlgorithm};
pub use engine::{SyncConfig, SyncEngine, SyncReport};
pub use selector::{select, Selection};
pub use transfer::{TransferExecutor, TransferOutcome};
