pub mod carrier;
pub mod classify;
pub mod journal;
pub mod orchestrator;
pub mod types;

pub use carrier::{CarrierGateway, HttpCarrierGateway};
pub use classify::{CarrierVerdict, classify};
pub use journal::{JournalEntry, NoopJournal, SqlxSubmissionJournal, SubmissionJournal};
pub use orchestrator::SubmissionOrchestrator;
pub use types::{Manifest, SubmissionReceipt, SubmitOptions};
