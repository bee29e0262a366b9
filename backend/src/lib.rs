pub mod config;
pub mod db;
pub mod metrics;
pub mod pool;
pub mod service;
pub mod submission;

pub mod error;
pub mod time;

pub use error::{PoolError, SubmitError};
pub use service::WaybillService;
