mod init;
mod macros;
mod trace_id;

pub use init::{init_tracing, warn_if_slow};
pub use macros::{annotate_span, child_span, root_span};
pub use trace_id::TraceId;
