//! Local store of recent execution errors.
//!
//! Every recorded error is kept (up to a fixed capacity, oldest evicted
//! first) and tagged with a content-derived fingerprint so recurring
//! failures can be grouped, ranked and alerted on.

mod classify;
mod fingerprint;
mod models;
mod store;

pub use classify::{classify_severity, is_recoverable};
pub use fingerprint::fingerprint;
pub use models::{
    ErrorAlert, ErrorAnalysis, ErrorContext, ErrorQuery, FingerprintCount, SystemError,
};
pub use store::ErrorStore;
