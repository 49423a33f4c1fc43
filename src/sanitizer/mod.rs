//! Payload sanitization applied before anything leaves the process.
//!
//! Inputs and results of traced work are converted into a [`Payload`] and
//! passed through a [`Sanitizer`], which applies, in order:
//!
//! 1. the capture toggle for the payload kind (request or response),
//! 2. serialization, mapping failures to an explicit marker object,
//! 3. redaction of values under sensitive keys at any depth,
//! 4. truncation of payloads whose serialized size exceeds the limit.
//!
//! Sanitization is a pure function of the input and the configuration and
//! never returns an error.

mod payload;
mod redaction;

pub use payload::{Payload, Primitive};
pub use redaction::{CaptureKind, Sanitized, Sanitizer, REDACTED_MARKER};
