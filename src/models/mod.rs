pub mod context;
pub mod event;
pub mod trace_error;

pub use context::*;
pub use event::*;
pub use trace_error::*;
