//! # ratewarden-core
//!
//! Shared vocabulary for the rate-limit fallback engine: opaque IDs, the
//! `ModelRef` identity, the host-delivered `Event` union, the unified error
//! type, the `HostAdapter` trait the engine consumes, and the `Clock`
//! abstraction used for deterministic time-based tests.

pub mod clock;
pub mod error;
pub mod event;
pub mod host;
pub mod types;

pub use clock::{Clock, SystemClock, TestClock};
pub use error::{Result, RwError};
pub use event::{Event, SessionStatus};
pub use host::{HostAdapter, HostStatusReporter, StatusReporter};
pub use types::*;
