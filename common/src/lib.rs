//! Small pieces shared by every crate in this workspace: the `failure`-based
//! error type used everywhere instead of `std::error::Error` boilerplate,
//! and the single-threaded cancellation primitive actions are torn down
//! with.

pub mod cancellation;
pub mod errors;

pub use cancellation::CancellationToken;
pub use errors::{Error, Result};
