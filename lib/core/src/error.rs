//! Error handling foundation for aichat.
//!
//! Only the `Result` alias lives here. Each crate defines its own error
//! enums next to the code that raises them, and the service layer wraps
//! lower-level failures with `.context()` as they propagate.

use rootcause::Report;

/// A Result type alias using rootcause's Report for error handling.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;
