//! # api-relay
//!
//! An identifier-keyed HTTP request dispatcher for component ecosystems:
//! - submit logical requests carrying caller-chosen identifiers
//! - every in-flight exchange is tracked in a registry and can be cancelled
//!   cooperatively by identifier
//! - each exchange settles exactly once and is republished as a single
//!   normalized outcome event, for every terminal state including abort
//! - proxy URL rewriting, appended-header merging, multipart bodies, and
//!   negotiated response body handling (text/JSON/markup/binary)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use api_relay::{Dispatcher, DispatcherConfig, DispatcherEvent, RequestDescription, ResponseKind};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (dispatcher, mut events) = Dispatcher::new(DispatcherConfig::default())?;
//!
//!     dispatcher.submit(
//!         RequestDescription::new("r1", "https://api.domain.com/items")
//!             .response_kind(ResponseKind::Json),
//!     )?;
//!
//!     while let Some(event) = events.recv().await {
//!         if let DispatcherEvent::Response(outcome) = event {
//!             println!("{}: status {}", outcome.id, outcome.response.status);
//!             break;
//!         }
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

// Re-export commonly used types
pub use config::DispatcherConfig;
pub use dispatch::{Dispatcher, DispatcherEvent, RequestOutcome, ResponseRecord};
pub use error::{Error, Result};
pub use request::{FormPart, FormValue, Payload, RequestDescription, ResponseKind};
pub use transport::{
    AbortHandle, Completion, ExchangeReport, ExchangeState, Progress, ResponseBody,
    Transport, status_is_success,
};

// Module declarations
pub mod config;
pub mod dispatch;
pub mod error;
pub mod headers;
pub mod request;
pub mod transport;

/// Prelude module for common imports
///
/// # Examples
///
/// ```rust
/// use api_relay::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        Dispatcher, DispatcherConfig, DispatcherEvent, Error, Payload,
        RequestDescription, RequestOutcome, ResponseKind, Result,
    };
}

/// Crate version, automatically updated from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, env!("CARGO_PKG_VERSION"));
    }
}
