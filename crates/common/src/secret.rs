//! Secret types for connection strings and credentials.
//!
//! Re-exports [`secrecy`] so that configuration structs can hold values such as
//! the document-store URL (which may embed a password) without leaking them
//! through `Debug` or tracing fields.
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct StoreSettings {
//!     url: SecretString,
//! }
//!
//! let settings = StoreSettings {
//!     url: SecretString::from("redis://:hunter2@cache:6379"),
//! };
//!
//! assert!(!format!("{settings:?}").contains("hunter2"));
//! assert!(settings.url.expose_secret().starts_with("redis://"));
//! ```

pub use secrecy::{ExposeSecret, SecretBox, SecretString};
