//! Wrappers that keep credentials and other sensitive values out of logs.
//!
//! This module re-exports types from the [`secrecy`] crate. Use them for all
//! sensitive values: the shared secret, bearer credentials, storage URLs with
//! embedded passwords.
//!
//! `SecretString` implements `Debug` with redaction, so any struct that
//! derives `Debug` while holding one gets safe logging behavior for free.
//! Secrets are zeroized on drop. Access to the actual value requires an
//! explicit `expose_secret()` call.
//!
//! # Example
//!
//! ```rust
//! use common::secret::SecretString;
//! use secrecy::ExposeSecret;
//!
//! #[derive(Debug)]
//! struct Credentials {
//!     callback_url: String,
//!     shared_secret: SecretString,  // Debug shows "[REDACTED]"
//! }
//!
//! let creds = Credentials {
//!     callback_url: "https://example.com/callback".to_string(),
//!     shared_secret: SecretString::from("hunter2"),
//! };
//!
//! let secret: &str = creds.shared_secret.expose_secret();
//! assert_eq!(secret, "hunter2");
//! ```

// The secrecy types are the whole surface of this module
pub use secrecy::{ExposeSecret, SecretBox, SecretString};
