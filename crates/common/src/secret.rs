//! Secret types for protecting sensitive values from accidental logging.
//!
//! Re-exports the [`secrecy`] types used for the portal bearer token and the
//! media-session JWT. Both are credentials that grant room access, so they are
//! never stored as plain `String`s: `SecretString` redacts itself in `Debug`
//! output and zeroizes on drop.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct JoinRequest {
//!     room: String,
//!     bearer: SecretString,
//! }
//!
//! let req = JoinRequest {
//!     room: "standup".to_string(),
//!     bearer: SecretString::from("eyJhbGciOi..."),
//! };
//!
//! // Redacted: the bearer token does not appear here
//! println!("{:?}", req);
//!
//! // Reading the value requires an explicit call
//! let header = format!("Bearer {}", req.bearer.expose_secret());
//! # assert!(header.starts_with("Bearer "));
//! ```

pub use secrecy::{ExposeSecret, SecretString};
