//! Common utilities and types shared across the session-sync components.

#![warn(clippy::pedantic)]

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for stable device ids and per-process session ids
pub mod identity;

/// Module for the portal client (join credentials and room lifecycle)
pub mod portal;
