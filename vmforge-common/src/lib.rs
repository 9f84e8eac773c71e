//! # vmforge Common
//!
//! Shared utilities for the vmforge components.
//!
//! ## Logging
//!
//! ```rust
//! use vmforge_common::{init_logging, LogFormat};
//!
//! init_logging("info", LogFormat::Text).unwrap();
//! ```

pub mod logging;

pub use logging::{init_logging, LogFormat};
