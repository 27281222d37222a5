//! # Host Boundary
//!
//! Everything between the engine and the application embedding it.
//!
//! ## Modules
//!
//! - **`implementation`**: The [`Implementation`](implementation::Implementation) contract the
//!   core calls for diagnostics, default queue speed, tag contexts, custom arguments and the
//!   tag-fill timeout, plus the configuration-driven default used by the runner.
//! - **`config`**: Loads `tessera.toml`, writing the defaults on first use.

pub mod config;
pub mod implementation;
