//! Database module for Vigil.
//!
//! Provides SQLite storage with embedded refinery migrations.

mod models;
mod store;

pub use models::*;
pub use store::*;
