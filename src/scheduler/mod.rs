//! Background tasks.

mod sweeper;

pub use sweeper::*;
