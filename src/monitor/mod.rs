//! Reservation monitoring: lifecycle transitions and SLA evaluation.

mod lifecycle;
mod relative_time;
mod sla;

pub use lifecycle::*;
pub use relative_time::*;
pub use sla::*;
