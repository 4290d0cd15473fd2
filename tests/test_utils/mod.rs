//! In-process Forward Protocol collector used by the integration tests.

// Not every test binary uses every helper.
#[allow(dead_code)]
pub mod collector;

#[allow(unused_imports)]
pub use collector::{Collector, unused_port};
