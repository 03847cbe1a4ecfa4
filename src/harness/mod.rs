//! Validation harness around the reference engine.

mod harness_config;
mod reference_harness;

pub use harness_config::{ConfigLoader, HarnessConfig, PassSelector, ValidationConfig};
pub use reference_harness::{HarnessReport, PassReport, ReferenceHarness};
