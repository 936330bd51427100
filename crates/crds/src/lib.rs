//! ChartOps CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the chart controller.

pub mod chart;

pub use chart::*;
