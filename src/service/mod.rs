//! Long-running background services

pub mod reconciler;

pub use reconciler::{ReconcilerHandle, ReconciliationLoop};
