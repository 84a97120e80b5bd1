//! Supervises external render worker processes: launches them, reads their
//! console output into structured telemetry, classifies failures and reports
//! every lifecycle change as a [`core::JobEvent`].

pub mod config;
pub mod core;
pub mod logging;
