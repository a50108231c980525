//! Normalization, period resolution and series naming for CloudWatch
//! metric queries, plus an HTTP adapter that executes them.

pub mod app;
pub mod cloudwatch;
pub mod error;
pub mod executor;
pub mod naming;
pub mod query;
