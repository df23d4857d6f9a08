//! Common types and configuration shared across bibfed crates.
//!
//! This crate contains the base building blocks for the federation layer:
//! - **Data model**: canonical queries, records and mappings (`models`).
//! - **Configuration**: strongly typed source/mapping configuration (`config`).
//! - **Logging**: tracing subscriber setup (`telemetry`).
pub mod config;
pub mod models;
pub mod telemetry;
