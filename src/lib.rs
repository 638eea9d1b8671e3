//! Food freshness analysis service.
//!
//! Accepts an image upload, sends it to Gemini with a fixed freshness
//! instruction, and returns the model's report. The same instruction is
//! also exposed as a prompt → model → parser chain under `/api`.

pub mod chain;
pub mod config;
pub mod error;
pub mod model;
pub mod parser;
pub mod prompt;
pub mod routes;
pub mod startup;
pub mod telemetry;
