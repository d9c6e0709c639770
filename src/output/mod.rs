//! Run output
//!
//! - `text`: console progress and run summaries
//! - `json`: machine-readable run report

pub mod json;
pub mod text;
