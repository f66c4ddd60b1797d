//! rustmd-io: JSON file I/O for rustmd.
//!
//! This crate reads spectra datasets and conversion settings from JSON
//! documents and writes conversion summaries back out.
//!

mod error;
mod reader;
mod writer;

pub use error::{Error, Result};
pub use reader::{
    conversion_config_from_json, load_conversion_config, load_workspace, workspace_from_json,
};
pub use writer::{write_summary, ConversionSummary};
