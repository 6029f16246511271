//! Collects images referenced by Markdown documents into a local assets
//! folder and rewrites the references to point at the copies.

pub mod assets;
pub mod batch;
pub mod config;
pub mod digest;
pub mod error;
pub mod naming;
pub mod options;
pub mod report;
pub mod resolve;
pub mod rewrite;

pub use batch::{run_pack, run_pack_async};
pub use error::PackError;
pub use options::{AssetsScope, NamingMode, PackOptions};
pub use report::{FileResult, Progress, RunReport, RunSummary, export_log};
