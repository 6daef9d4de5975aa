//! Batch summaries and their renderings.

pub mod render;
pub mod summary;

pub use render::{render_json, render_text};
pub use summary::{summarize, CategoryAverage, FailedTarget, Summary};
