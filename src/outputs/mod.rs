//! Report persistence.
//!
//! - [`json`]: writes a [`crate::models::PipelineReport`] as JSON
//!
//! # Output Structure
//!
//! ```text
//! output_dir/
//! └── 2025-05-06/
//!     ├── 073000.json
//!     └── 193000.json
//! ```

pub mod json;
