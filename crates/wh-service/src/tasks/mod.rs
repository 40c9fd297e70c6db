//! Background tasks.
//!
//! - `mapping_cleanup` - Expires correlation mappings for meetings with no
//!   recent activity

pub mod mapping_cleanup;

pub use mapping_cleanup::start_mapping_cleanup;
