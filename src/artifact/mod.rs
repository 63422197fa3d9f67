//! Artifact handling shared by the host and the in-container driver.
//!
//! - [`filesystem`] - copying, replacing and pruning artifact files
//! - [`manifest`] - content digests of a finished artifact set

pub mod filesystem;
pub mod manifest;
