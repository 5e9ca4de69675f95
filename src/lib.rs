//! hstree: guided HS tariff code classification.
//!
//! Builds an indexed nomenclature tree from flat, indent-leveled records and
//! walks it one level at a time, letting a decision oracle pick the branch.
//! Sessions are plain values and travel between steps as signed blobs.

pub mod application;
pub mod cli;
pub mod config;
pub mod domain;
pub mod exitcode;
pub mod infrastructure;
pub mod util;
