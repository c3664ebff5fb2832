//! Sift Kernel Library
//!
//! Query-feature compiler: turns untyped request parameters into filter,
//! search, sort, projection and pagination state on a pluggable store
//! adapter. The `sift` binary drives it from the command line.

pub mod config;
pub mod db;
pub mod error;
pub mod query;
