// src/lib.rs

//! pkgtx: RPM transaction engine
//!
//! Accumulates package operations into a transaction, verifies
//! dependencies and conflicts, and applies the transaction to an install
//! root with callback-driven progress.
//!
//! # Architecture
//!
//! - Engine: `transaction::Transaction` borrows the caller's items and drives
//!   a native transaction set through the `ts::TransactionSet` trait
//! - Native layer: `ts::RpmTransactionSet` reads headers with the `rpm` crate
//!   and applies elements to the root
//! - Database: installed packages, files, dependencies and scriptlets in
//!   SQLite below the install root
//! - Problems: `problem::ProblemSet` snapshots of what `check()` or `run()`
//!   found wrong

pub mod config;
pub mod db;
mod error;
pub mod header;
pub mod packages;
pub mod problem;
pub mod transaction;
pub mod ts;
pub mod version;

pub use error::{Error, Result};
