//! Service wrapper for the transaction tracker.
//!
//! This crate provides the `tx-tracker` binary: it builds the tracker from
//! configuration, serves an HTTP API for submitting and inspecting
//! transactions, and logs every batched effect.
//!
//! # Components
//!
//! - `api`: HTTP endpoints over the tracker
//! - `cli`: Command-line interface
//! - `service`: Wiring of storage, notifier and tracker from configuration

pub mod api;
pub mod cli;
pub mod service;
