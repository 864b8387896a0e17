//! # dhcpd-leases
//!
//! Reads an ISC dhcpd lease file and reconstructs the current state of every
//! lease in it.
//!
//! The lease file is an append-only log: each change to a lease appends a new
//! `lease <ip> { ... }` declaration, so one address can appear many times.
//! This crate parses every declaration and collapses the history into the
//! views an operator cares about.
//!
//! ## Features
//!
//! - Tolerant per-field parsing of lease declarations
//! - Last-declaration-wins reconciliation of active leases
//! - Static (never-expiring) and abandoned lease views
//! - Text table and JSON reports
//! - Read-only: the lease file is never modified
//!
//! ## Quick Start
//!
//! ```no_run
//! use chrono::Utc;
//! use dhcpd_leases::{LeaseStore, MalformedPolicy, Report, ReportKind};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> dhcpd_leases::Result<()> {
//!     let store = LeaseStore::load("/var/lib/dhcp/dhcpd.leases", MalformedPolicy::Abort).await?;
//!     let report = Report::build(&store, ReportKind::Active, Utc::now());
//!     print!("{}", report.render_text("See dhcpd.conf"));
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`LeaseRecord`] - One parsed lease declaration
//! - [`LeaseStore`] - All declarations in file order, plus derived views
//! - [`Report`] - A view captured at one instant, ready to render
//! - [`Config`] - Lease file location and parsing policy

pub mod config;
pub mod error;
pub mod record;
pub mod report;
pub mod store;

pub use config::{Config, MalformedPolicy};
pub use error::{Error, Result};
pub use record::{LeaseEnd, LeaseRecord};
pub use report::{Report, ReportKind};
pub use store::LeaseStore;
