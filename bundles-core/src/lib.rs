//! Bundle publication workflow.
//!
//! A bundle is a named, schedulable group of content pages (plus an
//! optional release calendar entry) that must go live together at a single
//! scheduled moment. This crate provides the status state machine with
//! approval gating, page membership with the one-active-bundle-per-page
//! rule, the tick-driven publish runner, and the best-effort notification
//! sink. Persistence and the external CMS sit behind narrow traits, with
//! in-memory backends by default and Postgres behind the `database`
//! feature.

pub mod approval;
pub mod error;
pub mod events;
pub mod membership;
pub mod memory;
pub mod notify;
pub mod publisher;
pub mod scheduled;
pub mod store;
pub mod types;

#[cfg(feature = "database")]
pub mod postgres;

pub use approval::ApprovalGate;
pub use error::BundleError;
pub use membership::{dedupe_links, BundleEditor};
pub use memory::{MemoryContent, MemoryStore};
pub use notify::{from_webhook, Notifier};
pub use publisher::{DryRunReport, PublishRunner, RunReport};
pub use scheduled::ScheduledContentRunner;
pub use store::{BundleStore, ContentStore};
pub use types::{Bundle, BundlePage, BundleStatus, DatasetLink, PageInfo};
