//! Bundle event log.
//!
//! The durable audit trail for every bundle: one append-only, sequence
//! numbered record per state change, membership edit, or publish attempt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BundleEvent {
    Created {
        by: Option<Uuid>,
    },
    StatusChanged {
        from: crate::types::BundleStatus,
        to: crate::types::BundleStatus,
        actor: Option<Uuid>,
    },
    PageAdded {
        page: Uuid,
    },
    PageRemoved {
        page: Uuid,
    },
    /// Publish run succeeded: all pages promoted, bundle released.
    Published {
        pages: usize,
        elapsed_ms: u64,
    },
    /// Publish run aborted mid-bundle; the bundle stays approved and is
    /// retried on the next tick.
    PublishFailed {
        error: String,
    },
}

/// A stored event with its position in the bundle's log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub seq: u64,
    pub bundle_id: Uuid,
    pub at: DateTime<Utc>,
    pub event: BundleEvent,
}
