//! Persistence and external-content traits.
//!
//! The gate, membership manager and runners operate exclusively through
//! these traits, enabling pluggable backends (`MemoryStore` for tests and
//! the POC scheduler, Postgres behind the `database` feature). The content
//! store is the narrow boundary to the external CMS: page summaries,
//! revision promotion, and the release calendar.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::events::{BundleEvent, EventRecord};
use crate::types::{Bundle, BundlePage, CalendarEntry, DatasetLink, PageInfo, RevisionInfo};

/// Persistence for bundles, membership rows and the event log.
#[async_trait]
pub trait BundleStore: Send + Sync {
    // ── Bundles ──

    /// Insert or update. A bundle already `Released` must be rejected,
    /// except for the write that releases it.
    async fn save_bundle(&self, bundle: &Bundle) -> Result<()>;
    async fn load_bundle(&self, id: Uuid) -> Result<Option<Bundle>>;
    /// All bundles, newest resolved release date first, then id.
    async fn list_bundles(&self) -> Result<Vec<Bundle>>;

    /// Bundles ready to publish: `Approved` with a resolved publication
    /// date (explicit, else the calendar page's release date) at or before
    /// `now`. Order is stable across invocations.
    async fn find_due_bundles(&self, now: DateTime<Utc>) -> Result<Vec<Bundle>>;

    /// The one active bundle claiming this page, if any.
    async fn find_active_bundle_for_page(&self, page: Uuid) -> Result<Option<Bundle>>;

    // ── Membership ──

    async fn bundle_pages(&self, bundle_id: Uuid) -> Result<Vec<BundlePage>>;
    async fn add_page(&self, row: &BundlePage) -> Result<()>;
    /// Idempotent: removing an absent page is a no-op.
    async fn remove_page(&self, bundle_id: Uuid, page: Uuid) -> Result<()>;

    // ── Event log (append-only) ──

    /// Append an event and return its sequence number.
    async fn append_event(&self, bundle_id: Uuid, event: &BundleEvent) -> Result<u64>;
    async fn read_events(&self, bundle_id: Uuid) -> Result<Vec<EventRecord>>;
}

/// Boundary to the external content system. The runner never computes or
/// validates content itself; promotion is delegated through this trait.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn page_info(&self, page: Uuid) -> Result<Option<PageInfo>>;

    /// Propagate a bundle's scheduled date onto a member page.
    async fn set_go_live(&self, page: Uuid, at: DateTime<Utc>) -> Result<()>;

    /// Publish the page's pending scheduled revision, making it live.
    async fn publish_scheduled_revision(&self, page: Uuid) -> Result<()>;

    /// Release date of a calendar entry, for due-date resolution.
    async fn release_date(&self, calendar_page: Uuid) -> Result<Option<DateTime<Utc>>>;

    /// Rewrite the calendar entry to list the published pages and datasets,
    /// mark it published, and publish it.
    async fn update_release_calendar(
        &self,
        calendar_page: Uuid,
        entries: &[CalendarEntry],
        datasets: &[DatasetLink],
    ) -> Result<()>;

    // ── Standalone scheduled content (not in any bundle) ──

    /// Live pages whose explicit expiry timestamp has passed.
    async fn expired_pages(&self, now: DateTime<Utc>) -> Result<Vec<PageInfo>>;
    async fn unpublish(&self, page: Uuid) -> Result<()>;
    /// Revisions whose approved go-live time has arrived, oldest first.
    async fn due_revisions(&self, now: DateTime<Utc>) -> Result<Vec<RevisionInfo>>;
}
