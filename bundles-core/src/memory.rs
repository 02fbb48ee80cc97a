//! In-memory backends.
//!
//! `MemoryStore` implements [`BundleStore`] and `MemoryContent` implements
//! [`ContentStore`] over `RwLock`-guarded maps. These are the default
//! backends for tests and the POC scheduler host; production persistence
//! lives behind the `database` feature.

use std::collections::{HashMap, HashSet};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::events::{BundleEvent, EventRecord};
use crate::store::{BundleStore, ContentStore};
use crate::types::{
    Bundle, BundlePage, BundleStatus, CalendarEntry, CalendarStatus, DatasetLink, PageInfo,
    RevisionInfo,
};

#[derive(Default)]
struct StoreInner {
    bundles: HashMap<Uuid, Bundle>,
    pages: Vec<BundlePage>,
    events: Vec<EventRecord>,
    next_seq: u64,
}

/// In-memory [`BundleStore`].
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<StoreInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BundleStore for MemoryStore {
    async fn save_bundle(&self, bundle: &Bundle) -> Result<()> {
        let mut inner = self.inner.write().await;
        if let Some(existing) = inner.bundles.get(&bundle.id) {
            // Released bundles are immutable; the releasing write itself
            // arrives while the stored status is still Approved.
            if existing.status == BundleStatus::Released {
                bail!("bundle {} is released and cannot be modified", bundle.id);
            }
        }
        inner.bundles.insert(bundle.id, bundle.clone());
        Ok(())
    }

    async fn load_bundle(&self, id: Uuid) -> Result<Option<Bundle>> {
        Ok(self.inner.read().await.bundles.get(&id).cloned())
    }

    async fn list_bundles(&self) -> Result<Vec<Bundle>> {
        let inner = self.inner.read().await;
        let mut bundles: Vec<Bundle> = inner.bundles.values().cloned().collect();
        // Newest release date first, undated last, then id for stability.
        bundles.sort_by(|a, b| match (a.release_date, b.release_date) {
            (Some(x), Some(y)) => y.cmp(&x).then(a.id.cmp(&b.id)),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.id.cmp(&b.id),
        });
        Ok(bundles)
    }

    async fn find_due_bundles(&self, now: DateTime<Utc>) -> Result<Vec<Bundle>> {
        let inner = self.inner.read().await;
        let mut due: Vec<Bundle> = inner
            .bundles
            .values()
            .filter(|b| {
                b.status == BundleStatus::Approved
                    && b.release_date.is_some_and(|date| date <= now)
            })
            .cloned()
            .collect();
        due.sort_by_key(|b| (b.release_date, b.id));
        Ok(due)
    }

    async fn find_active_bundle_for_page(&self, page: Uuid) -> Result<Option<Bundle>> {
        let inner = self.inner.read().await;
        for row in inner.pages.iter().filter(|row| row.page == page) {
            if let Some(bundle) = inner.bundles.get(&row.bundle_id) {
                if bundle.is_active() {
                    return Ok(Some(bundle.clone()));
                }
            }
        }
        Ok(None)
    }

    async fn bundle_pages(&self, bundle_id: Uuid) -> Result<Vec<BundlePage>> {
        let inner = self.inner.read().await;
        let mut rows: Vec<BundlePage> = inner
            .pages
            .iter()
            .filter(|row| row.bundle_id == bundle_id)
            .cloned()
            .collect();
        rows.sort_by_key(|row| row.sort_order);
        Ok(rows)
    }

    async fn add_page(&self, row: &BundlePage) -> Result<()> {
        self.inner.write().await.pages.push(row.clone());
        Ok(())
    }

    async fn remove_page(&self, bundle_id: Uuid, page: Uuid) -> Result<()> {
        self.inner
            .write()
            .await
            .pages
            .retain(|row| !(row.bundle_id == bundle_id && row.page == page));
        Ok(())
    }

    async fn append_event(&self, bundle_id: Uuid, event: &BundleEvent) -> Result<u64> {
        let mut inner = self.inner.write().await;
        inner.next_seq += 1;
        let seq = inner.next_seq;
        inner.events.push(EventRecord {
            seq,
            bundle_id,
            at: Utc::now(),
            event: event.clone(),
        });
        Ok(seq)
    }

    async fn read_events(&self, bundle_id: Uuid) -> Result<Vec<EventRecord>> {
        Ok(self
            .inner
            .read()
            .await
            .events
            .iter()
            .filter(|record| record.bundle_id == bundle_id)
            .cloned()
            .collect())
    }
}

/// A release calendar entry held by the in-memory content backend.
#[derive(Debug, Clone)]
pub struct CalendarPage {
    pub release_date: DateTime<Utc>,
    pub status: CalendarStatus,
    pub live: bool,
    pub entries: Vec<CalendarEntry>,
    pub datasets: Vec<DatasetLink>,
}

#[derive(Default)]
struct ContentInner {
    pages: HashMap<Uuid, PageInfo>,
    revisions: Vec<RevisionInfo>,
    calendars: HashMap<Uuid, CalendarPage>,
    published: Vec<Uuid>,
    unpublished: Vec<Uuid>,
    fail_pages: HashSet<Uuid>,
}

/// In-memory [`ContentStore`] with failure injection for runner tests.
#[derive(Default)]
pub struct MemoryContent {
    inner: RwLock<ContentInner>,
}

impl MemoryContent {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_page(&self, page: PageInfo) {
        self.inner.write().await.pages.insert(page.id, page);
    }

    pub async fn insert_revision(&self, revision: RevisionInfo) {
        self.inner.write().await.revisions.push(revision);
    }

    pub async fn insert_calendar(&self, id: Uuid, release_date: DateTime<Utc>) {
        self.inner.write().await.calendars.insert(
            id,
            CalendarPage {
                release_date,
                status: CalendarStatus::Confirmed,
                live: false,
                entries: Vec::new(),
                datasets: Vec::new(),
            },
        );
    }

    /// Make the next `publish_scheduled_revision` for this page fail.
    pub async fn fail_page(&self, page: Uuid) {
        self.inner.write().await.fail_pages.insert(page);
    }

    /// Pages promoted so far, in publish order.
    pub async fn published(&self) -> Vec<Uuid> {
        self.inner.read().await.published.clone()
    }

    pub async fn unpublished(&self) -> Vec<Uuid> {
        self.inner.read().await.unpublished.clone()
    }

    pub async fn calendar(&self, id: Uuid) -> Option<CalendarPage> {
        self.inner.read().await.calendars.get(&id).cloned()
    }

    pub async fn page(&self, id: Uuid) -> Option<PageInfo> {
        self.inner.read().await.pages.get(&id).cloned()
    }
}

#[async_trait]
impl ContentStore for MemoryContent {
    async fn page_info(&self, page: Uuid) -> Result<Option<PageInfo>> {
        Ok(self.inner.read().await.pages.get(&page).cloned())
    }

    async fn set_go_live(&self, page: Uuid, at: DateTime<Utc>) -> Result<()> {
        let mut inner = self.inner.write().await;
        match inner.pages.get_mut(&page) {
            Some(info) => {
                info.go_live_at = Some(at);
                Ok(())
            }
            None => bail!("unknown page {page}"),
        }
    }

    async fn publish_scheduled_revision(&self, page: Uuid) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.fail_pages.contains(&page) {
            bail!("revision publish failed for page {page}");
        }
        match inner.pages.get_mut(&page) {
            Some(info) => {
                info.live = true;
                info.has_scheduled_revision = false;
            }
            None => bail!("unknown page {page}"),
        }
        inner.revisions.retain(|rev| rev.page != page);
        inner.published.push(page);
        Ok(())
    }

    async fn release_date(&self, calendar_page: Uuid) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .inner
            .read()
            .await
            .calendars
            .get(&calendar_page)
            .map(|cal| cal.release_date))
    }

    async fn update_release_calendar(
        &self,
        calendar_page: Uuid,
        entries: &[CalendarEntry],
        datasets: &[DatasetLink],
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        match inner.calendars.get_mut(&calendar_page) {
            Some(cal) => {
                cal.entries = entries.to_vec();
                cal.datasets = datasets.to_vec();
                cal.status = CalendarStatus::Published;
                cal.live = true;
                Ok(())
            }
            None => bail!("unknown release calendar page {calendar_page}"),
        }
    }

    async fn expired_pages(&self, now: DateTime<Utc>) -> Result<Vec<PageInfo>> {
        let inner = self.inner.read().await;
        let mut expired: Vec<PageInfo> = inner
            .pages
            .values()
            .filter(|info| info.live && info.expire_at.is_some_and(|at| at <= now))
            .cloned()
            .collect();
        expired.sort_by_key(|info| (info.expire_at, info.id));
        Ok(expired)
    }

    async fn unpublish(&self, page: Uuid) -> Result<()> {
        let mut inner = self.inner.write().await;
        match inner.pages.get_mut(&page) {
            Some(info) => {
                info.live = false;
            }
            None => bail!("unknown page {page}"),
        }
        inner.unpublished.push(page);
        Ok(())
    }

    async fn due_revisions(&self, now: DateTime<Utc>) -> Result<Vec<RevisionInfo>> {
        let inner = self.inner.read().await;
        let mut due: Vec<RevisionInfo> = inner
            .revisions
            .iter()
            .filter(|rev| rev.go_live_at <= now)
            .cloned()
            .collect();
        due.sort_by_key(|rev| (rev.go_live_at, rev.page));
        Ok(due)
    }
}
