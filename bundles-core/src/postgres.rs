//! Postgres-backed bundle store.
//!
//! All queries are runtime-checked `sqlx::query()` calls because the tables
//! are created by [`ensure_schema`] and may not exist at compile time.
//!
//! The one-active-bundle-per-page invariant is enforced transactionally in
//! `add_page` (check-then-insert under a lock), closing the read-then-write
//! race the editorial-side check alone would allow.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Row};
use uuid::Uuid;

use crate::events::{BundleEvent, EventRecord};
use crate::store::BundleStore;
use crate::types::{Bundle, BundlePage, BundleStatus, DatasetLink};

const ACTIVE_STATUSES_SQL: &str = "('PENDING', 'IN_REVIEW', 'APPROVED')";

/// Create the bundle tables if they do not exist yet.
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS bundles (
            id uuid PRIMARY KEY,
            name text NOT NULL,
            status text NOT NULL,
            publication_date timestamptz,
            release_calendar_page uuid,
            release_date timestamptz,
            collection_reference text NOT NULL DEFAULT '',
            datasets jsonb NOT NULL DEFAULT '[]'::jsonb,
            created_at timestamptz NOT NULL,
            created_by uuid,
            approved_at timestamptz,
            approved_by uuid
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS bundle_pages (
            bundle_id uuid NOT NULL REFERENCES bundles (id) ON DELETE CASCADE,
            page uuid NOT NULL,
            sort_order integer NOT NULL DEFAULT 0,
            PRIMARY KEY (bundle_id, page)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS bundle_events (
            seq bigserial PRIMARY KEY,
            bundle_id uuid NOT NULL,
            at timestamptz NOT NULL,
            event jsonb NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[derive(Debug, FromRow)]
struct BundleRow {
    id: Uuid,
    name: String,
    status: String,
    publication_date: Option<DateTime<Utc>>,
    release_calendar_page: Option<Uuid>,
    release_date: Option<DateTime<Utc>>,
    collection_reference: String,
    datasets: serde_json::Value,
    created_at: DateTime<Utc>,
    created_by: Option<Uuid>,
    approved_at: Option<DateTime<Utc>>,
    approved_by: Option<Uuid>,
}

impl TryFrom<BundleRow> for Bundle {
    type Error = anyhow::Error;

    fn try_from(row: BundleRow) -> Result<Self> {
        let status: BundleStatus = row.status.parse().map_err(|e: String| anyhow!(e))?;
        let datasets: Vec<DatasetLink> = serde_json::from_value(row.datasets)?;
        Ok(Bundle {
            id: row.id,
            name: row.name,
            status,
            publication_date: row.publication_date,
            release_calendar_page: row.release_calendar_page,
            release_date: row.release_date,
            collection_reference: row.collection_reference,
            datasets,
            created_at: row.created_at,
            created_by: row.created_by,
            approved_at: row.approved_at,
            approved_by: row.approved_by,
        })
    }
}

const SELECT_BUNDLE: &str = r#"
    SELECT id, name, status, publication_date, release_calendar_page,
           release_date, collection_reference, datasets,
           created_at, created_by, approved_at, approved_by
    FROM bundles
"#;

pub struct PgBundleStore {
    pool: PgPool,
}

impl PgBundleStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BundleStore for PgBundleStore {
    async fn save_bundle(&self, bundle: &Bundle) -> Result<()> {
        // The WHERE guard makes released bundles immutable: the releasing
        // write still matches because the stored status is Approved.
        let result = sqlx::query(
            r#"
            INSERT INTO bundles
                (id, name, status, publication_date, release_calendar_page,
                 release_date, collection_reference, datasets,
                 created_at, created_by, approved_at, approved_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                status = EXCLUDED.status,
                publication_date = EXCLUDED.publication_date,
                release_calendar_page = EXCLUDED.release_calendar_page,
                release_date = EXCLUDED.release_date,
                collection_reference = EXCLUDED.collection_reference,
                datasets = EXCLUDED.datasets,
                approved_at = EXCLUDED.approved_at,
                approved_by = EXCLUDED.approved_by
            WHERE bundles.status <> 'RELEASED'
            "#,
        )
        .bind(bundle.id)
        .bind(&bundle.name)
        .bind(bundle.status.as_str())
        .bind(bundle.publication_date)
        .bind(bundle.release_calendar_page)
        .bind(bundle.release_date)
        .bind(&bundle.collection_reference)
        .bind(serde_json::to_value(&bundle.datasets)?)
        .bind(bundle.created_at)
        .bind(bundle.created_by)
        .bind(bundle.approved_at)
        .bind(bundle.approved_by)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            bail!("bundle {} is released and cannot be modified", bundle.id);
        }
        Ok(())
    }

    async fn load_bundle(&self, id: Uuid) -> Result<Option<Bundle>> {
        let row = sqlx::query_as::<_, BundleRow>(&format!("{SELECT_BUNDLE} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Bundle::try_from).transpose()
    }

    async fn list_bundles(&self) -> Result<Vec<Bundle>> {
        let rows = sqlx::query_as::<_, BundleRow>(&format!(
            "{SELECT_BUNDLE} ORDER BY release_date DESC NULLS LAST, id"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Bundle::try_from).collect()
    }

    async fn find_due_bundles(&self, now: DateTime<Utc>) -> Result<Vec<Bundle>> {
        let rows = sqlx::query_as::<_, BundleRow>(&format!(
            "{SELECT_BUNDLE} WHERE status = 'APPROVED' AND release_date <= $1 \
             ORDER BY release_date, id"
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Bundle::try_from).collect()
    }

    async fn find_active_bundle_for_page(&self, page: Uuid) -> Result<Option<Bundle>> {
        let row = sqlx::query_as::<_, BundleRow>(&format!(
            "{SELECT_BUNDLE} WHERE status IN {ACTIVE_STATUSES_SQL} \
             AND id IN (SELECT bundle_id FROM bundle_pages WHERE page = $1) \
             ORDER BY release_date DESC NULLS LAST, id LIMIT 1"
        ))
        .bind(page)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Bundle::try_from).transpose()
    }

    async fn bundle_pages(&self, bundle_id: Uuid) -> Result<Vec<BundlePage>> {
        let rows = sqlx::query(
            "SELECT bundle_id, page, sort_order FROM bundle_pages \
             WHERE bundle_id = $1 ORDER BY sort_order",
        )
        .bind(bundle_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| BundlePage {
                bundle_id: row.get("bundle_id"),
                page: row.get("page"),
                sort_order: row.get::<i32, _>("sort_order") as u32,
            })
            .collect())
    }

    async fn add_page(&self, row: &BundlePage) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        // Re-check under the transaction: the page must not already sit in
        // an active bundle. Locking the matching membership rows serializes
        // concurrent adds for the same page.
        let claimed = sqlx::query(&format!(
            "SELECT bp.bundle_id FROM bundle_pages bp \
             JOIN bundles b ON b.id = bp.bundle_id \
             WHERE bp.page = $1 AND b.status IN {ACTIVE_STATUSES_SQL} \
             FOR UPDATE OF bp"
        ))
        .bind(row.page)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(existing) = claimed {
            let bundle_id: Uuid = existing.get("bundle_id");
            bail!("page {} is already in active bundle {}", row.page, bundle_id);
        }

        sqlx::query("INSERT INTO bundle_pages (bundle_id, page, sort_order) VALUES ($1, $2, $3)")
            .bind(row.bundle_id)
            .bind(row.page)
            .bind(row.sort_order as i32)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn remove_page(&self, bundle_id: Uuid, page: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM bundle_pages WHERE bundle_id = $1 AND page = $2")
            .bind(bundle_id)
            .bind(page)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn append_event(&self, bundle_id: Uuid, event: &BundleEvent) -> Result<u64> {
        let row = sqlx::query(
            "INSERT INTO bundle_events (bundle_id, at, event) VALUES ($1, $2, $3) RETURNING seq",
        )
        .bind(bundle_id)
        .bind(Utc::now())
        .bind(serde_json::to_value(event)?)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>("seq") as u64)
    }

    async fn read_events(&self, bundle_id: Uuid) -> Result<Vec<EventRecord>> {
        let rows = sqlx::query(
            "SELECT seq, bundle_id, at, event FROM bundle_events \
             WHERE bundle_id = $1 ORDER BY seq",
        )
        .bind(bundle_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let event: BundleEvent = serde_json::from_value(row.get("event"))?;
                Ok(EventRecord {
                    seq: row.get::<i64, _>("seq") as u64,
                    bundle_id: row.get("bundle_id"),
                    at: row.get("at"),
                    event,
                })
            })
            .collect()
    }
}
