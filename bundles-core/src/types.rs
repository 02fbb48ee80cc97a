//! Bundle Domain Types
//!
//! Core types for the bundle publication workflow: the bundle itself, its
//! page membership rows, and the summaries of external content consumed by
//! the approval gate and the publish runner.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a bundle. `Released` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BundleStatus {
    Pending,
    InReview,
    Approved,
    Released,
}

/// Statuses in which a bundle claims its member pages.
pub const ACTIVE_BUNDLE_STATUSES: [BundleStatus; 3] = [
    BundleStatus::Pending,
    BundleStatus::InReview,
    BundleStatus::Approved,
];

/// Statuses in which membership and scheduling may still change.
pub const EDITABLE_BUNDLE_STATUSES: [BundleStatus; 2] =
    [BundleStatus::Pending, BundleStatus::InReview];

impl BundleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::InReview => "IN_REVIEW",
            Self::Approved => "APPROVED",
            Self::Released => "RELEASED",
        }
    }

    /// Human label for display and notifications.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::InReview => "In Review",
            Self::Approved => "Approved",
            Self::Released => "Released",
        }
    }

    pub fn is_active(&self) -> bool {
        ACTIVE_BUNDLE_STATUSES.contains(self)
    }

    pub fn is_editable(&self) -> bool {
        EDITABLE_BUNDLE_STATUSES.contains(self)
    }
}

impl std::fmt::Display for BundleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for BundleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "IN_REVIEW" => Ok(Self::InReview),
            "APPROVED" => Ok(Self::Approved),
            "RELEASED" => Ok(Self::Released),
            other => Err(format!("unknown bundle status '{other}'")),
        }
    }
}

/// An ancillary link carried by a bundle (datasets, time series).
/// Opaque to the runner; rendered onto the release calendar entry verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetLink {
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
}

/// A named, schedulable group of content pages that go live together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bundle {
    pub id: Uuid,
    pub name: String,
    pub status: BundleStatus,

    /// Explicit publication datetime. Takes precedence over the release
    /// calendar page's release date.
    pub publication_date: Option<DateTime<Utc>>,
    /// Reference to the external release calendar entry. Never owned.
    pub release_calendar_page: Option<Uuid>,
    /// Resolved publication date, refreshed on every editorial save:
    /// `publication_date`, else the calendar page's release date. This is
    /// what the due-bundle query compares against.
    #[serde(default)]
    pub release_date: Option<DateTime<Utc>>,

    /// External collection reference, informational only.
    #[serde(default)]
    pub collection_reference: String,
    /// Ordered dataset links published alongside the pages.
    #[serde(default)]
    pub datasets: Vec<DatasetLink>,

    pub created_at: DateTime<Utc>,
    pub created_by: Option<Uuid>,
    pub approved_at: Option<DateTime<Utc>>,
    pub approved_by: Option<Uuid>,
}

impl Bundle {
    pub fn new(name: impl Into<String>, created_by: Option<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            status: BundleStatus::Pending,
            publication_date: None,
            release_calendar_page: None,
            release_date: None,
            collection_reference: String::new(),
            datasets: Vec::new(),
            created_at: Utc::now(),
            created_by,
            approved_at: None,
            approved_by: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn is_editable(&self) -> bool {
        self.status.is_editable()
    }

    /// Whether the "save and approve" action applies.
    pub fn can_be_approved(&self) -> bool {
        self.status == BundleStatus::InReview
    }

    /// Resolve the scheduled publication date: the explicit date wins,
    /// otherwise the release calendar page's release date (supplied by the
    /// caller, since the calendar lives behind the content store).
    pub fn scheduled_publication_date(
        &self,
        calendar_release_date: Option<DateTime<Utc>>,
    ) -> Option<DateTime<Utc>> {
        self.publication_date
            .or(self.release_calendar_page.and(calendar_release_date))
    }
}

impl std::fmt::Display for Bundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Membership row tying a page to a bundle. Owned by the bundle and removed
/// with it; the page itself is only referenced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundlePage {
    pub bundle_id: Uuid,
    pub page: Uuid,
    pub sort_order: u32,
}

/// Summary of an external content page, as consumed by the gate and runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageInfo {
    pub id: Uuid,
    pub title: String,
    /// Page type label, e.g. "BulletinPage".
    pub kind: String,
    pub live: bool,
    pub go_live_at: Option<DateTime<Utc>>,
    pub expire_at: Option<DateTime<Utc>>,
    /// A pending draft snapshot with an approved go-live time exists.
    pub has_scheduled_revision: bool,
    /// The page's external workflow sits at the ready-to-publish task.
    pub workflow_ready: bool,
}

/// A pending revision due for standalone (non-bundle) publication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevisionInfo {
    pub page: Uuid,
    pub title: String,
    pub kind: String,
    pub slug: String,
    pub go_live_at: DateTime<Utc>,
}

/// Status of an external release calendar entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalendarStatus {
    Provisional,
    Confirmed,
    Cancelled,
    Published,
}

/// One line of a release calendar entry's published-content listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEntry {
    pub page: Uuid,
    pub title: String,
    pub kind: String,
}
