//! End-to-end bundle lifecycle tests: editorial flow through the approval
//! gate, then publication by the runner, exercised against the in-memory
//! backends exactly as the scheduler host wires them.

use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use bundles_core::approval::ApprovalGate;
use bundles_core::membership::BundleEditor;
use bundles_core::memory::{MemoryContent, MemoryStore};
use bundles_core::notify::{RecordingNotifier, SentNotification};
use bundles_core::publisher::{PublishRunner, RunReport};
use bundles_core::types::{BundleStatus, PageInfo};
use bundles_core::BundleError;
use bundles_core::BundleStore;

struct Harness {
    store: Arc<MemoryStore>,
    content: Arc<MemoryContent>,
    notifier: Arc<RecordingNotifier>,
    editor: BundleEditor,
    gate: ApprovalGate,
    runner: PublishRunner,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let content = Arc::new(MemoryContent::new());
    let notifier = Arc::new(RecordingNotifier::new());
    Harness {
        editor: BundleEditor::new(store.clone(), content.clone()),
        gate: ApprovalGate::new(store.clone(), content.clone(), notifier.clone()),
        runner: PublishRunner::new(store.clone(), content.clone(), notifier.clone()),
        store,
        content,
        notifier,
    }
}

fn ready_page(title: &str) -> PageInfo {
    PageInfo {
        id: Uuid::new_v4(),
        title: title.to_string(),
        kind: "BulletinPage".to_string(),
        live: false,
        go_live_at: None,
        expire_at: None,
        has_scheduled_revision: true,
        workflow_ready: true,
    }
}

#[tokio::test]
async fn full_lifecycle_from_draft_to_released() {
    let h = harness();
    let creator = Uuid::new_v4();
    let reviewer = Uuid::new_v4();

    let mut bundle = h.editor.create("Retail sales, May", Some(creator)).await.unwrap();
    let pages = [ready_page("Headline bulletin"), ready_page("Detailed tables")];
    for info in &pages {
        h.content.insert_page(info.clone()).await;
        h.editor.add_page(bundle.id, info.id).await.unwrap();
    }
    bundle.publication_date = Some(Utc::now() - Duration::days(1));
    h.editor.save(&mut bundle).await.unwrap();

    h.gate
        .request_transition(bundle.id, BundleStatus::InReview, creator)
        .await
        .unwrap();
    let approved = h
        .gate
        .request_transition(bundle.id, BundleStatus::Approved, reviewer)
        .await
        .unwrap();
    assert_eq!(approved.approved_by, Some(reviewer));

    let report = h.runner.run(Utc::now()).await.unwrap();
    assert_eq!(report, RunReport { published: 1, failed: 0 });

    // Both member pages went live in order and the bundle is terminal.
    assert_eq!(h.content.published().await, vec![pages[0].id, pages[1].id]);
    let released = h.store.load_bundle(bundle.id).await.unwrap().unwrap();
    assert_eq!(released.status, BundleStatus::Released);

    // Two status changes, then one publication start/finish pair.
    let sent = h.notifier.sent().await;
    assert_eq!(
        sent,
        vec![
            SentNotification::StatusChanged {
                bundle: "Retail sales, May".to_string(),
                old_status: "Pending".to_string(),
            },
            SentNotification::StatusChanged {
                bundle: "Retail sales, May".to_string(),
                old_status: "In Review".to_string(),
            },
            SentNotification::PublishStarted {
                bundle: "Retail sales, May".to_string(),
                pages: 2,
            },
            SentNotification::PublishFinished {
                bundle: "Retail sales, May".to_string(),
                pages: 2,
            },
        ]
    );

    // A released page is free to join a new bundle.
    let next = h.editor.create("Retail sales, June", Some(creator)).await.unwrap();
    h.editor.add_page(next.id, pages[0].id).await.unwrap();

    // Re-running the tick touches nothing further.
    let again = h.runner.run(Utc::now()).await.unwrap();
    assert_eq!(again, RunReport::default());
    assert_eq!(h.content.published().await.len(), 2);
}

#[tokio::test]
async fn calendar_scheduled_bundle_publishes_its_calendar_entry() {
    let h = harness();
    let reviewer = Uuid::new_v4();

    let calendar = Uuid::new_v4();
    h.content
        .insert_calendar(calendar, Utc::now() - Duration::hours(2))
        .await;

    let mut bundle = h.editor.create("Via calendar", Some(Uuid::new_v4())).await.unwrap();
    let page = ready_page("Calendar bulletin");
    h.content.insert_page(page.clone()).await;
    h.editor.add_page(bundle.id, page.id).await.unwrap();
    bundle.release_calendar_page = Some(calendar);
    h.editor.save(&mut bundle).await.unwrap();

    h.gate
        .request_transition(bundle.id, BundleStatus::InReview, reviewer)
        .await
        .unwrap();
    h.gate
        .request_transition(bundle.id, BundleStatus::Approved, reviewer)
        .await
        .unwrap();

    h.runner.run(Utc::now()).await.unwrap();

    let cal = h.content.calendar(calendar).await.unwrap();
    assert!(cal.live);
    assert_eq!(cal.entries.len(), 1);
    assert_eq!(cal.entries[0].title, "Calendar bulletin");
}

#[tokio::test]
async fn competing_editors_cannot_share_a_page() {
    let h = harness();
    let bundle_a = h.editor.create("Bundle A", None).await.unwrap();
    let bundle_b = h.editor.create("Bundle B", None).await.unwrap();
    let page = Uuid::new_v4();

    h.editor.add_page(bundle_a.id, page).await.unwrap();
    let err = h.editor.add_page(bundle_b.id, page).await.unwrap_err();
    assert!(matches!(err, BundleError::AlreadyInActiveBundle { .. }));

    assert_eq!(h.store.bundle_pages(bundle_a.id).await.unwrap().len(), 1);
    assert!(h.store.bundle_pages(bundle_b.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn dry_run_never_mutates_however_many_bundles_are_due() {
    let h = harness();
    let reviewer = Uuid::new_v4();

    for name in ["First due", "Second due"] {
        let mut bundle = h.editor.create(name, Some(Uuid::new_v4())).await.unwrap();
        let page = ready_page(&format!("{name} bulletin"));
        h.content.insert_page(page.clone()).await;
        h.editor.add_page(bundle.id, page.id).await.unwrap();
        bundle.publication_date = Some(Utc::now() - Duration::hours(1));
        h.editor.save(&mut bundle).await.unwrap();
        h.gate
            .request_transition(bundle.id, BundleStatus::InReview, reviewer)
            .await
            .unwrap();
        h.gate
            .request_transition(bundle.id, BundleStatus::Approved, reviewer)
            .await
            .unwrap();
    }
    let before_notifications = h.notifier.sent().await.len();

    let preview = h.runner.dry_run(Utc::now()).await.unwrap();
    assert_eq!(preview.bundles.len(), 2);

    for bundle in h.store.list_bundles().await.unwrap() {
        assert_eq!(bundle.status, BundleStatus::Approved);
    }
    assert!(h.content.published().await.is_empty());
    assert_eq!(h.notifier.sent().await.len(), before_notifications);
}
