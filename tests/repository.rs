// tests/repository.rs
mod common;

use std::sync::Arc;

use chrono::Utc;
use tempfile::TempDir;

use intelstream::errors::RepoError;
use intelstream::model::{NewForwardingRule, SourceType};
use intelstream::pipeline::{Admission, DedupGate};
use intelstream::repository::{MemoryRepository, Repository, SqliteRepository};
use intelstream::watermark::Watermark;

use common::*;

/// Both implementations must honour the same contract.
fn backends() -> Vec<(&'static str, Arc<dyn Repository>)> {
    vec![
        ("memory", Arc::new(MemoryRepository::new())),
        ("sqlite", Arc::new(SqliteRepository::open_in_memory().expect("in-memory database"))),
    ]
}

#[tokio::test]
async fn get_or_create_is_idempotent_per_source() {
    for (backend, repo) in backends() {
        let a = add_source(&repo, "A", SourceType::GenericFeed, "https://a.test/rss", None).await;
        let b = add_source(&repo, "B", SourceType::GenericFeed, "https://b.test/rss", None).await;
        let c = candidate("same-id", "Hello", Some(ts(2, 0)));

        let (first, created) = repo
            .get_or_create_content_item(a.id, &c.external_id, c.payload.clone())
            .await
            .unwrap();
        assert!(created, "{backend}");
        let mut changed = c.payload.clone();
        changed.title = "Edited upstream".into();
        let (second, created) = repo
            .get_or_create_content_item(a.id, &c.external_id, changed)
            .await
            .unwrap();
        assert!(!created, "{backend}");
        assert_eq!(second.id, first.id, "{backend}");
        assert_eq!(second.title, "Hello", "{backend}");
        assert_eq!(second.published_at, Some(ts(2, 0)), "{backend}");

        // The same external id under another source is a different item.
        let (other, created) = repo
            .get_or_create_content_item(b.id, &c.external_id, c.payload.clone())
            .await
            .unwrap();
        assert!(created, "{backend}");
        assert_ne!(other.id, first.id, "{backend}");
    }
}

#[tokio::test]
async fn dedup_gate_admits_once() {
    for (backend, repo) in backends() {
        let src = add_source(&repo, "A", SourceType::PaperFeed, "cs.AI", None).await;
        let gate = DedupGate::new(repo.clone());
        let c = candidate("2503.00001", "Paper", None);

        assert!(!gate.is_known(src.id, &c.external_id).await.unwrap(), "{backend}");
        assert!(
            matches!(
                gate.admit(src.id, &c.external_id, c.payload.clone()).await.unwrap(),
                Admission::New(_)
            ),
            "{backend}"
        );
        assert!(gate.is_known(src.id, &c.external_id).await.unwrap(), "{backend}");
        assert!(
            matches!(
                gate.admit(src.id, &c.external_id, c.payload.clone()).await.unwrap(),
                Admission::Duplicate
            ),
            "{backend}"
        );
    }
}

#[tokio::test]
async fn posted_is_terminal_and_queues_follow_state() {
    for (backend, repo) in backends() {
        let src = add_source(&repo, "A", SourceType::GenericFeed, "https://a.test/rss", None).await;
        let c = candidate("x", "X", None);
        let (item, _) = repo
            .get_or_create_content_item(src.id, &c.external_id, c.payload)
            .await
            .unwrap();

        assert_eq!(repo.list_unsummarized().await.unwrap().len(), 1, "{backend}");
        assert!(repo.list_undelivered().await.unwrap().is_empty(), "{backend}");

        repo.set_summary(item.id, "short", Utc::now()).await.unwrap();
        assert!(repo.list_unsummarized().await.unwrap().is_empty(), "{backend}");
        assert_eq!(repo.list_undelivered().await.unwrap().len(), 1, "{backend}");

        let first_post = ts(5, 0);
        repo.mark_posted(item.id, first_post).await.unwrap();
        repo.mark_posted(item.id, ts(6, 0)).await.unwrap();
        let stored = &repo.items_for_source(src.id).await.unwrap()[0];
        assert_eq!(stored.posted_at, Some(first_post), "{backend}");
        assert!(repo.list_undelivered().await.unwrap().is_empty(), "{backend}");

        assert!(matches!(
            repo.mark_posted(item.id + 100, ts(6, 0)).await,
            Err(RepoError::NotFound { .. })
        ));
    }
}

#[tokio::test]
async fn removing_a_source_drops_its_items() {
    for (backend, repo) in backends() {
        let src = add_source(&repo, "Gone", SourceType::GenericFeed, "https://a.test/rss", None).await;
        let c = candidate("x", "X", None);
        repo.get_or_create_content_item(src.id, &c.external_id, c.payload)
            .await
            .unwrap();

        assert!(repo.remove_source(1, "gone").await.unwrap().is_some(), "{backend}");
        assert!(repo.items_for_source(src.id).await.unwrap().is_empty(), "{backend}");
        assert!(repo.list_unsummarized().await.unwrap().is_empty(), "{backend}");
        assert!(repo.remove_source(1, "gone").await.unwrap().is_none(), "{backend}");
    }
}

#[tokio::test]
async fn duplicate_rule_is_a_conflict() {
    for (backend, repo) in backends() {
        let rule = NewForwardingRule {
            guild: 1,
            source_channel: 1,
            destination_channel: 2,
            destination_kind: Default::default(),
        };
        repo.add_forwarding_rule(rule.clone()).await.unwrap();
        assert!(
            matches!(repo.add_forwarding_rule(rule).await, Err(RepoError::Conflict(_))),
            "{backend}"
        );
    }
}

#[tokio::test]
async fn record_poll_keeps_the_watermark_when_none_is_given() {
    for (backend, repo) in backends() {
        let src = add_source(&repo, "A", SourceType::GenericFeed, "https://a.test/rss", None).await;
        repo.record_poll(src.id, Some(Watermark::Published { at: ts(2, 0) }), ts(2, 1))
            .await
            .unwrap();
        repo.record_poll(src.id, None, ts(3, 0)).await.unwrap();

        let stored = repo.get_source(src.id).await.unwrap().unwrap();
        assert_eq!(stored.watermark, Some(Watermark::Published { at: ts(2, 0) }), "{backend}");
        assert_eq!(stored.last_polled_at, Some(ts(3, 0)), "{backend}");
    }
}

#[tokio::test]
async fn state_database_survives_a_restart() {
    let dir = TempDir::new().expect("tmp dir");
    let path = dir.path().join("state").join("intelstream.db");

    let (source_id, item_id) = {
        let repo: Arc<dyn Repository> = Arc::new(SqliteRepository::open(&path).unwrap());
        let src = add_source(&repo, "Kept", SourceType::GenericFeed, "https://a.test/rss", Some(3)).await;
        repo.record_poll(src.id, Some(Watermark::Published { at: ts(2, 0) }), ts(2, 1))
            .await
            .unwrap();
        repo.set_guild_default_channel(1, Some(99)).await.unwrap();
        let c = candidate("x", "X", Some(ts(2, 0)));
        let (item, _) = repo
            .get_or_create_content_item(src.id, &c.external_id, c.payload)
            .await
            .unwrap();
        repo.set_summary(item.id, "kept summary", ts(2, 2)).await.unwrap();
        (src.id, item.id)
    };
    assert!(path.exists());

    let repo: Arc<dyn Repository> = Arc::new(SqliteRepository::open(&path).unwrap());
    let src = repo.get_source(source_id).await.unwrap().expect("source restored");
    assert_eq!(src.watermark, Some(Watermark::Published { at: ts(2, 0) }));
    assert_eq!(src.channel, Some(3));
    assert_eq!(repo.guild_default_channel(1).await.unwrap(), Some(99));

    // Undelivered work is still queued and the item is still a duplicate.
    let queued = repo.list_undelivered().await.unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].summary.as_deref(), Some("kept summary"));
    let c = candidate("x", "X", Some(ts(2, 0)));
    let (item, created) = repo
        .get_or_create_content_item(source_id, &c.external_id, c.payload)
        .await
        .unwrap();
    assert!(!created);
    assert_eq!(item.id, item_id);

    let next = add_source(&repo, "New", SourceType::GenericFeed, "https://b.test/rss", None).await;
    assert_ne!(next.id, source_id);
}
