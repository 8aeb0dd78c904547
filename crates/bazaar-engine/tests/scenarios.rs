//! End-to-end scenarios across the store, kernel, caches, bus and gate

use bazaar_bus::{Action as PushAction, ChannelSink, EventKind};
use bazaar_cache::{keys, Freshness, Lookup, UserPart};
use bazaar_engine::{
    Engine, EngineConfig, ErrorResponse, InteractionRequest, RequestContext, UserContext,
};
use bazaar_gate::EndpointClass;
use bazaar_model::{InteractionMetadata, ProductId, UserId};
use bazaar_scoring::{ScoringContext, ScoringKernel, Strategy};
use bazaar_store::{CandidateSource, Catalog, CatalogFetcher, ManualClock};
use bazaar_test_utils as fixtures;
use chrono::Duration as ChronoDuration;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

fn engine_over(catalog: Arc<Catalog>, clock: Arc<ManualClock>) -> Arc<Engine> {
    Arc::new(Engine::with_clock(EngineConfig::default(), catalog, clock).unwrap())
}

fn as_user(engine: &Engine, user: &str) -> RequestContext {
    engine
        .context(fixtures::browser())
        .with_user(UserContext::new(user))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_toggles_by_one_user_never_double_count() {
    let clock = fixtures::manual_clock();
    let catalog = Arc::new(Catalog::new());
    catalog
        .insert_product(fixtures::product("p", "maker", "tools"))
        .unwrap();
    let engine = engine_over(catalog, clock);
    let product = ProductId::from("p");
    for i in 0..10 {
        engine
            .store()
            .toggle_upvote(&UserId::new(format!("fan-{i}")), &product)
            .unwrap();
    }

    let racers: Vec<_> = (0..2)
        .map(|_| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                let mut ctx = as_user(&engine, "u");
                engine.toggle_upvote(&mut ctx, "p").unwrap()
            })
        })
        .collect();
    for racer in racers {
        racer.await.unwrap();
    }

    let count = engine.store().product_counters(&product).upvote_count;
    assert!(count == 10 || count == 11, "count was {count}");
    let active = engine.store().user_state(&UserId::from("u"), &product).upvoted;
    assert_eq!(active, count == 11);
}

#[tokio::test]
async fn upvote_reaches_every_subscriber_and_purges_the_detail() {
    let clock = fixtures::manual_clock();
    let catalog = Arc::new(Catalog::new());
    catalog
        .insert_product(fixtures::product("p1", "maker", "tools"))
        .unwrap();
    let engine = engine_over(catalog, clock);

    let mut reader = engine.context(fixtures::browser_from(20));
    let before = engine.product_detail(&mut reader, "p1").await.unwrap();
    assert_eq!(before.value.product.counters.upvote_count, 0);
    let cached = engine.product_detail(&mut reader, "p1").await.unwrap();
    assert_eq!(cached.freshness, Freshness::Fresh);

    let mut receivers = Vec::new();
    for _ in 0..2 {
        let (sink, rx) = ChannelSink::new();
        let connection = engine.bus().connect(None, Arc::new(sink));
        engine
            .bus()
            .subscribe(connection, ProductId::from("p1"))
            .unwrap();
        receivers.push(rx);
    }

    let mut ctx = as_user(&engine, "u");
    let response = engine.toggle_upvote(&mut ctx, "p1").unwrap();
    assert!(response.success && response.upvoted);
    assert_eq!(response.upvote_count, 1);

    for rx in &mut receivers {
        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("event within one second")
            .expect("channel open");
        assert_eq!(event.kind, EventKind::Upvote);
        assert_eq!(event.product_id, ProductId::from("p1"));
        assert_eq!(event.action, Some(PushAction::Add));
        assert_eq!(event.count, Some(1));
        assert_eq!(event.user_id, Some(UserId::from("u")));
        assert!(rx.try_recv().is_err(), "exactly one event");
    }

    let after = engine.product_detail(&mut reader, "p1").await.unwrap();
    assert_eq!(after.freshness, Freshness::Miss);
    assert_eq!(after.value.product.counters.upvote_count, 1);
}

#[tokio::test]
async fn recently_viewed_products_sink_in_the_personalized_feed() {
    let clock = fixtures::manual_clock();
    let catalog = Arc::new(Catalog::new());
    let created = fixtures::days_before(fixtures::origin(), 1);
    for i in 0..12 {
        catalog
            .insert_product(
                fixtures::product(&format!("p{i}"), &format!("maker-{i}"), &format!("cat-{i}"))
                    .created_at(created),
            )
            .unwrap();
    }
    catalog.upsert_user(fixtures::user("u"));
    catalog.upsert_user(fixtures::user("v"));
    let engine = engine_over(catalog, clock);

    let viewed = ["p0", "p1", "p2"];
    for i in 0..12 {
        let product = ProductId::new(format!("p{i}"));
        let fans = if i < 3 { 4 } else { 3 };
        for f in 0..fans {
            engine
                .store()
                .toggle_upvote(&UserId::new(format!("fan-{f}")), &product)
                .unwrap();
        }
    }
    let mut u = as_user(&engine, "u");
    for id in viewed {
        let receipt = engine
            .record_interaction(&mut u, &InteractionRequest::view(id))
            .unwrap();
        assert!(receipt.counted);
    }

    let feed = engine
        .recommendations(&mut u, "personalized", 6, 0)
        .await
        .unwrap()
        .value;
    assert_eq!(feed.len(), 6);
    for (rank, item) in feed.items.iter().enumerate() {
        if viewed.contains(&item.product.product.id.as_str()) {
            let fresh_above = feed.items[..rank]
                .iter()
                .filter(|i| !viewed.contains(&i.product.product.id.as_str()))
                .count();
            assert!(fresh_above >= 3, "{} ranked too high", item.product.product.id);
        }
    }

    let mut v = as_user(&engine, "v");
    let baseline: HashMap<_, _> = engine
        .recommendations(&mut v, "personalized", 12, 0)
        .await
        .unwrap()
        .value
        .items
        .into_iter()
        .map(|item| (item.product.product.id.clone(), item.score))
        .collect();
    let full = engine
        .recommendations(&mut u, "personalized", 12, 0)
        .await
        .unwrap()
        .value;
    for item in &full.items {
        let id = &item.product.product.id;
        if viewed.contains(&id.as_str()) {
            let without_history = baseline[id];
            assert!(
                item.score <= 0.2 * without_history + 1e-9,
                "{id}: {} vs {without_history}",
                item.score
            );
        }
    }
}

#[tokio::test]
async fn crawler_views_are_accepted_but_not_counted() {
    let clock = fixtures::manual_clock();
    let catalog = Arc::new(Catalog::new());
    for i in 0..4 {
        catalog
            .insert_product(fixtures::product(&format!("p{i}"), &format!("maker-{i}"), "tools"))
            .unwrap();
    }
    let engine = engine_over(catalog, clock);

    let mut crawler = engine
        .context(fixtures::googlebot())
        .with_user(UserContext::new("crawler"));
    let receipt = engine
        .record_interaction(&mut crawler, &InteractionRequest::view("p0"))
        .unwrap();
    assert!(receipt.success);
    assert!(receipt.is_bot);
    assert!(!receipt.counted);
    assert_eq!(receipt.unique_viewer_count, 0);
    assert_eq!(receipt.view_count, 0);

    let mut crawler = engine
        .context(fixtures::googlebot())
        .with_user(UserContext::new("crawler"));
    engine
        .recommendations(&mut crawler, "personalized", 10, 0)
        .await
        .unwrap();
    let cache = engine.feeds().cache();
    let anonymous = keys::recommendations("personalized", &UserPart::from_user(None), 10, 0);
    let personal = keys::recommendations(
        "personalized",
        &UserPart::from_user(Some(&UserId::from("crawler"))),
        10,
        0,
    );
    assert!(matches!(cache.get(&anonymous), Lookup::Fresh(_)));
    assert!(matches!(cache.get(&personal), Lookup::Miss));
}

#[tokio::test]
async fn fresh_launch_outtrends_an_old_favourite() {
    let clock = fixtures::manual_clock();
    let now = fixtures::origin();
    let catalog = Arc::new(Catalog::new());
    catalog
        .insert_product(
            fixtures::product("p2", "maker-2", "tools").created_at(fixtures::days_before(now, 1)),
        )
        .unwrap();
    catalog
        .insert_product(
            fixtures::product("p3", "maker-3", "tools").created_at(fixtures::days_before(now, 60)),
        )
        .unwrap();
    let engine = engine_over(catalog, Arc::clone(&clock));
    let store = engine.store();

    // the old favourite collected its engagement right after launch
    clock.set(fixtures::days_before(now, 59));
    let p3 = ProductId::from("p3");
    for _ in 0..2_000 {
        store
            .record_view(None, &p3, InteractionMetadata::default())
            .unwrap();
    }
    for i in 0..50 {
        store.toggle_upvote(&UserId::new(format!("fan-{i}")), &p3).unwrap();
    }

    clock.set(now - ChronoDuration::hours(12));
    let p2 = ProductId::from("p2");
    for _ in 0..20 {
        store
            .record_view(None, &p2, InteractionMetadata::default())
            .unwrap();
    }
    for i in 0..5 {
        store.toggle_upvote(&UserId::new(format!("fan-{i}")), &p2).unwrap();
    }
    clock.set(now);

    let fetcher = CatalogFetcher::new(Arc::clone(store));
    let fresh = fetcher.fetch_one(&p2).await.unwrap().unwrap();
    let old = fetcher.fetch_one(&p3).await.unwrap().unwrap();
    assert_eq!(old.counters.view_count, 2_000);
    assert_eq!(old.counters.upvote_count, 50);

    let kernel = ScoringKernel::new(engine.config().scoring.clone());
    let ctx = ScoringContext::new(Strategy::Trending, now);
    let fresh_score = kernel.score(&fresh, &ctx, &[]);
    let old_score = kernel.score(&old, &ctx, &[]);
    assert!(fresh_score.components.trending >= old_score.components.trending);
    assert!(fresh_score.score >= old_score.score);
}

#[tokio::test]
async fn eleventh_login_attempt_is_throttled() {
    let engine = engine_over(Arc::new(Catalog::new()), fixtures::manual_clock());
    for attempt in 1..=10u32 {
        let mut ctx = engine.context(fixtures::browser());
        let admission = engine
            .guard(EndpointClass::Login, &mut ctx, Some("ada@example.com"))
            .unwrap();
        let headers = bazaar_engine::success_headers(&admission.rate);
        let remaining = headers
            .iter()
            .find(|(name, _)| *name == "X-RateLimit-Remaining")
            .map(|(_, value)| value.clone());
        assert_eq!(remaining, Some((10 - attempt).to_string()));
    }

    let mut ctx = engine.context(fixtures::browser());
    let err = engine
        .guard(EndpointClass::Login, &mut ctx, Some("ada@example.com"))
        .unwrap_err();
    let limit = engine
        .config()
        .gate
        .rate_limits
        .rule(EndpointClass::Login)
        .map(|rule| rule.max);
    let response = ErrorResponse::from_error(&err, limit);
    assert_eq!(response.status, 429);
    let retry_after: u64 = response.header("Retry-After").unwrap().parse().unwrap();
    assert!(retry_after >= 1);
    assert!(response.body.retry_after.is_some_and(|s| s >= 1));
}
