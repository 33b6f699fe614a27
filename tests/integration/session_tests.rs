use super::*;
use listing_watcher::config::TableLayout;
use listing_watcher::fetcher::StopReason;
use listing_watcher::storage::ListingStore;
use listing_watcher::workdir::RunDir;
use listing_watcher::AppError;
use std::sync::atomic::Ordering;

#[tokio::test]
async fn test_two_page_session_end_to_end() -> anyhow::Result<()> {
    let env = create_test_env().await?;
    let driver = FakeDriver::new(vec![page_of("10", 5), page_of("20", 3)]);
    let closed = driver.closed.clone();

    let report = env
        .pipeline
        .run(TARGET, launcher(driver), &env.pool, &env.dispatcher)
        .await?;

    assert!(report.kept);
    assert_eq!(report.capture.pages, 2);
    assert_eq!(report.capture.saved_pages, 2);
    assert_eq!(report.capture.items, 8);
    assert_eq!(report.capture.stop_reason, Some(StopReason::Exhausted));
    assert_eq!(report.parse.as_ref().map(|p| p.listings), Some(8));
    assert_eq!(report.load.as_ref().map(|l| l.upserted), Some(8));
    assert_eq!(report.notify.as_ref().map(|n| n.delivered), Some(8));
    assert_eq!(closed.load(Ordering::SeqCst), 1, "browser session should be closed");
    println!("✓ Session captured, parsed, loaded and announced 8 listings");

    let run = RunDir::open(&env.runs_dir(), &report.run)?;
    assert!(run.page_path(1).exists());
    assert!(run.page_path(2).exists());
    assert!(run.listings_path().exists());
    assert!(report.run.ends_with("_macbook_pro"));

    let store = ListingStore::open(env.pool.clone(), TableLayout::PerCategory, TARGET).await?;
    assert_eq!(store.count().await?, 8);

    let stored = store.get("101").await?.expect("listing 101 should be stored");
    assert_eq!(stored.title.as_deref(), Some("MacBook Pro 1"));
    assert_eq!(stored.price, Some(70_001));
    assert_eq!(stored.price_text.as_deref(), Some("70001 ₽"));
    assert_eq!(
        stored.url.as_deref(),
        Some("https://avito.ru/moskva/noutbuki/macbook_101?context=search")
    );
    assert_eq!(stored.location.as_deref(), Some("Москва, м. Тверская"));

    assert_eq!(env.ledger.count().await?, 8);
    assert_eq!(env.messenger.sent().len(), 8);
    assert!(env
        .messenger
        .sent()
        .iter()
        .all(|(_, mode)| *mode == ParseMode::MarkdownV2));

    Ok(())
}

#[tokio::test]
async fn test_rerun_is_idempotent() -> anyhow::Result<()> {
    let env = create_test_env().await?;
    let pages = vec![page_of("10", 5), page_of("20", 3)];

    let first = env
        .pipeline
        .run(TARGET, launcher(FakeDriver::new(pages.clone())), &env.pool, &env.dispatcher)
        .await?;
    let second = env
        .pipeline
        .run(TARGET, launcher(FakeDriver::new(pages)), &env.pool, &env.dispatcher)
        .await?;

    assert_ne!(first.run, second.run);
    assert_eq!(second.load.as_ref().map(|l| l.upserted), Some(8));

    let notify = second.notify.expect("second run should notify");
    assert_eq!(notify.delivered, 0);
    assert_eq!(notify.skipped, 8);
    println!("✓ Second run re-upserted 8 rows and announced nothing new");

    let store = ListingStore::open(env.pool.clone(), TableLayout::PerCategory, TARGET).await?;
    assert_eq!(store.count().await?, 8);
    assert_eq!(env.ledger.count().await?, 8);
    assert_eq!(env.messenger.sent().len(), 8);

    Ok(())
}

#[tokio::test]
async fn test_updated_listing_overwrites_row() -> anyhow::Result<()> {
    let env = create_test_env().await?;

    let before = container(&[listing_fragment("555", "MacBook Pro 14", 150_000)]);
    let after = container(&[listing_fragment("555", "MacBook Pro 14 M3", 139_000)]);

    env.pipeline
        .run(TARGET, launcher(FakeDriver::new(vec![before])), &env.pool, &env.dispatcher)
        .await?;
    env.pipeline
        .run(TARGET, launcher(FakeDriver::new(vec![after])), &env.pool, &env.dispatcher)
        .await?;

    let store = ListingStore::open(env.pool.clone(), TableLayout::PerCategory, TARGET).await?;
    let stored = store.get("555").await?.expect("listing 555 should be stored");

    assert_eq!(store.count().await?, 1);
    assert_eq!(stored.title.as_deref(), Some("MacBook Pro 14 M3"));
    assert_eq!(stored.price, Some(139_000));
    // Announced once only.
    assert_eq!(env.messenger.sent().len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_missing_first_container_aborts_session() -> anyhow::Result<()> {
    let env = create_test_env().await?;
    let driver = FakeDriver::new(vec![page_of("10", 5)]).without_container();
    let screenshots = driver.screenshots.clone();
    let closed = driver.closed.clone();

    let result = env
        .pipeline
        .run(TARGET, launcher(driver), &env.pool, &env.dispatcher)
        .await;

    assert!(matches!(result, Err(AppError::ContainerTimeout { .. })));
    assert_eq!(env.run_count(), 0, "the empty run directory should be removed");
    assert_eq!(screenshots.load(Ordering::SeqCst), 1);
    assert_eq!(closed.load(Ordering::SeqCst), 1, "browser session should be closed on failure");

    let shots: Vec<_> = std::fs::read_dir(&env.config.scraper.screenshots_dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .collect();
    assert_eq!(shots.len(), 1);
    assert!(shots[0].starts_with("debug_macbook_pro_container_timeout_"));
    assert!(shots[0].ends_with(".png"));

    assert!(env.messenger.sent().is_empty());
    println!("✓ Session aborted without output and left a debug screenshot");

    Ok(())
}

#[tokio::test]
async fn test_page_limit_keeps_partial_results() -> anyhow::Result<()> {
    let env = create_test_env_with(|config| config.scraper.max_pages = 2).await?;
    let pages: Vec<String> = (1..=5).map(|n| page_of(&format!("{}0", n), 2)).collect();
    let driver = FakeDriver::new(pages);
    let closed = driver.closed.clone();

    let report = env
        .pipeline
        .run(TARGET, launcher(driver), &env.pool, &env.dispatcher)
        .await?;

    assert!(report.kept);
    assert_eq!(report.capture.pages, 2);
    assert_eq!(report.capture.stop_reason, Some(StopReason::PageLimit));
    assert_eq!(report.parse.as_ref().map(|p| p.listings), Some(4));
    assert_eq!(closed.load(Ordering::SeqCst), 1);

    let run = RunDir::open(&env.runs_dir(), &report.run)?;
    assert_eq!(run.page_files()?.len(), 2);

    Ok(())
}

#[tokio::test]
async fn test_listings_without_id_are_not_stored() -> anyhow::Result<()> {
    let env = create_test_env().await?;
    let page = container(&[
        listing_fragment("1", "MacBook Air", 50_000),
        anonymous_fragment("Реклама"),
        listing_fragment("2", "MacBook Pro", 90_000),
    ]);

    let report = env
        .pipeline
        .run(TARGET, launcher(FakeDriver::new(vec![page])), &env.pool, &env.dispatcher)
        .await?;

    let parse = report.parse.expect("parse should run");
    assert_eq!(parse.listings, 2);
    assert_eq!(parse.dropped, 1);
    assert_eq!(report.load.map(|l| l.upserted), Some(2));
    assert_eq!(report.notify.map(|n| n.delivered), Some(2));

    Ok(())
}

#[tokio::test]
async fn test_phases_can_run_separately() -> anyhow::Result<()> {
    let env = create_test_env().await?;
    let driver = FakeDriver::new(vec![page_of("30", 4)]);

    let (run, capture, kept) = env.pipeline.capture(TARGET, launcher(driver)).await?;
    assert!(kept);
    assert_eq!(capture.saved_pages, 1);
    println!("✓ Captured into {}", run.name());

    // A later invocation finds the run through the naming scheme.
    let latest = env.pipeline.resolve_run(TARGET, None)?;
    assert_eq!(latest.name(), run.name());

    let parse = env.pipeline.parse_run(&latest)?;
    assert_eq!(parse.listings, 4);

    let load = env.pipeline.load_run(&latest, TARGET, &env.pool).await?;
    assert_eq!(load.upserted, 4);

    let notify = env.pipeline.notify_run(&latest, &env.dispatcher).await?;
    assert_eq!(notify.delivered, 4);

    Ok(())
}

#[tokio::test]
async fn test_shared_table_layout() -> anyhow::Result<()> {
    let env = create_test_env_with(|config| config.storage.table_layout = TableLayout::Shared).await?;

    env.pipeline
        .run(
            TARGET,
            launcher(FakeDriver::new(vec![page_of("40", 3)])),
            &env.pool,
            &env.dispatcher,
        )
        .await?;

    let store = ListingStore::open(env.pool.clone(), TableLayout::Shared, TARGET).await?;
    assert_eq!(store.table(), "listings");
    assert_eq!(store.count().await?, 3);

    Ok(())
}
