use super::*;
use listing_watcher::config::TelegramConfig;
use listing_watcher::dispatcher::DispatchReport;
use listing_watcher::models::ListingRecord;

fn record(item_id: &str) -> ListingRecord {
    let mut record = ListingRecord::new(item_id);
    record.title = Some(format!("Kindle Paperwhite {}", item_id));
    record.price_text = Some("9 500 ₽".to_string());
    record.url = Some(format!("https://avito.ru/moskva/knigi/kindle_{}", item_id));
    record
}

fn telegram_config() -> TelegramConfig {
    TelegramConfig {
        send_delay_ms: 1_000,
        rate_limit_margin_ms: 500,
        ..Default::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_item_is_retried_after_hint() -> anyhow::Result<()> {
    let messenger = Arc::new(FakeMessenger::scripted(vec![SendOutcome::RateLimited {
        retry_after: Duration::from_secs(3),
    }]));
    let ledger = Arc::new(MemoryLedger::default());
    let dispatcher = Dispatcher::new(messenger.clone(), ledger.clone(), &telegram_config());

    let start = tokio::time::Instant::now();
    let report = dispatcher.dispatch(&[record("7001")]).await;
    let elapsed = start.elapsed();

    assert_eq!(report, DispatchReport { delivered: 1, skipped: 0, dropped: 0 });
    assert!(ledger.contains("7001"));

    let sent = messenger.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0], sent[1], "the same rich message is sent again");
    // 3s hint + 0.5s margin, then the 1s gap after a delivery.
    assert!(elapsed >= Duration::from_millis(4_500), "elapsed {:?}", elapsed);
    println!("✓ Rate-limited listing delivered after {:?}", elapsed);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_rejected_markup_is_resent_as_plain_text() -> anyhow::Result<()> {
    let messenger = Arc::new(FakeMessenger::scripted(vec![SendOutcome::Rejected {
        description: "Bad Request: can't parse entities: Character '.' is reserved".to_string(),
    }]));
    let ledger = Arc::new(MemoryLedger::default());
    let dispatcher = Dispatcher::new(messenger.clone(), ledger.clone(), &telegram_config());

    let report = dispatcher.dispatch(&[record("7002")]).await;

    assert_eq!(report.delivered, 1);
    assert!(ledger.contains("7002"));

    let sent = messenger.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].1, ParseMode::MarkdownV2);
    assert_eq!(sent[1].1, ParseMode::Plain);
    assert!(sent[1].0.starts_with("Kindle Paperwhite 7002"));

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_dropped_item_is_eligible_next_run() -> anyhow::Result<()> {
    let rejected = || SendOutcome::Rejected {
        description: "Forbidden: bot was blocked by the user".to_string(),
    };
    let ledger = Arc::new(MemoryLedger::default());

    let failing = Arc::new(FakeMessenger::scripted(vec![rejected(), rejected()]));
    let dispatcher = Dispatcher::new(failing.clone(), ledger.clone(), &telegram_config());
    let first = dispatcher.dispatch(&[record("7003")]).await;

    assert_eq!(first, DispatchReport { delivered: 0, skipped: 0, dropped: 1 });
    assert!(!ledger.contains("7003"));

    let working = Arc::new(FakeMessenger::default());
    let dispatcher = Dispatcher::new(working.clone(), ledger.clone(), &telegram_config());
    let second = dispatcher.dispatch(&[record("7003")]).await;

    assert_eq!(second.delivered, 1);
    assert!(ledger.contains("7003"));
    assert_eq!(working.sent().len(), 1);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_deliveries_are_spaced_out() -> anyhow::Result<()> {
    let messenger = Arc::new(FakeMessenger::default());
    let ledger = Arc::new(MemoryLedger::default());
    let dispatcher = Dispatcher::new(messenger.clone(), ledger, &telegram_config());

    let start = tokio::time::Instant::now();
    let report = dispatcher
        .dispatch(&[record("1"), record("2"), record("3")])
        .await;

    assert_eq!(report.delivered, 3);
    assert!(start.elapsed() >= Duration::from_secs(3));

    Ok(())
}

#[tokio::test]
async fn test_sqlite_ledger_survives_new_dispatcher() -> anyhow::Result<()> {
    let env = create_test_env().await?;

    let report = env.dispatcher.dispatch(&[record("8001"), record("8002")]).await;
    assert_eq!(report.delivered, 2);

    // Fresh dispatcher and ledger handle over the same database.
    let ledger = SqliteLedger::open(env.pool.clone()).await?;
    let messenger = Arc::new(FakeMessenger::default());
    let dispatcher = Dispatcher::new(messenger.clone(), Arc::new(ledger), &env.config.telegram);

    let again = dispatcher.dispatch(&[record("8001"), record("8002"), record("8003")]).await;
    assert_eq!(again, DispatchReport { delivered: 1, skipped: 2, dropped: 0 });
    assert_eq!(messenger.sent().len(), 1);

    Ok(())
}
