use chartstream::{
    ChartPipeline, Config, FeedHandle, FeedStage, Layout, LayoutEvent, PaneId, RecordingSurface,
    Sample, SeriesKind, ViewportId,
};
use chrono::Utc;
use rand::Rng;
use std::time::Duration;
use tracing::{info, warn};

const PRICE_SERIES: &str = "BTCUSDT.ohlc";
const VOLUME_SERIES: &str = "BTCUSDT.volume";
const ENTRY_SERIES: &str = "BTCUSDT:momentum:entry";
const EXIT_SERIES: &str = "BTCUSDT:momentum:exit";

#[tokio::main]
async fn main() {
    // Initialize logging
    init_logging();

    info!("Starting chartstream replay harness");

    // Scenario length configurable via REPLAY_DURATION_SECS env var (default: 10)
    let duration_secs: u64 = std::env::var("REPLAY_DURATION_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(10);

    // Tick period configurable via REPLAY_TICK_MS env var (default: 16, one display frame)
    let tick_ms: u64 = std::env::var("REPLAY_TICK_MS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(16);

    // Backfill depth configurable via REPLAY_HISTORY_MINUTES env var (default: 120)
    let history_minutes: u64 = std::env::var("REPLAY_HISTORY_MINUTES")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(120);

    info!(
        duration_secs,
        tick_ms, history_minutes, "replay configuration"
    );

    // Two linked detail panes plus consolidated trade markers on the price pane
    let layout = Layout::new()
        .assign(PRICE_SERIES, "price", SeriesKind::Candle)
        .assign(VOLUME_SERIES, "volume", SeriesKind::Line)
        .assign(ENTRY_SERIES, "price", SeriesKind::Marker)
        .assign(EXIT_SERIES, "price", SeriesKind::Marker);

    let mut pipeline = match ChartPipeline::new(RecordingSurface::new(), layout, Config::default())
    {
        Ok(pipeline) => pipeline,
        Err(error) => {
            warn!(%error, "invalid configuration");
            return;
        }
    };
    pipeline.apply_layout_event(LayoutEvent::PaneCreated(PaneId::from("price")));
    pipeline.apply_layout_event(LayoutEvent::PaneCreated(PaneId::from("volume")));

    let feed = pipeline.handle();
    let now_ms = Utc::now().timestamp_millis() as u64;

    // Stage 1: historical backfill, one candle per minute
    feed.set_feed_stage(FeedStage::History);
    let history_start_ms = now_ms - history_minutes * 60_000;
    feed.push(historical_candles(history_start_ms, history_minutes));
    info!(minutes = history_minutes, "historical backfill pushed");

    // Stage 2: delta catch-up covering the gap since the backfill snapshot
    feed.set_feed_stage(FeedStage::Delta);
    feed.push(delta_samples(now_ms - 60_000, now_ms));

    // Stage 3: live tail produced from a background task
    feed.set_feed_stage(FeedStage::Live);
    let producer = tokio::spawn(live_producer(feed, now_ms, duration_secs));

    // Drive the pipeline on a display-frame cadence until the scenario ends
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(duration_secs)).await;
        let _ = shutdown_tx.send(());
    });
    pipeline
        .drive(Duration::from_millis(tick_ms), shutdown_rx)
        .await;
    if let Err(error) = producer.await {
        warn!(%error, "live producer task failed");
    }

    report(&pipeline);
}

/// One OHLC candle per minute with a slow random walk.
fn historical_candles(start_ms: u64, minutes: u64) -> Vec<Sample> {
    let mut rng = rand::rng();
    let mut price: f64 = 60_000.0;
    let mut samples = Vec::with_capacity(minutes as usize * 2);
    for minute in 0..minutes {
        let time_ms = start_ms + minute * 60_000;
        let open = price;
        price += rng.random_range(-50.0..50.0);
        let close = price;
        let high = open.max(close) + rng.random_range(0.0..20.0);
        let low = open.min(close) - rng.random_range(0.0..20.0);
        samples.push(Sample::candle(PRICE_SERIES, time_ms, (open, high, low, close)));
        samples.push(Sample::point(
            VOLUME_SERIES,
            time_ms,
            rng.random_range(1.0..500.0),
        ));
    }
    samples
}

/// Second-granularity fill for the gap between backfill and the live tail.
fn delta_samples(from_ms: u64, to_ms: u64) -> Vec<Sample> {
    let mut rng = rand::rng();
    (from_ms..to_ms)
        .step_by(1_000)
        .map(|time_ms| Sample::point(VOLUME_SERIES, time_ms, rng.random_range(1.0..500.0)))
        .collect()
}

/// Background producer pushing live samples in bursts, with occasional trade
/// markers exercising the consolidation path.
async fn live_producer(feed: FeedHandle, start_ms: u64, duration_secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_millis(100));
    let mut price: f64 = 60_000.0;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(duration_secs);

    let mut burst = 0u64;
    loop {
        interval.tick().await;
        if tokio::time::Instant::now() >= deadline {
            break;
        }
        let time_ms = start_ms + burst * 100;
        let mut rng = rand::rng();
        price += rng.random_range(-10.0..10.0);

        let mut samples = vec![
            Sample::candle(
                PRICE_SERIES,
                time_ms,
                (price, price + 5.0, price - 5.0, price),
            ),
            Sample::point(VOLUME_SERIES, time_ms, rng.random_range(1.0..500.0)),
        ];
        if burst % 20 == 10 {
            samples.push(Sample::point(ENTRY_SERIES, time_ms, price));
        }
        if burst % 20 == 19 {
            samples.push(Sample::point(EXIT_SERIES, time_ms, price));
        }
        feed.push(samples);
        burst += 1;
    }
    info!(bursts = burst, "live producer finished");
}

/// Log the final pipeline statistics and the recorded surface state.
fn report(pipeline: &ChartPipeline<RecordingSurface>) {
    let stats = pipeline.stats();
    match serde_json::to_string_pretty(&stats) {
        Ok(json) => info!("pipeline stats:\n{json}"),
        Err(error) => warn!(%error, "failed to serialize stats"),
    }

    let surface = pipeline.surface();
    for (handle, series) in surface.live_series() {
        info!(
            %handle,
            viewport = %series.viewport,
            kind = %series.kind,
            points = series.data.len(),
            appends = series.append_calls,
            "display series"
        );
    }
    for viewport in [
        ViewportId::Detail(PaneId::from("price")),
        ViewportId::Detail(PaneId::from("volume")),
        ViewportId::Summary,
    ] {
        if let Some(window) = surface.window_of(&viewport) {
            info!(%viewport, start_ms = window.start_ms, end_ms = window.end_ms, "final window");
        }
    }
    if let Some(clock_ms) = pipeline.data_clock_ms() {
        info!(clock_ms, "final data clock");
    }
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
