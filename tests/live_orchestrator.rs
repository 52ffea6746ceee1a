use spotbot::coordination::StopToken;
use spotbot::live::{CsvReplayFeed, LiveConfig, LiveFeedAdapter, RiskConfig};
use spotbot::orchestrator::{Orchestrator, StopReason};
use spotbot::rl::{
    AgentConfig, DefaultDqnAgent, DiscreteAction, EnvironmentConfig, PerformanceSummary,
    TrainingConfig,
};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

fn scratch(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("spotbot_it_{}_{}", name, std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

/// Unix-second timestamps, one minute apart
fn write_csv(path: &PathBuf, closes: &[f64]) {
    let mut body = String::from("timestamp,open,high,low,close,volume\n");
    for (i, close) in closes.iter().enumerate() {
        let ts = 1_704_067_200 + 60 * i as i64;
        body.push_str(&format!(
            "{},{},{},{},{},1.0\n",
            ts,
            close,
            close * 1.001,
            close * 0.999,
            close
        ));
    }
    fs::write(path, body).unwrap();
}

fn agent() -> DefaultDqnAgent {
    DefaultDqnAgent::new(
        AgentConfig {
            batch_size: 8,
            buffer_capacity: 256,
            min_buffer_size: 8,
            hidden_dim: 16,
            seed: Some(3),
            ..Default::default()
        },
        Default::default(),
    )
    .unwrap()
}

fn training(dir: &PathBuf) -> TrainingConfig {
    TrainingConfig {
        model_path: dir.join("model").to_string_lossy().into_owned(),
        checkpoint_dir: dir.join("checkpoints").to_string_lossy().into_owned(),
        checkpoint_every: 5,
        max_checkpoints: 2,
        summary_path: dir
            .join("reports")
            .join("summary.json")
            .to_string_lossy()
            .into_owned(),
        ..Default::default()
    }
}

async fn adapter(csv: &PathBuf, max_cycles: Option<usize>) -> LiveFeedAdapter {
    let feed = Arc::new(CsvReplayFeed::from_csv(csv, 30).unwrap());
    LiveFeedAdapter::initialize(
        feed,
        LiveConfig {
            lookback: 200,
            max_cycles,
            ..Default::default()
        },
        EnvironmentConfig {
            min_warmup_candles: 10,
            ..Default::default()
        },
        RiskConfig {
            kill_switch_path: None,
            ..Default::default()
        },
    )
    .await
    .unwrap()
}

/// A replayed session runs online learning, rotates checkpoints and writes
/// the final summary artifact.
#[tokio::test]
async fn replay_session_runs_to_cycle_cap() {
    let dir = scratch("replay");
    let csv = dir.join("candles.csv");
    let closes: Vec<f64> = (0..120)
        .map(|i| 100.0 + 3.0 * (i as f64 * 0.25).sin())
        .collect();
    write_csv(&csv, &closes);

    let orchestrator = Orchestrator::new(
        agent(),
        adapter(&csv, Some(20)).await,
        training(&dir),
        StopToken::new(),
    );
    let report = orchestrator.run().await.unwrap();

    assert_eq!(report.stop_reason, StopReason::MaxCycles);
    assert_eq!(report.cycles, 20);
    assert_eq!(report.summary.steps, 20);
    assert!(report.summary.final_equity > 0.0);

    let summary: PerformanceSummary = serde_json::from_str(
        &fs::read_to_string(dir.join("reports").join("summary.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(summary.steps, report.summary.steps);
    assert_eq!(summary.trade_count, report.summary.trade_count);
    assert!((summary.final_equity - report.summary.final_equity).abs() < 1e-9);

    assert!(dir.join("model.mpk").exists());
    let checkpoints = fs::read_dir(dir.join("checkpoints")).unwrap().count();
    assert_eq!(checkpoints, 2, "rotation keeps the newest two");

    let _ = fs::remove_dir_all(&dir);
}

/// Weights saved by one session warm-start the next.
#[tokio::test]
async fn saved_weights_warm_start_next_session() {
    let dir = scratch("warm");
    let csv = dir.join("candles.csv");
    write_csv(&csv, &vec![100.0; 60]);

    let first = Orchestrator::new(
        agent(),
        adapter(&csv, Some(2)).await,
        training(&dir),
        StopToken::new(),
    );
    first.run().await.unwrap();
    assert!(dir.join("model.mpk").exists());

    let mut second = Orchestrator::new(
        agent(),
        adapter(&csv, Some(1)).await,
        training(&dir),
        StopToken::new(),
    );
    second.load_weights().unwrap();

    let _ = fs::remove_dir_all(&dir);
}

/// A cancelled token stops the loop before any cycle runs.
#[tokio::test]
async fn cancelled_token_stops_immediately() {
    let dir = scratch("cancelled");
    let csv = dir.join("candles.csv");
    write_csv(&csv, &vec![100.0; 60]);

    let stop = StopToken::new();
    stop.cancel();
    let orchestrator = Orchestrator::new(agent(), adapter(&csv, None).await, training(&dir), stop);

    let report = tokio::time::timeout(Duration::from_secs(5), orchestrator.run())
        .await
        .expect("cancelled loop must return")
        .unwrap();
    assert_eq!(report.stop_reason, StopReason::Cancelled);
    assert_eq!(report.cycles, 0);
    assert_eq!(report.summary.steps, 0);

    let _ = fs::remove_dir_all(&dir);
}

/// A crash that takes equity below the global loss fraction ends the run and
/// still writes the summary artifact.
#[tokio::test]
async fn crash_stops_at_global_loss_limit() {
    let dir = scratch("crash");
    let csv = dir.join("candles.csv");
    let mut closes = vec![100.0; 31];
    closes.extend(vec![40.0; 10]);
    write_csv(&csv, &closes);

    let feed = Arc::new(CsvReplayFeed::from_csv(&csv, 30).unwrap());
    let mut adapter = LiveFeedAdapter::initialize(
        feed,
        LiveConfig {
            lookback: 200,
            max_cycles: Some(10),
            ..Default::default()
        },
        EnvironmentConfig {
            target_position_fraction: 1.0,
            min_warmup_candles: 10,
            // The open position cannot be sold before the crash lands
            trade_cooldown_steps: 10,
            ..Default::default()
        },
        RiskConfig {
            kill_switch_path: None,
            trailing_stop_enabled: false,
            ..Default::default()
        },
    )
    .await
    .unwrap();
    adapter.step_live(DiscreteAction::Buy).await.unwrap();
    assert!(!adapter.environment().position().is_empty());

    let orchestrator = Orchestrator::new(agent(), adapter, training(&dir), StopToken::new());
    let report = orchestrator.run().await.unwrap();

    assert_eq!(report.stop_reason, StopReason::GlobalLossLimit);
    assert_eq!(report.cycles, 1);
    // Default 10k balance, half lost at the default global loss fraction
    assert!(report.summary.final_equity < 5_000.0);

    let summary_path = dir.join("reports").join("summary.json");
    assert!(summary_path.exists());
    let summary: PerformanceSummary =
        serde_json::from_str(&fs::read_to_string(summary_path).unwrap()).unwrap();
    assert_eq!(summary.steps, 1);
    assert!(dir.join("model.mpk").exists());

    let _ = fs::remove_dir_all(&dir);
}
