use spotbot::config::AppConfig;
use spotbot::coordination::{install_signal_handlers, StopToken};
use spotbot::domain::load_candles_csv;
use spotbot::error::Result;
use spotbot::live::{BinanceKlineFeed, CsvReplayFeed, LiveFeedAdapter, MarketDataFeed};
use spotbot::orchestrator::{write_summary, Orchestrator};
use spotbot::rl::training::{evaluate, summarize_results, train};
use spotbot::rl::{Checkpointer, DefaultDqnAgent, PriceSeries, TradingEnvironment};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

fn environment_from_csv(config: &AppConfig, data: &str) -> Result<TradingEnvironment> {
    let candles = load_candles_csv(data)?;
    info!("Loaded {} candles from {}", candles.len(), data);
    TradingEnvironment::new(config.environment.clone(), PriceSeries::new(candles)?)
}

pub fn run_train(config: &AppConfig, data: &str) -> Result<()> {
    let mut env = environment_from_csv(config, data)?;
    let mut agent = DefaultDqnAgent::new(config.agent.clone(), Default::default())?;
    let checkpointer = Checkpointer::new(
        &config.training.checkpoint_dir,
        config.training.max_checkpoints,
    );

    info!(
        "Training for {} episodes on {} ({} steps max per episode)",
        config.training.episodes,
        data,
        env.series().len()
    );

    let results = train(
        &mut agent,
        &mut env,
        config.training.episodes,
        Some(&checkpointer),
        config.training.checkpoint_every,
    )?;

    let summary = summarize_results(&results);
    info!("Training summary: {}", serde_json::to_string(&summary)?);

    agent.save(Path::new(&config.training.model_path))?;
    Ok(())
}

pub fn run_backtest(config: &AppConfig, data: &str) -> Result<()> {
    let mut env = environment_from_csv(config, data)?;
    let mut agent = DefaultDqnAgent::new(config.agent.clone(), Default::default())?;
    agent.load(Path::new(&config.training.model_path))?;

    let (_, summary) = evaluate(&mut agent, &mut env)?;
    write_summary(Path::new(&config.training.summary_path), &summary)?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

pub async fn run_live(config: &AppConfig) -> Result<()> {
    let live = &config.live;
    let feed: Arc<dyn MarketDataFeed> = match &live.replay_csv {
        Some(path) => {
            info!("Replaying candles from {}", path);
            Arc::new(CsvReplayFeed::from_csv(path, live.lookback)?)
        }
        None => Arc::new(BinanceKlineFeed::new(Duration::from_secs(
            live.request_timeout_secs,
        ))?),
    };

    let adapter = LiveFeedAdapter::initialize(
        feed,
        live.clone(),
        config.environment.clone(),
        config.risk.clone(),
    )
    .await?;
    let agent = DefaultDqnAgent::new(config.agent.clone(), Default::default())?;

    let stop = StopToken::new();
    install_signal_handlers(stop.clone());

    let mut orchestrator = Orchestrator::new(agent, adapter, config.training.clone(), stop);
    if let Err(e) = orchestrator.load_weights() {
        warn!("Could not load weights ({}); starting cold", e);
    }

    let report = orchestrator.run().await?;
    info!(
        "Live run finished: {:?} after {} cycles over {} episodes",
        report.stop_reason, report.cycles, report.episodes
    );
    Ok(())
}
