use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::time::sleep;
use tracing::{info, warn};

use stride_bus::{
    CloudEvent, InProcessBus, MessageBus, Offloader, TOPIC_ENRICHED_ACTIVITY,
    TOPIC_ENRICHMENT_LAG, TOPIC_PARKRUN_RESULTS_TRIGGER, TOPIC_RAW_ACTIVITY,
};
use stride_destinations::{
    DestinationSubscriber, HevyUploader, HttpHevyApi, HttpStravaApi, StravaUploader,
};
use stride_enrichers::{
    AiDescriptionEnricher, BrandingEnricher, EffortScoreEnricher, EnricherRegistry,
    HttpDescriptionModel, IntervalsEnricher, LocationNameEnricher, NominatimClient,
    OpenMeteoClient, ParkrunResultsEnricher, PersonalRecordsEnricher, StreakTrackerEnricher,
    WeatherEnricher, WebParkrunClient,
};
use stride_ingress::{FitbitProvider, IngressService, SourceProvider, StravaProvider};
use stride_observability::{init_logging, LogSettings, ProcessKind};
use stride_orchestrator::{
    ChainRunner, EnrichmentLagMonitor, Orchestrator, ParkrunAutoPopulator, PendingInputService,
};
use stride_server::{serve, AppState};
use stride_store::{ExecutionLog, FsBlobStore, JsonStore, MetadataStore};
use stride_types::{
    ActivitySource, EnricherConfig, EnricherKind, PipelineConfig, UserRecord,
};

mod config;
mod sdk;

use config::EngineConfig;
use sdk::{HttpProviderSdk, StoredTokenSource};

#[derive(Parser, Debug)]
#[command(name = "stride-engine")]
#[command(about = "Headless Stride activity sync engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP surface plus all bus subscribers.
    Serve {
        #[arg(long, alias = "host", default_value = "127.0.0.1")]
        hostname: String,
        #[arg(long, default_value_t = 8080)]
        port: u16,
        #[arg(long)]
        state_dir: Option<String>,
    },
    /// Seed a demo user and push one synthetic activity through the full
    /// pipeline, then print the resulting run.
    Demo {
        #[arg(long)]
        state_dir: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            hostname,
            port,
            state_dir,
        } => {
            let config = EngineConfig::from_env(state_dir);
            let _log_guard = init_logging(&LogSettings::for_state_dir(
                ProcessKind::Engine,
                &config.state_dir,
                config.log_retention_days,
            ))?;
            let engine = build_engine(&config).await?;
            start_background_tasks(&engine, &config);

            let addr: SocketAddr = format!("{hostname}:{port}")
                .parse()
                .context("invalid hostname or port")?;
            info!(
                "starting stride-engine on http://{addr} (state dir {})",
                config.state_dir.display()
            );
            serve(addr, engine.app_state()).await?;
        }
        Command::Demo { state_dir } => {
            let config = EngineConfig::from_env(state_dir);
            let _log_guard = init_logging(&LogSettings::for_state_dir(
                ProcessKind::Engine,
                &config.state_dir,
                config.log_retention_days,
            ))?;
            let engine = build_engine(&config).await?;
            run_demo(&engine).await?;
        }
    }

    Ok(())
}

struct Engine {
    store: Arc<JsonStore>,
    bus: Arc<InProcessBus>,
    ingress: Arc<IngressService>,
    pending_inputs: Arc<PendingInputService>,
    providers: Arc<HashMap<ActivitySource, Arc<dyn SourceProvider>>>,
}

impl Engine {
    fn app_state(&self) -> AppState {
        AppState {
            ingress: self.ingress.clone(),
            providers: self.providers.clone(),
            pending_inputs: self.pending_inputs.clone(),
            store: self.store.clone(),
        }
    }
}

/// Construct every singleton and wire up the bus subscriptions. All
/// process-wide state is built here and passed down explicitly.
async fn build_engine(config: &EngineConfig) -> anyhow::Result<Engine> {
    let store = Arc::new(JsonStore::new(config.state_dir.join("storage")).await?);
    let blob = Arc::new(FsBlobStore::new(config.state_dir.join("blobs")));
    let execution_log = Arc::new(ExecutionLog::new(config.state_dir.join("executions.jsonl")));
    let bus = Arc::new(InProcessBus::new(config.bus_config()));
    let offloader = Offloader::new(blob, &config.blob_bucket, config.offload_threshold_bytes);

    let tokens = Arc::new(StoredTokenSource::new(store.clone()));

    // Enricher registry. Populated once; pipelines reference entries by
    // kind.
    let mut registry = EnricherRegistry::new();
    registry.register(Arc::new(StreakTrackerEnricher));
    registry.register(Arc::new(EffortScoreEnricher));
    registry.register(Arc::new(PersonalRecordsEnricher));
    registry.register(Arc::new(IntervalsEnricher));
    registry.register(Arc::new(BrandingEnricher));
    registry.register(Arc::new(ParkrunResultsEnricher));
    registry.register(Arc::new(WeatherEnricher::new(Arc::new(OpenMeteoClient::new(
        &config.weather_api_base,
    )?))));
    registry.register(Arc::new(LocationNameEnricher::new(Arc::new(
        NominatimClient::new(&config.geocode_api_base, "stride-engine")?,
    ))));
    registry.register(Arc::new(AiDescriptionEnricher::new(Arc::new(
        HttpDescriptionModel::new(
            &config.description_model_endpoint,
            &config.description_model_key,
            &config.description_model_name,
        )?,
    ))));

    // Ingress.
    let sdk = Arc::new(HttpProviderSdk::new(
        tokens.clone(),
        &config.strava_api_base,
        "https://api.fitbit.com",
    )?);
    let ingress = Arc::new(IngressService::new(
        store.clone(),
        bus.clone(),
        offloader.clone(),
        sdk,
        execution_log.clone(),
    ));
    let mut providers: HashMap<ActivitySource, Arc<dyn SourceProvider>> = HashMap::new();
    providers.insert(
        ActivitySource::Strava,
        Arc::new(StravaProvider::new(&config.strava_webhook_secret)),
    );
    providers.insert(
        ActivitySource::Fitbit,
        Arc::new(FitbitProvider::new(&config.fitbit_webhook_secret)),
    );

    // Orchestrator: the raw-activity consumer.
    let runner = ChainRunner::new(registry, store.clone());
    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        bus.clone(),
        offloader.clone(),
        runner,
        execution_log.clone(),
    ));
    bus.subscribe(TOPIC_RAW_ACTIVITY, "orchestrator", orchestrator)
        .await?;

    // Destination fan-out: one subscription per destination.
    let strava_uploader = Arc::new(StravaUploader::new(
        Arc::new(HttpStravaApi::new(&config.strava_api_base)?),
        tokens.clone(),
    ));
    let hevy_uploader = Arc::new(HevyUploader::new(Arc::new(HttpHevyApi::new(
        &config.hevy_api_base,
    )?)));
    for uploader in [
        Arc::new(DestinationSubscriber::new(
            strava_uploader,
            store.clone(),
            offloader.clone(),
            execution_log.clone(),
            config.sync_policy(),
        )),
        Arc::new(DestinationSubscriber::new(
            hevy_uploader,
            store.clone(),
            offloader.clone(),
            execution_log.clone(),
            config.sync_policy(),
        )),
    ] {
        let name = uploader.subscription_name();
        bus.subscribe(TOPIC_ENRICHED_ACTIVITY, &name, uploader).await?;
    }

    // Pending-input resolution and the parkrun auto-populator.
    let pending_inputs = Arc::new(PendingInputService::new(
        store.clone(),
        bus.clone(),
        offloader.clone(),
        execution_log.clone(),
    ));
    let populator = Arc::new(ParkrunAutoPopulator::new(
        store.clone(),
        pending_inputs.clone(),
        Arc::new(WebParkrunClient::new(&config.parkrun_api_base)?),
    ));
    bus.subscribe(TOPIC_PARKRUN_RESULTS_TRIGGER, "parkrun-auto-populator", populator)
        .await?;

    let lag_monitor = Arc::new(EnrichmentLagMonitor::new(
        store.clone(),
        execution_log.clone(),
        chrono::Duration::minutes(config.lag_threshold_minutes),
    ));
    bus.subscribe(TOPIC_ENRICHMENT_LAG, "enrichment-lag-monitor", lag_monitor)
        .await?;

    Ok(Engine {
        store,
        bus,
        ingress,
        pending_inputs,
        providers: Arc::new(providers),
    })
}

/// Periodic work: the pending-input deadline sweeper and the parkrun
/// results trigger.
fn start_background_tasks(engine: &Engine, config: &EngineConfig) {
    let pending = engine.pending_inputs.clone();
    let sweep_interval = config.pending_sweep_interval;
    tokio::spawn(async move {
        loop {
            sleep(sweep_interval).await;
            match pending.sweep_deadlines().await {
                Ok(0) => {}
                Ok(n) => info!("deadline sweeper continued {n} parked runs"),
                Err(e) => warn!("deadline sweep failed: {e:#}"),
            }
        }
    });

    spawn_tick_publisher(
        engine.bus.clone(),
        TOPIC_PARKRUN_RESULTS_TRIGGER,
        "parkrun.trigger",
        config.parkrun_trigger_interval,
    );
    spawn_tick_publisher(
        engine.bus.clone(),
        TOPIC_ENRICHMENT_LAG,
        "enrichment.lag.tick",
        config.lag_scan_interval,
    );
}

fn spawn_tick_publisher(
    bus: Arc<InProcessBus>,
    topic: &'static str,
    event_type: &'static str,
    interval: Duration,
) {
    tokio::spawn(async move {
        loop {
            sleep(interval).await;
            let event = match CloudEvent::new("stride.engine", event_type, &()) {
                Ok(event) => event,
                Err(e) => {
                    warn!("tick encode failed: {e:#}");
                    continue;
                }
            };
            if let Err(e) = bus.publish(topic, event).await {
                warn!("tick publish on {topic} failed: {e:#}");
            }
        }
    });
}

async fn run_demo(engine: &Engine) -> anyhow::Result<()> {
    use stride_ingress::MobileSyncRequest;
    use stride_types::{ActivityType, Session, StandardizedActivity};

    let now = chrono::Utc::now();
    engine.store.put_user(UserRecord::new("demo", now)).await?;
    engine
        .store
        .register_integration_identity(ActivitySource::Mobile, "demo-device", "demo")
        .await?;

    let mut pipeline = PipelineConfig::new("Demo pipeline", ActivitySource::Mobile);
    pipeline.enrichers = vec![
        EnricherConfig::new(EnricherKind::StreakTracker),
        EnricherConfig::new(EnricherKind::Branding),
    ];
    let pipeline_id = pipeline.pipeline_id.clone();
    engine.store.put_pipeline("demo", pipeline).await?;

    let activity = StandardizedActivity {
        source: ActivitySource::Mobile,
        external_id: format!("demo-{}", now.timestamp()),
        user_id: "demo".to_string(),
        activity_type: ActivityType::Run,
        name: "Demo Run".to_string(),
        description: String::new(),
        start_time: now,
        sessions: vec![Session {
            total_elapsed_s: 1800.0,
            total_distance_m: 5000.0,
            total_calories: Some(380.0),
            avg_heart_rate: Some(152),
            max_heart_rate: Some(171),
            laps: Vec::new(),
            strength_sets: Vec::new(),
        }],
    };
    let activity_id = activity.identity_key();
    let response = engine
        .ingress
        .handle_mobile_sync(
            "demo",
            MobileSyncRequest {
                activities: vec![activity],
                device: None,
            },
        )
        .await
        .map_err(|e| anyhow::anyhow!("demo sync failed: {e}"))?;
    info!("demo sync accepted: {} processed", response.processed_count);

    // Wait for the run to reach a terminal status.
    for _ in 0..100 {
        sleep(Duration::from_millis(100)).await;
        let run = engine
            .store
            .find_pipeline_run("demo", &activity_id, &pipeline_id)
            .await?;
        if let Some(run) = run {
            if run.status.is_terminal() {
                info!(
                    "demo run {} finished: {:?} with {} boosters",
                    run.run_id,
                    run.status,
                    run.boosters.len()
                );
                return Ok(());
            }
        }
    }
    anyhow::bail!("demo run did not finish in time")
}
