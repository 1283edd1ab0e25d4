//! CLI application for the Ethereum block ingestion service.

use clap::{Args, Parser, Subcommand, ValueEnum};
use eth_ingestion::transport::{StdoutTransport, DEFAULT_LINE_QUEUE};
use eth_ingestion::{BusTransport, IngestionConfig, IngestionLoop, RetryConfig, RpcClient};
use eth_ingestion_telemetry::{init_logging, Metrics};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "eth-ingestion")]
#[command(about = "Publishes enriched Ethereum blocks to a message bus")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the ingestion service
    Ingest(IngestArgs),
}

/// Where blocks are published.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Bus {
    /// Kafka brokers (requires the `kafka` feature)
    Kafka,
    /// JSON lines on standard output
    Stdout,
}

#[cfg(feature = "kafka")]
const DEFAULT_BUS: Bus = Bus::Kafka;
#[cfg(not(feature = "kafka"))]
const DEFAULT_BUS: Bus = Bus::Stdout;

#[derive(Args)]
struct IngestArgs {
    /// Ethereum execution RPC URL
    #[arg(long, env = "QUICKNODE_URL")]
    node_url: String,

    /// Kafka bootstrap servers
    #[arg(long, env = "KAFKA_BOOTSTRAP_SERVERS", default_value = "localhost:9092")]
    kafka_bootstrap_servers: String,

    /// Topic blocks are published to
    #[arg(long, env = "KAFKA_TOPIC", default_value = "ethereum-blocks")]
    kafka_topic: String,

    /// Client id reported to the brokers
    #[arg(long, env = "KAFKA_CLIENT_ID", default_value = "ethereum_ingestion")]
    kafka_client_id: String,

    /// Local producer queue capacity before publishes are rejected
    #[arg(long, env = "KAFKA_QUEUE_MAX_MESSAGES", default_value = "100000")]
    queue_max_messages: usize,

    /// Message bus backend
    #[arg(long, env = "INGEST_BUS", value_enum, default_value_t = DEFAULT_BUS)]
    bus: Bus,

    /// Poll interval in seconds
    #[arg(long, env = "POLL_INTERVAL_SECONDS", default_value = "2")]
    poll_interval_seconds: u64,

    /// Maximum receipt fetches in flight per block
    #[arg(long, env = "MAX_CONCURRENT_RECEIPTS", default_value = "10")]
    max_concurrent_receipts: usize,

    /// Hard timeout for each RPC call, in seconds
    #[arg(long, env = "RPC_TIMEOUT_SECONDS", default_value = "10")]
    rpc_timeout_seconds: u64,

    /// Retries for an RPC call failing with a transport error
    #[arg(long, env = "RPC_MAX_RETRIES", default_value = "3")]
    rpc_max_retries: u32,

    /// Time allowed for pending deliveries on shutdown, in seconds
    #[arg(long, env = "FLUSH_TIMEOUT_SECONDS", default_value = "5")]
    flush_timeout_seconds: u64,

    /// Metrics bind address
    #[arg(long, env = "METRICS_BIND_ADDRESS", default_value = "0.0.0.0:9090")]
    metrics_bind_address: String,

    /// Log level
    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<String>,

    /// Sample output path for audit logs
    #[arg(long, env = "SAMPLE_OUTPUT_PATH")]
    sample_output_path: Option<String>,
}

impl IngestArgs {
    fn ingestion_config(&self) -> IngestionConfig {
        IngestionConfig {
            topic: self.kafka_topic.clone(),
            poll_interval: Duration::from_secs(self.poll_interval_seconds),
            max_concurrent_receipts: self.max_concurrent_receipts,
            rpc_timeout: Duration::from_secs(self.rpc_timeout_seconds),
            retry: RetryConfig {
                max_retries: self.rpc_max_retries,
                ..RetryConfig::default()
            },
            flush_timeout: Duration::from_secs(self.flush_timeout_seconds),
            sample_output_path: self.sample_output_path.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Commands::Ingest(args) => {
            init_logging(args.log_level.as_deref())?;
            run_ingestion(args).await?;
        }
    }

    Ok(())
}

async fn run_ingestion(args: IngestArgs) -> anyhow::Result<()> {
    info!(
        node_url = %args.node_url,
        kafka_bootstrap_servers = %args.kafka_bootstrap_servers,
        kafka_topic = %args.kafka_topic,
        kafka_client_id = %args.kafka_client_id,
        queue_max_messages = args.queue_max_messages,
        bus = ?args.bus,
        "Starting Ethereum ingestion service"
    );

    let metrics = Metrics::new()?;
    start_metrics_server(&args.metrics_bind_address, metrics.clone()).await?;

    let cancel = CancellationToken::new();
    spawn_shutdown_listener(cancel.clone());

    let config = args.ingestion_config();
    let rpc_client = RpcClient::new(&args.node_url, config.rpc_timeout)?;

    match args.bus {
        Bus::Stdout => {
            drive(rpc_client, StdoutTransport::new(DEFAULT_LINE_QUEUE), config, metrics, cancel).await;
        }
        Bus::Kafka => {
            #[cfg(feature = "kafka")]
            {
                use eth_ingestion::transport::{KafkaConfig, KafkaTransport};

                let transport = KafkaTransport::new(&KafkaConfig {
                    bootstrap_servers: args.kafka_bootstrap_servers.clone(),
                    client_id: args.kafka_client_id.clone(),
                    queue_max_messages: args.queue_max_messages,
                    ..KafkaConfig::default()
                })?;
                drive(rpc_client, transport, config, metrics, cancel).await;
            }
            #[cfg(not(feature = "kafka"))]
            anyhow::bail!("the kafka bus requires building with `--features kafka`");
        }
    }

    info!("Ingestion service stopped");
    Ok(())
}

async fn drive<T: BusTransport>(
    rpc_client: RpcClient,
    transport: T,
    config: IngestionConfig,
    metrics: Metrics,
    cancel: CancellationToken,
) {
    IngestionLoop::new(rpc_client, transport, config, metrics, cancel)
        .run()
        .await;
}

fn spawn_shutdown_listener(cancel: CancellationToken) {
    tokio::spawn(wait_for_shutdown(tokio::signal::ctrl_c(), cancel));
}

/// Cancels only once the signal actually fires; a listener that failed to
/// install leaves the loop running.
async fn wait_for_shutdown<S>(signal: S, cancel: CancellationToken)
where
    S: std::future::Future<Output = std::io::Result<()>>,
{
    match signal.await {
        Ok(()) => {
            info!("Received shutdown signal");
            cancel.cancel();
        }
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }
}

async fn start_metrics_server(addr: &str, metrics: Metrics) -> anyhow::Result<()> {
    use axum::{
        extract::State,
        http::StatusCode,
        response::IntoResponse,
        routing::get,
        Router,
    };
    use std::sync::Arc;

    let metrics = Arc::new(metrics);

    async fn metrics_handler(
        State(metrics): State<Arc<Metrics>>,
    ) -> Result<impl IntoResponse, StatusCode> {
        match metrics.gather() {
            Ok(body) => Ok((StatusCode::OK, body)),
            Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
        }
    }

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Metrics server listening on http://{}", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(())
}
