use std::io::IsTerminal;
use std::net::TcpListener;

use clap::Parser;
use hyper::server::Server;
use s3s::service::S3ServiceBuilder;

use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    trace::{self, RandomIdGenerator, Sampler},
    Resource,
};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::prelude::*;

use cluster::{ScyllaStore, StoreConfig};
use service::ScyllaS3;

mod buckets;
mod chunks;
mod cluster;
mod error;
mod listing;
mod meta_store;
mod multipart;
mod objects;
mod parts;
mod service;

#[derive(Debug, Parser)]
#[command(version)]
struct Opt {
    /// Host name to listen on; doubles as the base domain for
    /// virtual-hosted-style requests.
    #[arg(long, default_value = "localhost")]
    hostname: String,

    /// Port number to listen on.
    #[arg(long, default_value = "8000")]
    port: u16,

    /// Comma-separated cluster contact points.
    #[arg(long = "scylla.hosts", default_value = "127.0.0.1")]
    scylla_hosts: String,

    /// Cluster CQL port.
    #[arg(long = "scylla.port", default_value = "9042")]
    scylla_port: u16,

    /// Chunk payload size in bytes for newly stored versions.
    #[arg(long = "chunk_size", default_value_t = 128 * 1024)]
    chunk_size: i32,

    /// Consecutive chunks per storage partition for newly stored versions.
    #[arg(long = "chunks_per_partition", default_value_t = 512)]
    chunks_per_partition: i32,

    /// Cluster authentication user.
    #[arg(long, default_value = "")]
    username: String,

    /// Cluster authentication password.
    #[arg(long, default_value = "")]
    password: String,

    /// Create the chunk table with the object-aware compaction strategy.
    #[arg(long = "compaction_strategy")]
    compaction_strategy: bool,

    /// Opentelemetry endpoint (http://ip:port)
    #[arg(long)]
    otlp_endpoint: Option<String>,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let opt = Opt::parse();
    setup_tracing(opt.otlp_endpoint.as_deref()).unwrap();

    let cfg = StoreConfig {
        hosts: opt
            .scylla_hosts
            .split(',')
            .map(|host| host.trim().to_owned())
            .filter(|host| !host.is_empty())
            .collect(),
        port: opt.scylla_port,
        username: opt.username.clone(),
        password: opt.password.clone(),
        chunk_size: opt.chunk_size,
        chunks_per_partition: opt.chunks_per_partition,
        compaction_strategy: opt.compaction_strategy,
    };
    info!("connecting to scylla storage at {}:{}", opt.scylla_hosts, opt.scylla_port);
    let store = ScyllaStore::connect(cfg).await?;

    let service = {
        let mut b = S3ServiceBuilder::new(ScyllaS3::new(store));

        // Enable parsing virtual-hosted-style requests
        b.set_base_domain(opt.hostname.clone());
        info!("virtual-hosted-style requests resolve against {}", opt.hostname);

        b.build()
    };

    let listener = TcpListener::bind((opt.hostname.as_str(), opt.port))?;
    let local_addr = listener.local_addr()?;

    let server = Server::from_tcp(listener)?.serve(service.into_shared().into_make_service());

    info!("server is running at http://{local_addr}");
    server.with_graceful_shutdown(shutdown_signal()).await?;

    info!("server is stopped");
    Ok(())
}

/// Console logging by default; span export to an OTLP collector when an
/// endpoint is given.
fn setup_tracing(otlp_endpoint: Option<&str>) -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    use tracing_subscriber::EnvFilter;

    let Some(endpoint) = otlp_endpoint else {
        tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(EnvFilter::from_default_env())
            .with_ansi(std::io::stdout().is_terminal())
            .init();
        return Ok(());
    };

    let resource = Resource::new(vec![KeyValue::new("service.name", env!("CARGO_PKG_NAME"))]);
    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint)
                .with_timeout(Duration::from_secs(3)),
        )
        .with_trace_config(
            trace::config()
                .with_sampler(Sampler::AlwaysOn)
                .with_id_generator(RandomIdGenerator::default())
                .with_max_events_per_span(64)
                .with_max_attributes_per_span(16)
                .with_resource(resource),
        )
        .install_batch(opentelemetry_sdk::runtime::Tokio)?;

    tracing_subscriber::Registry::default()
        .with(tracing_subscriber::filter::LevelFilter::DEBUG)
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_opentelemetry::layer().with_tracer(tracer))
        .try_init()?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
