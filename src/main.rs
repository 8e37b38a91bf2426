use std::time::Duration;

use actix_web::{
    get, middleware, web::Data, App, HttpRequest, HttpResponse, HttpServer, Responder,
};
use clap::Parser;
use kube::Client;
use prometheus::{Encoder, TextEncoder};
use tracing::error;

use pullup_operator::{controllers, telemetry, State};
use pullup_operator::telemetry::LogFormat;

#[derive(Debug, clap::Parser)]
struct Arguments {
    /// Only watch ResourceSets in this namespace
    #[arg(long, env = "PULLUP_NAMESPACE")]
    namespace: Option<String>,

    /// Address of the health and metrics server
    #[arg(long, env = "PULLUP_BIND_ADDRESS", default_value = "0.0.0.0:8080")]
    bind_address: String,

    /// Default log filter, used when RUST_LOG is not set
    #[arg(long, env = "PULLUP_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[arg(long, env = "PULLUP_LOG_FORMAT", value_enum, default_value_t = LogFormat::Compact)]
    log_format: LogFormat,

    /// Seconds to wait before retrying a failed reconciliation
    #[arg(long, env = "PULLUP_REQUEUE_INTERVAL", default_value_t = 30)]
    requeue_interval: u64,
}

#[get("/metrics")]
async fn metrics(c: Data<State>, _req: HttpRequest) -> impl Responder {
    let metrics = c.metrics();
    let encoder = TextEncoder::new();
    let mut buffer = vec![];
    match encoder.encode(&metrics, &mut buffer) {
        Ok(()) => HttpResponse::Ok().body(buffer),
        Err(e) => {
            error!("Failed to encode metrics: {e}");
            HttpResponse::InternalServerError().finish()
        }
    }
}

#[get("/health")]
async fn health(_: HttpRequest) -> impl Responder {
    HttpResponse::Ok().json("healthy")
}

#[get("/")]
async fn index(c: Data<State>, _req: HttpRequest) -> impl Responder {
    let d = c.diagnostics().await;
    HttpResponse::Ok().json(&d)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Arguments = Arguments::parse();

    telemetry::init(&args.log_level, args.log_format)?;

    let client = Client::try_default().await?;

    // Initialize Kubernetes controller state
    let state = State::new(
        args.namespace,
        Duration::from_secs(args.requeue_interval),
    );
    let controller = controllers::run(client, state.clone());
    tokio::pin!(controller);

    // Start web server
    let server = HttpServer::new(move || {
        App::new()
            .app_data(Data::new(state.clone()))
            .wrap(middleware::Logger::default().exclude("/health"))
            .service(index)
            .service(health)
            .service(metrics)
    })
    .bind(&args.bind_address)?
    .shutdown_timeout(5)
    .run();

    tokio::pin!(server);

    // Both runtimes implements graceful shutdown, so poll until both are done
    let (controller, server) = tokio::join!(controller, server);
    controller?;
    server?;
    Ok(())
}
