use std::sync::Arc;

use actix_web::{App, HttpServer};
use anyhow::Context;
use opentelemetry::global;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::runtime::TokioCurrentThread;
use paperclip::actix::{web, OpenApiExt};
use tracing_actix_web::TracingLogger;
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};

use library_circulation::app_config::config_app;
use library_circulation::catalog_store::{
    CatalogStore, InMemoryCatalogStore, PostgresCatalogStore,
};
use library_circulation::settings::Settings;
use library_circulation::Library;

fn init_telemetry() -> anyhow::Result<()> {
    let app_name = "library_circulation";

    // Spans are exported to Jaeger in batches
    global::set_text_map_propagator(TraceContextPropagator::new());
    #[allow(deprecated)]
    let tracer = opentelemetry_jaeger::new_agent_pipeline()
        .with_service_name(app_name)
        .install_batch(TokioCurrentThread)
        .context("Failed to install OpenTelemetry tracer")?;

    // Tunable via `RUST_LOG`
    let env_filter = EnvFilter::try_from_default_env().unwrap_or(EnvFilter::new("info"));
    let telemetry = tracing_opentelemetry::layer().with_tracer(tracer);
    let formatting_layer = BunyanFormattingLayer::new(app_name.into(), std::io::stdout);
    let subscriber = Registry::default()
        .with(env_filter)
        .with(telemetry)
        .with(JsonStorageLayer)
        .with(formatting_layer);
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to install `tracing` subscriber")
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    init_telemetry()?;
    let settings = Settings::load().context("Failed to load settings")?;
    tracing::info!(
        host = %settings.server.host,
        port = settings.server.port,
        in_memory = settings.storage.use_in_memory,
        "Starting library circulation server"
    );

    let store: Arc<dyn CatalogStore> = if settings.storage.use_in_memory {
        Arc::new(InMemoryCatalogStore::default())
    } else {
        Arc::new(
            PostgresCatalogStore::init(settings.storage.postgres_config())
                .await
                .context("Failed to init postgres")?,
        )
    };
    let library = Arc::new(Library::new(store));

    HttpServer::new(move || {
        App::new()
            .wrap_api()
            .app_data(web::Data::new(library.clone()))
            .wrap(TracingLogger::default())
            .configure(config_app)
            .with_json_spec_at("/apispec/v2")
            .build()
    })
    .bind((settings.server.host.as_str(), settings.server.port))
    .context("Failed to bind server address")?
    .run()
    .await
    .context("Server failed")
}
