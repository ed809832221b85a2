use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use axum::{
    error_handling::HandleErrorLayer,
    routing::{get, post},
    Extension, Json, Router,
};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;

use plinth::{
    internal_error, validate, validate_path, validate_request, ComponentRegistry, Docs,
    DocumentExists, Engine, FieldRule, Injected, NormalizedPath, Provider, ProviderCtxBuilder,
    ProviderSet, RegistryBuilder, Schema, Source, Validated, DOCUMENT_EXISTS,
};
use runtime::{AppConfig, AppConfigProvider, CliArgs};

mod shutdown;

/// Plinth demo server - registry, validation and injection end to end
#[derive(Parser)]
#[command(name = "plinth-server")]
#[command(about = "Plinth demo server")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port for HTTP server (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Print current configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Log verbosity level (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server
    Run,
    /// Check configuration
    Check,
}

// Adapter making AppConfigProvider implement plinth::ConfigProvider.
struct PlinthConfigAdapter(Arc<AppConfigProvider>);

impl plinth::ConfigProvider for PlinthConfigAdapter {
    fn get_component_config(&self, component_name: &str) -> Option<&serde_json::Value> {
        self.0.get_component_config(component_name)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let args = CliArgs {
        config: cli.config.as_ref().map(|p| p.to_string_lossy().to_string()),
        port: cli.port,
        print_config: cli.print_config,
        verbose: cli.verbose,
    };

    let mut config = AppConfig::load_or_default(cli.config.as_deref())?;
    config.apply_cli_overrides(&args);

    let logging_config = config.logging.as_ref().cloned().unwrap_or_default();
    runtime::init_logging_from_config(&logging_config, Path::new(&config.server.home_dir));
    tracing::info!("Plinth server starting");

    if cli.print_config {
        println!("{}", config.to_yaml()?);
        return Ok(());
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_server(config).await,
        Commands::Check => check_config(config),
    }
}

async fn run_server(config: AppConfig) -> Result<()> {
    tracing::info!("Initializing components...");

    let token = CancellationToken::new();
    let config_provider = Arc::new(PlinthConfigAdapter(Arc::new(AppConfigProvider::new(
        config.clone(),
    ))));

    let ctx = ProviderCtxBuilder::new(token.clone())
        .with_config_provider(config_provider)
        .build();

    let mut builder = RegistryBuilder::new();
    builder.register_set(&ctx, &core_providers()).await?;
    let registry = Arc::new(builder.freeze());
    tracing::info!(components = registry.len(), "component registry frozen");

    let mut app = router(registry);

    if config.server.timeout_sec > 0 {
        app = app.layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(|err: tower::BoxError| async move {
                    internal_error(format!("request aborted: {err}"))
                }))
                .timeout(Duration::from_secs(config.server.timeout_sec)),
        );
    }

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "listening");

    let shutdown_token = token.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = shutdown::wait_for_shutdown().await {
                tracing::error!(error = %e, "shutdown signal listener failed");
            }
            tracing::info!("shutdown requested");
            shutdown_token.cancel();
        })
        .await?;

    tracing::info!("Plinth server stopped");
    Ok(())
}

fn check_config(config: AppConfig) -> Result<()> {
    tracing::info!("Checking configuration...");
    println!("Configuration check passed");
    println!("{}", config.to_yaml()?);
    Ok(())
}

// ---- providers ----

/// In-memory `document_exists` collaborator: collection name → known ids,
/// seeded from the component's config section.
struct MemoryStore {
    collections: HashMap<String, HashSet<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct MemoryStoreConfig {
    #[serde(default)]
    collections: HashMap<String, Vec<String>>,
}

#[async_trait]
impl DocumentExists for MemoryStore {
    async fn exists(&self, collection: &str, value: &Value) -> Result<bool> {
        let id = value.as_str().unwrap_or_default();
        Ok(self
            .collections
            .get(collection)
            .map(|ids| ids.contains(id))
            .unwrap_or(false))
    }
}

/// The manifest: providers initialize in this order, each awaited to
/// completion before the next.
fn core_providers() -> ProviderSet {
    ProviderSet::new("core").with(Provider::new_arc(DOCUMENT_EXISTS, |ctx| async move {
        let cfg: MemoryStoreConfig = ctx.component_config(DOCUMENT_EXISTS);
        let collections: HashMap<String, HashSet<String>> = cfg
            .collections
            .into_iter()
            .map(|(name, ids)| (name, ids.into_iter().collect()))
            .collect();
        tracing::info!(collections = collections.len(), "memory store ready");
        Ok(Arc::new(MemoryStore { collections }) as Arc<dyn DocumentExists>)
    }))
}

// ---- routes ----

fn router(registry: Arc<ComponentRegistry>) -> Router {
    let engine = Arc::new(Engine::with_builtins());

    let profile_schema = Schema::builder()
        .field(
            "profile_id",
            FieldRule::new()
                .typed("object_id")
                .coerce("object_id")
                .required()
                .check(
                    "check_existence",
                    json!({
                        "name": "profiles",
                        "map": { "profiles": { "name": "profiles", "not_found": "User not found" } }
                    }),
                ),
        )
        .build();

    let stat_schema = Schema::builder()
        .field(
            "stat",
            FieldRule::new()
                .typed("string")
                .check("allowed_path", json!(["likes", "views"])),
        )
        .build();

    let post_body_schema = Schema::builder()
        .field("title", FieldRule::new().typed("string").required())
        .field(
            "author_id",
            FieldRule::new().typed("object_id").coerce("object_id").required(),
        )
        .field(
            "draft",
            FieldRule::new().typed("boolean").coerce("boolean"),
        )
        .build();

    let post_query_schema = Schema::builder()
        .field("notify", FieldRule::new().typed("boolean").coerce("boolean"))
        .build();

    let search_schema = Schema::builder()
        .field("q", FieldRule::new().typed("string").required())
        .build();

    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route(
            "/profiles/{profile_id}",
            get(get_profile).layer(validate_path(engine.clone(), profile_schema)),
        )
        .route(
            "/stats/{stat}",
            get(get_stat).layer(validate_path(engine.clone(), stat_schema)),
        )
        .route(
            "/posts",
            post(create_post).layer(
                ServiceBuilder::new()
                    .layer(validate_request(engine.clone(), post_body_schema, Source::Json))
                    .layer(validate_request(engine.clone(), post_query_schema, Source::Query)),
            ),
        )
        .route(
            "/search",
            get(search).layer(validate(engine, search_schema, Source::Query).expose()),
        )
        .layer(Extension(registry))
}

async fn get_profile(NormalizedPath(params): NormalizedPath) -> Json<Value> {
    Json(Value::Object(params))
}

async fn get_stat(
    NormalizedPath(params): NormalizedPath,
    store: Injected<dyn DocumentExists>,
) -> Json<Value> {
    let stat = params.get("stat").cloned().unwrap_or_default();
    let tracked = store.exists("stats", &stat).await.unwrap_or(false);
    Json(json!({
        "stat": stat,
        "tracked": tracked,
        "sort": plinth::query::sort(&["COUNT", "name"]),
        "extract": plinth::query::facet_extract("buckets", "count"),
    }))
}

async fn create_post(validated: Validated) -> Json<Value> {
    Json(json!({
        "accepted": true,
        "post": validated.get("json"),
        "options": validated.get("query"),
    }))
}

async fn search(docs: Docs) -> Json<Value> {
    Json(json!({ "criteria": docs.0.get("query") }))
}
