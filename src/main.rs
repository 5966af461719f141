mod agent;
mod amd;
mod bridge;
mod config;
mod greeting;
mod http;
mod predictor;
mod prewarm;
mod telco;
mod tools;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{any, get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use agent::ElevenLabsSignedUrlMinter;
use amd::AmdRegistry;
use config::Config;
use predictor::CallRatePredictor;
use prewarm::UrlPrewarmCache;
use telco::TelcoClient;
use tools::ToolProxy;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Shared application state accessible from all handlers (§5, "Shared resources").
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub amd: AmdRegistry,
    pub prewarm: Arc<UrlPrewarmCache<ElevenLabsSignedUrlMinter>>,
    pub predictor: Arc<CallRatePredictor>,
    pub telco: Arc<TelcoClient>,
    pub tools: Arc<ToolProxy>,
}

fn main() {
    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(|s| s.as_str()) {
        Some("--version") => println!("voice-bridge {VERSION}"),
        Some("--help") | Some("-h") => print_usage(),
        Some(other) => {
            eprintln!("Unknown option: {other}");
            print_usage();
            std::process::exit(1);
        }
        None => {
            let rt = tokio::runtime::Runtime::new().expect("Failed to create tokio runtime");
            rt.block_on(server());
        }
    }
}

fn print_usage() {
    println!("voice-bridge {VERSION}");
    println!("Real-time voice bridge between a telephony media stream and a conversational-AI WebSocket");
    println!();
    println!("Usage: voice-bridge [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --version   Print version");
    println!("  --help, -h  Print this help message");
    println!();
    println!("Without options, starts the bridge server.");
}

async fn server() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voice_bridge=info,tower_http=info".into()),
        )
        .init();

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        public_url = %config.server.public_url,
        production = config::is_production(),
        "Starting voice-bridge"
    );

    let telco = Arc::new(TelcoClient::new(&config.twilio, &config.server.public_url));
    let tools = Arc::new(ToolProxy::new(config.cal_com.api_key.clone()));

    let minter = Arc::new(ElevenLabsSignedUrlMinter::new(
        config.elevenlabs.api_key.clone(),
        config.elevenlabs.agent_id.clone(),
    ));
    let prewarm = Arc::new(UrlPrewarmCache::new(minter));
    prewarm.fill().await;
    tracing::info!(size = prewarm.len().await, "URL prewarm cache filled");

    let predictor = Arc::new(CallRatePredictor::new());
    predictor.clone().spawn_loop(prewarm.clone());

    let amd = AmdRegistry::new();
    amd.clone().spawn_gc_loop();

    let state = AppState {
        config: config.clone(),
        amd,
        prewarm,
        predictor,
        telco,
        tools,
    };

    let app = Router::new()
        .route("/outbound-call", post(http::outbound::handle_outbound_call))
        .route("/end-call", post(http::outbound::handle_end_call))
        .route("/outbound-call-twiml", any(http::twiml::handle_outbound_call_twiml))
        .route("/incoming-call-eleven", any(http::twiml::handle_inbound_call))
        .route("/twilio/inbound_call", any(http::twiml::handle_inbound_call))
        .route("/call-status", post(http::call_status::handle_call_status))
        .route("/optimization-status", get(http::status::handle_optimization_status))
        .route("/", get(http::status::handle_root))
        .route("/outbound-media-stream", get(bridge::outbound_media_stream))
        .route("/media-stream", get(bridge::inbound_media_stream))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .expect("Invalid server address");

    tracing::info!(%addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind");

    axum::serve(listener, app).await.expect("Server error");
}
