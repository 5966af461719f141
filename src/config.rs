/// Process configuration, sourced from the environment (§6, "Environment variables").
///
/// Required fields missing at startup are a fatal `ConfigurationMissing` error (§7);
/// `main` prints it to stderr and exits with code 1 (§6, "Exit codes").
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub elevenlabs: ElevenLabsConfig,
    pub twilio: TwilioConfig,
    pub cal_com: CalComConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Public HTTPS origin used to build TwiML `<Stream>` URLs and Twilio webhooks.
    pub public_url: String,
}

#[derive(Debug, Clone)]
pub struct ElevenLabsConfig {
    pub api_key: String,
    pub agent_id: String,
}

#[derive(Debug, Clone)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub phone_number: String,
}

#[derive(Debug, Clone)]
pub struct CalComConfig {
    pub api_key: String,
}

/// Bearer-token gate on mutating HTTP endpoints (§6, "Non-goals"). An empty
/// token means the gate is unconfigured, and mutating endpoints are
/// rejected with `503` rather than silently left open.
#[derive(Debug, Clone, Default)]
pub struct ApiConfig {
    pub token: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),
}

impl Config {
    /// Load configuration from the environment, best-effort loading a `.env`
    /// file first (same pattern as the teacher's `Config::load`).
    pub fn load() -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(path) => tracing::info!(path = %path.display(), "Loaded .env"),
            Err(dotenvy::Error::Io(_)) => tracing::debug!("No .env file found, using environment only"),
            Err(e) => tracing::warn!("Failed to parse .env: {e}"),
        }

        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port: u16 = std::env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8080);

        let public_url = std::env::var("PUBLIC_URL").or_else(|_| {
            std::env::var("RAILWAY_PUBLIC_DOMAIN").map(|domain| format!("https://{domain}"))
        });

        Ok(Config {
            server: ServerConfig {
                host,
                port,
                public_url: required(public_url.ok(), "PUBLIC_URL")?,
            },
            elevenlabs: ElevenLabsConfig {
                api_key: required_env("ELEVENLABS_API_KEY")?,
                agent_id: required_env("ELEVENLABS_AGENT_ID")?,
            },
            twilio: TwilioConfig {
                account_sid: required_env("TWILIO_ACCOUNT_SID")?,
                auth_token: required_env("TWILIO_AUTH_TOKEN")?,
                phone_number: required_env("TWILIO_PHONE_NUMBER")?,
            },
            cal_com: CalComConfig {
                api_key: required_env("CAL_COM_API_KEY")?,
            },
            api: ApiConfig {
                token: std::env::var("API_BEARER_TOKEN").unwrap_or_default(),
            },
        })
    }
}

fn required_env(name: &'static str) -> Result<String, ConfigError> {
    required(std::env::var(name).ok(), name)
}

fn required(value: Option<String>, name: &'static str) -> Result<String, ConfigError> {
    value.filter(|v| !v.is_empty()).ok_or(ConfigError::Missing(name))
}

/// Whether `NODE_ENV` indicates a production deployment.
pub fn is_production() -> bool {
    std::env::var("NODE_ENV").map(|v| v == "production").unwrap_or(false)
}
