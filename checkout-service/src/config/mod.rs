use anyhow::Result;
use dotenvy::dotenv;
use secrecy::Secret;
use serde::Deserialize;
use std::env;

#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub stripe: StripeConfig,
    pub checkout: CheckoutConfig,
    pub service_name: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Deserialize, Clone, Debug)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Deserialize, Clone, Debug)]
pub struct StripeConfig {
    pub secret_key: Secret<String>,
    pub webhook_secret: Secret<String>,
    pub api_base_url: String,
    /// Where the gateway sends the payer after checkout.
    pub success_url: String,
    pub cancel_url: String,
    /// Outbound gateway calls are a single attempt bounded by this timeout.
    pub request_timeout_secs: u64,
}

#[derive(Deserialize, Clone, Debug)]
pub struct CheckoutConfig {
    /// Currency applied to every order. Prices are stored in its minor unit.
    pub default_currency: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let host = env::var("CHECKOUT_SERVICE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("CHECKOUT_SERVICE_PORT")
            .unwrap_or_else(|_| "3006".to_string())
            .parse()?;

        let db_url = env::var("CHECKOUT_DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("CHECKOUT_DATABASE_URL must be set"))?;
        let max_connections = env::var("CHECKOUT_DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()?;
        let min_connections = env::var("CHECKOUT_DATABASE_MIN_CONNECTIONS")
            .unwrap_or_else(|_| "1".to_string())
            .parse()?;

        let stripe_secret_key = env::var("STRIPE_SECRET_KEY").unwrap_or_default();
        let stripe_webhook_secret = env::var("STRIPE_WEBHOOK_SECRET").unwrap_or_default();
        let stripe_api_base_url = env::var("STRIPE_API_BASE_URL")
            .unwrap_or_else(|_| "https://api.stripe.com/v1".to_string());
        let success_url = env::var("CHECKOUT_SUCCESS_URL")
            .unwrap_or_else(|_| "https://app.example.com/checkout/success".to_string());
        let cancel_url = env::var("CHECKOUT_CANCEL_URL")
            .unwrap_or_else(|_| "https://app.example.com/checkout/cancel".to_string());
        let request_timeout_secs = env::var("GATEWAY_REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()?;

        let default_currency =
            env::var("CHECKOUT_DEFAULT_CURRENCY").unwrap_or_else(|_| "usd".to_string());

        let log_level = env::var("CHECKOUT_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let otlp_endpoint = env::var("OTLP_ENDPOINT").ok();

        Ok(Self {
            server: ServerConfig { host, port },
            database: DatabaseConfig {
                url: Secret::new(db_url),
                max_connections,
                min_connections,
            },
            stripe: StripeConfig {
                secret_key: Secret::new(stripe_secret_key),
                webhook_secret: Secret::new(stripe_webhook_secret),
                api_base_url: stripe_api_base_url,
                success_url,
                cancel_url,
                request_timeout_secs,
            },
            checkout: CheckoutConfig { default_currency },
            service_name: "checkout-service".to_string(),
            log_level,
            otlp_endpoint,
        })
    }
}
