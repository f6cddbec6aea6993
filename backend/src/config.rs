use std::net::SocketAddr;
use std::str::FromStr;

#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Database connection string.
    pub database_url: String,

    /// Upper bound on pooled store connections.
    pub db_max_connections: u32,

    /// Address the HTTP surface listens on.
    pub bind_addr: SocketAddr,

    // =========================
    // Booking configuration
    // =========================
    /// Cadence (minutes) at which candidate slot start times are generated
    /// inside an open availability interval.
    ///
    /// Independent of the requested lesson duration: a 60 minute lesson
    /// with a 30 minute cadence yields 09:00, 09:30, 10:00, ...
    pub slot_step_minutes: u32,

    /// Currency used for top-ups and for instructors without one.
    pub default_currency: String,

    // =========================
    // Payment gateway
    // =========================
    /// Base URL of the Stripe-compatible gateway API.
    pub gateway_url: String,

    /// Bearer secret for outbound intent calls.
    ///
    /// Empty means outbound calls fail with a gateway error; inbound
    /// notifications still reconcile.
    pub gateway_secret_key: String,

    /// Timeout for a single outbound gateway round trip.
    pub gateway_timeout_secs: u64,

    /// Shared secret used to verify inbound notification signatures.
    pub webhook_secret: String,

    /// Maximum accepted age of a signed notification.
    pub webhook_tolerance_secs: i64,
}

impl AppConfig {
    /// Log format switch, readable before the rest of the config so that
    /// parse warnings reach an installed subscriber.
    pub fn json_logs_from_env() -> bool {
        dotenvy::dotenv().ok();
        std::env::var("APP_ENV").unwrap_or_default() == "production"
    }

    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://lessons_dev.db?mode=rwc".to_string());

        Self {
            database_url,
            db_max_connections: env_or("DB_MAX_CONNECTIONS", 16),
            bind_addr: env_or("BIND_ADDR", SocketAddr::from(([127, 0, 0, 1], 3000))),

            slot_step_minutes: env_or("SLOT_STEP_MINUTES", 30),
            default_currency: std::env::var("DEFAULT_CURRENCY")
                .unwrap_or_else(|_| "gbp".to_string()),

            gateway_url: std::env::var("PAYMENT_GATEWAY_URL")
                .unwrap_or_else(|_| "https://api.stripe.com".to_string()),
            gateway_secret_key: std::env::var("PAYMENT_GATEWAY_SECRET_KEY").unwrap_or_default(),
            gateway_timeout_secs: env_or("GATEWAY_TIMEOUT_SECS", 10),
            webhook_secret: std::env::var("PAYMENT_WEBHOOK_SECRET").unwrap_or_default(),
            webhook_tolerance_secs: env_or("WEBHOOK_TOLERANCE_SECS", 300),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(key, value = %raw, "unparseable config value; using default");
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[traced_test]
    #[test]
    fn unparseable_value_warns_and_falls_back() {
        // SAFETY: the key is unique to this test.
        unsafe { std::env::set_var("LESSONS_CONFIG_BAD_COUNT", "many") };

        assert_eq!(env_or("LESSONS_CONFIG_BAD_COUNT", 7u32), 7);
        assert!(logs_contain("unparseable config value; using default"));
    }

    #[test]
    fn missing_value_uses_default_silently() {
        assert_eq!(env_or("LESSONS_CONFIG_UNSET_KEY", 30u32), 30);
    }
}
