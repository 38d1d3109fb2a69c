use std::time::Duration;

use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Database connection string for client-local storage (parked carts).
    pub database_url: String,

    // =========================
    // Collaborator endpoints
    // =========================
    /// Base URL of the Reservation Service (reserve / release / commit).
    pub reservation_service_url: String,

    /// Base URL of the Order Service (createOrder).
    pub order_service_url: String,

    /// Base URL of the read-only Promotion Catalog.
    pub promotion_service_url: String,

    /// Per-request timeout applied to every collaborator call.
    ///
    /// A reservation call that exceeds this is treated as failed and the
    /// mutation that issued it is cancelled.
    pub http_timeout: Duration,

    // =========================
    // Terminal identity
    // =========================
    /// Staff member operating this terminal.
    ///
    /// When unset the terminal runs unattended (no identified actor) and
    /// items enter the cart without stock reservations.
    pub actor_id: Option<String>,

    /// Human-readable terminal label stored on parked carts.
    pub terminal_label: String,

    /// Parked cart to resume at startup. Without it the latest cart parked
    /// under `terminal_label` is resumed.
    pub resume_session_id: Option<Uuid>,

    // =========================
    // Shutdown
    // =========================
    /// Upper bound on how long the shutdown hook waits for the batch
    /// release to be acknowledged before letting the process exit.
    ///
    /// Delivery is not guaranteed either way; the Reservation Service
    /// expires anything left behind after its TTL.
    pub guardian_flush_timeout: Duration,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://checkout_dev.db?mode=rwc".to_string());

        Self {
            database_url,

            reservation_service_url: env_or("RESERVATION_SERVICE_URL", "http://localhost:8081"),
            order_service_url: env_or("ORDER_SERVICE_URL", "http://localhost:8082"),
            promotion_service_url: env_or("PROMOTION_SERVICE_URL", "http://localhost:8083"),
            http_timeout: Duration::from_millis(env_u64("HTTP_TIMEOUT_MS", 5_000)),

            actor_id: std::env::var("STAFF_ID").ok().filter(|s| !s.is_empty()),
            terminal_label: env_or("TERMINAL_LABEL", "till-1"),
            resume_session_id: std::env::var("TERMINAL_SESSION_ID")
                .ok()
                .and_then(|s| Uuid::parse_str(&s).ok()),

            guardian_flush_timeout: Duration::from_millis(env_u64(
                "GUARDIAN_FLUSH_TIMEOUT_MS",
                1_500,
            )),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
