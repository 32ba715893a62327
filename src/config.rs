use std::env;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    /// Capacity of each subscription queue on the event gateway.
    pub event_queue_size: usize,
    /// Capacity of the broadcast buffer feeding the websocket event feed.
    pub event_feed_buffer: usize,
    /// Deliveries per message before it is moved to the dead-letter store.
    pub max_event_attempts: u32,
    pub redelivery_backoff_ms: u64,
    /// Base URLs of the order and restaurant collaborators. When unset the
    /// service boots against the in-memory catalog.
    pub order_service_url: Option<String>,
    pub restaurant_service_url: Option<String>,
    pub matching: MatchingPolicy,
}

#[derive(Debug, Clone)]
pub struct MatchingPolicy {
    pub max_courier_distance_km: f64,
    pub candidate_limit: usize,
    pub prep_minutes: i64,
    pub transit_minutes: i64,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            event_queue_size: parse_or_default("EVENT_QUEUE_SIZE", 1024)?,
            event_feed_buffer: parse_or_default("EVENT_FEED_BUFFER", 1024)?,
            max_event_attempts: parse_or_default("MAX_EVENT_ATTEMPTS", 5)?,
            redelivery_backoff_ms: parse_or_default("REDELIVERY_BACKOFF_MS", 500)?,
            order_service_url: env::var("ORDER_SERVICE_URL").ok(),
            restaurant_service_url: env::var("RESTAURANT_SERVICE_URL").ok(),
            matching: MatchingPolicy {
                max_courier_distance_km: parse_or_default("MAX_COURIER_DISTANCE_KM", 10.0)?,
                candidate_limit: parse_or_default("MATCHING_CANDIDATE_LIMIT", 10)?,
                prep_minutes: parse_or_default("ETA_PREP_MINUTES", 30)?,
                transit_minutes: parse_or_default("ETA_TRANSIT_MINUTES", 20)?,
            },
        })
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
