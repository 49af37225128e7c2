// Downstream booking API client
// Submits a finished draft and maps every failure into a recoverable
// SubmissionError.

use std::{env, fmt::Display, future::Future, str::FromStr, time::Duration};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    circuit_breaker::CircuitBreaker,
    draft::{AddOnSelection, BookingDraft, Contact, Passenger, PaymentMethod, TripType},
};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SubmissionError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("Circuit breaker open for {service_name}")]
    CircuitBreakerOpen {
        service_name: String,
        retry_after_ms: Option<u64>,
    },

    #[error("Booking rejected: {status_code} - {message}")]
    Rejected {
        status_code: u16,
        message: String,
        is_retryable: bool,
    },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Draft is not ready for submission: {0}")]
    IncompleteDraft(String),
}

impl SubmissionError {
    pub fn is_retryable(&self) -> bool {
        match self {
            SubmissionError::NetworkError(_) | SubmissionError::Timeout(_) => true,
            SubmissionError::Rejected { is_retryable, .. } => *is_retryable,
            SubmissionError::CircuitBreakerOpen { .. }
            | SubmissionError::InvalidResponse(_)
            | SubmissionError::IncompleteDraft(_) => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Initialization error: {0}")]
    InitError(String),
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff_ms: 200,
            max_backoff_ms: 5000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub reset_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 1,
            reset_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout_ms: u64,
    pub retry_config: RetryConfig,
    pub circuit_breaker_config: CircuitBreakerConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api".to_string(),
            api_key: String::new(),
            timeout_ms: 15_000,
            retry_config: RetryConfig::default(),
            circuit_breaker_config: CircuitBreakerConfig::default(),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> Result<T, ClientError>
where
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ClientError::ConfigError(format!("invalid {key}: {e}"))),
        Err(_) => {
            info!("{key} not set, using default");
            Ok(default)
        }
    }
}

impl ClientConfig {
    /// Overlay `BOOKING_API_*` environment variables on the defaults.
    pub fn from_env() -> Result<Self, ClientError> {
        let defaults = Self::default();

        let config = Self {
            base_url: env_or("BOOKING_API_BASE_URL", defaults.base_url)?,
            api_key: env_or("BOOKING_API_KEY", defaults.api_key)?,
            timeout_ms: env_or("BOOKING_API_TIMEOUT_MS", defaults.timeout_ms)?,
            retry_config: RetryConfig {
                max_retries: env_or("BOOKING_API_MAX_RETRIES", defaults.retry_config.max_retries)?,
                ..defaults.retry_config
            },
            circuit_breaker_config: defaults.circuit_breaker_config,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ClientError> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ClientError::ConfigError(format!(
                "base url must be http(s): {}",
                self.base_url
            )));
        }
        if self.timeout_ms == 0 {
            return Err(ClientError::ConfigError("timeout must be positive".to_string()));
        }
        Ok(())
    }
}

// Wire payload for the booking endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingSubmission {
    pub idempotency_key: String,
    pub trip_type: TripType,
    pub outbound_offer_id: String,
    pub inbound_offer_id: Option<String>,
    pub passengers: Vec<Passenger>,
    pub contact: Contact,
    pub add_ons: Vec<AddOnSelection>,
    pub promo_code: Option<String>,
    pub payment: PaymentDescriptor,
}

// Card numbers never leave the client in full
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PaymentDescriptor {
    #[serde(rename_all = "camelCase")]
    Card {
        holder_name: String,
        last_four: String,
        expiry: String,
    },
    Upi {
        vpa: String,
    },
    #[serde(rename_all = "camelCase")]
    NetBanking {
        bank_code: String,
    },
}

impl From<&PaymentMethod> for PaymentDescriptor {
    fn from(method: &PaymentMethod) -> Self {
        match method {
            PaymentMethod::Card(card) => {
                let digits: Vec<char> = card.number.chars().filter(|c| c.is_ascii_digit()).collect();
                let last_four = digits[digits.len().saturating_sub(4)..].iter().collect();
                PaymentDescriptor::Card {
                    holder_name: card.holder_name.trim().to_string(),
                    last_four,
                    expiry: format!("{:02}/{}", card.expiry_month, card.expiry_year),
                }
            }
            PaymentMethod::Upi { vpa } => PaymentDescriptor::Upi {
                vpa: vpa.trim().to_string(),
            },
            PaymentMethod::NetBanking { bank_code } => PaymentDescriptor::NetBanking {
                bank_code: bank_code.clone(),
            },
        }
    }
}

impl BookingSubmission {
    pub fn from_draft(draft: &BookingDraft) -> Result<Self, SubmissionError> {
        let outbound = draft
            .outbound
            .as_ref()
            .ok_or_else(|| SubmissionError::IncompleteDraft("no outbound offer".to_string()))?;
        let payment = draft
            .payment
            .as_ref()
            .ok_or_else(|| SubmissionError::IncompleteDraft("no payment method".to_string()))?;

        Ok(Self {
            idempotency_key: draft.idempotency_key.clone(),
            trip_type: draft.trip,
            outbound_offer_id: outbound.id.clone(),
            inbound_offer_id: draft.inbound.as_ref().map(|o| o.id.clone()),
            passengers: draft.passengers.clone(),
            contact: draft.contact.clone(),
            add_ons: draft.add_ons.clone(),
            promo_code: draft.promo_code.clone(),
            payment: payment.into(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Confirmation {
    pub booking_id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub confirmation_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(alias = "error")]
    message: Option<String>,
}

/// Map a raw HTTP status and body to the booking outcome.
pub fn parse_booking_response(status_code: u16, body: &str) -> Result<Confirmation, SubmissionError> {
    if (200..300).contains(&status_code) {
        let confirmation: Confirmation = serde_json::from_str(body)
            .map_err(|e| SubmissionError::InvalidResponse(e.to_string()))?;
        if confirmation.booking_id.trim().is_empty() {
            return Err(SubmissionError::InvalidResponse("empty booking id".to_string()));
        }
        return Ok(confirmation);
    }

    let message = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.message)
        .unwrap_or_else(|| body.trim().to_string());

    Err(SubmissionError::Rejected {
        status_code,
        message,
        is_retryable: status_code == 429 || status_code >= 500,
    })
}

#[async_trait]
pub trait BookingApi: Send + Sync + 'static {
    async fn submit(&self, submission: &BookingSubmission) -> Result<Confirmation, SubmissionError>;
}

// Exponential backoff with jitter
pub fn calculate_backoff(retry_attempt: u32, config: &RetryConfig) -> Duration {
    let base_backoff_ms = (config.initial_backoff_ms as f64
        * config.backoff_multiplier.powf(retry_attempt as f64))
    .min(config.max_backoff_ms as f64);

    let jitter = rand::random::<f64>() * config.jitter_factor * base_backoff_ms;
    let backoff_ms = base_backoff_ms * (1.0 - config.jitter_factor / 2.0) + jitter;

    Duration::from_millis(backoff_ms as u64)
}

pub struct HttpBookingClient {
    http: reqwest::Client,
    config: ClientConfig,
    breaker: Mutex<CircuitBreaker>,
}

impl HttpBookingClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| ClientError::InitError(e.to_string()))?;

        let cb = &config.circuit_breaker_config;
        let breaker = CircuitBreaker::new(
            "booking-api",
            cb.failure_threshold,
            cb.success_threshold,
            Duration::from_millis(cb.reset_timeout_ms),
        );

        Ok(Self {
            http,
            config,
            breaker: Mutex::new(breaker),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn endpoint(&self) -> String {
        format!("{}/bookings", self.config.base_url.trim_end_matches('/'))
    }

    async fn send_once(&self, submission: &BookingSubmission) -> Result<Confirmation, SubmissionError> {
        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .header("Idempotency-Key", &submission.idempotency_key)
            .json(submission)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| self.map_transport_error(e))?;

        parse_booking_response(status, &body)
    }

    fn map_transport_error(&self, err: reqwest::Error) -> SubmissionError {
        if err.is_timeout() {
            SubmissionError::Timeout(self.config.timeout_ms)
        } else {
            SubmissionError::NetworkError(err.to_string())
        }
    }
}

/// Drive `send_once` through the circuit breaker, retrying retryable
/// failures with backoff until `retry.max_retries` is spent.
pub async fn submit_with_retry<F, Fut>(
    breaker: &Mutex<CircuitBreaker>,
    retry: &RetryConfig,
    idempotency_key: &str,
    mut send_once: F,
) -> Result<Confirmation, SubmissionError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Confirmation, SubmissionError>>,
{
    let mut attempt = 0;

    loop {
        {
            let mut breaker = breaker.lock();
            if !breaker.should_allow_call() {
                return Err(SubmissionError::CircuitBreakerOpen {
                    service_name: breaker.service_name().to_string(),
                    retry_after_ms: breaker.retry_after().map(|d| d.as_millis() as u64),
                });
            }
        }

        debug!(attempt, key = %idempotency_key, "submitting booking");

        match send_once().await {
            Ok(confirmation) => {
                breaker.lock().success();
                info!(booking_id = %confirmation.booking_id, "booking confirmed");
                return Ok(confirmation);
            }
            Err(err) => {
                // Business rejections say nothing about backend health
                if err.is_retryable() {
                    breaker.lock().fail();
                }

                if !err.is_retryable() || attempt >= retry.max_retries {
                    warn!(attempt, error = %err, "booking submission failed");
                    return Err(err);
                }

                let backoff = calculate_backoff(attempt, retry);
                warn!(attempt, error = %err, backoff_ms = backoff.as_millis() as u64, "retrying booking submission");
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
        }
    }
}

#[async_trait]
impl BookingApi for HttpBookingClient {
    async fn submit(&self, submission: &BookingSubmission) -> Result<Confirmation, SubmissionError> {
        submit_with_retry(
            &self.breaker,
            &self.config.retry_config,
            &submission.idempotency_key,
            || self.send_once(submission),
        )
        .await
    }
}

// Scriptable in-process booking API
pub mod mock {
    use super::*;
    use std::{
        collections::VecDeque,
        sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    };

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum ServerMode {
        Normal,
        CompleteOutage,
    }

    pub struct MockBookingApi {
        outage: AtomicBool,
        request_count: AtomicUsize,
        fail_next_requests: AtomicUsize,
        delay_ms: AtomicUsize,
        booking_ids: Mutex<VecDeque<String>>,
        scripted_errors: Mutex<VecDeque<SubmissionError>>,
        received: Mutex<Vec<BookingSubmission>>,
    }

    impl Default for MockBookingApi {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MockBookingApi {
        pub fn new() -> Self {
            Self {
                outage: AtomicBool::new(false),
                request_count: AtomicUsize::new(0),
                fail_next_requests: AtomicUsize::new(0),
                delay_ms: AtomicUsize::new(0),
                booking_ids: Mutex::new(VecDeque::new()),
                scripted_errors: Mutex::new(VecDeque::new()),
                received: Mutex::new(vec![]),
            }
        }

        pub fn set_mode(&self, mode: ServerMode) {
            self.outage
                .store(mode == ServerMode::CompleteOutage, Ordering::SeqCst);
        }

        pub fn set_delay(&self, delay_ms: usize) {
            self.delay_ms.store(delay_ms, Ordering::SeqCst);
        }

        // Next `count` submissions fail with a network error
        pub fn fail_next_requests(&self, count: usize) {
            self.fail_next_requests.store(count, Ordering::SeqCst);
        }

        // Scripted errors are returned in order before any other outcome
        pub fn push_error(&self, error: SubmissionError) {
            self.scripted_errors.lock().push_back(error);
        }

        pub fn push_booking_id(&self, booking_id: impl Into<String>) {
            self.booking_ids.lock().push_back(booking_id.into());
        }

        pub fn request_count(&self) -> usize {
            self.request_count.load(Ordering::SeqCst)
        }

        pub fn received(&self) -> Vec<BookingSubmission> {
            self.received.lock().clone()
        }
    }

    #[async_trait]
    impl BookingApi for MockBookingApi {
        async fn submit(&self, submission: &BookingSubmission) -> Result<Confirmation, SubmissionError> {
            self.request_count.fetch_add(1, Ordering::SeqCst);
            self.received.lock().push(submission.clone());

            let delay = self.delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay as u64)).await;
            }

            if self.outage.load(Ordering::SeqCst) {
                return Err(SubmissionError::NetworkError("Service unavailable".to_string()));
            }

            if let Some(err) = self.scripted_errors.lock().pop_front() {
                return Err(err);
            }

            let pending = self.fail_next_requests.load(Ordering::SeqCst);
            if pending > 0 {
                self.fail_next_requests.store(pending - 1, Ordering::SeqCst);
                return Err(SubmissionError::NetworkError("connection reset".to_string()));
            }

            let booking_id = self
                .booking_ids
                .lock()
                .pop_front()
                .unwrap_or_else(|| format!("BK{}", rand::random::<u32>()));

            Ok(Confirmation {
                booking_id,
                status: Some("confirmed".to_string()),
                confirmation_code: Some(format!("CONF{}", rand::random::<u16>())),
            })
        }
    }
}
