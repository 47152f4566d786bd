//! HTTP client for calling integrated services
//!
//! Every call resolves a `ServiceInfo`, then runs through the circuit
//! breaker registered for that `service_id`. A rejected call surfaces as
//! `Unavailable`; the breaker's own error never leaves this module.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use reqwest::{header, Client, Method, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::discovery::ServiceDiscovery;
use crate::error::mapping::{classify_http_error, map_http_error};
use crate::error::{IntegrationError, Result};
use crate::models::{ServiceInfo, ServiceType};
use crate::resilience::CircuitBreakerRegistry;

/// HTTP verbs used against integrated services
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<HttpMethod> for Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
            HttpMethod::Put => Method::PUT,
            HttpMethod::Delete => Method::DELETE,
        }
    }
}

/// Join a service base URL and an endpoint path with exactly one slash
pub fn build_url(base_url: &str, endpoint: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), endpoint.trim_start_matches('/'))
}

pub struct ServiceClient {
    discovery: Arc<ServiceDiscovery>,
    breakers: Arc<CircuitBreakerRegistry>,
    config: ClientConfig,
    /// Pooled HTTP session, created on first use
    session: Mutex<Option<Client>>,
}

impl ServiceClient {
    pub fn new(discovery: Arc<ServiceDiscovery>, breakers: Arc<CircuitBreakerRegistry>, config: ClientConfig) -> Self {
        Self {
            discovery,
            breakers,
            config,
            session: Mutex::new(None),
        }
    }

    pub fn discovery(&self) -> &Arc<ServiceDiscovery> {
        &self.discovery
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    pub async fn get(&self, service: &ServiceInfo, endpoint: &str) -> Result<Value> {
        self.request(service, HttpMethod::Get, endpoint, None, None).await
    }

    pub async fn post(&self, service: &ServiceInfo, endpoint: &str, body: &Value) -> Result<Value> {
        self.request(service, HttpMethod::Post, endpoint, Some(body), None).await
    }

    pub async fn put(&self, service: &ServiceInfo, endpoint: &str, body: &Value) -> Result<Value> {
        self.request(service, HttpMethod::Put, endpoint, Some(body), None).await
    }

    pub async fn delete(&self, service: &ServiceInfo, endpoint: &str) -> Result<Value> {
        self.request(service, HttpMethod::Delete, endpoint, None, None).await
    }

    /// Resolve the first available service of `service_type` and call it
    pub async fn request_by_type(
        &self,
        service_type: ServiceType,
        method: HttpMethod,
        endpoint: &str,
        body: Option<&Value>,
    ) -> Result<Value> {
        let service = self.discovery.require_by_type(service_type).await?;
        self.request(&service, method, endpoint, body, None).await
    }

    /// Call `endpoint` on `service` through its circuit breaker.
    /// `timeout` overrides the configured default for this call only.
    pub async fn request(
        &self,
        service: &ServiceInfo,
        method: HttpMethod,
        endpoint: &str,
        body: Option<&Value>,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let url = build_url(&service.base_url, endpoint);
        let breaker = self.breakers.get_or_create(&service.service_id);

        let result = breaker
            .execute_with(
                || self.send(&service.service_id, method, &url, body, timeout),
                IntegrationError::counts_as_breaker_failure,
            )
            .await;

        match result {
            Err(IntegrationError::CircuitOpen { retry_after, .. }) => {
                let message = match retry_after {
                    Some(wait) => format!("circuit open, retry in {:.1}s", wait.as_secs_f64()),
                    None => "circuit open, trial calls in progress".to_string(),
                };
                warn!(service_id = %service.service_id, url = %url, "Call rejected: {}", message);
                Err(IntegrationError::unavailable(service.service_id.clone(), message))
            }
            other => other,
        }
    }

    /// Drop the pooled session. The next call creates a fresh one.
    pub fn close(&self) {
        if self.session().take().is_some() {
            debug!("HTTP session closed");
        }
    }

    async fn send(
        &self,
        service_id: &str,
        method: HttpMethod,
        url: &str,
        body: Option<&Value>,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let client = self.http_client()?;
        let start = Instant::now();

        let mut request = client
            .request(method.into(), url)
            .timeout(timeout.unwrap_or(self.config.timeout));
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| transport_error(service_id, e))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| transport_error(service_id, e))?;

        debug!(
            service_id = %service_id,
            method = %method,
            url = %url,
            status = status.as_u16(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Service call completed"
        );

        if !status.is_success() {
            debug!(
                service_id = %service_id,
                url = %url,
                category = classify_http_error(status),
                "Service returned an error status"
            );
            return Err(map_http_error(status, &text, service_id));
        }
        if status == StatusCode::NO_CONTENT || text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }

    fn http_client(&self) -> Result<Client> {
        let mut session = self.session();
        if let Some(client) = session.as_ref() {
            return Ok(client.clone());
        }

        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::USER_AGENT,
            header::HeaderValue::from_str(&self.config.user_agent)
                .map_err(|e| IntegrationError::configuration(format!("Invalid user agent: {}", e)))?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(self.config.timeout)
            .gzip(true)
            .build()
            .map_err(|e| IntegrationError::configuration(format!("Failed to build HTTP client: {}", e)))?;

        *session = Some(client.clone());
        Ok(client)
    }

    fn session(&self) -> MutexGuard<'_, Option<Client>> {
        self.session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Classify a transport failure against the target service
fn transport_error(service_id: &str, err: reqwest::Error) -> IntegrationError {
    if err.is_timeout() {
        IntegrationError::timeout(service_id, format!("Request timed out: {}", err))
    } else if err.is_connect() {
        IntegrationError::connection(service_id, format!("Connection failed: {}", err))
    } else {
        IntegrationError::connection(service_id, format!("HTTP transport error: {}", err))
    }
}
