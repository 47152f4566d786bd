//! Integration facade
//!
//! The composition root of the runtime and the only surface the HTTP layer
//! talks to. Owns the breaker registry, discovery, the service client and
//! the mediator, and wires them together.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::client::ServiceClient;
use crate::config::{IntegrationConfig, WorkflowConfig};
use crate::discovery::ServiceDiscovery;
use crate::error::{IntegrationError, Result};
use crate::mediator::RequestMediator;
use crate::models::{
    HealthStatus, ServiceHealth, ServiceInfo, ServiceStatus, ServiceType, SystemHealth, WorkflowRequest,
    WorkflowResponse,
};
use crate::resilience::CircuitBreakerRegistry;
use crate::util::generate_id;
use crate::workflows::{self, WorkflowContext};

pub const EVENT_SERVICE_REGISTERED: &str = "event.service_registered";
pub const EVENT_SERVICE_UNREGISTERED: &str = "event.service_unregistered";
pub const EVENT_SERVICE_STATUS_CHANGED: &str = "event.service_status_changed";

pub struct IntegrationFacade {
    discovery: Arc<ServiceDiscovery>,
    breakers: Arc<CircuitBreakerRegistry>,
    client: Arc<ServiceClient>,
    mediator: Arc<RequestMediator>,
    workflow_config: WorkflowConfig,
}

impl IntegrationFacade {
    /// Wire a facade around an existing discovery service
    pub fn new(discovery: Arc<ServiceDiscovery>, config: &IntegrationConfig) -> Self {
        let breakers = Arc::new(CircuitBreakerRegistry::new(config.circuit_breaker.clone()));
        let client = Arc::new(ServiceClient::new(
            Arc::clone(&discovery),
            Arc::clone(&breakers),
            config.client.clone(),
        ));

        Self {
            discovery,
            breakers,
            client,
            mediator: Arc::new(RequestMediator::new()),
            workflow_config: config.workflow.clone(),
        }
    }

    /// Build discovery for the configured backend and wire a facade around it
    pub async fn from_config(config: &IntegrationConfig) -> Result<Self> {
        let discovery = Arc::new(ServiceDiscovery::from_config(config.discovery.clone()).await?);
        Ok(Self::new(discovery, config))
    }

    pub fn discovery(&self) -> &Arc<ServiceDiscovery> {
        &self.discovery
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    pub fn client(&self) -> &Arc<ServiceClient> {
        &self.client
    }

    pub fn mediator(&self) -> &Arc<RequestMediator> {
        &self.mediator
    }

    pub fn workflow_context(&self) -> WorkflowContext {
        WorkflowContext::new(
            Arc::clone(&self.discovery),
            Arc::clone(&self.client),
            self.workflow_config.clone(),
        )
    }

    /// Register the built-in workflows with the mediator
    pub fn register_default_workflows(&self) {
        workflows::register_default_workflows(&self.mediator, &self.workflow_context());
    }

    /// Start background work (the heartbeat monitor)
    pub fn start(&self) -> bool {
        self.discovery.start_health_monitor()
    }

    /// Stop background work and release the HTTP session
    pub async fn shutdown(&self) {
        self.discovery.stop_health_monitor().await;
        self.client.close();
        info!("Integration facade shut down");
    }

    pub async fn register_service(&self, info: ServiceInfo) -> Result<ServiceInfo> {
        let info = self.discovery.register(info).await?;
        self.notify(
            EVENT_SERVICE_REGISTERED,
            json!({
                "service_id": info.service_id,
                "name": info.name,
                "type": info.service_type,
                "base_url": info.base_url,
            }),
        )
        .await;
        Ok(info)
    }

    /// Returns whether the service was registered
    pub async fn unregister_service(&self, service_id: &str) -> Result<bool> {
        let removed = self.discovery.unregister(service_id).await?;
        if removed {
            self.notify(EVENT_SERVICE_UNREGISTERED, json!({ "service_id": service_id }))
                .await;
        }
        Ok(removed)
    }

    pub async fn get_service(&self, service_id: &str) -> Result<Option<ServiceInfo>> {
        self.discovery.get(service_id).await
    }

    pub async fn find_services(
        &self,
        service_type: Option<ServiceType>,
        include_offline: bool,
    ) -> Result<Vec<ServiceInfo>> {
        self.discovery.find(service_type, include_offline).await
    }

    pub async fn update_service_status(&self, service_id: &str, status: ServiceStatus) -> Result<Option<ServiceInfo>> {
        let previous = self.discovery.get(service_id).await?.map(|info| info.status);
        let updated = self.discovery.update_status(service_id, status).await?;

        if updated.is_some() && previous != Some(status) {
            self.notify(
                EVENT_SERVICE_STATUS_CHANGED,
                json!({
                    "service_id": service_id,
                    "previous_status": previous,
                    "status": status,
                }),
            )
            .await;
        }
        Ok(updated)
    }

    /// Heartbeats are frequent and are not broadcast
    pub async fn heartbeat(&self, service_id: &str) -> Result<Option<ServiceInfo>> {
        self.discovery.update_heartbeat(service_id).await
    }

    /// Run a workflow through the mediator. Always produces a response;
    /// failures are reported as `FAILED` with populated `errors`.
    pub async fn execute_workflow(&self, mut request: WorkflowRequest) -> WorkflowResponse {
        let workflow_id = request.workflow_id.get_or_insert_with(generate_id).clone();
        let workflow_type = request.workflow_type.clone();
        let key = workflow_type.request_key();
        let start = Instant::now();

        info!(workflow_id = %workflow_id, workflow_type = %workflow_type, "Executing workflow");

        let result = match serde_json::to_value(&request) {
            Ok(payload) => self.mediator.send(&key, payload).await,
            Err(e) => Err(e.into()),
        };
        let execution_time = start.elapsed().as_secs_f64();

        let response = match result {
            Ok(result) => {
                info!(
                    workflow_id = %workflow_id,
                    workflow_type = %workflow_type,
                    execution_time,
                    "Workflow completed"
                );
                WorkflowResponse::completed(workflow_id, execution_time, result)
            }
            Err(e) => {
                let e = match e {
                    IntegrationError::UnknownRequestType(_) => {
                        IntegrationError::workflow(format!("Unknown workflow type: {}", workflow_type))
                    }
                    other => other,
                };
                error!(
                    workflow_id = %workflow_id,
                    workflow_type = %workflow_type,
                    execution_time,
                    error = %e,
                    "Workflow failed"
                );
                WorkflowResponse::failed(workflow_id, execution_time, vec![e.to_string()])
            }
        };

        metrics::histogram!(
            "integration_workflow_duration_seconds",
            execution_time,
            "workflow_type" => workflow_type.to_string(),
            "status" => response.status.as_str()
        );
        response
    }

    /// Like `execute_workflow`, but a FAILED response becomes an error for
    /// the HTTP layer to translate into a status code
    pub async fn try_execute_workflow(&self, request: WorkflowRequest) -> Result<WorkflowResponse> {
        let response = self.execute_workflow(request).await;
        if response.is_success() {
            return Ok(response);
        }
        Err(IntegrationError::Workflow {
            workflow_id: Some(response.workflow_id),
            message: response.errors.join("; "),
        })
    }

    /// Snapshot of every known service and every circuit breaker
    pub async fn get_system_health(&self) -> Result<SystemHealth> {
        let services = self.discovery.find(None, true).await?;
        let status = HealthStatus::rollup(services.iter().map(|info| &info.status));

        Ok(SystemHealth {
            status,
            timestamp: Utc::now(),
            services: services.iter().map(ServiceHealth::from).collect(),
            circuit_breakers: self.breakers.snapshots(),
        })
    }

    /// Broadcast a service event; subscribers see the event name under `event`
    async fn notify(&self, event_type: &str, mut event: Value) {
        if let Some(fields) = event.as_object_mut() {
            fields.insert("event".to_string(), Value::String(event_type.to_string()));
        }
        let outcomes = self.mediator.broadcast(event_type, event).await;
        let failed = outcomes.values().filter(|outcome| !outcome.is_success()).count();
        if failed > 0 {
            warn!(event_type = %event_type, failed, delivered = outcomes.len(), "Some event handlers failed");
        } else {
            debug!(event_type = %event_type, delivered = outcomes.len(), "Event broadcast");
        }
    }
}
