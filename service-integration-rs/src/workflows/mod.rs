//! Cross-service workflows
//!
//! A workflow is a stateless handler: it takes a `WorkflowRequest`, makes a
//! sequence of remote calls through discovery and the service client, and
//! returns a JSON result. Any failing step fails the whole workflow; nothing
//! already computed is persisted or rolled back.

mod agent_task;
mod project_planning;

pub use agent_task::AgentTaskExecutionWorkflow;
pub use project_planning::{assign_tasks_round_robin, CreatedAgent, PlannedTask, ProjectPlanningWorkflow, TaskAssignment};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::client::{HttpMethod, ServiceClient};
use crate::config::WorkflowConfig;
use crate::discovery::ServiceDiscovery;
use crate::error::{IntegrationError, Result};
use crate::mediator::{RequestHandler, RequestMediator};
use crate::models::{ServiceInfo, ServiceType, WorkflowRequest, WorkflowType};

/// Remote execution statuses after which polling stops
pub const TERMINAL_STATUSES: [&str; 4] = ["COMPLETED", "FAILED", "CANCELLED", "ERROR"];

/// Everything a workflow needs to reach other services
#[derive(Clone)]
pub struct WorkflowContext {
    pub discovery: Arc<ServiceDiscovery>,
    pub client: Arc<ServiceClient>,
    pub config: WorkflowConfig,
}

impl WorkflowContext {
    pub fn new(discovery: Arc<ServiceDiscovery>, client: Arc<ServiceClient>, config: WorkflowConfig) -> Self {
        Self {
            discovery,
            client,
            config,
        }
    }

    /// Resolve a target of `service_type`, failing the step if none is available
    pub async fn resolve(&self, step: &str, service_type: ServiceType) -> Result<ServiceInfo> {
        self.discovery
            .require_by_type(service_type)
            .await
            .map_err(|e| IntegrationError::workflow_step(step, e))
    }

    /// Poll `endpoint` on `service` until its `status` is terminal.
    ///
    /// Gives up with `Timeout` after `max_poll_duration`, or after the
    /// request's `timeout_secs` option if that is shorter.
    pub async fn poll_until_terminal(
        &self,
        request: &WorkflowRequest,
        service: &ServiceInfo,
        endpoint: &str,
    ) -> Result<Value> {
        let mut limit = self.config.max_poll_duration;
        if let Some(secs) = request.timeout_secs().filter(|secs| *secs < limit.as_secs_f64()) {
            limit = Duration::from_secs_f64(secs);
        }
        let deadline = Instant::now() + limit;
        let mut polls = 0u32;

        loop {
            // A slow poll may not outlive the deadline either
            let remaining = deadline.saturating_duration_since(Instant::now());
            let payload = self
                .client
                .request(service, HttpMethod::Get, endpoint, None, Some(remaining))
                .await?;
            polls += 1;

            let status = remote_status(&payload);
            if let Some(status) = status.as_deref().filter(|s| is_terminal(s)) {
                debug!(service_id = %service.service_id, endpoint = %endpoint, status, polls, "Remote execution finished");
                return Ok(payload);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(IntegrationError::timeout(
                    service.service_id.clone(),
                    format!(
                        "{} still {} after {:.1}s of polling",
                        endpoint,
                        status.as_deref().unwrap_or("without status"),
                        limit.as_secs_f64()
                    ),
                ));
            }
            tokio::time::sleep(self.config.poll_interval.min(deadline - now)).await;
        }
    }
}

/// Upper-cased `status` field of a remote payload
pub fn remote_status(payload: &Value) -> Option<String> {
    payload.get("status").and_then(Value::as_str).map(str::to_uppercase)
}

pub fn is_terminal(status: &str) -> bool {
    TERMINAL_STATUSES.contains(&status)
}

/// First string (or number) found under any of `fields`
pub(crate) fn id_field(payload: &Value, fields: &[&str]) -> Option<String> {
    fields.iter().find_map(|field| match payload.get(*field) {
        Some(Value::String(id)) if !id.is_empty() => Some(id.clone()),
        Some(Value::Number(id)) => Some(id.to_string()),
        _ => None,
    })
}

/// A workflow that can be registered with the mediator
#[async_trait]
pub trait Workflow: Send + Sync {
    fn workflow_type(&self) -> WorkflowType;

    async fn run(&self, request: WorkflowRequest) -> Result<Value>;
}

/// Adapts a workflow to the mediator's JSON handler interface
struct WorkflowHandler {
    workflow: Arc<dyn Workflow>,
}

#[async_trait]
impl RequestHandler for WorkflowHandler {
    async fn handle(&self, request: Value) -> Result<Value> {
        let request: WorkflowRequest = serde_json::from_value(request)
            .map_err(|e| IntegrationError::workflow(format!("Malformed workflow request: {}", e)))?;
        let workflow_id = request.workflow_id.clone();

        let result = self.workflow.run(request).await;
        match (result, workflow_id) {
            (Err(e), Some(id)) => Err(e.with_workflow_id(id)),
            (result, _) => result,
        }
    }
}

/// Register `workflow` under `workflow.<TYPE>`
pub fn register_workflow(mediator: &RequestMediator, workflow: Arc<dyn Workflow>) {
    let key = workflow.workflow_type().request_key();
    info!(request_type = %key, "Registering workflow");
    mediator.register_handler(key, Arc::new(WorkflowHandler { workflow }));
}

/// Register the built-in workflows
pub fn register_default_workflows(mediator: &RequestMediator, context: &WorkflowContext) {
    register_workflow(mediator, Arc::new(AgentTaskExecutionWorkflow::new(context.clone())));
    register_workflow(mediator, Arc::new(ProjectPlanningWorkflow::new(context.clone())));
}
