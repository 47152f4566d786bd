//! Data model shared by discovery, the mediator and workflows
//!
//! Everything here is plain serialisable data. The JSON shapes are the ones
//! stored in the discovery backend and returned to the HTTP layer.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::IntegrationError;
use crate::resilience::CircuitBreakerSnapshot;
use crate::util::generate_id;

/// Category of a running service; the unit of discovery by type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceType {
    AgentSystem,
    PlanningSystem,
    Orchestrator,
    ModelService,
    TemplateService,
    Gateway,
    Other,
}

impl ServiceType {
    pub const ALL: [ServiceType; 7] = [
        ServiceType::AgentSystem,
        ServiceType::PlanningSystem,
        ServiceType::Orchestrator,
        ServiceType::ModelService,
        ServiceType::TemplateService,
        ServiceType::Gateway,
        ServiceType::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::AgentSystem => "AGENT_SYSTEM",
            ServiceType::PlanningSystem => "PLANNING_SYSTEM",
            ServiceType::Orchestrator => "ORCHESTRATOR",
            ServiceType::ModelService => "MODEL_SERVICE",
            ServiceType::TemplateService => "TEMPLATE_SERVICE",
            ServiceType::Gateway => "GATEWAY",
            ServiceType::Other => "OTHER",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceType {
    type Err = IntegrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_uppercase().replace('-', "_");
        ServiceType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| IntegrationError::configuration(format!("Unknown service type: {}", s)))
    }
}

/// Liveness of a registered service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceStatus {
    Online,
    Offline,
    Degraded,
    Maintenance,
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceStatus::Online => write!(f, "ONLINE"),
            ServiceStatus::Offline => write!(f, "OFFLINE"),
            ServiceStatus::Degraded => write!(f, "DEGRADED"),
            ServiceStatus::Maintenance => write!(f, "MAINTENANCE"),
        }
    }
}

/// One endpoint exposed by a service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceEndpoint {
    pub path: String,
    pub method: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl ServiceEndpoint {
    pub fn new(path: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            method: method.into().to_uppercase(),
            description: None,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Identity and addressing for one running service instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub service_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub service_type: ServiceType,
    pub version: String,
    pub base_url: String,
    pub health_check_url: String,
    #[serde(default)]
    pub endpoints: Vec<ServiceEndpoint>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    pub status: ServiceStatus,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
}

impl ServiceInfo {
    /// Describe a new ONLINE instance with a generated id
    pub fn new(
        name: impl Into<String>,
        service_type: ServiceType,
        version: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let now = Utc::now();
        Self {
            service_id: generate_id(),
            name: name.into(),
            service_type,
            version: version.into(),
            health_check_url: format!("{}/health", base_url),
            base_url,
            endpoints: Vec::new(),
            metadata: HashMap::new(),
            status: ServiceStatus::Online,
            registered_at: now,
            last_heartbeat: now,
        }
    }

    pub fn with_id(mut self, service_id: impl Into<String>) -> Self {
        self.service_id = service_id.into();
        self
    }

    pub fn with_health_check_url(mut self, url: impl Into<String>) -> Self {
        self.health_check_url = url.into();
        self
    }

    pub fn with_endpoint(mut self, endpoint: ServiceEndpoint) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Record a heartbeat. `last_heartbeat` never moves backwards.
    pub fn touch_heartbeat(&mut self, now: DateTime<Utc>) {
        if now > self.last_heartbeat {
            self.last_heartbeat = now;
        }
    }

    pub fn is_online(&self) -> bool {
        self.status != ServiceStatus::Offline
    }
}

/// Logical workflow name; the mediator key is `workflow.<type>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum WorkflowType {
    AgentTaskExecution,
    ProjectPlanning,
    Custom(String),
}

impl WorkflowType {
    pub fn as_str(&self) -> &str {
        match self {
            WorkflowType::AgentTaskExecution => "AGENT_TASK_EXECUTION",
            WorkflowType::ProjectPlanning => "PROJECT_PLANNING",
            WorkflowType::Custom(name) => name.as_str(),
        }
    }

    /// Key under which the workflow handler is registered with the mediator
    pub fn request_key(&self) -> String {
        format!("workflow.{}", self.as_str())
    }
}

impl From<String> for WorkflowType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "AGENT_TASK_EXECUTION" => WorkflowType::AgentTaskExecution,
            "PROJECT_PLANNING" => WorkflowType::ProjectPlanning,
            _ => WorkflowType::Custom(value),
        }
    }
}

impl From<&str> for WorkflowType {
    fn from(value: &str) -> Self {
        WorkflowType::from(value.to_string())
    }
}

impl From<WorkflowType> for String {
    fn from(value: WorkflowType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for WorkflowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Pending => "PENDING",
            WorkflowStatus::Running => "RUNNING",
            WorkflowStatus::Completed => "COMPLETED",
            WorkflowStatus::Failed => "FAILED",
            WorkflowStatus::Cancelled => "CANCELLED",
        }
    }
}

/// Unit of work passed through the mediator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRequest {
    #[serde(default)]
    pub workflow_id: Option<String>,
    pub workflow_type: WorkflowType,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub options: serde_json::Map<String, Value>,
}

impl WorkflowRequest {
    pub fn new(workflow_type: impl Into<WorkflowType>, data: Value) -> Self {
        Self {
            workflow_id: None,
            workflow_type: workflow_type.into(),
            data,
            options: serde_json::Map::new(),
        }
    }

    pub fn with_id(mut self, workflow_id: impl Into<String>) -> Self {
        self.workflow_id = Some(workflow_id.into());
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: Value) -> Self {
        self.options.insert(key.into(), value);
        self
    }

    /// Caller supplied deadline for the whole workflow, in seconds
    pub fn timeout_secs(&self) -> Option<f64> {
        self.options
            .get("timeout_secs")
            .and_then(Value::as_f64)
            .filter(|secs| *secs > 0.0)
    }

    /// Read a string field from `data`
    pub fn data_str(&self, field: &str) -> Option<&str> {
        self.data.get(field).and_then(Value::as_str)
    }
}

/// Produced exactly once per workflow request, even on failure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowResponse {
    pub workflow_id: String,
    pub status: WorkflowStatus,
    /// Wall clock execution time in seconds
    pub execution_time: f64,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl WorkflowResponse {
    pub fn completed(workflow_id: impl Into<String>, execution_time: f64, result: Value) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            status: WorkflowStatus::Completed,
            execution_time,
            result: Some(result),
            errors: Vec::new(),
        }
    }

    pub fn failed(workflow_id: impl Into<String>, execution_time: f64, errors: Vec<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            status: WorkflowStatus::Failed,
            execution_time,
            result: None,
            errors,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == WorkflowStatus::Completed
    }
}

/// Overall rollup reported by the facade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// HEALTHY iff every service is ONLINE, DEGRADED if any is OFFLINE,
    /// UNHEALTHY otherwise
    pub fn rollup<'a>(statuses: impl IntoIterator<Item = &'a ServiceStatus>) -> Self {
        let mut all_online = true;
        let mut any_offline = false;
        for status in statuses {
            match status {
                ServiceStatus::Online => {}
                ServiceStatus::Offline => {
                    all_online = false;
                    any_offline = true;
                }
                _ => all_online = false,
            }
        }

        if all_online {
            HealthStatus::Healthy
        } else if any_offline {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unhealthy
        }
    }
}

/// Per-service line of the health snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub service_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub service_type: ServiceType,
    pub status: ServiceStatus,
    pub last_heartbeat: DateTime<Utc>,
}

impl From<&ServiceInfo> for ServiceHealth {
    fn from(info: &ServiceInfo) -> Self {
        Self {
            service_id: info.service_id.clone(),
            name: info.name.clone(),
            service_type: info.service_type,
            status: info.status,
            last_heartbeat: info.last_heartbeat,
        }
    }
}

/// Aggregate health snapshot of services and circuit breakers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemHealth {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub services: Vec<ServiceHealth>,
    pub circuit_breakers: Vec<CircuitBreakerSnapshot>,
}
