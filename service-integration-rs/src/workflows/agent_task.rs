//! Agent task execution
//!
//! planning service: create an execution plan for the task, then
//! orchestrator: start executing it and poll until it finishes.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use super::{id_field, remote_status, Workflow, WorkflowContext};
use crate::error::{IntegrationError, Result};
use crate::models::{ServiceType, WorkflowRequest, WorkflowType};

pub struct AgentTaskExecutionWorkflow {
    context: WorkflowContext,
}

impl AgentTaskExecutionWorkflow {
    pub fn new(context: WorkflowContext) -> Self {
        Self { context }
    }
}

#[async_trait]
impl Workflow for AgentTaskExecutionWorkflow {
    fn workflow_type(&self) -> WorkflowType {
        WorkflowType::AgentTaskExecution
    }

    async fn run(&self, request: WorkflowRequest) -> Result<Value> {
        let agent_id = request
            .data_str("agent_id")
            .ok_or_else(|| IntegrationError::workflow("agent_id is required"))?
            .to_string();
        let task = request
            .data
            .get("task")
            .cloned()
            .ok_or_else(|| IntegrationError::workflow("task is required"))?;

        let ctx = &self.context;

        let planner = ctx.resolve("resolve planning service", ServiceType::PlanningSystem).await?;
        let plan = ctx
            .client
            .post(
                &planner,
                "/api/execution-plans",
                &json!({
                    "agent_id": agent_id,
                    "task": task,
                    "workflow_id": request.workflow_id,
                }),
            )
            .await
            .map_err(|e| IntegrationError::workflow_step("create execution plan", e))?;
        let plan_id = id_field(&plan, &["id", "plan_id"])
            .ok_or_else(|| IntegrationError::workflow("execution plan response has no id"))?;
        info!(agent_id = %agent_id, plan_id = %plan_id, "Execution plan created");

        let orchestrator = ctx.resolve("resolve orchestrator", ServiceType::Orchestrator).await?;
        let execution = ctx
            .client
            .post(
                &orchestrator,
                "/api/executions",
                &json!({
                    "plan_id": plan_id,
                    "agent_id": agent_id,
                    "plan": plan,
                }),
            )
            .await
            .map_err(|e| IntegrationError::workflow_step("start execution", e))?;
        let execution_id = id_field(&execution, &["id", "execution_id"])
            .ok_or_else(|| IntegrationError::workflow("execution response has no id"))?;
        info!(plan_id = %plan_id, execution_id = %execution_id, "Execution started");

        let outcome = ctx
            .poll_until_terminal(&request, &orchestrator, &format!("/api/executions/{}", execution_id))
            .await
            .map_err(|e| IntegrationError::workflow_step("monitor execution", e))?;

        Ok(json!({
            "agent_id": agent_id,
            "plan_id": plan_id,
            "execution_id": execution_id,
            "status": remote_status(&outcome),
            "execution": outcome,
        }))
    }
}
