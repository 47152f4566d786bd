//! Project planning
//!
//! Fetch the project, derive a strategic then a tactical plan, create the
//! agents the tactical plan asks for, hand tasks to those agents round-robin
//! per agent type and push the result back to the project.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use super::{id_field, Workflow, WorkflowContext};
use crate::error::{IntegrationError, Result};
use crate::models::{ServiceType, WorkflowRequest, WorkflowType};

/// Agent requirement listed by a tactical plan
#[derive(Debug, Clone, Deserialize)]
struct AgentRequirement {
    agent_type: String,
    #[serde(default = "default_agent_count")]
    count: u32,
    #[serde(default)]
    name: Option<String>,
}

fn default_agent_count() -> u32 {
    1
}

/// Task produced by a tactical plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedTask {
    #[serde(alias = "task_id")]
    pub id: String,
    pub agent_type: String,
}

/// Agent created for the project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedAgent {
    #[serde(alias = "agent_id")]
    pub id: String,
    pub agent_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskAssignment {
    /// task id to agent id
    pub assignments: HashMap<String, String>,
    /// Tasks whose agent type has no agent
    pub unassigned: Vec<String>,
}

/// Hand out tasks to agents of the matching type, cycling through the
/// agents of each type in order
pub fn assign_tasks_round_robin(tasks: &[PlannedTask], agents: &[CreatedAgent]) -> TaskAssignment {
    let mut by_type: HashMap<&str, Vec<&CreatedAgent>> = HashMap::new();
    for agent in agents {
        by_type.entry(agent.agent_type.as_str()).or_default().push(agent);
    }

    let mut next: HashMap<&str, usize> = HashMap::new();
    let mut result = TaskAssignment::default();
    for task in tasks {
        match by_type.get(task.agent_type.as_str()) {
            Some(pool) if !pool.is_empty() => {
                let cursor = next.entry(task.agent_type.as_str()).or_insert(0);
                let agent = pool[*cursor % pool.len()];
                *cursor += 1;
                result.assignments.insert(task.id.clone(), agent.id.clone());
            }
            _ => result.unassigned.push(task.id.clone()),
        }
    }
    result
}

pub struct ProjectPlanningWorkflow {
    context: WorkflowContext,
}

impl ProjectPlanningWorkflow {
    pub fn new(context: WorkflowContext) -> Self {
        Self { context }
    }
}

fn parse_list<T: serde::de::DeserializeOwned>(plan: &Value, field: &str) -> Result<Vec<T>> {
    match plan.get(field) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(list) => serde_json::from_value(list.clone())
            .map_err(|e| IntegrationError::workflow(format!("tactical plan has malformed {}: {}", field, e))),
    }
}

#[async_trait]
impl Workflow for ProjectPlanningWorkflow {
    fn workflow_type(&self) -> WorkflowType {
        WorkflowType::ProjectPlanning
    }

    async fn run(&self, request: WorkflowRequest) -> Result<Value> {
        let project_id = request
            .data_str("project_id")
            .ok_or_else(|| IntegrationError::workflow("project_id is required"))?
            .to_string();
        let ctx = &self.context;
        let step = IntegrationError::workflow_step;

        let planner = ctx.resolve("resolve planning service", ServiceType::PlanningSystem).await?;
        let project = ctx
            .client
            .get(&planner, &format!("/api/projects/{}", project_id))
            .await
            .map_err(|e| step("fetch project", e))?;

        let strategic = ctx
            .client
            .post(
                &planner,
                "/api/plans/strategic",
                &json!({
                    "project_id": project_id,
                    "project": project,
                    "parameters": request.data.get("parameters"),
                }),
            )
            .await
            .map_err(|e| step("generate strategic plan", e))?;
        let strategic_plan_id = id_field(&strategic, &["id", "plan_id"])
            .ok_or_else(|| IntegrationError::workflow("strategic plan response has no id"))?;

        let tactical = ctx
            .client
            .post(
                &planner,
                "/api/plans/tactical",
                &json!({
                    "project_id": project_id,
                    "strategic_plan_id": strategic_plan_id,
                    "strategic_plan": strategic,
                }),
            )
            .await
            .map_err(|e| step("generate tactical plan", e))?;
        let tactical_plan_id = id_field(&tactical, &["id", "plan_id"])
            .ok_or_else(|| IntegrationError::workflow("tactical plan response has no id"))?;
        info!(
            project_id = %project_id,
            strategic_plan_id = %strategic_plan_id,
            tactical_plan_id = %tactical_plan_id,
            "Plans generated"
        );

        let requirements: Vec<AgentRequirement> = parse_list(&tactical, "required_agents")?;
        let tasks: Vec<PlannedTask> = parse_list(&tactical, "tasks")?;

        let requested: u64 = requirements.iter().map(|r| u64::from(r.count)).sum();
        if requested > u64::from(ctx.config.max_agents_per_plan) {
            return Err(IntegrationError::workflow(format!(
                "tactical plan {} requests {} agents, more than the limit of {}",
                tactical_plan_id, requested, ctx.config.max_agents_per_plan
            )));
        }

        let mut agents = Vec::new();
        if !requirements.is_empty() {
            let agent_system = ctx.resolve("resolve agent system", ServiceType::AgentSystem).await?;
            for requirement in &requirements {
                for index in 0..requirement.count {
                    let name = match &requirement.name {
                        Some(name) if requirement.count == 1 => name.clone(),
                        Some(name) => format!("{}-{}", name, index + 1),
                        None => format!("{}-{}-{}", project_id, requirement.agent_type.to_lowercase(), index + 1),
                    };
                    let created = ctx
                        .client
                        .post(
                            &agent_system,
                            "/api/agents",
                            &json!({
                                "name": name,
                                "agent_type": requirement.agent_type,
                                "project_id": project_id,
                            }),
                        )
                        .await
                        .map_err(|e| step("create agents", e))?;
                    let id = id_field(&created, &["id", "agent_id"])
                        .ok_or_else(|| IntegrationError::workflow("agent creation response has no id"))?;
                    agents.push(CreatedAgent {
                        id,
                        agent_type: requirement.agent_type.clone(),
                    });
                }
            }
            info!(project_id = %project_id, agents = agents.len(), "Agents created");
        }

        let assignment = assign_tasks_round_robin(&tasks, &agents);
        if !assignment.unassigned.is_empty() {
            warn!(
                project_id = %project_id,
                unassigned = assignment.unassigned.len(),
                "Some tasks have no agent of the required type"
            );
        }

        let summary = json!({
            "project_id": project_id,
            "strategic_plan_id": strategic_plan_id,
            "tactical_plan_id": tactical_plan_id,
            "agents": agents,
            "assignments": assignment.assignments,
            "unassigned_tasks": assignment.unassigned,
        });
        ctx.client
            .post(&planner, &format!("/api/projects/{}/plans", project_id), &summary)
            .await
            .map_err(|e| step("store project plans", e))?;

        Ok(summary)
    }
}
