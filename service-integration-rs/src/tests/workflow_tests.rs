//! Workflow tests against mocked planning, orchestrator and agent services

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::{json, Value};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::models::{ServiceType, WorkflowRequest, WorkflowStatus, WorkflowType};
    use crate::tests::support::{facade, fast_config, service};

    async fn mount_json(server: &MockServer, verb: &str, route: &str, body: Value) {
        Mock::given(method(verb))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    fn agent_task_request() -> WorkflowRequest {
        WorkflowRequest::new(
            WorkflowType::AgentTaskExecution,
            json!({"agent_id": "agent-7", "task": {"name": "summarise", "input": "..."}}),
        )
    }

    #[tokio::test]
    async fn test_agent_task_execution_polls_to_completion() {
        let planner = MockServer::start().await;
        let orchestrator = MockServer::start().await;

        mount_json(&planner, "POST", "/api/execution-plans", json!({"id": "plan-1"})).await;
        mount_json(&orchestrator, "POST", "/api/executions", json!({"id": "exec-1", "status": "PENDING"})).await;
        Mock::given(method("GET"))
            .and(path("/api/executions/exec-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "exec-1", "status": "RUNNING"})))
            .up_to_n_times(2)
            .with_priority(1)
            .mount(&orchestrator)
            .await;
        mount_json(
            &orchestrator,
            "GET",
            "/api/executions/exec-1",
            json!({"id": "exec-1", "status": "completed", "output": "done"}),
        )
        .await;

        let facade = facade(&fast_config());
        facade
            .register_service(service("planner-1", ServiceType::PlanningSystem, &planner.uri()))
            .await
            .unwrap();
        facade
            .register_service(service("orch-1", ServiceType::Orchestrator, &orchestrator.uri()))
            .await
            .unwrap();

        let response = facade.execute_workflow(agent_task_request().with_id("wf-1")).await;
        assert_eq!(response.status, WorkflowStatus::Completed, "errors: {:?}", response.errors);
        assert_eq!(response.workflow_id, "wf-1");

        let result = response.result.unwrap();
        assert_eq!(result["plan_id"], "plan-1");
        assert_eq!(result["execution_id"], "exec-1");
        assert_eq!(result["status"], "COMPLETED");
        assert_eq!(result["execution"]["output"], "done");

        let polls = orchestrator
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|r| r.method.to_string() == "GET")
            .count();
        assert_eq!(polls, 3);

        let plan_request: Value = planner.received_requests().await.unwrap()[0].body_json().unwrap();
        assert_eq!(plan_request["agent_id"], "agent-7");
        assert_eq!(plan_request["workflow_id"], "wf-1");
    }

    #[tokio::test]
    async fn test_polling_gives_up_at_caller_deadline() {
        let server = MockServer::start().await;
        mount_json(&server, "POST", "/api/execution-plans", json!({"plan_id": "plan-9"})).await;
        mount_json(&server, "POST", "/api/executions", json!({"execution_id": "exec-9"})).await;
        mount_json(&server, "GET", "/api/executions/exec-9", json!({"status": "RUNNING"})).await;

        let facade = facade(&fast_config());
        facade
            .register_service(service("planner-1", ServiceType::PlanningSystem, &server.uri()))
            .await
            .unwrap();
        facade
            .register_service(service("orch-1", ServiceType::Orchestrator, &server.uri()))
            .await
            .unwrap();

        let request = agent_task_request().with_option("timeout_secs", json!(0.1));
        let response = facade.execute_workflow(request).await;

        assert_eq!(response.status, WorkflowStatus::Failed);
        assert!(response.errors[0].contains("monitor execution"), "errors: {:?}", response.errors);
        assert!(response.errors[0].contains("RUNNING"));
        assert!(response.execution_time < 2.0);
    }

    #[tokio::test]
    async fn test_slow_poll_is_cut_at_caller_deadline() {
        let server = MockServer::start().await;
        mount_json(&server, "POST", "/api/execution-plans", json!({"plan_id": "plan-3"})).await;
        mount_json(&server, "POST", "/api/executions", json!({"execution_id": "exec-3"})).await;
        Mock::given(method("GET"))
            .and(path("/api/executions/exec-3"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"status": "COMPLETED"}))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let facade = facade(&fast_config());
        facade
            .register_service(service("planner-1", ServiceType::PlanningSystem, &server.uri()))
            .await
            .unwrap();
        facade
            .register_service(service("orch-1", ServiceType::Orchestrator, &server.uri()))
            .await
            .unwrap();

        let request = agent_task_request().with_option("timeout_secs", json!(0.2));
        let response = facade.execute_workflow(request).await;

        assert_eq!(response.status, WorkflowStatus::Failed);
        assert!(response.errors[0].contains("monitor execution"), "errors: {:?}", response.errors);
        assert!(response.execution_time < 2.0, "took {}s", response.execution_time);
    }

    #[tokio::test]
    async fn test_missing_target_fails_workflow() {
        let facade = facade(&fast_config());

        let response = facade.execute_workflow(agent_task_request()).await;
        assert_eq!(response.status, WorkflowStatus::Failed);
        assert!(response.errors[0].contains("resolve planning service"));
        assert!(!response.workflow_id.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_input_fails_before_any_call() {
        let facade = facade(&fast_config());
        let request = WorkflowRequest::new(WorkflowType::AgentTaskExecution, json!({"task": {}}));

        let response = facade.execute_workflow(request).await;
        assert_eq!(response.status, WorkflowStatus::Failed);
        assert!(response.errors[0].contains("agent_id is required"));
    }

    #[tokio::test]
    async fn test_project_planning_creates_agents_and_assigns_tasks() {
        let server = MockServer::start().await;
        mount_json(&server, "GET", "/api/projects/proj-1", json!({"id": "proj-1", "name": "Atlas"})).await;
        mount_json(&server, "POST", "/api/plans/strategic", json!({"id": "sp-1"})).await;
        mount_json(
            &server,
            "POST",
            "/api/plans/tactical",
            json!({
                "id": "tp-1",
                "required_agents": [
                    {"agent_type": "CODER", "count": 2},
                    {"agent_type": "REVIEWER", "name": "reviewer"}
                ],
                "tasks": [
                    {"id": "t1", "agent_type": "CODER"},
                    {"id": "t2", "agent_type": "CODER"},
                    {"id": "t3", "agent_type": "REVIEWER"},
                    {"id": "t4", "agent_type": "CODER"},
                    {"task_id": "t5", "agent_type": "DESIGNER"}
                ]
            }),
        )
        .await;
        for (index, agent_id) in ["a-1", "a-2", "a-3"].iter().enumerate() {
            Mock::given(method("POST"))
                .and(path("/api/agents"))
                .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": agent_id})))
                .up_to_n_times(1)
                .with_priority(index as u8 + 1)
                .mount(&server)
                .await;
        }
        Mock::given(method("POST"))
            .and(path("/api/projects/proj-1/plans"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"stored": true})))
            .expect(1)
            .mount(&server)
            .await;

        let facade = facade(&fast_config());
        facade
            .register_service(service("planner-1", ServiceType::PlanningSystem, &server.uri()))
            .await
            .unwrap();
        facade
            .register_service(service("agents-1", ServiceType::AgentSystem, &server.uri()))
            .await
            .unwrap();

        let request = WorkflowRequest::new(WorkflowType::ProjectPlanning, json!({"project_id": "proj-1"}));
        let response = facade.execute_workflow(request).await;
        assert_eq!(response.status, WorkflowStatus::Completed, "errors: {:?}", response.errors);

        let result = response.result.unwrap();
        assert_eq!(result["tactical_plan_id"], "tp-1");
        assert_eq!(result["agents"].as_array().unwrap().len(), 3);
        assert_eq!(result["assignments"]["t1"], "a-1");
        assert_eq!(result["assignments"]["t2"], "a-2");
        assert_eq!(result["assignments"]["t3"], "a-3");
        assert_eq!(result["assignments"]["t4"], "a-1");
        assert_eq!(result["unassigned_tasks"], json!(["t5"]));

        let requests = server.received_requests().await.unwrap();
        let agent_names: Vec<String> = requests
            .iter()
            .filter(|r| r.url.path() == "/api/agents")
            .map(|r| r.body_json::<Value>().unwrap()["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(agent_names, vec!["proj-1-coder-1", "proj-1-coder-2", "reviewer"]);
    }

    #[tokio::test]
    async fn test_project_planning_rejects_oversized_agent_request() {
        let server = MockServer::start().await;
        mount_json(&server, "GET", "/api/projects/proj-3", json!({"id": "proj-3"})).await;
        mount_json(&server, "POST", "/api/plans/strategic", json!({"id": "sp-3"})).await;
        mount_json(
            &server,
            "POST",
            "/api/plans/tactical",
            json!({
                "id": "tp-3",
                "required_agents": [
                    {"agent_type": "CODER", "count": 3},
                    {"agent_type": "REVIEWER", "count": 4_000_000_000u32}
                ],
                "tasks": []
            }),
        )
        .await;
        Mock::given(method("POST"))
            .and(path("/api/agents"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "a-x"})))
            .expect(0)
            .mount(&server)
            .await;

        let mut config = fast_config();
        config.workflow.max_agents_per_plan = 10;
        let facade = facade(&config);
        facade
            .register_service(service("planner-1", ServiceType::PlanningSystem, &server.uri()))
            .await
            .unwrap();
        facade
            .register_service(service("agents-1", ServiceType::AgentSystem, &server.uri()))
            .await
            .unwrap();

        let request = WorkflowRequest::new(WorkflowType::ProjectPlanning, json!({"project_id": "proj-3"}));
        let response = facade.execute_workflow(request).await;

        assert_eq!(response.status, WorkflowStatus::Failed);
        assert!(response.errors[0].contains("more than the limit of 10"), "errors: {:?}", response.errors);
    }

    #[tokio::test]
    async fn test_project_planning_step_failure_stores_nothing() {
        let server = MockServer::start().await;
        mount_json(&server, "GET", "/api/projects/proj-2", json!({"id": "proj-2"})).await;
        mount_json(&server, "POST", "/api/plans/strategic", json!({"id": "sp-2"})).await;
        Mock::given(method("POST"))
            .and(path("/api/plans/tactical"))
            .respond_with(ResponseTemplate::new(503).set_body_json(json!({"detail": "planner overloaded"})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/projects/proj-2/plans"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let facade = facade(&fast_config());
        facade
            .register_service(service("planner-1", ServiceType::PlanningSystem, &server.uri()))
            .await
            .unwrap();

        let request = WorkflowRequest::new(WorkflowType::ProjectPlanning, json!({"project_id": "proj-2"}));
        let response = facade.execute_workflow(request).await;

        assert_eq!(response.status, WorkflowStatus::Failed);
        assert!(response.errors[0].contains("generate tactical plan"));
        assert!(response.errors[0].contains("planner overloaded"));
        assert!(response.result.is_none());
    }
}
