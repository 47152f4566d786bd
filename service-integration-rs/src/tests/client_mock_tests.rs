//! Mock tests for the service client
//!
//! These tests use WireMock to stand in for downstream services and verify
//! URL building, error classification and circuit breaker coupling.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::{json, Value};
    use wiremock::matchers::{body_json, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::client::{HttpMethod, ServiceClient};
    use crate::config::IntegrationConfig;
    use crate::error::IntegrationError;
    use crate::models::ServiceType;
    use crate::resilience::{CircuitBreakerRegistry, CircuitState};
    use crate::tests::support::{discovery, fast_config, service};

    fn client(config: &IntegrationConfig) -> ServiceClient {
        ServiceClient::new(
            discovery(config),
            Arc::new(CircuitBreakerRegistry::new(config.circuit_breaker.clone())),
            config.client.clone(),
        )
    }

    #[tokio::test]
    async fn test_get_returns_json() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/plans/p-1"))
            .and(header_exists("user-agent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "p-1", "steps": 3})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&fast_config());
        let planner = service("planner-1", ServiceType::PlanningSystem, &format!("{}/", server.uri()));

        let body = client.get(&planner, "/api/plans/p-1").await.unwrap();
        assert_eq!(body["steps"], 3);
    }

    #[tokio::test]
    async fn test_post_sends_json_body_and_empty_response_is_null() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/agents"))
            .and(body_json(json!({"name": "coder-1"})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&fast_config());
        let agents = service("agents-1", ServiceType::AgentSystem, &server.uri());

        let body = client.post(&agents, "api/agents", &json!({"name": "coder-1"})).await.unwrap();
        assert_eq!(body, Value::Null);
    }

    #[tokio::test]
    async fn test_not_found_does_not_count_against_breaker() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"detail": "Plan not found"})))
            .mount(&server)
            .await;

        let client = client(&fast_config());
        let planner = service("planner-1", ServiceType::PlanningSystem, &server.uri());

        let err = client.get(&planner, "/api/plans/missing").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("Plan not found"));

        let breaker = client.breakers().get("planner-1").unwrap();
        assert_eq!(breaker.failure_count(), 0);
    }

    #[tokio::test]
    async fn test_client_error_carries_status_and_detail() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(422).set_body_json(json!({"detail": "name is required"})))
            .mount(&server)
            .await;

        let client = client(&fast_config());
        let templates = service("templates-1", ServiceType::TemplateService, &server.uri());

        let err = client.put(&templates, "/api/templates/t-1", &json!({})).await.unwrap_err();
        match err {
            IntegrationError::Client { status, message, service } => {
                assert_eq!(status, 422);
                assert_eq!(message, "name is required");
                assert_eq!(service, "templates-1");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_server_errors_open_the_circuit() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
            // The fourth call must never reach the server
            .expect(3)
            .mount(&server)
            .await;

        let config = fast_config();
        let client = client(&config);
        let models = service("models-1", ServiceType::ModelService, &server.uri());

        for _ in 0..3 {
            let err = client.delete(&models, "/api/models/m-1").await.unwrap_err();
            assert!(matches!(err, IntegrationError::Connection { .. }));
        }
        let breaker = client.breakers().get("models-1").unwrap();
        assert_eq!(breaker.state(), CircuitState::Open);

        let err = client.delete(&models, "/api/models/m-1").await.unwrap_err();
        match err {
            IntegrationError::Unavailable { service, message } => {
                assert_eq!(service, "models-1");
                assert!(message.contains("circuit open"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_per_call_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let client = client(&fast_config());
        let orchestrator = service("orch-1", ServiceType::Orchestrator, &server.uri());

        let err = client
            .request(
                &orchestrator,
                HttpMethod::Get,
                "/api/executions/e-1",
                None,
                Some(Duration::from_millis(50)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, IntegrationError::Timeout { ref service, .. } if service == "orch-1"));
        assert_eq!(client.breakers().get("orch-1").unwrap().failure_count(), 1);
    }

    #[tokio::test]
    async fn test_connection_refused_is_connection_error() {
        let client = client(&fast_config());
        let gone = service("gone-1", ServiceType::Gateway, "http://127.0.0.1:1");

        let err = client.get(&gone, "/health").await.unwrap_err();
        assert!(matches!(&err, IntegrationError::Connection { service, .. } if service == "gone-1"));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_request_by_type_resolves_through_discovery() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/projects"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": "p-1"}])))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&fast_config());

        let err = client
            .request_by_type(ServiceType::PlanningSystem, HttpMethod::Get, "/api/projects", None)
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        client
            .discovery()
            .register(service("planner-1", ServiceType::PlanningSystem, &server.uri()))
            .await
            .unwrap();
        let projects = client
            .request_by_type(ServiceType::PlanningSystem, HttpMethod::Get, "/api/projects", None)
            .await
            .unwrap();
        assert_eq!(projects[0]["id"], "p-1");
    }

    #[tokio::test]
    async fn test_close_recreates_session_lazily() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(2)
            .mount(&server)
            .await;

        let client = client(&fast_config());
        let gateway = service("gw-1", ServiceType::Gateway, &server.uri());

        client.get(&gateway, "/health").await.unwrap();
        client.close();
        client.close();
        assert_eq!(client.get(&gateway, "/health").await.unwrap()["ok"], true);
    }
}
