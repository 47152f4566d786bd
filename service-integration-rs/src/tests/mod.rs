//! Component tests for the integration runtime
//!
//! HTTP interactions run against WireMock servers; discovery failure
//! injection uses the mockall-generated `MockDiscoveryStrategy`.

pub mod support;

pub mod client_mock_tests;
pub mod workflow_tests;
