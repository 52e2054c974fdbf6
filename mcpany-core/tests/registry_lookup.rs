//! Namespacing, duplicate detection and fuzzy suggestions through the
//! public registry surface.

use std::sync::Arc;

use serde_json::json;

use mcpany_core::{
    ErrorKind, ExecutionRequest, Gateway, GrpcCall, ToolAnnotations, ToolBackend, ToolDefinition,
    ToolRegistry,
};

fn definition(service: &str, name: &str) -> ToolDefinition {
    ToolDefinition {
        name: name.into(),
        service_id: Some(service.into()),
        description: format!("{service}.{name}"),
        input_schema: json!({ "type": "object" }),
        output_schema: None,
        annotations: ToolAnnotations::default(),
        tags: vec![],
        profiles: vec![],
        integrity: None,
        backend: ToolBackend::Grpc(GrpcCall {
            method: "pkg.Svc.M".into(),
            timeout_ms: None,
            output_transform: None,
            resilience: None,
        }),
    }
}

#[tokio::test]
async fn short_lookup_is_rejected_for_namespaced_tools() {
    let registry = ToolRegistry::new();
    registry
        .add_tool(definition("svc", "t"), vec![])
        .await
        .unwrap();

    assert!(registry.get_tool("t").is_none());
    assert!(registry.get_tool("svc.t").is_some());
}

#[tokio::test]
async fn duplicate_fully_qualified_names_are_rejected() {
    let registry = ToolRegistry::new();
    registry
        .add_tool(definition("svc", "t"), vec![])
        .await
        .unwrap();
    let err = registry
        .add_tool(definition("svc", "t"), vec![])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DuplicateTool);

    // Same method name under a different service is a different key.
    registry
        .add_tool(definition("other", "t"), vec![])
        .await
        .unwrap();
}

#[tokio::test]
async fn execute_on_a_typo_reports_the_close_match() {
    let registry = Arc::new(ToolRegistry::new());
    registry
        .add_tool(definition("weather", "get_weather"), vec![])
        .await
        .unwrap();
    let gateway = Gateway::new(registry);

    let err = gateway
        .execute(ExecutionRequest::new("weather.get_wether", b"{}".to_vec()))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ToolNotFound);
    assert!(err.to_string().contains("did you mean \"weather.get_weather\""));
}

#[tokio::test]
async fn unnamespaced_lookup_suggests_the_qualified_name() {
    let registry = ToolRegistry::new();
    registry
        .add_tool(definition("weather", "get_weather"), vec![])
        .await
        .unwrap();

    let err = registry.lookup("get_weather").unwrap_err();
    assert!(err.to_string().contains("weather.get_weather"));
}

#[tokio::test]
async fn concurrent_lookups_share_the_registry() {
    let registry = Arc::new(ToolRegistry::new());
    for index in 0..16 {
        registry
            .add_tool(definition("svc", &format!("tool{index}")), vec![])
            .await
            .unwrap();
    }

    let mut handles = Vec::new();
    for index in 0..16 {
        let registry = Arc::clone(&registry);
        handles.push(tokio::spawn(async move {
            registry.lookup(&format!("svc.tool{index}")).is_ok()
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap());
    }
}
