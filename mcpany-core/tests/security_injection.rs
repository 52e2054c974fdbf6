//! End-to-end injection and traversal coverage for command-backed tools.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use mcpany_core::definition::{CommandCall, CommandParameter, CommandProtocol};
use mcpany_core::registry::SandboxProber;
use mcpany_core::{
    ErrorKind, ExecutionRequest, Gateway, ToolAnnotations, ToolBackend, ToolDefinition,
    ToolRegistry,
};

struct YesProber;

#[async_trait]
impl SandboxProber for YesProber {
    async fn supports_sandbox(&self, _command: &str) -> bool {
        true
    }
}

fn command_definition(
    name: &str,
    argv: &[&str],
    parameter: &str,
    allow_code_substitution: bool,
) -> ToolDefinition {
    ToolDefinition {
        name: name.into(),
        service_id: Some("sec".into()),
        description: format!("{name} fixture"),
        input_schema: json!({
            "type": "object",
            "properties": { parameter: { "type": "string" } },
            "required": [parameter]
        }),
        output_schema: None,
        annotations: ToolAnnotations::default(),
        tags: vec![],
        profiles: vec![],
        integrity: None,
        backend: ToolBackend::LocalCommand(CommandCall {
            command: argv.iter().map(|s| s.to_string()).collect(),
            parameters: vec![CommandParameter {
                schema_name: parameter.into(),
                required: true,
                secret: None,
                bind: Default::default(),
                allow_code_substitution,
            }],
            env: BTreeMap::new(),
            working_dir: None,
            timeout_ms: None,
            protocol: CommandProtocol::Streaming,
            container: None,
            resilience: None,
        }),
    }
}

async fn gateway(definitions: Vec<ToolDefinition>) -> Gateway {
    let registry = Arc::new(ToolRegistry::with_prober(Arc::new(YesProber)));
    for definition in definitions {
        registry.add_tool(definition, vec![]).await.unwrap();
    }
    Gateway::new(registry)
}

async fn call_kind(gateway: &Gateway, tool: &str, parameter: &str, value: &str) -> Option<ErrorKind> {
    let raw = serde_json::to_vec(&json!({ parameter: value })).unwrap();
    gateway
        .execute(ExecutionRequest::new(tool, raw).dry_run())
        .await
        .err()
        .map(|err| err.kind())
}

#[tokio::test]
async fn traversal_checks_have_no_encoded_bypass() {
    let gw = gateway(vec![command_definition("cat", &["cat", "{{file}}"], "file", false)]).await;

    for hostile in [
        "..",
        "../",
        "a/../b",
        "..\\win",
        "%2e%2e",
        "%2E.",
        ".%2e",
        "x%2E.y",
        "%252e%252e",
        "%25252e%25252e/",
        "%2525252e%2525252e/",
    ] {
        assert_eq!(
            call_kind(&gw, "sec.cat", "file", hostile).await,
            Some(ErrorKind::PathTraversal),
            "{hostile:?} must fail traversal checks"
        );
    }

    for benign in [".", "...", "%25", "%2e", "notes.txt", "a..b"] {
        assert_eq!(
            call_kind(&gw, "sec.cat", "file", benign).await,
            None,
            "{benign:?} must pass"
        );
    }
}

#[tokio::test]
async fn recursive_placeholders_fail_before_substitution() {
    let gw = gateway(vec![command_definition("echo", &["echo", "{{msg}}"], "msg", false)]).await;
    assert_eq!(
        call_kind(&gw, "sec.echo", "msg", "{{injected}}").await,
        Some(ErrorKind::RecursiveInjection)
    );
    assert_eq!(
        call_kind(&gw, "sec.echo", "msg", "prefix {{x").await,
        Some(ErrorKind::RecursiveInjection)
    );
}

#[tokio::test]
async fn git_config_flag_injection_is_shell_injection() {
    // git -c core.editor=<cmd> executes the configured command; `=` in an
    // argument to an interpreted-arguments command is rejected.
    let gw = gateway(vec![command_definition(
        "status",
        &["git", "-c", "{{flag}}", "status"],
        "flag",
        false,
    )])
    .await;
    assert_eq!(
        call_kind(&gw, "sec.status", "flag", "core.editor=false").await,
        Some(ErrorKind::ShellInjection)
    );
    assert_eq!(call_kind(&gw, "sec.status", "flag", "core.editor").await, None);
}

#[tokio::test]
async fn python_fstring_injection_is_rejected() {
    let gw = gateway(vec![command_definition(
        "greet",
        &["python3", "-c", "print(f'hi {{name}}')"],
        "name",
        true,
    )])
    .await;
    let err = {
        let raw = serde_json::to_vec(&json!({ "name": "{os}" })).unwrap();
        gw.execute(ExecutionRequest::new("sec.greet", raw).dry_run())
            .await
            .unwrap_err()
    };
    assert_eq!(err.kind(), ErrorKind::ShellInjection);
    assert!(err.to_string().contains("f-string"));

    assert_eq!(call_kind(&gw, "sec.greet", "name", "world").await, None);
}

#[tokio::test]
async fn ruby_interpolation_injection_is_rejected() {
    let gw = gateway(vec![command_definition(
        "say",
        &["ruby", "-e", "puts \"{{msg}}\""],
        "msg",
        true,
    )])
    .await;
    let err = {
        let raw = serde_json::to_vec(&json!({ "msg": "#{system('id')}" })).unwrap();
        gw.execute(ExecutionRequest::new("sec.say", raw).dry_run())
            .await
            .unwrap_err()
    };
    assert_eq!(err.kind(), ErrorKind::ShellInjection);

    assert_eq!(call_kind(&gw, "sec.say", "msg", "plain words").await, None);
}

#[tokio::test]
async fn code_positions_require_explicit_opt_in() {
    let gw = gateway(vec![command_definition(
        "eval",
        &["python3", "-c", "print('{{name}}')"],
        "name",
        false,
    )])
    .await;
    assert_eq!(
        call_kind(&gw, "sec.eval", "name", "world").await,
        Some(ErrorKind::TemplateSubstitutionForbidden)
    );
}

#[tokio::test]
async fn flag_smuggling_and_schemes_are_blocked() {
    let gw = gateway(vec![command_definition("cat", &["cat", "{{file}}"], "file", false)]).await;
    assert_eq!(
        call_kind(&gw, "sec.cat", "file", "--version").await,
        Some(ErrorKind::ArgumentInjection)
    );
    assert_eq!(
        call_kind(&gw, "sec.cat", "file", "file:///etc/passwd").await,
        Some(ErrorKind::DangerousScheme)
    );
    assert_eq!(
        call_kind(&gw, "sec.cat", "file", "/etc/passwd").await,
        Some(ErrorKind::AbsolutePath)
    );
    assert_eq!(call_kind(&gw, "sec.cat", "file", "-42").await, None);
}

#[tokio::test]
async fn container_commands_relax_paths_but_not_schemes() {
    let mut definition = command_definition("convert", &["convert", "{{file}}"], "file", false);
    definition.backend = ToolBackend::ContainerCommand(CommandCall {
        command: vec!["convert".into(), "{{file}}".into()],
        parameters: vec![CommandParameter {
            schema_name: "file".into(),
            required: true,
            secret: None,
            bind: Default::default(),
            allow_code_substitution: false,
        }],
        env: BTreeMap::new(),
        working_dir: None,
        timeout_ms: None,
        protocol: CommandProtocol::Streaming,
        container: Some(mcpany_core::definition::ContainerSpec {
            image: "imagetools:1".into(),
            runtime: None,
        }),
        resilience: None,
    });
    let gw = gateway(vec![definition]).await;

    assert_eq!(call_kind(&gw, "sec.convert", "file", "/data/in.png").await, None);
    assert_eq!(
        call_kind(&gw, "sec.convert", "file", "file:///data/in.png").await,
        None
    );
    assert_eq!(
        call_kind(&gw, "sec.convert", "file", "gopher://x").await,
        Some(ErrorKind::DangerousScheme)
    );
}

#[tokio::test]
async fn args_array_is_gated_on_schema_declaration() {
    let mut with_args = command_definition("list", &["ls"], "unused", false);
    with_args.input_schema = json!({
        "type": "object",
        "properties": { "args": { "type": "array", "items": { "type": "string" } } }
    });
    if let ToolBackend::LocalCommand(call) = &mut with_args.backend {
        call.parameters.clear();
    }
    let mut without_args = with_args.clone();
    without_args.name = "list_plain".into();
    without_args.input_schema = json!({ "type": "object", "properties": {} });

    let gw = gateway(vec![with_args, without_args]).await;

    let ok = gw
        .execute(
            ExecutionRequest::new("sec.list", br#"{"args":["src","lib"]}"#.to_vec()).dry_run(),
        )
        .await
        .unwrap();
    assert_eq!(ok["args"], json!(["src", "lib"]));

    let err = gw
        .execute(
            ExecutionRequest::new("sec.list_plain", br#"{"args":["src"]}"#.to_vec()).dry_run(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ArgsParameterNotAllowed);

    let err = gw
        .execute(
            ExecutionRequest::new("sec.list", br#"{"args":["--color"]}"#.to_vec()).dry_run(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ArgumentInjection);
}
