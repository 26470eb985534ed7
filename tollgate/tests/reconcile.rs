//! Integration tests for sanitize-then-resolve passes.

#![allow(clippy::unwrap_used, clippy::panic, clippy::clone_on_ref_ptr)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};
use tollgate::prelude::*;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Deserialize, JsonSchema)]
struct CityArgs {
    city: String,
}

/// Confirmation-gated weather lookup that counts its executions.
#[derive(Debug, Clone, Default)]
struct GetWeather {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Tool for GetWeather {
    const NAME: &'static str = "getWeatherInformation";
    const POLICY: ToolExecutionPolicy = ToolExecutionPolicy::RequireConfirmation;
    type Args = CityArgs;
    type Output = String;
    type Error = ToolError;

    fn description(&self) -> String {
        "Show the weather in a given city to the user".to_string()
    }

    async fn call(&self, args: Self::Args) -> std::result::Result<Self::Output, Self::Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("The weather in {} is sunny", args.city))
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
struct CommandArgs {
    command: String,
}

/// Confirmation-gated command runner whose sandbox always fails.
#[derive(Debug, Clone, Default)]
struct RunCommand {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Tool for RunCommand {
    const NAME: &'static str = "runCommand";
    const POLICY: ToolExecutionPolicy = ToolExecutionPolicy::RequireConfirmation;
    type Args = CommandArgs;
    type Output = String;
    type Error = ToolError;

    fn description(&self) -> String {
        "Run a shell command in the sandbox".to_string()
    }

    async fn call(&self, args: Self::Args) -> std::result::Result<Self::Output, Self::Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ToolError::execution(format!("sandbox unavailable for `{}`", args.command)))
    }
}

struct Fixture {
    resolver: Resolver,
    weather_calls: Arc<AtomicUsize>,
    command_calls: Arc<AtomicUsize>,
}

fn fixture() -> Fixture {
    init_tracing();
    let weather = GetWeather::default();
    let command = RunCommand::default();
    let weather_calls = weather.calls.clone();
    let command_calls = command.calls.clone();
    let registry = ToolRegistry::new()
        .with(weather)
        .unwrap()
        .with(command)
        .unwrap();
    Fixture {
        resolver: Resolver::new(Arc::new(registry)),
        weather_calls,
        command_calls,
    }
}

fn weather_call(call_id: &str) -> ToolInvocation {
    ToolInvocation::new(call_id, "getWeatherInformation", json!({"city": "Paris"}))
        .with_state(ToolState::ConfirmationPending)
}

fn command_call(call_id: &str) -> ToolInvocation {
    ToolInvocation::new(call_id, "runCommand", json!({"command": "ls"}))
        .with_state(ToolState::ConfirmationPending)
}

fn conversation(invocations: Vec<ToolInvocation>) -> Vec<Message> {
    vec![
        Message::user("What is the weather in Paris?"),
        Message::assistant_with_invocations(invocations),
    ]
}

/// Logs covering every state, damaged parts and duplicate call ids.
fn corpus() -> Vec<Vec<Message>> {
    let streaming = |id: &str| weather_call(id).with_state(ToolState::InputStreaming);
    let mut done = weather_call("done");
    done.result = Some(json!("The weather in Paris is sunny"));
    done.state = ToolState::OutputAvailable;

    vec![
        vec![],
        conversation(vec![weather_call("c1")]),
        conversation(vec![streaming("c1")]),
        conversation(vec![weather_call("c1").with_decision("approve"), streaming("c2")]),
        vec![
            Message::user("hi"),
            Message::new(
                Role::Assistant,
                vec![
                    Part::text("Let me check."),
                    Part::Malformed(json!({"type": "tool-invocation"})),
                    streaming("c1").into(),
                    command_call("c2").with_decision(true).into(),
                ],
            ),
            Message::assistant_with_invocations(vec![done]),
        ],
        vec![
            Message::assistant_with_invocations(vec![weather_call("dup")]),
            Message::user("yes please"),
            Message::assistant_with_invocations(vec![weather_call("dup").with_decision("yes")]),
        ],
        conversation(vec![
            weather_call("c1").with_decision("reject"),
            ToolInvocation::new("c2", "ghost", Value::Null),
            weather_call("c3").with_state(ToolState::InputAvailable),
        ]),
    ]
}

fn invocation_states(log: &[Message]) -> Vec<ToolState> {
    log.iter()
        .flat_map(Message::tool_invocations)
        .map(|inv| inv.state)
        .collect()
}

fn shape(log: &[Message]) -> Vec<(String, Vec<Option<String>>)> {
    log.iter()
        .map(|m| {
            let parts = m
                .parts
                .iter()
                .map(|p| p.as_tool_invocation().map(|inv| inv.call_id.clone()))
                .collect();
            (m.id.clone(), parts)
        })
        .collect()
}

mod scenarios {
    use super::*;

    #[tokio::test]
    async fn pending_without_decision_is_unchanged() {
        let f = fixture();
        let log = conversation(vec![weather_call("call_1")]);
        let out = f.resolver.resolve(sanitize(&log), &EmbeddedDecisions).await;

        assert_eq!(out.log, log);
        assert!(out.events.is_empty());
        assert_eq!(
            out.log[1].tool_invocation("call_1").unwrap().state,
            ToolState::ConfirmationPending
        );
        assert_eq!(f.weather_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn approved_invocation_runs_executor() {
        let f = fixture();
        let log = conversation(vec![weather_call("call_1").with_decision(APPROVAL_YES)]);
        let out = f.resolver.resolve(sanitize(&log), &EmbeddedDecisions).await;

        let inv = out.log[1].tool_invocation("call_1").unwrap();
        assert_eq!(inv.state, ToolState::OutputAvailable);
        assert_eq!(inv.result, Some(json!("The weather in Paris is sunny")));
        assert_eq!(
            out.events,
            vec![ToolUpdate {
                call_id: "call_1".into(),
                tool_name: "getWeatherInformation".into(),
                new_state: ToolState::OutputAvailable,
                result: Some(json!("The weather in Paris is sunny")),
            }]
        );
        assert_eq!(f.weather_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rejected_invocation_never_executes() {
        let f = fixture();
        let log = conversation(vec![weather_call("call_1").with_decision(APPROVAL_NO)]);
        let out = f.resolver.resolve(sanitize(&log), &EmbeddedDecisions).await;

        let inv = out.log[1].tool_invocation("call_1").unwrap();
        assert_eq!(inv.state, ToolState::Rejected);
        assert_eq!(inv.result, Some(json!(f.resolver.rejection_message())));
        assert_eq!(out.events.len(), 1);
        assert_eq!(f.weather_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn interrupted_stream_is_sanitized_away() {
        init_tracing();
        let streaming = weather_call("c1").with_state(ToolState::InputStreaming);

        let only_part = conversation(vec![streaming.clone()]);
        let out = sanitize(&only_part);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, only_part[0].id);

        let with_text = vec![Message::new(
            Role::Assistant,
            vec![Part::text("Checking."), streaming.into()],
        )];
        let out = sanitize(&with_text);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].parts, vec![Part::text("Checking.")]);
    }

    #[tokio::test]
    async fn executor_failure_does_not_stop_the_pass() {
        let f = fixture();
        let log = conversation(vec![
            command_call("c1").with_decision("approve"),
            weather_call("c2").with_decision("approve"),
        ]);
        let out = f.resolver.resolve(sanitize(&log), &EmbeddedDecisions).await;

        let first = out.log[1].tool_invocation("c1").unwrap();
        assert_eq!(first.state, ToolState::OutputError);
        assert_eq!(
            first.result,
            Some(json!("Execution error: sandbox unavailable for `ls`"))
        );
        assert_eq!(
            out.log[1].tool_invocation("c2").unwrap().state,
            ToolState::OutputAvailable
        );
        let order: Vec<_> = out.events.iter().map(|e| e.call_id.as_str()).collect();
        assert_eq!(order, vec!["c1", "c2"]);
        assert_eq!(f.command_calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.weather_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn second_pass_finds_nothing_to_do() {
        let f = fixture();
        let log = conversation(vec![
            weather_call("c1").with_decision("approve"),
            command_call("c2").with_decision("reject"),
        ]);
        let first = f.resolver.resolve(sanitize(&log), &EmbeddedDecisions).await;
        assert_eq!(first.events.len(), 2);

        let second = f
            .resolver
            .resolve(sanitize(&first.log), &EmbeddedDecisions)
            .await;
        assert!(second.events.is_empty());
        assert_eq!(second.log, first.log);
    }
}

mod properties {
    use super::*;

    #[test]
    fn sanitize_is_total_and_idempotent() {
        init_tracing();
        for log in corpus() {
            let once = sanitize(&log);
            assert!(!invocation_states(&once).contains(&ToolState::InputStreaming));
            assert!(once.iter().all(|m| m.parts.iter().all(|p| !matches!(p, Part::Malformed(_)))));
            assert_eq!(sanitize(&once), once);
        }
    }

    #[tokio::test]
    async fn resolve_is_idempotent() {
        for log in corpus() {
            let f = fixture();
            let first = f.resolver.resolve(sanitize(&log), &EmbeddedDecisions).await;
            let second = f.resolver.resolve(first.log.clone(), &EmbeddedDecisions).await;
            assert!(second.events.is_empty(), "{:?}", second.events);
        }
    }

    #[tokio::test]
    async fn executors_run_at_most_once_per_call_id() {
        let f = fixture();
        let log = conversation(vec![
            weather_call("c1").with_decision("approve"),
            command_call("c2").with_decision("approve"),
        ]);
        for _ in 0..3 {
            f.resolver.resolve(sanitize(&log), &EmbeddedDecisions).await;
        }
        let resolved = f.resolver.resolve(sanitize(&log), &EmbeddedDecisions).await;
        f.resolver.resolve(resolved.log, &ApproveAll).await;

        assert_eq!(f.weather_calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.command_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn order_is_preserved() {
        for log in corpus() {
            let f = fixture();
            let sanitized = sanitize(&log);
            let out = f.resolver.resolve(sanitized.clone(), &EmbeddedDecisions).await;
            assert_eq!(shape(&out.log), shape(&sanitized));

            let kept: Vec<_> = shape(&sanitized).into_iter().map(|(id, _)| id).collect();
            let original: Vec<_> = log.iter().map(|m| m.id.clone()).collect();
            let mut cursor = original.iter();
            assert!(kept.iter().all(|id| cursor.any(|o| o == id)));
        }
    }

    #[tokio::test]
    async fn model_log_has_no_unresolved_invocations() {
        for log in corpus() {
            let f = fixture();
            let out = f.resolver.resolve(sanitize(&log), &EmbeddedDecisions).await;
            let states = invocation_states(&out.model_log());
            assert!(!states.contains(&ToolState::ConfirmationPending));
            assert!(!states.contains(&ToolState::InputStreaming));
        }
    }
}

mod decisions {
    use super::*;

    #[tokio::test]
    async fn malformed_payload_waits() {
        let f = fixture();
        let log = conversation(vec![weather_call("c1").with_decision(json!({"approved": "maybe"}))]);
        let out = f.resolver.resolve(sanitize(&log), &EmbeddedDecisions).await;
        assert_eq!(out.pending, vec!["c1"]);
        assert!(out.events.is_empty());
    }

    #[tokio::test]
    async fn out_of_band_decisions() {
        let f = fixture();
        let decisions = DecisionMap::new().approve("c1");
        let log = conversation(vec![weather_call("c1"), command_call("c2")]);
        let out = f.resolver.resolve(sanitize(&log), &decisions).await;
        assert_eq!(out.events.len(), 1);
        assert_eq!(out.pending, vec!["c2"]);
        assert!(out.is_blocked());
    }

    #[tokio::test]
    async fn reject_all_source() {
        let f = fixture();
        let out = f
            .resolver
            .resolve(conversation(vec![weather_call("c1"), command_call("c2")]), &RejectAll)
            .await;
        assert!(
            invocation_states(&out.log)
                .iter()
                .all(|s| *s == ToolState::Rejected)
        );
        assert_eq!(f.weather_calls.load(Ordering::SeqCst), 0);
        assert_eq!(f.command_calls.load(Ordering::SeqCst), 0);
    }
}
