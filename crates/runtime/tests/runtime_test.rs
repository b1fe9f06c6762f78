//! End-to-end behaviour of the dialog service: suspension and resumption,
//! the compilation cache, tool invocation, and source watching.

use async_trait::async_trait;
use basic_dialog_runtime::adapters::{fingerprint, InMemorySourceStore, RecordingTransport};
use basic_dialog_runtime::config::RuntimeConfig;
use basic_dialog_runtime::engine::Continuation;
use basic_dialog_runtime::external::{
    ChatMessage, Collaborators, Completion, LlmProvider, Role, SourceChange, SourceDocument,
    SourceStore, ToolCall,
};
use basic_dialog_runtime::watcher::spawn_watcher;
use basic_dialog_runtime::{
    DialogService, RunOutcome, RuntimeError, ServiceError, SuspendReason, ToolRegistry, Value,
};
use basic_dialog_parser::FunctionTool;
use futures::stream::BoxStream;
use indexmap::IndexMap;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

const BOT: &str = "demo";

struct Harness {
    sources: Arc<InMemorySourceStore>,
    transport: Arc<RecordingTransport>,
    service: Arc<DialogService>,
}

fn harness_with(config: RuntimeConfig, llm: Option<Arc<dyn LlmProvider>>) -> Harness {
    let sources = Arc::new(InMemorySourceStore::new());
    let transport = Arc::new(RecordingTransport::default());
    let mut collaborators = Collaborators::new(transport.clone());
    if let Some(llm) = llm {
        collaborators = collaborators.with_llm(llm);
    }
    let service = Arc::new(DialogService::new(config, sources.clone(), collaborators));
    Harness {
        sources,
        transport,
        service,
    }
}

fn harness() -> Harness {
    harness_with(RuntimeConfig::default(), None)
}

fn args(pairs: &[(&str, Value)]) -> IndexMap<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// Replays canned completions and records what it was asked.
struct ScriptedLlm {
    replies: Mutex<VecDeque<Completion>>,
    requests: Mutex<Vec<(Vec<ChatMessage>, Vec<String>)>>,
}

impl ScriptedLlm {
    fn new(replies: Vec<Completion>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::default(),
        }
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[FunctionTool],
    ) -> Result<Completion, ServiceError> {
        let names = tools.iter().map(|t| t.function.name.clone()).collect();
        self.requests.lock().push((messages.to_vec(), names));
        self.replies
            .lock()
            .pop_front()
            .ok_or_else(|| ServiceError::Rejected("no more replies".into()))
    }
}

// ============================================================================
// Conversations
// ============================================================================

#[tokio::test]
async fn test_hear_suspends_and_resumes_with_reply() {
    let h = harness();
    h.sources.put(
        BOT,
        "greeting.bas",
        "TALK \"What is your name?\"\nHEAR name\nTALK \"Nice to meet you, \" & name\n",
    );

    let first = h.service.run_script(BOT, "s1", "greeting.bas", None).await;
    let RunOutcome::Suspended(suspension) = first else {
        panic!("expected a suspension, got {first:?}");
    };
    assert_eq!(
        suspension.reason,
        SuspendReason::AwaitingInput {
            variable: "name".into()
        }
    );

    let json = suspension.continuation.to_json().unwrap();
    assert_eq!(Continuation::from_json(&json).unwrap(), suspension.continuation);

    let second = h
        .service
        .run_script(BOT, "s1", "greeting.bas", Some("Ada".into()))
        .await;
    assert_eq!(second, RunOutcome::Completed(Value::Null));
    assert_eq!(
        h.transport.messages_for("s1"),
        vec!["What is your name?", "Nice to meet you, Ada"]
    );
    assert!(h.service.pending(BOT, "s1").await.is_none());
}

#[tokio::test]
async fn test_sessions_do_not_share_bindings() {
    let h = harness();
    h.sources.put(BOT, "echo.bas", "HEAR word\nTALK word\n");

    h.service.run_script(BOT, "a", "echo.bas", None).await;
    h.service.run_script(BOT, "b", "echo.bas", None).await;
    h.service.run_script(BOT, "b", "echo.bas", Some("bee".into())).await;
    h.service.run_script(BOT, "a", "echo.bas", Some("ant".into())).await;

    assert_eq!(h.transport.messages_for("a"), vec!["ant"]);
    assert_eq!(h.transport.messages_for("b"), vec!["bee"]);
}

#[tokio::test]
async fn test_invalid_reply_reprompts() {
    let h = harness();
    h.sources.put(
        BOT,
        "age.bas",
        "TALK \"How old are you?\"\nHEAR age AS INTEGER\nTALK \"Next year you will be \" & age + 1\n",
    );

    h.service.run_script(BOT, "s", "age.bas", None).await;
    let retry = h
        .service
        .run_script(BOT, "s", "age.bas", Some("old".into()))
        .await;
    assert!(matches!(retry, RunOutcome::Suspended(_)));
    let fractional = h
        .service
        .run_script(BOT, "s", "age.bas", Some("2.5".into()))
        .await;
    assert!(matches!(fractional, RunOutcome::Suspended(_)));

    let done = h
        .service
        .run_script(BOT, "s", "age.bas", Some("41".into()))
        .await;
    assert_eq!(done, RunOutcome::Completed(Value::Null));
    assert_eq!(
        h.transport.messages_for("s"),
        vec![
            "How old are you?",
            "Please enter a whole number.",
            "Please enter a whole number.",
            "Next year you will be 42",
        ]
    );
}

#[tokio::test]
async fn test_menu_reply_and_loops() {
    let h = harness();
    h.sources.put(
        BOT,
        "menu.bas",
        r#"HEAR choice AS "Count", "List"
SELECT CASE choice
    CASE "Count"
        total = 0
        FOR i = 1 TO 10
            IF i = 5 THEN EXIT FOR
            total = total + i
        NEXT
        TALK "total " & total
    CASE "List"
        FOR EACH item IN ["a", "b"]
            TALK item
        NEXT
END SELECT
n = 0
DO WHILE n < 100
    n = n + 1
    IF n = 3 THEN EXIT DO
LOOP
RETURN n
"#,
    );

    h.service.run_script(BOT, "s", "menu.bas", None).await;
    let outcome = h
        .service
        .run_script(BOT, "s", "menu.bas", Some("1".into()))
        .await;
    assert_eq!(outcome, RunOutcome::Completed(Value::Number(3.0)));
    assert_eq!(h.transport.messages_for("s"), vec!["total 10"]);

    h.service.run_script(BOT, "t", "menu.bas", None).await;
    h.service.run_script(BOT, "t", "menu.bas", Some("list".into())).await;
    assert_eq!(h.transport.messages_for("t"), vec!["a", "b"]);
}

#[tokio::test]
async fn test_bot_memory_is_shared_across_sessions() {
    let h = harness();
    h.sources.put(BOT, "write.bas", "SET BOT MEMORY \"motd\", \"Hello all\"\n");
    h.sources.put(BOT, "read.bas", "motd = GET BOT MEMORY \"motd\"\nTALK motd\n");

    h.service.run_script(BOT, "writer", "write.bas", None).await;
    h.service.run_script(BOT, "reader", "read.bas", None).await;
    assert_eq!(h.transport.messages_for("reader"), vec!["Hello all"]);
}

#[tokio::test]
async fn test_step_budget_stops_runaway_loop() {
    let mut config = RuntimeConfig::default();
    config.engine.step_budget = 50;
    let h = harness_with(config, None);
    h.sources.put(BOT, "spin.bas", "x = 0\nWHILE 1 = 1\n    x = x + 1\nWEND\n");

    let outcome = h.service.run_script(BOT, "s", "spin.bas", None).await;
    assert_eq!(
        outcome,
        RunOutcome::Failed(RuntimeError::StepBudgetExceeded { budget: 50 })
    );
    assert_eq!(
        h.transport.messages_for("s"),
        vec![RuntimeConfig::default().fallback_message]
    );
}

#[tokio::test]
async fn test_runtime_error_sends_fallback_and_clears_session() {
    let h = harness();
    h.sources.put(BOT, "bad.bas", "HEAR x\nTALK 1 / 0\n");

    h.service.run_script(BOT, "s", "bad.bas", None).await;
    let outcome = h
        .service
        .run_script(BOT, "s", "bad.bas", Some("go".into()))
        .await;
    assert_eq!(outcome, RunOutcome::Failed(RuntimeError::DivisionByZero));
    assert!(h.service.pending(BOT, "s").await.is_none());
    assert_eq!(h.transport.messages_for("s").len(), 1);
}

#[tokio::test]
async fn test_finished_sessions_are_released() {
    let h = harness();
    h.sources.put(BOT, "hi.bas", "TALK \"hi\"\n");
    h.sources.put(BOT, "ask.bas", "HEAR x\nTALK x\n");
    h.sources.put(BOT, "bad.bas", "TALK 1 / 0\n");

    for i in 0..20 {
        h.service.run_script(BOT, &format!("s{i}"), "hi.bas", None).await;
    }
    h.service.run_script(BOT, "failing", "bad.bas", None).await;
    h.service.run_script(BOT, "missing", "nope.bas", None).await;
    assert_eq!(h.service.session_count(), 0);

    h.service.run_script(BOT, "waiting", "ask.bas", None).await;
    assert_eq!(h.service.session_count(), 1);
    assert!(h.service.pending(BOT, "waiting").await.is_some());

    h.service
        .run_script(BOT, "waiting", "ask.bas", Some("done".into()))
        .await;
    assert_eq!(h.service.session_count(), 0);
    assert_eq!(h.transport.messages_for("waiting"), vec!["done"]);
}

#[tokio::test]
async fn test_long_wait_suspends_until_deadline() {
    let mut config = RuntimeConfig::default();
    config.engine.max_inline_wait_secs = 0.5;
    let h = harness_with(config, None);
    h.sources.put(BOT, "nap.bas", "WAIT 0\nTALK \"short\"\nWAIT 3600\nTALK \"long\"\n");

    let first = h.service.run_script(BOT, "s", "nap.bas", None).await;
    let RunOutcome::Suspended(suspension) = first else {
        panic!("expected a suspension, got {first:?}");
    };
    assert!(matches!(suspension.reason, SuspendReason::Sleeping { .. }));

    let again = h.service.run_script(BOT, "s", "nap.bas", Some("hello?".into())).await;
    assert_eq!(again, RunOutcome::Suspended(suspension));
    assert_eq!(h.transport.messages_for("s"), vec!["short"]);
}

#[tokio::test]
async fn test_wait_beyond_representable_time_fails_cleanly() {
    let h = harness();
    h.sources.put(BOT, "forever.bas", "WAIT 10000000000000\nTALK \"never\"\n");
    h.sources.put(BOT, "later.bas", "WAIT 10 ^ 300\n");

    let outcome = h.service.run_script(BOT, "s", "forever.bas", None).await;
    assert!(
        matches!(&outcome, RunOutcome::Failed(RuntimeError::InvalidArgument { function, .. }) if function == "WAIT"),
        "{outcome:?}"
    );
    assert!(h.service.pending(BOT, "s").await.is_none());

    let outcome = h.service.run_script(BOT, "t", "later.bas", None).await;
    assert!(matches!(outcome, RunOutcome::Failed(RuntimeError::InvalidArgument { .. })));
}

#[tokio::test]
async fn test_cancel_session_stops_inline_wait() {
    let mut config = RuntimeConfig::default();
    config.engine.max_inline_wait_secs = 60.0;
    let h = harness_with(config, None);
    h.sources.put(BOT, "slow.bas", "WAIT 30\nTALK \"too late\"\n");

    let service = h.service.clone();
    let turn = tokio::spawn(async move { service.run_script(BOT, "s", "slow.bas", None).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.service.cancel_session(BOT, "s"));

    let outcome = tokio::time::timeout(Duration::from_secs(5), turn)
        .await
        .expect("turn should stop promptly")
        .unwrap();
    assert_eq!(outcome, RunOutcome::Failed(RuntimeError::Cancelled));
    assert!(h.transport.all().is_empty());
}

#[tokio::test]
async fn test_stale_continuation_restarts_script() {
    let h = harness();
    h.sources.put(BOT, "ask.bas", "TALK \"v1\"\nHEAR answer\nTALK answer\n");
    h.service.run_script(BOT, "s", "ask.bas", None).await;

    h.sources.put(BOT, "ask.bas", "TALK \"v2\"\nHEAR answer\nTALK \"got \" & answer\n");
    let outcome = h
        .service
        .run_script(BOT, "s", "ask.bas", Some("ignored".into()))
        .await;
    assert!(matches!(outcome, RunOutcome::Suspended(_)));

    h.service.run_script(BOT, "s", "ask.bas", Some("yes".into())).await;
    assert_eq!(h.transport.messages_for("s"), vec!["v1", "v2", "got yes"]);
}

// ============================================================================
// Compilation cache
// ============================================================================

#[tokio::test]
async fn test_unchanged_source_compiles_once() {
    let h = harness();
    h.sources.put(BOT, "hello.bas", "DESCRIPTION \"Says hello\"\nTALK \"hello\"\n");

    let a = h.service.compile(BOT, "hello.bas").await.unwrap();
    let b = h.service.compile(BOT, "hello.bas").await.unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(h.service.registry().pipeline_runs(), 1);

    h.sources.put(BOT, "hello.bas", "DESCRIPTION \"Says hello\"\nTALK \"hi\"\n");
    let c = h.service.compile(BOT, "hello.bas").await.unwrap();
    assert_ne!(a.fingerprint, c.fingerprint);
    assert_eq!(h.service.registry().pipeline_runs(), 2);
}

/// Returns what the inner store holds when asked, but the first read then
/// waits for the test to let it finish.
struct GatedStore {
    inner: Arc<InMemorySourceStore>,
    gate: Mutex<Option<(oneshot::Sender<()>, oneshot::Receiver<()>)>>,
}

#[async_trait]
impl SourceStore for GatedStore {
    async fn get(&self, bot_id: &str, path: &str) -> Result<SourceDocument, ServiceError> {
        let document = self.inner.get(bot_id, path).await?;
        let gate = self.gate.lock().take();
        if let Some((read, release)) = gate {
            let _ = read.send(());
            let _ = release.await;
        }
        Ok(document)
    }

    fn subscribe(&self, bot_id: &str, prefix: &str) -> BoxStream<'static, SourceChange> {
        self.inner.subscribe(bot_id, prefix)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_edit_during_slow_compile_is_not_rolled_back() {
    let inner = Arc::new(InMemorySourceStore::new());
    inner.put(BOT, "hello.bas", "DESCRIPTION \"Greets\"\nRETURN 1\n");
    let (read_tx, read_rx) = oneshot::channel();
    let (release_tx, release_rx) = oneshot::channel();
    let store = Arc::new(GatedStore {
        inner: inner.clone(),
        gate: Mutex::new(Some((read_tx, release_rx))),
    });
    let service = Arc::new(DialogService::new(
        RuntimeConfig::default(),
        store,
        Collaborators::new(Arc::new(RecordingTransport::default())),
    ));

    let slow = {
        let service = service.clone();
        tokio::spawn(async move { service.compile(BOT, "hello.bas").await })
    };
    read_rx.await.unwrap();

    inner.put(BOT, "hello.bas", "DESCRIPTION \"Greets\"\nRETURN 2\n");
    let fresh = service.compile(BOT, "hello.bas").await.unwrap();
    release_tx.send(()).unwrap();
    let stale = slow.await.unwrap().unwrap();

    assert_ne!(stale.fingerprint, fresh.fingerprint);
    assert_eq!(
        service.registry().get(BOT, "hello.bas").map(|c| c.fingerprint.clone()),
        Some(fresh.fingerprint.clone())
    );
    assert_eq!(
        service.run_script(BOT, "s", "hello.bas", None).await,
        RunOutcome::Completed(Value::Number(2.0))
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_share_one_compile() {
    let registry = Arc::new(ToolRegistry::default());
    let mut source = String::from("DESCRIPTION \"Counts\"\n");
    for i in 0..2_000 {
        source.push_str(&format!("x{i} = {i} * 2\n"));
    }
    let fp = fingerprint(source.as_bytes());

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let registry = registry.clone();
            let source = source.clone();
            let fp = fp.clone();
            tokio::spawn(async move {
                registry
                    .compile_or_get(BOT, "count.bas", source.as_bytes(), &fp)
                    .await
            })
        })
        .collect();

    let results: Vec<_> = futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .collect();

    assert_eq!(registry.pipeline_runs(), 1);
    assert!(results.iter().all(|c| Arc::ptr_eq(c, &results[0])));
}

#[tokio::test]
async fn test_failed_compile_is_negatively_cached() {
    let registry = ToolRegistry::default();
    let broken = b"IF x THEN\n";
    let fp = fingerprint(broken);

    let first = registry.compile_or_get(BOT, "b.bas", broken, &fp).await.unwrap_err();
    let second = registry.compile_or_get(BOT, "b.bas", broken, &fp).await.unwrap_err();
    assert_eq!(first, second);
    assert_eq!(registry.pipeline_runs(), 1);
}

#[tokio::test]
async fn test_expired_negative_entry_is_retried() {
    let mut config = RuntimeConfig::default();
    config.cache.negative_ttl_ms = 0;
    let registry = ToolRegistry::new(&config.cache);
    let broken = b"IF x THEN\n";
    let fp = fingerprint(broken);

    assert!(registry.compile_or_get(BOT, "b.bas", broken, &fp).await.is_err());
    assert!(registry.compile_or_get(BOT, "b.bas", broken, &fp).await.is_err());
    assert_eq!(registry.pipeline_runs(), 2);
}

#[tokio::test]
async fn test_broken_edit_is_not_served_and_fix_recovers() {
    let h = harness();
    h.sources.put(BOT, "tool.bas", "DESCRIPTION \"Works\"\nRETURN 1\n");
    let good = h.service.compile(BOT, "tool.bas").await.unwrap();

    h.sources.put(BOT, "tool.bas", "DESCRIPTION \"Works\"\nIF THEN\n");
    assert!(h.service.compile(BOT, "tool.bas").await.is_err());
    assert!(h.service.registry().get(BOT, "tool.bas").is_none());
    assert_eq!(h.service.registry().last_good(BOT, "tool.bas"), Some(good));

    let outcome = h.service.run_script(BOT, "s", "tool.bas", None).await;
    assert!(matches!(outcome, RunOutcome::Failed(RuntimeError::Compile(_))));

    h.sources.put(BOT, "tool.bas", "DESCRIPTION \"Works\"\nRETURN 2\n");
    let outcome = h.service.run_script(BOT, "s", "tool.bas", None).await;
    assert_eq!(outcome, RunOutcome::Completed(Value::Number(2.0)));
}

// ============================================================================
// Tools
// ============================================================================

const BOOKING: &str = r#"PARAM seats AS INTEGER DESCRIPTION "How many seats"
PARAM day AS DATE DESCRIPTION "Travel day"
DESCRIPTION "Books seats"
RETURN seats * 2 & " half-seats on " & day
"#;

#[tokio::test]
async fn test_invoke_tool_coerces_arguments() {
    let h = harness();
    h.sources.put(BOT, "booking.bas", BOOKING);
    h.service.compile(BOT, "booking.bas").await.unwrap();

    let result = h
        .service
        .invoke_tool(
            BOT,
            "booking",
            args(&[("SEATS", "4".into()), ("day", "31/12/2024".into())]),
        )
        .await;
    assert_eq!(result, Ok(Value::from("8 half-seats on 2024-12-31")));
}

#[tokio::test]
async fn test_invoke_tool_reports_missing_and_bad_arguments() {
    let h = harness();
    h.sources.put(BOT, "booking.bas", BOOKING);
    h.service.compile(BOT, "booking.bas").await.unwrap();

    let missing = h
        .service
        .invoke_tool(BOT, "booking", args(&[("seats", Value::Number(2.0))]))
        .await;
    assert_eq!(
        missing,
        Err(RuntimeError::MissingArgument {
            tool: "booking".into(),
            argument: "day".into()
        })
    );

    let bad = h
        .service
        .invoke_tool(
            BOT,
            "booking",
            args(&[("seats", "two".into()), ("day", "2024-01-01".into())]),
        )
        .await;
    assert!(matches!(bad, Err(RuntimeError::Coercion(_))));

    let unknown = h.service.invoke_tool(BOT, "nope", IndexMap::new()).await;
    assert_eq!(unknown, Err(RuntimeError::UnknownTool("nope".into())));
}

#[tokio::test]
async fn test_invoke_tool_compiles_on_demand() {
    let h = harness();
    h.sources.put(BOT, "booking.bas", BOOKING);

    let fresh = h
        .service
        .invoke_tool(
            BOT,
            "booking",
            args(&[("seats", Value::Number(1.0)), ("day", "2024-05-01".into())]),
        )
        .await;
    assert_eq!(fresh, Ok(Value::from("2 half-seats on 2024-05-01")));

    // Edited in a sub-directory, invalidated, not yet recompiled.
    h.sources.put(BOT, "travel/trip.bas", "DESCRIPTION \"Trips\"\nRETURN 1\n");
    h.service.compile(BOT, "travel/trip.bas").await.unwrap();
    let fp = h
        .sources
        .put(BOT, "travel/trip.bas", "DESCRIPTION \"Trips\"\nRETURN 2\n");
    h.service.registry().invalidate(BOT, "travel/trip.bas", &fp);
    assert!(h.service.registry().find_tool(BOT, "trip").is_none());

    let result = h.service.invoke_tool(BOT, "trip", IndexMap::new()).await;
    assert_eq!(result, Ok(Value::Number(2.0)));

    h.sources.put(BOT, "plain.bas", "TALK \"not a tool\"\n");
    let hidden = h.service.invoke_tool(BOT, "plain", IndexMap::new()).await;
    assert_eq!(hidden, Err(RuntimeError::UnknownTool("plain".into())));
}

#[tokio::test]
async fn test_tool_waiting_for_input_is_an_error() {
    let h = harness();
    h.sources.put(BOT, "ask.bas", "DESCRIPTION \"Asks\"\nHEAR x\n");
    h.service.compile(BOT, "ask.bas").await.unwrap();

    let result = h.service.invoke_tool(BOT, "ask", IndexMap::new()).await;
    assert_eq!(result, Err(RuntimeError::ToolSuspended("ask".into())));
}

#[tokio::test]
async fn test_llm_calls_active_tool_and_uses_result() {
    let mut arguments = serde_json::Map::new();
    arguments.insert("city".into(), serde_json::Value::from("Paris"));
    let llm = Arc::new(ScriptedLlm::new(vec![
        Completion {
            text: String::new(),
            tool_calls: vec![ToolCall {
                tool_name: "weather".into(),
                arguments,
            }],
        },
        Completion {
            text: "It is sunny in Paris.".into(),
            tool_calls: Vec::new(),
        },
    ]));
    let h = harness_with(RuntimeConfig::default(), Some(llm.clone() as Arc<dyn LlmProvider>));

    h.sources.put(
        BOT,
        "weather.bas",
        "PARAM city AS STRING DESCRIPTION \"City\"\nDESCRIPTION \"Gets weather\"\nRETURN \"Sunny in \" & city\n",
    );
    h.sources.put(
        BOT,
        "chat.bas",
        "USE TOOL \"weather\"\nSET CONTEXT \"persona\", \"Be brief\"\nanswer = LLM \"What is the weather in Paris?\"\nTALK answer\n",
    );
    h.service.compile(BOT, "weather.bas").await.unwrap();

    let outcome = h.service.run_script(BOT, "s", "chat.bas", None).await;
    assert_eq!(outcome, RunOutcome::Completed(Value::Null));
    assert_eq!(h.transport.messages_for("s"), vec!["It is sunny in Paris."]);

    let requests = llm.requests.lock();
    assert_eq!(requests.len(), 2);
    let (first_messages, offered) = &requests[0];
    assert_eq!(offered, &vec!["weather".to_string()]);
    assert_eq!(first_messages[0], ChatMessage::new(Role::System, "persona: Be brief"));
    let (second_messages, _) = &requests[1];
    assert_eq!(
        second_messages.last(),
        Some(&ChatMessage::tool_result("weather", "Sunny in Paris"))
    );
}

#[tokio::test]
async fn test_llm_without_active_tools_offers_none() {
    let llm = Arc::new(ScriptedLlm::new(vec![Completion {
        text: "Hello!".into(),
        tool_calls: Vec::new(),
    }]));
    let h = harness_with(RuntimeConfig::default(), Some(llm.clone() as Arc<dyn LlmProvider>));
    h.sources.put(BOT, "weather.bas", "DESCRIPTION \"Gets weather\"\nRETURN 1\n");
    h.sources.put(BOT, "chat.bas", "reply = LLM \"Hi\"\nTALK reply\n");
    h.service.compile(BOT, "weather.bas").await.unwrap();
    h.service.run_script(BOT, "s", "chat.bas", None).await;

    assert_eq!(h.transport.messages_for("s"), vec!["Hello!"]);
    assert!(llm.requests.lock()[0].1.is_empty());
}

// ============================================================================
// Source watching
// ============================================================================

async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn test_watcher_recompiles_changed_scripts() {
    let h = harness();
    let cancel = CancellationToken::new();
    let watcher = spawn_watcher(h.service.clone(), BOT, "", cancel.clone());
    tokio::time::sleep(Duration::from_millis(50)).await;

    h.sources.put(BOT, "news.bas", "DESCRIPTION \"Latest news\"\nRETURN \"none\"\n");
    h.sources.put(BOT, "notes.txt", "not a script");
    let registry = h.service.registry().clone();
    assert!(eventually(|| registry.find_tool(BOT, "news").is_some()).await);
    assert_eq!(registry.pipeline_runs(), 1);

    h.sources.put(BOT, "news.bas", "DESCRIPTION \"Latest news\"\nIF\n");
    assert!(eventually(|| registry.last_failure(BOT, "news.bas").is_some()).await);
    assert!(registry.find_tool(BOT, "news").is_none());

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), watcher)
        .await
        .expect("watcher stops on cancel")
        .unwrap();
}
