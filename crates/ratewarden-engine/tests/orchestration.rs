//! End-to-end tests driving a full [`FallbackEngine`] (janitor included)
//! through [`MockHost`], mirroring the teacher's
//! `claw_llm/tests/router_tests.rs` use of a mock provider plus
//! `#[tokio::test]`. These exercise the public `handle_event` entry point
//! rather than poking `FallbackOrchestrator` directly, so they also cover
//! wiring: config snapshot plumbing, janitor spawn/shutdown, and
//! `update_config` hot-reload (spec §8 S1-S6).

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use ratewarden_config::{FallbackConfig, FallbackMode, ModelRefConfig, RetryPolicyConfig, RetryStrategy};
use ratewarden_core::{ClassifiableError, Event, SessionStatus, TestClock};
use ratewarden_engine::mock::{MockHost, RecordedCall};
use ratewarden_engine::{FallbackEngine, JanitorTtls};

fn epoch() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

fn model(provider: &str, id: &str) -> ModelRefConfig {
    ModelRefConfig {
        provider_id: provider.into(),
        model_id: id.into(),
    }
}

/// Skips the backoff sleep so tests don't pay real wall-clock delay between
/// a rate-limit detection and the re-prompt it triggers.
fn immediate_retry() -> RetryPolicyConfig {
    RetryPolicyConfig {
        strategy: RetryStrategy::Immediate,
        ..Default::default()
    }
}

/// A janitor interval long enough that it never fires during a test.
fn inert_ttls() -> JanitorTtls {
    JanitorTtls {
        cleanup_interval_ms: 3_600_000,
        ..Default::default()
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

/// S1: a rate-limit error on the current model cycles to the next model in
/// `models` and re-prompts with the session's last user message.
#[tokio::test]
async fn s1_rate_limit_error_falls_back_to_next_model() {
    let host = Arc::new(MockHost::new().with_user_message("s1", "m1", "hello"));
    let clock = Arc::new(TestClock::new(epoch()));
    let config = FallbackConfig {
        models: vec![model("anthropic", "claude"), model("openai", "gpt")],
        mode: FallbackMode::Cycle,
        retry_policy: immediate_retry(),
        ..Default::default()
    };
    let engine = FallbackEngine::with_ttls(host.clone(), None, config, clock.clone(), inert_ttls());

    engine
        .handle_event(Event::MessageUpdated {
            info: ratewarden_core::MessageInfo {
                id: "m1".into(),
                session_id: "s1".into(),
                role: ratewarden_core::Role::Assistant,
                provider_id: Some("anthropic".into()),
                model_id: Some("claude".into()),
                agent: None,
                status: None,
                error: Some(ClassifiableError::new("rate limit exceeded").with_status(429)),
            },
        })
        .await;
    settle().await;

    let calls = host.recorded_calls();
    let aborted = calls.iter().any(|c| matches!(c, RecordedCall::Abort { session_id } if session_id == "s1"));
    let prompted = calls.iter().any(|c| matches!(
        c,
        RecordedCall::SendPromptAsync { session_id, model, .. }
            if session_id == "s1" && model.provider_id == "openai"
    ));
    assert!(aborted, "expected an abort call, got {calls:?}");
    assert!(prompted, "expected a re-prompt against the fallback model, got {calls:?}");

    engine.destroy().await;
}

/// S4: a `session.status` "retry" event whose message matches a known
/// rate-limit marker is treated exactly like a classified error (spec §6).
#[tokio::test]
async fn s4_status_retry_marker_triggers_fallback() {
    let host = Arc::new(MockHost::new().with_user_message("s4", "m1", "hi"));
    let clock = Arc::new(TestClock::new(epoch()));
    let config = FallbackConfig {
        models: vec![model("anthropic", "claude"), model("openai", "gpt")],
        retry_policy: immediate_retry(),
        ..Default::default()
    };
    let engine = FallbackEngine::with_ttls(host.clone(), None, config, clock, inert_ttls());

    engine
        .handle_event(Event::SessionStatus {
            session_id: "s4".into(),
            status: SessionStatus {
                status_type: "retry".into(),
                message: Some("upstream reports high concurrency".into()),
            },
        })
        .await;
    settle().await;

    let calls = host.recorded_calls();
    assert!(calls.iter().any(|c| matches!(c, RecordedCall::SendPromptAsync { .. })));

    engine.destroy().await;
}

/// S5: in `stop` mode, once every model has been attempted the orchestrator
/// gives up instead of cycling back to the start (no further prompt/abort).
#[tokio::test]
async fn s5_stop_mode_exhausts_without_cycling_back() {
    let host = Arc::new(MockHost::new().with_user_message("s5", "m1", "hi"));
    let clock = Arc::new(TestClock::new(epoch()));
    let config = FallbackConfig {
        models: vec![model("anthropic", "claude"), model("openai", "gpt")],
        mode: FallbackMode::Stop,
        retry_policy: immediate_retry(),
        ..Default::default()
    };
    let engine = FallbackEngine::with_ttls(host.clone(), None, config, clock, inert_ttls());

    // First hit: claude -> gpt.
    engine
        .handle_event(Event::MessageUpdated {
            info: ratewarden_core::MessageInfo {
                id: "m1".into(),
                session_id: "s5".into(),
                role: ratewarden_core::Role::Assistant,
                provider_id: Some("anthropic".into()),
                model_id: Some("claude".into()),
                agent: None,
                status: None,
                error: Some(ClassifiableError::new("rate limit").with_status(429)),
            },
        })
        .await;
    settle().await;

    // Second hit on the now-current model (gpt): no more candidates in stop
    // mode, so the engine must not issue another prompt.
    engine
        .handle_event(Event::MessageUpdated {
            info: ratewarden_core::MessageInfo {
                id: "m2".into(),
                session_id: "s5".into(),
                role: ratewarden_core::Role::Assistant,
                provider_id: Some("openai".into()),
                model_id: Some("gpt".into()),
                agent: None,
                status: None,
                error: Some(ClassifiableError::new("rate limit").with_status(429)),
            },
        })
        .await;
    settle().await;

    let prompt_count = host
        .recorded_calls()
        .iter()
        .filter(|c| matches!(c, RecordedCall::SendPromptAsync { .. }))
        .count();
    assert_eq!(prompt_count, 1, "stop mode must not re-prompt once models are exhausted");

    engine.destroy().await;
}

/// `update_config` swaps the live snapshot without disturbing a subsequent
/// fallback: a session that starts out of models under the old config
/// succeeds once the reload adds a fallback target (spec §6 hot-reload).
#[tokio::test]
async fn update_config_is_picked_up_by_the_next_orchestration() {
    let host = Arc::new(MockHost::new().with_user_message("s7", "m1", "hi"));
    let clock = Arc::new(TestClock::new(epoch()));
    let config = FallbackConfig {
        models: vec![model("anthropic", "claude")],
        mode: FallbackMode::Stop,
        retry_policy: immediate_retry(),
        ..Default::default()
    };
    let engine = FallbackEngine::with_ttls(host.clone(), None, config, clock, inert_ttls());

    engine.update_config(FallbackConfig {
        models: vec![model("anthropic", "claude"), model("openai", "gpt")],
        mode: FallbackMode::Stop,
        retry_policy: immediate_retry(),
        ..Default::default()
    });

    engine
        .handle_event(Event::MessageUpdated {
            info: ratewarden_core::MessageInfo {
                id: "m1".into(),
                session_id: "s7".into(),
                role: ratewarden_core::Role::Assistant,
                provider_id: Some("anthropic".into()),
                model_id: Some("claude".into()),
                agent: None,
                status: None,
                error: Some(ClassifiableError::new("rate limit").with_status(429)),
            },
        })
        .await;
    settle().await;

    let prompted = host
        .recorded_calls()
        .iter()
        .any(|c| matches!(c, RecordedCall::SendPromptAsync { model, .. } if model.provider_id == "openai"));
    assert!(prompted, "reloaded config should make `openai/gpt` available as a fallback");

    engine.destroy().await;
}

/// `destroy()` stops the janitor task and clears state; a second `destroy()`
/// (or further events) must not panic.
#[tokio::test]
async fn destroy_is_idempotent_and_stops_cleanly() {
    let host = Arc::new(MockHost::new());
    let clock = Arc::new(TestClock::new(epoch()));
    let config = FallbackConfig {
        models: vec![model("anthropic", "claude")],
        ..Default::default()
    };
    let engine = FallbackEngine::with_ttls(host, None, config, clock, inert_ttls());

    engine.destroy().await;
    engine.destroy().await;
}
