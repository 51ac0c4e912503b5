//! Drives the six documented fallback scenarios (spec §8 S1–S6) against the
//! in-memory mock host and prints the resulting call trace, grounded on how
//! `claw-cli::commands::start` prints a human-readable status block before
//! handing off to the runtime.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use ratewarden_config::{FallbackConfig, FallbackMode, ModelRefConfig};
use ratewarden_core::{ClassifiableError, Clock, Event, Result, SessionStatus, TestClock};
use ratewarden_engine::mock::MockHost;
use ratewarden_engine::{FallbackEngine, JanitorTtls};

fn models(pairs: &[(&str, &str)]) -> Vec<ModelRefConfig> {
    pairs
        .iter()
        .map(|(p, m)| ModelRefConfig {
            provider_id: p.to_string(),
            model_id: m.to_string(),
        })
        .collect()
}

async fn run_scenario(
    title: &str,
    config: FallbackConfig,
    host: MockHost,
    events: Vec<Event>,
) {
    println!("\n=== {title} ===");
    let host = Arc::new(host);
    let clock: Arc<dyn Clock> = Arc::new(TestClock::new(Utc::now()));
    let engine = FallbackEngine::with_ttls(
        host.clone(),
        None,
        config,
        clock,
        JanitorTtls {
            cleanup_interval_ms: 3_600_000,
            ..JanitorTtls::default()
        },
    );

    for event in events {
        engine.handle_event(event).await;
        // let the orchestrator's spawned re-prompt settle before the trace
        // is printed.
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    for call in host.recorded_calls() {
        println!("  {call:?}");
    }
    engine.destroy().await;
}

pub async fn run() -> Result<()> {
    println!("ratewarden demo — rate-limit fallback scenarios");

    // S1: a session on the first configured model hits a rate limit; the
    // engine re-prompts on the next model in cycle order.
    run_scenario(
        "S1 basic cycle fallback",
        FallbackConfig {
            models: models(&[("anthropic", "claude-a"), ("anthropic", "claude-b")]),
            ..FallbackConfig::default()
        },
        MockHost::new().with_user_message("s1", "m1", "hello"),
        vec![Event::SessionError {
            session_id: "s1".into(),
            error: ClassifiableError::new("rate limit exceeded").with_status(429),
        }],
    )
    .await;

    // S2: the next model in order is still under cooldown from a previous
    // hit, so the selector must skip it for the one after.
    run_scenario(
        "S2 cooldown skip",
        FallbackConfig {
            models: models(&[
                ("anthropic", "claude-a"),
                ("anthropic", "claude-b"),
                ("openai", "gpt-c"),
            ]),
            cooldown_ms: 60_000,
            ..FallbackConfig::default()
        },
        MockHost::new().with_user_message("s2", "m1", "hello"),
        vec![Event::SessionError {
            session_id: "s2".into(),
            error: ClassifiableError::new("rate limit exceeded").with_status(429),
        }],
    )
    .await;

    // S3: retry-last mode cycles back to index 0 once every model has been
    // attempted once.
    run_scenario(
        "S3 retry-last restart",
        FallbackConfig {
            models: models(&[("anthropic", "claude-a"), ("anthropic", "claude-b")]),
            mode: FallbackMode::RetryLast,
            ..FallbackConfig::default()
        },
        MockHost::new().with_user_message("s3", "m1", "hello"),
        vec![Event::SessionError {
            session_id: "s3".into(),
            error: ClassifiableError::new("rate limit exceeded").with_status(429),
        }],
    )
    .await;

    // S4: a `session.status { type: "retry" }` event with a known rate-limit
    // marker triggers the same fallback path as a hard error.
    run_scenario(
        "S4 status-based retry detection",
        FallbackConfig {
            models: models(&[("anthropic", "claude-a"), ("anthropic", "claude-b")]),
            ..FallbackConfig::default()
        },
        MockHost::new().with_user_message("s4", "m1", "hello"),
        vec![Event::SessionStatus {
            session_id: "s4".into(),
            status: SessionStatus {
                status_type: "retry".into(),
                message: Some("Upstream reports high concurrency, backing off".into()),
            },
        }],
    )
    .await;

    // S5: `stop` mode never selects past the originally configured list —
    // a second rate limit on the last model exhausts the fallback chain.
    run_scenario(
        "S5 stop-mode exhaustion",
        FallbackConfig {
            models: models(&[("anthropic", "claude-a")]),
            mode: FallbackMode::Stop,
            ..FallbackConfig::default()
        },
        MockHost::new().with_user_message("s5", "m1", "hello"),
        vec![Event::SessionError {
            session_id: "s5".into(),
            error: ClassifiableError::new("rate limit exceeded").with_status(429),
        }],
    )
    .await;

    // S6: a session bound to a tracked agent must have its in-flight request
    // aborted strictly *before* the re-prompt is issued.
    run_scenario(
        "S6 tracked-agent abort ordering",
        FallbackConfig {
            models: models(&[("anthropic", "claude-a"), ("anthropic", "claude-b")]),
            ..FallbackConfig::default()
        },
        MockHost::new()
            .with_user_message("s6", "m1", "hello")
            .with_session_agent("s6", "plan"),
        vec![Event::SessionError {
            session_id: "s6".into(),
            error: ClassifiableError::new("rate limit exceeded").with_status(429),
        }],
    )
    .await;

    println!();
    Ok(())
}
