//! `ratewarden serve` — runs the engine against a host reachable over
//! stdin/stdout JSON lines, grounded on how `claw-cli::commands::start` wires
//! config hot-reload and a background runtime before blocking on shutdown.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};

use ratewarden_config::ConfigLoader;
use ratewarden_core::{Clock, Event, Result, SystemClock};
use ratewarden_engine::FallbackEngine;

use crate::stdio_host::StdioHostAdapter;

pub async fn run(config_loader: ConfigLoader, no_watch: bool) -> Result<()> {
    let config = config_loader.get();
    println!("ratewarden serve");
    println!("  config: {}", config_loader.path().display());
    println!("  models: {}", config.models.len());

    let host = StdioHostAdapter::new();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let engine = FallbackEngine::new(host.clone(), None, config, clock);

    let _watcher = if no_watch {
        None
    } else {
        let engine_for_reload = engine.clone();
        match config_loader.watch(move |new_config| engine_for_reload.update_config(new_config)) {
            Ok(w) => {
                println!("  config hot-reload: enabled");
                Some(w)
            }
            Err(e) => {
                tracing::warn!(error = %e, "config hot-reload disabled");
                None
            }
        }
    };

    println!("  reading events from stdin, writing host requests to stdout");

    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line? {
                    Some(line) => line,
                    None => break, // EOF on stdin — shut down.
                };
                if line.trim().is_empty() {
                    continue;
                }
                dispatch_line(&engine, &host, &line);
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received ctrl-c, shutting down");
                break;
            }
        }
    }

    engine.destroy().await;
    Ok(())
}

/// A line is either `{"kind":"event", ...}` (fed to the engine) or
/// `{"kind":"response","id":N, ...}` (a reply to a pending host request).
/// Events are dispatched onto their own task so a slow orchestration never
/// blocks the reader loop from picking up the next line.
fn dispatch_line(engine: &Arc<FallbackEngine>, host: &Arc<StdioHostAdapter>, line: &str) {
    let value: serde_json::Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "ignoring malformed input line");
            return;
        }
    };

    match value.get("kind").and_then(|k| k.as_str()) {
        Some("event") => match serde_json::from_value::<Event>(value) {
            Ok(event) => {
                let engine = engine.clone();
                tokio::spawn(async move { engine.handle_event(event).await });
            }
            Err(e) => tracing::warn!(error = %e, "ignoring malformed event line"),
        },
        Some("response") => {
            let id = value.get("id").and_then(|v| v.as_u64());
            match id {
                Some(id) => host.resolve(id, value),
                None => tracing::warn!("response line missing numeric id"),
            }
        }
        other => {
            tracing::warn!(?other, "ignoring input line with unknown kind");
        }
    }
}
