use anyhow::{Context, Result};
use fs2::FileExt;
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::commands::{CommandReport, build_runtime, build_service};
use crate::mailmind::config::load_config;
use crate::mailmind::paths::resolve_paths;
use crate::mailmind::protocol::{Destination, Envelope, Event, Request};
use crate::mailmind::service::MailMindService;

const SERVE_LOCK_FILE: &str = "serve.lock";

/// Parse one request line. On failure the destination is salvaged from the
/// raw JSON when possible so the caller can still route the error.
fn parse_request(line: &str) -> Result<Request, (Destination, String)> {
    serde_json::from_str::<Request>(line).map_err(|err| {
        let destination = serde_json::from_str::<Value>(line)
            .ok()
            .and_then(|v| v.get("destination").cloned())
            .map(Destination)
            .unwrap_or_default();
        (destination, format!("invalid request: {err}"))
    })
}

async fn write_events(mut rx: UnboundedReceiver<Envelope>) -> Result<u64> {
    let mut stdout = tokio::io::stdout();
    let mut written = 0u64;
    while let Some(envelope) = rx.recv().await {
        let mut line = serde_json::to_string(&envelope)?;
        line.push('\n');
        stdout.write_all(line.as_bytes()).await?;
        stdout.flush().await?;
        written += 1;
    }
    Ok(written)
}

async fn serve_stdin(service: Arc<MailMindService>, rx: UnboundedReceiver<Envelope>) -> Result<(u64, u64)> {
    let writer = tokio::spawn(write_events(rx));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut handlers = Vec::new();
    let mut requests = 0u64;

    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        requests += 1;
        match parse_request(line) {
            Ok(request) => {
                let service = Arc::clone(&service);
                handlers.push(tokio::spawn(async move { service.dispatch(request).await }));
            }
            Err((destination, error)) => {
                log::warn!("{error}");
                service.sink().emit(&destination, Event::RequestError { error });
            }
        }
    }

    log::info!("stdin closed; finishing {} request(s)", handlers.len());
    for handler in handlers {
        if let Err(err) = handler.await {
            log::warn!("request handler panicked: {err}");
        }
    }
    service.scheduler().wait_idle().await;
    drop(service);

    let events = writer.await.context("event writer panicked")??;
    Ok((requests, events))
}

/// JSON-lines server: requests on stdin, events on stdout, logs on stderr.
/// Exits once stdin closes and all queued work has drained.
pub fn run() -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let config = load_config()?;
    let mut report = CommandReport::new("serve");

    fs::create_dir_all(&paths.logs_dir)
        .with_context(|| format!("failed to create {}", paths.logs_dir.display()))?;
    let lock_path = paths.logs_dir.join(SERVE_LOCK_FILE);
    let mut lock_file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)
        .with_context(|| format!("failed to open {}", lock_path.display()))?;
    if lock_file.try_lock_exclusive().is_err() {
        report.issue(format!(
            "another serve process holds {}",
            lock_path.display()
        ));
        return Ok(report);
    }
    lock_file.set_len(0)?;
    writeln!(lock_file, "{}", std::process::id())?;

    log::info!(
        "serve starting cache={} pacing_ms={}",
        paths.cache_file.display(),
        config.queue.pacing_ms
    );
    let runtime = build_runtime()?;
    let (service, rx) = build_service(&paths, &config)?;
    let (requests, events) = runtime.block_on(serve_stdin(service, rx))?;

    FileExt::unlock(&lock_file)?;
    report.detail(format!("requests={requests}"));
    report.detail(format!("events={events}"));
    Ok(report)
}
