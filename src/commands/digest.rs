use anyhow::Result;

use crate::commands::{CommandReport, build_runtime, build_service};
use crate::mailmind::config::load_config;
use crate::mailmind::paths::resolve_paths;
use crate::mailmind::protocol::{Destination, RawItem};

#[derive(Debug, Clone, Default)]
pub struct DigestOptions {
    pub messages: Vec<String>,
    pub threads: Vec<String>,
}

/// Multi-item summary. Blocks until the queue has drained, so every item has
/// reported by the time the report is built.
pub fn run(opts: &DigestOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("digest");
    let items: Vec<RawItem> = opts
        .messages
        .iter()
        .map(|id| RawItem::message(id))
        .chain(opts.threads.iter().map(|id| RawItem::thread(id)))
        .collect();
    if items.is_empty() {
        report.issue("nothing to summarize; pass --message or --thread");
        return Ok(report);
    }

    let paths = resolve_paths()?;
    let config = load_config()?;
    let runtime = build_runtime()?;
    let (service, mut rx) = build_service(&paths, &config)?;
    report.detail(format!(
        "items={} pacing_ms={}",
        items.len(),
        config.queue.pacing_ms
    ));

    runtime.block_on(async {
        service.handle_multi(&items, &Destination::named("cli")).await;
        service.scheduler().wait_idle().await;
    });

    while let Ok(envelope) = rx.try_recv() {
        report.record_event(&envelope);
    }
    Ok(report)
}
