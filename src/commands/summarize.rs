use anyhow::Result;
use std::path::PathBuf;

use crate::commands::{CommandReport, build_runtime, build_service, read_body};
use crate::mailmind::config::load_config;
use crate::mailmind::paths::resolve_paths;
use crate::mailmind::protocol::Destination;

#[derive(Debug, Clone, Default)]
pub struct SummarizeOptions {
    pub file: Option<PathBuf>,
    pub provider_id: Option<String>,
    pub header_id: Option<String>,
}

pub fn run(opts: &SummarizeOptions) -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let config = load_config()?;
    let body = read_body(opts.file.as_deref())?;
    let mut report = CommandReport::new("summarize");

    let runtime = build_runtime()?;
    let (service, mut rx) = build_service(&paths, &config)?;
    runtime.block_on(service.handle_single(
        &body,
        opts.provider_id.as_deref(),
        opts.header_id.as_deref(),
        &Destination::named("cli"),
    ));

    while let Ok(envelope) = rx.try_recv() {
        report.record_event(&envelope);
    }
    Ok(report)
}
