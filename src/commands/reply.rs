use anyhow::Result;
use std::path::PathBuf;

use crate::commands::{CommandReport, build_runtime, build_service, read_body};
use crate::mailmind::config::load_config;
use crate::mailmind::paths::resolve_paths;
use crate::mailmind::protocol::Destination;

pub fn run(file: Option<PathBuf>) -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let config = load_config()?;
    let body = read_body(file.as_deref())?;
    let mut report = CommandReport::new("reply");

    let runtime = build_runtime()?;
    let (service, mut rx) = build_service(&paths, &config)?;
    runtime.block_on(service.handle_reply(&body, &Destination::named("cli")));

    while let Ok(envelope) = rx.try_recv() {
        report.record_event(&envelope);
    }
    Ok(report)
}
