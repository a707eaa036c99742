use anyhow::Result;

use crate::commands::{CommandReport, build_runtime, build_service};
use crate::mailmind::config::load_config;
use crate::mailmind::paths::resolve_paths;
use crate::mailmind::protocol::Destination;

pub fn run() -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let config = load_config()?;
    let mut report = CommandReport::new("today-count");

    let runtime = build_runtime()?;
    let (service, mut rx) = build_service(&paths, &config)?;
    runtime.block_on(service.handle_today_count(&Destination::named("cli")));

    while let Ok(envelope) = rx.try_recv() {
        report.record_event(&envelope);
    }
    Ok(report)
}
