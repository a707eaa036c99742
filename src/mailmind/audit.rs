use crate::mailmind::paths::MailMindPaths;
use crate::mailmind::util::now_epoch_secs;
use anyhow::{Context, Result};
use serde::Serialize;
use std::io::Write;

#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub at_epoch_secs: u64,
    pub phase: String,
    pub status: String,
    pub message: String,
}

pub fn append_event(paths: &MailMindPaths, phase: &str, status: &str, message: &str) -> Result<()> {
    std::fs::create_dir_all(&paths.logs_dir)
        .with_context(|| format!("failed to create {}", paths.logs_dir.display()))?;
    let event = AuditEvent {
        at_epoch_secs: now_epoch_secs()?,
        phase: phase.to_string(),
        status: status.to_string(),
        message: message.to_string(),
    };

    let line = format!("{}\n", serde_json::to_string(&event)?);
    let path = paths.logs_dir.join("audit.log");
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    file.write_all(line.as_bytes())?;
    Ok(())
}

/// Append-only audit of model calls. A log without paths records nothing.
#[derive(Debug, Clone, Default)]
pub struct AuditLog {
    paths: Option<MailMindPaths>,
}

impl AuditLog {
    pub fn new(paths: MailMindPaths) -> Self {
        Self { paths: Some(paths) }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    /// Audit trail problems are never allowed to fail a request.
    pub fn record(&self, phase: &str, status: &str, message: &str) {
        let Some(paths) = self.paths.as_ref() else {
            return;
        };
        if let Err(err) = append_event(paths, phase, status, message) {
            log::warn!("audit append failed: {err:#}");
        }
    }
}
