use anyhow::{Context, Result};
use std::process::Output;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::process::Command;

/// Return the current Unix epoch in seconds.
pub fn now_epoch_secs() -> Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}

/// Cache entries are stamped in milliseconds.
pub fn now_epoch_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Truncate `input` to at most `max_chars` Unicode characters, stripping
/// control characters and appending `…` when truncated.
pub fn truncate_with_ellipsis(input: &str, max_chars: usize) -> String {
    let clean: String = input.chars().filter(|c| !c.is_control()).collect();
    if clean.chars().count() > max_chars {
        let mut s: String = clean.chars().take(max_chars).collect();
        s.push('…');
        s
    } else {
        clean
    }
}

pub async fn run_shell_with_timeout(command_line: &str, timeout_secs: u64) -> Result<Output> {
    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(command_line);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(command_line);
        c
    };
    cmd.kill_on_drop(true);
    match tokio::time::timeout(Duration::from_secs(timeout_secs), cmd.output()).await {
        Ok(out) => out.with_context(|| format!("failed to run `{command_line}`")),
        Err(_) => anyhow::bail!("command timed out after {}s", timeout_secs),
    }
}

#[cfg(test)]
mod tests {
    use super::truncate_with_ellipsis;

    #[test]
    fn truncate_appends_ellipsis_only_when_needed() {
        assert_eq!(truncate_with_ellipsis("short", 10), "short");
        assert_eq!(truncate_with_ellipsis("abcdef", 3), "abc…");
    }

    #[test]
    fn truncate_drops_control_characters() {
        assert_eq!(truncate_with_ellipsis("a\nb\tc", 10), "abc");
    }
}
