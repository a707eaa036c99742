use anyhow::Result;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct MailMindPaths {
    pub home: PathBuf,
    pub state_dir: PathBuf,
    pub cache_file: PathBuf,
    pub logs_dir: PathBuf,
}

fn required_home_dir() -> Result<PathBuf> {
    if let Some(home) = dirs::home_dir() {
        return Ok(home);
    }
    Err(anyhow::anyhow!("HOME directory could not be resolved"))
}

fn env_or_default_path(var: &str, fallback: PathBuf) -> PathBuf {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => fallback,
    }
}

impl MailMindPaths {
    pub fn under(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        let state_dir = home.join("state");
        Self {
            cache_file: state_dir.join("summary_cache.json"),
            logs_dir: home.join("logs"),
            state_dir,
            home,
        }
    }
}

pub fn resolve_paths() -> Result<MailMindPaths> {
    let home = match env::var("MAILMIND_HOME") {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => required_home_dir()?.join(".mailmind"),
    };

    let mut paths = MailMindPaths::under(home);
    paths.state_dir = env_or_default_path("MAILMIND_STATE_DIR", paths.state_dir);
    paths.cache_file = paths.state_dir.join("summary_cache.json");
    paths.logs_dir = env_or_default_path("MAILMIND_LOGS_DIR", paths.logs_dir);
    Ok(paths)
}
