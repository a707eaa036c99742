use anyhow::Result;
use std::env;

use crate::commands::{CommandReport, build_runtime};
use crate::mailmind::config::{load_config, resolve_config_path, resolve_model_api_key};
use crate::mailmind::paths::resolve_paths;
use crate::mailmind::store::CacheStore;

mod generated {
    include!(concat!(env!("OUT_DIR"), "/mailmind_env_allowlist.rs"));
}

fn is_secret(key: &str) -> bool {
    key.ends_with("_KEY") || key.ends_with("_TOKEN")
}

/// `MAILMIND_*` variables currently set, secrets masked.
pub fn active_env_overrides() -> Vec<String> {
    generated::GENERATED_ENV_ALLOWLIST
        .iter()
        .filter_map(|key| {
            let value = env::var(key).ok()?;
            if is_secret(key) {
                Some(format!("{key}=<set>"))
            } else {
                Some(format!("{key}={value}"))
            }
        })
        .collect()
}

pub fn run() -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let mut report = CommandReport::new("status");

    report.detail(format!("home={}", paths.home.display()));
    report.detail(format!("state_dir={}", paths.state_dir.display()));
    report.detail(format!("cache_file={}", paths.cache_file.display()));
    report.detail(format!("logs_dir={}", paths.logs_dir.display()));
    match resolve_config_path() {
        Some(path) if path.exists() => report.detail(format!("config_file={}", path.display())),
        Some(path) => report.detail(format!("config_file={} (absent, defaults)", path.display())),
        None => report.detail("config_file=<none>"),
    }

    match load_config() {
        Ok(config) => {
            report.detail(format!("queue.pacing_ms={}", config.queue.pacing_ms));
            report.detail(format!("model.model={}", config.model.model));
            report.detail(format!("model.base_url={}", config.model.base_url));
            report.detail(format!("provider.api_base={}", config.provider.api_base));
            report.detail(format!(
                "provider.token_command={}",
                if config.provider.token_command.is_some() {
                    "configured"
                } else {
                    "none"
                }
            ));
        }
        Err(err) => report.issue(format!("config: {err:#}")),
    }
    report.detail(format!(
        "model_api_key={}",
        if resolve_model_api_key().is_some() {
            "present"
        } else {
            "missing"
        }
    ));

    let store = CacheStore::for_paths(&paths);
    let runtime = build_runtime()?;
    match runtime.block_on(store.load()) {
        Ok(caches) => {
            report.detail(format!("cache.empty={}", caches.is_empty()));
            report.detail(format!("cache.by_provider_id={}", caches.by_provider_id.len()));
            report.detail(format!(
                "cache.by_content_hash={}",
                caches.by_content_hash.len()
            ));
            report.detail(format!(
                "cache.by_stable_id_hash={}",
                caches.by_stable_id_hash.len()
            ));
        }
        Err(err) => report.issue(format!("{err:#}")),
    }

    for line in active_env_overrides() {
        report.detail(format!("env_override {line}"));
    }
    Ok(report)
}
