use crate::error::MailMindError;
use crate::mailmind::config::env_non_empty;
use crate::mailmind::util::run_shell_with_timeout;
use anyhow::Result;
use std::sync::Mutex;

/// OAuth access token for the mail provider.
///
/// Silent acquisition (in-process cache, then `MAILMIND_GMAIL_ACCESS_TOKEN`)
/// is tried first; the interactive fallback runs the configured token
/// command, which may open a browser consent flow. A token the provider
/// rejected is never handed out silently again.
#[derive(Debug)]
pub struct TokenSource {
    cached: Mutex<Option<String>>,
    rejected: Mutex<Option<String>>,
    env_token: Option<String>,
    token_command: Option<String>,
    command_timeout_secs: u64,
}

impl TokenSource {
    pub fn new(token_command: Option<String>, command_timeout_secs: u64) -> Self {
        Self::with_env_token(
            env_non_empty("MAILMIND_GMAIL_ACCESS_TOKEN"),
            token_command,
            command_timeout_secs,
        )
    }

    fn with_env_token(
        env_token: Option<String>,
        token_command: Option<String>,
        command_timeout_secs: u64,
    ) -> Self {
        Self {
            cached: Mutex::new(None),
            rejected: Mutex::new(None),
            env_token,
            token_command,
            command_timeout_secs,
        }
    }

    fn cached_token(&self) -> Option<String> {
        self.cached.lock().ok().and_then(|guard| guard.clone())
    }

    fn store(&self, token: &str) {
        if let Ok(mut guard) = self.cached.lock() {
            *guard = Some(token.to_string());
        }
    }

    fn is_rejected(&self, token: &str) -> bool {
        self.rejected
            .lock()
            .map(|guard| guard.as_deref() == Some(token))
            .unwrap_or(false)
    }

    fn silent(&self) -> Option<String> {
        self.cached_token()
            .or_else(|| self.env_token.clone())
            .filter(|token| !self.is_rejected(token))
    }

    async fn interactive(&self) -> Result<String> {
        let Some(command) = self.token_command.as_deref() else {
            return Err(MailMindError::Auth(
                "no cached token and no token command configured".to_string(),
            )
            .into());
        };
        let output = run_shell_with_timeout(command, self.command_timeout_secs)
            .await
            .map_err(|err| MailMindError::Auth(format!("{err:#}")))?;
        if !output.status.success() {
            return Err(MailMindError::Auth(format!(
                "token command exited with {}",
                output.status
            ))
            .into());
        }
        let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if token.is_empty() {
            return Err(MailMindError::Auth("token command printed no token".to_string()).into());
        }
        Ok(token)
    }

    pub async fn token(&self) -> Result<String> {
        if let Some(token) = self.silent() {
            return Ok(token);
        }
        log::info!("silent token acquisition failed, retrying interactively");
        let token = self.interactive().await?;
        self.store(&token);
        Ok(token)
    }

    /// Called after a 401 with the token that was refused, so the next
    /// request re-acquires instead of reusing it.
    pub fn invalidate(&self, token: &str) {
        if let Ok(mut guard) = self.cached.lock() {
            if guard.as_deref() == Some(token) {
                guard.take();
                log::info!("cached provider token invalidated");
            }
        }
        if let Ok(mut guard) = self.rejected.lock() {
            *guard = Some(token.to_string());
        }
    }
}
