use crate::error::MailMindError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

/// Opaque id of the surface that asked (a browser tab, a CLI call). Echoed
/// back on every event so the caller can route it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Destination(pub Value);

impl Destination {
    pub fn named(name: &str) -> Self {
        Self(Value::String(name.to_string()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RawItem {
    pub kind: Option<String>,
    pub id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemRef {
    Message(String),
    Thread(String),
}

impl RawItem {
    pub fn message(id: &str) -> Self {
        Self {
            kind: Some("message".to_string()),
            id: Some(id.to_string()),
        }
    }

    pub fn thread(id: &str) -> Self {
        Self {
            kind: Some("thread".to_string()),
            id: Some(id.to_string()),
        }
    }

    pub fn parse(&self) -> Result<ItemRef, MailMindError> {
        let id = self
            .id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| MailMindError::MalformedItem("item has no id".to_string()))?;
        match self.kind.as_deref().map(str::trim) {
            Some("message") => Ok(ItemRef::Message(id.to_string())),
            Some("thread") => Ok(ItemRef::Thread(id.to_string())),
            Some(other) => Err(MailMindError::MalformedItem(format!(
                "unknown item kind `{other}` for id {id}"
            ))),
            None => Err(MailMindError::MalformedItem(format!(
                "item {id} has no kind"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    MultiSummarize {
        #[serde(default)]
        items: Vec<RawItem>,
        #[serde(default)]
        destination: Destination,
    },
    SingleSummarize {
        #[serde(default)]
        body: String,
        #[serde(default)]
        provider_id: Option<String>,
        #[serde(default)]
        header_id: Option<String>,
        #[serde(default)]
        destination: Destination,
    },
    SingleReply {
        #[serde(default)]
        body: String,
        #[serde(default)]
        destination: Destination,
    },
    TodayCount {
        #[serde(default)]
        destination: Destination,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SummarySource {
    /// Stable id hash map.
    CacheId,
    /// Provider id or content hash map, multi path.
    Cache,
    /// Content hash map, single path.
    CacheBody,
    Model,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Summary,
    Reply,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    SummaryResult {
        message_id: String,
        summary: String,
        source: SummarySource,
    },
    SummaryError {
        message_id: Option<String>,
        error: String,
    },
    SingleResult {
        mode: Mode,
        summary: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        source: Option<SummarySource>,
    },
    SingleError {
        mode: Mode,
        error: String,
    },
    TodayCount {
        count: u64,
    },
    TodayCountError {
        error: String,
    },
    RequestError {
        error: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    pub destination: Destination,
    #[serde(flatten)]
    pub event: Event,
}

/// Where results go. Emission never blocks and never fails the caller.
pub trait EventSink: Send + Sync {
    fn emit(&self, destination: &Destination, event: Event);
}

#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, destination: &Destination, event: Event) {
        let envelope = Envelope {
            destination: destination.clone(),
            event,
        };
        if self.tx.send(envelope).is_err() {
            log::warn!("event dropped: receiver closed");
        }
    }
}
