use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;

/// Gmail `format=full` message resource, reduced to what summarization needs.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderMessage {
    pub id: String,
    pub payload: Option<MessagePart>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessagePart {
    pub mime_type: String,
    pub headers: Vec<Header>,
    pub body: Option<PartBody>,
    pub parts: Vec<MessagePart>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Header {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PartBody {
    pub data: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProviderThread {
    pub id: String,
    pub messages: Vec<ProviderMessage>,
}

const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// base64url with or without padding; undecodable data yields an empty string.
pub fn decode_body(data: &str) -> String {
    if data.is_empty() {
        return String::new();
    }
    let cleaned: String = data.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    match URL_SAFE_LENIENT.decode(cleaned.as_bytes()) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(err) => {
            log::warn!("message body is not valid base64url: {err}");
            String::new()
        }
    }
}

struct HtmlPatterns {
    script: Regex,
    style: Regex,
    tag: Regex,
    space: Regex,
}

static HTML_PATTERNS: OnceLock<Option<HtmlPatterns>> = OnceLock::new();

fn html_patterns() -> Option<&'static HtmlPatterns> {
    HTML_PATTERNS
        .get_or_init(|| {
            Some(HtmlPatterns {
                script: Regex::new(r"(?is)<script[^>]*>.*?</script>").ok()?,
                style: Regex::new(r"(?is)<style[^>]*>.*?</style>").ok()?,
                tag: Regex::new(r"<[^>]+>").ok()?,
                space: Regex::new(r"\s+").ok()?,
            })
        })
        .as_ref()
}

pub fn strip_html(html: &str) -> String {
    if html.is_empty() {
        return String::new();
    }
    let Some(p) = html_patterns() else {
        return html.trim().to_string();
    };
    let text = p.script.replace_all(html, " ");
    let text = p.style.replace_all(&text, " ");
    let text = p.tag.replace_all(&text, " ");
    p.space.replace_all(&text, " ").trim().to_string()
}

fn walk(part: &MessagePart, plain: &mut Vec<String>, html: &mut Vec<String>) {
    if let Some(data) = part.body.as_ref().and_then(|b| b.data.as_deref())
        && !data.is_empty()
    {
        if part.mime_type.starts_with("text/plain") {
            plain.push(decode_body(data));
        } else if part.mime_type.starts_with("text/html") {
            html.push(strip_html(&decode_body(data)));
        }
    }
    for child in &part.parts {
        walk(child, plain, html);
    }
}

/// Plain parts win over HTML parts; the root body is the last resort.
pub fn extract_plain_text(message: &ProviderMessage) -> String {
    let Some(payload) = message.payload.as_ref() else {
        return String::new();
    };
    let mut plain = Vec::new();
    let mut html = Vec::new();
    walk(payload, &mut plain, &mut html);

    if !plain.is_empty() {
        return plain.join("\n\n").trim().to_string();
    }
    if !html.is_empty() {
        return html.join("\n\n").trim().to_string();
    }
    payload
        .body
        .as_ref()
        .and_then(|b| b.data.as_deref())
        .map(|data| decode_body(data).trim().to_string())
        .unwrap_or_default()
}

pub fn header<'a>(headers: &'a [Header], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
        .filter(|v| !v.is_empty())
}

/// The RFC 5322 Message-Id, stable across provider-side id churn.
pub fn header_message_id(message: &ProviderMessage) -> Option<String> {
    let headers = &message.payload.as_ref()?.headers;
    header(headers, "Message-Id").map(str::to_string)
}
