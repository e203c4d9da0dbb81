//! Reply/forward/new-message heuristics
//!
//! Subject-prefix matching plus quoted-content sniffing. This is a
//! best-effort fallback classifier, not a reliable one: a user can edit
//! the subject or delete the quoted content and defeat it. Consumers
//! should treat the result as "probable", which is why it surfaces as a
//! classification tag rather than a hard fact.

use once_cell::sync::Lazy;
use regex::Regex;

use super::change::Classification;
use crate::host::{HostResult, ItemHost};

static REPLY_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*re:").expect("valid reply prefix regex"));
static FORWARD_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*fwd?:").expect("valid forward prefix regex"));
static WROTE_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"On .+ wrote:").expect("valid wrote-line regex"));

/// What kind of compose action a new compose item most likely is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComposeAction {
    New,
    Reply,
    ReplyAll,
    Forward,
}

impl ComposeAction {
    pub fn classification(self) -> Classification {
        match self {
            ComposeAction::New => Classification::NewMessage,
            ComposeAction::Reply => Classification::Reply,
            ComposeAction::ReplyAll => Classification::ReplyAll,
            ComposeAction::Forward => Classification::Forward,
        }
    }
}

pub fn subject_is_reply(subject: &str) -> bool {
    REPLY_PREFIX.is_match(subject)
}

pub fn subject_is_forward(subject: &str) -> bool {
    FORWARD_PREFIX.is_match(subject)
}

/// Typical markers left in the body by the client when replying to or
/// forwarding a message.
pub fn body_has_quoted_content(body: &str) -> bool {
    body.contains("From:")
        || body.contains("Sent:")
        || body.contains("-----Original Message-----")
        || WROTE_LINE.is_match(body)
}

/// Classify a compose item from its observable properties.
///
/// `related_to_last_read` is true when the compose item shares a
/// conversation with the most recently read item; it rescues replies whose
/// subject prefix was edited away.
pub fn detect_compose_action(
    subject: &str,
    body: &str,
    to_count: usize,
    cc_count: usize,
    related_to_last_read: bool,
) -> ComposeAction {
    let quoted = body_has_quoted_content(body);

    if subject_is_reply(subject) && quoted {
        if to_count > 1 || cc_count > 0 {
            return ComposeAction::ReplyAll;
        }
        return ComposeAction::Reply;
    }
    if subject_is_forward(subject) && quoted {
        return ComposeAction::Forward;
    }
    if related_to_last_read && quoted {
        return ComposeAction::Reply;
    }
    ComposeAction::New
}

/// Classify a compose item by reading its properties from the host.
pub async fn detect_compose_action_for(
    host: &dyn ItemHost,
    last_read_conversation: Option<&str>,
) -> HostResult<ComposeAction> {
    let subject = host.subject().await?;
    let body = host.body_text().await?;
    let to = host.to().await?;
    let cc = host.cc().await?;

    let related = match (host.current_item().and_then(|d| d.conversation_id), last_read_conversation) {
        (Some(current), Some(last)) => current == last,
        _ => false,
    };

    Ok(detect_compose_action(&subject, &body, to.len(), cc.len(), related))
}

/// Classify an item-identity or conversation transition observed by the
/// monitor. Same-conversation transitions default to reply; everything
/// else falls back to the subject prefix.
pub fn classify_transition(subject: &str, same_conversation: bool) -> Classification {
    if subject_is_forward(subject) {
        return Classification::Forward;
    }
    if subject_is_reply(subject) || same_conversation {
        return Classification::Reply;
    }
    Classification::NewMessage
}

/// Classify a message at send time. Send-time classification only has the
/// subject to go on.
pub fn classify_send(subject: &str) -> Classification {
    if subject_is_reply(subject) {
        Classification::Reply
    } else if subject_is_forward(subject) {
        Classification::Forward
    } else {
        Classification::NewMessage
    }
}

/// True when the item class matches one of the known junk/rule markers.
pub fn is_junk_class(item_class: &str, markers: &[String]) -> bool {
    markers.iter().any(|marker| item_class.contains(marker.as_str()))
}
