//! Session echo correlation
//!
//! Handshakes (connect, config fetch, start and end of file) are sequenced by
//! sending a `{"msg":"_<session>_<flag>"}` sentinel and waiting for the board
//! to echo it back. The random session id keeps those echoes apart from any
//! message the board produces on its own.

use uuid::Uuid;

/// Length of the session id embedded in sentinels
pub const SESSION_ID_LEN: usize = 20;

/// Tags and recognises session sentinels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EchoCorrelator {
    session_id: String,
    tag: String,
}

impl EchoCorrelator {
    /// Create a correlator with a fresh random session id
    pub fn new() -> Self {
        let id = Uuid::new_v4().simple().to_string();
        Self::with_session_id(&id[..SESSION_ID_LEN])
    }

    /// Create a correlator with a known session id
    pub fn with_session_id(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            tag: format!("_{}_", session_id),
        }
    }

    /// The session id
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Structured message command carrying `flag`
    pub fn tag_sentinel(&self, flag: &str) -> String {
        format!(r#"{{"msg":"{}{}"}}"#, self.tag, flag)
    }

    /// Check if `text` carries this session's tag
    pub fn is_tagged(&self, text: &str) -> bool {
        text.contains(&self.tag)
    }

    /// Flag carried by a tagged message, or `None` if it is not tagged
    pub fn flag_of(&self, message: &str) -> Option<String> {
        if self.is_tagged(message) {
            Some(message.replace(&self.tag, ""))
        } else {
            None
        }
    }

    /// Check if a received line is the echo of the sentinel for `flag`
    pub fn is_sentinel_echo(&self, line: &str, flag: &str) -> bool {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(line.trim()) else {
            return false;
        };
        let value = value.get("r").filter(|r| r.is_object()).unwrap_or(&value);
        value
            .get("msg")
            .and_then(|msg| msg.as_str())
            .and_then(|msg| self.flag_of(msg))
            .is_some_and(|echoed| echoed == flag)
    }
}

impl Default for EchoCorrelator {
    fn default() -> Self {
        Self::new()
    }
}
