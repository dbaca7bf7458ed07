use serde::{Deserialize, Serialize};

/// Role taxonomy for a chat turn - restricted enum so downstream code
/// never sees free-form role strings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// Internal participant (support agent, rep, EXT)
    Agent,
    /// External participant (customer, guest)
    User,
    /// Could not be attributed
    Unknown,
}

impl Role {
    /// Map an arbitrary wire label onto the taxonomy. Unrecognized labels
    /// (including the legacy "System") collapse to `Unknown` rather than
    /// failing the record.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "agent" | "rep" | "internal" | "ext" => Role::Agent,
            "user" | "customer" | "client" | "guest" | "external" => Role::User,
            _ => Role::Unknown,
        }
    }

    /// Label used in output artifacts
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Agent => "Agent",
            Role::User => "User",
            Role::Unknown => "Unknown",
        }
    }
}

/// One structured output unit: a single chat turn.
///
/// Equality is structural; records carry no identity beyond their position
/// in a ConversationResult.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRecord {
    /// Timestamp as it appeared in the source, if any
    pub time: Option<String>,
    /// Speaker name as written in the transcript
    pub speaker: String,
    pub role: Role,
    /// Utterance text, punctuation and emojis preserved
    pub message: String,
}

impl ChatRecord {
    pub fn new(
        time: Option<String>,
        speaker: impl Into<String>,
        role: Role,
        message: impl Into<String>,
    ) -> Self {
        Self {
            time,
            speaker: speaker.into(),
            role,
            message: message.into(),
        }
    }
}

/// Final, ordered, overlap-resolved record sequence for one conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationResult {
    pub conversation_id: String,
    pub records: Vec<ChatRecord>,
}

impl ConversationResult {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_from_label() {
        assert_eq!(Role::from_label("Agent"), Role::Agent);
        assert_eq!(Role::from_label("agent"), Role::Agent);
        assert_eq!(Role::from_label("Customer"), Role::User);
        assert_eq!(Role::from_label("User"), Role::User);
        assert_eq!(Role::from_label("System"), Role::Unknown);
        assert_eq!(Role::from_label("bot"), Role::Unknown);
        assert_eq!(Role::from_label(""), Role::Unknown);
    }

    #[test]
    fn test_record_structural_equality() {
        let a = ChatRecord::new(None, "Ravi", Role::Agent, "ok. since when?");
        let b = ChatRecord::new(None, "Ravi", Role::Agent, "ok. since when?");
        let c = ChatRecord::new(None, "Neha", Role::User, "today only.");

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_record_roundtrip() {
        let record = ChatRecord::new(Some("10:32".to_string()), "Ravi", Role::Agent, "hello");
        let json = serde_json::to_string(&record).unwrap();
        let back: ChatRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record, back);
    }
}
