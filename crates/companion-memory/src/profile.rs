use chrono::{DateTime, Utc};
use companion_core::Message;
use serde::{Deserialize, Serialize};

/// What the companion remembers about its user
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Deduplicated, kept in insertion order
    #[serde(default)]
    pub preferences: Vec<String>,
    #[serde(default)]
    pub conversation_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub personality: Option<Personality>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Personality {
    pub tone: Tone,
    #[serde(default)]
    pub interests: Vec<String>,
    #[serde(default)]
    pub communication_style: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    Casual,
    Formal,
    Friendly,
    Professional,
}

impl Tone {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tone::Casual => "casual",
            Tone::Formal => "formal",
            Tone::Friendly => "friendly",
            Tone::Professional => "professional",
        }
    }
}

/// Partial profile update; `None` fields leave the profile untouched
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub preferences: Option<Vec<String>>,
    pub personality: Option<Personality>,
}

impl ProfileUpdate {
    pub fn name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn with_preferences(mut self, preferences: Vec<String>) -> Self {
        self.preferences = Some(preferences);
        self
    }

    pub fn with_personality(mut self, personality: Personality) -> Self {
        self.personality = Some(personality);
        self
    }
}

/// One user/assistant exchange in the persisted history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationEntry {
    pub user_message: String,
    pub assistant_response: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationEntry {
    pub fn new(user_message: impl Into<String>, assistant_response: impl Into<String>) -> Self {
        Self {
            user_message: user_message.into(),
            assistant_response: assistant_response.into(),
            timestamp: Utc::now(),
        }
    }

    /// The transcript pair this exchange stands for, user first
    pub fn to_messages(&self) -> [Message; 2] {
        [
            Message::user(&self.user_message).with_timestamp(self.timestamp),
            Message::assistant(&self.assistant_response).with_timestamp(self.timestamp),
        ]
    }
}
