//! crates/carechat_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any database or transport format,
//! but they derive serde traits because the document store persists
//! them as JSON snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Represents a registered human user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: Option<String>,
    pub avatar: Option<String>,
    /// Ids of users this user has blocked.
    #[serde(default)]
    pub blocked: Vec<String>,
}

impl User {
    pub fn has_blocked(&self, other_id: &str) -> bool {
        self.blocked.iter().any(|id| id == other_id)
    }
}

/// The behavioral mode of an AI persona. A closed set: an unrecognized
/// string tag parses to `General` so it can never be mis-routed to a
/// specialized handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Specialization {
    Medical,
    WeatherForecasting,
    Entertainment,
    MedicationReminders,
    NewsSummarization,
    Companionship,
    General,
}

impl Specialization {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "medical" => Self::Medical,
            "weather_forecasting" => Self::WeatherForecasting,
            "entertainment" => Self::Entertainment,
            "medication_reminders" => Self::MedicationReminders,
            "news_summarization" => Self::NewsSummarization,
            "companionship" => Self::Companionship,
            _ => Self::General,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Self::Medical => "medical",
            Self::WeatherForecasting => "weather_forecasting",
            Self::Entertainment => "entertainment",
            Self::MedicationReminders => "medication_reminders",
            Self::NewsSummarization => "news_summarization",
            Self::Companionship => "companionship",
            Self::General => "general",
        }
    }
}

/// A non-human conversation participant with a fixed persona and voice.
/// Static data defined by the specialization registry, never mutated at
/// runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfile {
    pub id: String,
    pub username: String,
    pub avatar: String,
    pub specialization: Specialization,
    /// Voice identity handed to the speech-synthesis collaborator.
    pub voice: String,
}

/// The kind of a chat message. `Voice` messages carry synthesized audio,
/// `Reminder` messages are emitted by the reminder delivery loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Plain,
    Voice,
    Reminder,
}

/// A single chat message. Immutable once appended to a conversation;
/// "updates" are new messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub sender_id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub img: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, rename = "type")]
    pub kind: MessageKind,
}

/// The persisted conversation document: an append-only ordered message
/// history shared by exactly two participants.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Conversation {
    #[serde(default)]
    pub messages: Vec<Message>,
}

/// One entry of a user's denormalized conversation list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatPreview {
    pub chat_id: String,
    pub receiver_id: String,
    pub last_message: String,
    pub updated_at: DateTime<Utc>,
    #[serde(default = "default_true")]
    pub is_seen: bool,
}

fn default_true() -> bool {
    true
}

/// The per-user index document holding conversation previews, ordered
/// most-recently-active first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserChats {
    #[serde(default)]
    pub chats: Vec<ChatPreview>,
}

/// A medication reminder. Transitions `pending -> completed` exactly once;
/// `frequency` is opaque descriptive text, not a schedule rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reminder {
    pub id: String,
    pub user_id: String,
    pub medication: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dosage: Option<String>,
    /// Normalized 24-hour "HH:MM".
    pub time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency: Option<String>,
    pub is_completed: bool,
    pub created_at: DateTime<Utc>,
}

/// The per-user reminder document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReminderList {
    #[serde(default)]
    pub reminders: Vec<Reminder>,
}

/// A news headline as returned by the news collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Headline {
    pub title: String,
    #[serde(default)]
    pub description: String,
}

/// A geocoded place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub name: String,
    pub country: String,
}

/// Hourly forecast fields, indexed by hour of the current day.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HourlyForecast {
    pub temperature_2m: Vec<f64>,
    pub relative_humidity_2m: Vec<f64>,
    pub precipitation_probability: Vec<f64>,
    pub weathercode: Vec<u32>,
}

/// Daily forecast fields, one element per forecast day.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DailyForecast {
    pub time: Vec<String>,
    pub temperature_2m_max: Vec<f64>,
    pub temperature_2m_min: Vec<f64>,
    pub precipitation_sum: Vec<f64>,
    pub weathercode: Vec<u32>,
}

/// Forecast data from the weather collaborator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Forecast {
    pub hourly: HourlyForecast,
    pub daily: DailyForecast,
}

/// Namespace prefix for human/agent conversations.
const AI_ASSISTANT_NAMESPACE: &str = "ai-assistant";

/// Derives the conversation id for two human users. Symmetric: both
/// participants compute the identical id regardless of argument order.
pub fn direct_chat_id(a: &str, b: &str) -> String {
    if a > b {
        format!("{a}{b}")
    } else {
        format!("{b}{a}")
    }
}

/// Derives the conversation id for a human/agent pair.
pub fn agent_chat_id(agent_id: &str, user_id: &str) -> String {
    format!("{AI_ASSISTANT_NAMESPACE}-{agent_id}-{user_id}")
}

/// Document keys in the store, kept in one place so every component
/// resolves the same documents.
pub mod keys {
    pub fn chat(chat_id: &str) -> String {
        format!("chats/{chat_id}")
    }

    pub fn user(user_id: &str) -> String {
        format!("users/{user_id}")
    }

    pub fn user_chats(user_id: &str) -> String {
        format!("userchats/{user_id}")
    }

    pub fn reminders(user_id: &str) -> String {
        format!("reminders/{user_id}")
    }

    /// Registry of claimed usernames, used by account creation.
    pub fn usernames() -> String {
        "meta/usernames".to_string()
    }
}
