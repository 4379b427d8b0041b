pub mod domain;
pub mod ports;
pub mod reminder;

pub use domain::{
    agent_chat_id, direct_chat_id, AgentProfile, ChatPreview, Conversation, Forecast,
    GeoLocation, Headline, Message, MessageKind, Reminder, ReminderList, Specialization, User,
    UserChats,
};
pub use ports::{
    AuthEvent, AuthProvider, BlobStore, ChatTurn, DocumentStore, LanguageModelService, NewsService,
    PortError, PortResult, SpeechSynthesisService, SpeechToTextService, Subscription,
    WeatherService,
};
