pub mod auth;
pub mod blob;
pub mod llm;
pub mod news;
pub mod store;
pub mod stt;
pub mod tts;
pub mod weather;

pub use auth::PgAuthAdapter;
pub use blob::LocalBlobStore;
pub use llm::OpenAiChatAdapter;
pub use news::TheNewsApiAdapter;
pub use store::PgDocumentStore;
pub use stt::OpenAiSttAdapter;
pub use tts::OpenAiTtsAdapter;
pub use weather::OpenMeteoAdapter;
