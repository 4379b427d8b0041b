//! services/chat/src/testutil.rs
//!
//! In-memory port fakes and the test harness wiring them into a
//! `Services` context. Compiled for tests only.

use crate::config::Config;
use crate::session::state::{ChatEvent, Services};
use async_trait::async_trait;
use carechat_core::domain::{
    keys, DailyForecast, Forecast, GeoLocation, Headline, HourlyForecast, User,
};
use carechat_core::ports::{
    AuthEvent, AuthProvider, BlobStore, ChatTurn, DocumentStore, LanguageModelService,
    NewsService, PortError, PortResult, SpeechSynthesisService, SpeechToTextService,
    Subscription, WeatherService,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Level;

//=========================================================================================
// MemoryStore
//=========================================================================================

/// In-memory `DocumentStore` with synchronous watcher fan-out.
#[derive(Default)]
pub struct MemoryStore {
    docs: Mutex<HashMap<String, Value>>,
    watchers: Mutex<HashMap<String, Vec<(mpsc::Sender<Value>, CancellationToken)>>>,
    fail_watch: Mutex<Vec<String>>,
}

impl MemoryStore {
    pub fn read_sync(&self, doc_id: &str) -> Option<Value> {
        self.docs.lock().unwrap().get(doc_id).cloned()
    }

    /// Makes `watch` fail for one document id.
    pub fn fail_watch_on(&self, doc_id: &str) {
        self.fail_watch.lock().unwrap().push(doc_id.to_string());
    }

    fn publish(&self, doc_id: &str, snapshot: &Value) {
        let mut watchers = self.watchers.lock().unwrap();
        if let Some(list) = watchers.get_mut(doc_id) {
            list.retain(|(tx, cancel)| {
                if cancel.is_cancelled() {
                    return false;
                }
                tx.try_send(snapshot.clone()).is_ok()
            });
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn read(&self, doc_id: &str) -> PortResult<Option<Value>> {
        Ok(self.read_sync(doc_id))
    }

    async fn write(&self, doc_id: &str, doc: Value) -> PortResult<()> {
        self.docs
            .lock()
            .unwrap()
            .insert(doc_id.to_string(), doc.clone());
        self.publish(doc_id, &doc);
        Ok(())
    }

    async fn append(&self, doc_id: &str, array_field: &str, item: Value) -> PortResult<()> {
        let snapshot = {
            let mut docs = self.docs.lock().unwrap();
            let doc = docs
                .entry(doc_id.to_string())
                .or_insert_with(|| json!({}));
            let object = doc
                .as_object_mut()
                .ok_or_else(|| PortError::Unexpected("document is not an object".to_string()))?;
            let array = object
                .entry(array_field.to_string())
                .or_insert_with(|| json!([]));
            array
                .as_array_mut()
                .ok_or_else(|| PortError::Unexpected("field is not an array".to_string()))?
                .push(item);
            doc.clone()
        };
        self.publish(doc_id, &snapshot);
        Ok(())
    }

    async fn watch(&self, doc_id: &str) -> PortResult<Subscription> {
        if self.fail_watch.lock().unwrap().iter().any(|d| d == doc_id) {
            return Err(PortError::Unexpected(format!("watch refused for {doc_id}")));
        }
        let (tx, rx) = mpsc::channel(32);
        let cancel = CancellationToken::new();
        self.watchers
            .lock()
            .unwrap()
            .entry(doc_id.to_string())
            .or_default()
            .push((tx, cancel.clone()));
        Ok(Subscription::new(rx, cancel))
    }
}

//=========================================================================================
// Collaborator Fakes
//=========================================================================================

/// One recorded language-model call.
pub struct LlmCall {
    pub system: String,
    pub prior_turns: Vec<ChatTurn>,
    pub user: String,
}

#[derive(Default)]
pub struct MockLlm {
    reply: Mutex<String>,
    fail: AtomicBool,
    pub calls: Mutex<Vec<LlmCall>>,
}

impl MockLlm {
    pub fn set_reply(&self, reply: &str) {
        *self.reply.lock().unwrap() = reply.to_string();
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    fn record(&self, system: &str, prior: &[ChatTurn], user: &str) -> PortResult<String> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PortError::Unexpected("model unavailable".to_string()));
        }
        self.calls.lock().unwrap().push(LlmCall {
            system: system.to_string(),
            prior_turns: prior.to_vec(),
            user: user.to_string(),
        });
        let reply = self.reply.lock().unwrap().clone();
        Ok(if reply.is_empty() {
            "mock reply".to_string()
        } else {
            reply
        })
    }
}

#[async_trait]
impl LanguageModelService for MockLlm {
    async fn complete(
        &self,
        system_prompt: &str,
        prior_turns: &[ChatTurn],
        user_turn: &str,
    ) -> PortResult<String> {
        self.record(system_prompt, prior_turns, user_turn)
    }

    async fn complete_streaming(
        &self,
        system_prompt: &str,
        prior_turns: &[ChatTurn],
        user_turn: &str,
        mut on_chunk: Box<dyn for<'a> FnMut(&'a str) + Send>,
    ) -> PortResult<String> {
        let reply = self.record(system_prompt, prior_turns, user_turn)?;
        on_chunk(&reply);
        Ok(reply)
    }

    async fn complete_json(
        &self,
        system_prompt: &str,
        prior_turns: &[ChatTurn],
        user_turn: &str,
    ) -> PortResult<Value> {
        let reply = self.record(system_prompt, prior_turns, user_turn)?;
        Ok(json!({ "reply": reply }))
    }
}

#[derive(Default)]
pub struct MockTts {
    fail_voices: Mutex<Vec<String>>,
    used: Mutex<Vec<String>>,
}

impl MockTts {
    pub fn fail_voice(&self, voice: &str) {
        self.fail_voices.lock().unwrap().push(voice.to_string());
    }

    pub fn voices_used(&self) -> Vec<String> {
        self.used.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechSynthesisService for MockTts {
    async fn synthesize(&self, _text: &str, voice: &str) -> PortResult<Vec<u8>> {
        self.used.lock().unwrap().push(voice.to_string());
        if self.fail_voices.lock().unwrap().iter().any(|v| v == voice) {
            return Err(PortError::Unexpected(format!("voice {voice} unavailable")));
        }
        Ok(vec![0xffu8, 0xf3, 0x14])
    }
}

#[derive(Default)]
pub struct MockStt;

#[async_trait]
impl SpeechToTextService for MockStt {
    async fn transcribe(&self, _audio_data: &[u8]) -> PortResult<String> {
        Ok("transcribed text".to_string())
    }
}

#[derive(Default)]
pub struct MockNews {
    fail: AtomicBool,
    calls: AtomicUsize,
}

impl MockNews {
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NewsService for MockNews {
    async fn top_headlines(&self, limit: usize) -> PortResult<Vec<Headline>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(PortError::Unexpected("news service down".to_string()));
        }
        Ok((0..limit.min(3))
            .map(|n| Headline {
                title: format!("Headline {n}"),
                description: format!("Description {n}"),
            })
            .collect())
    }
}

#[derive(Default)]
pub struct MockWeather {
    fail: AtomicBool,
}

impl MockWeather {
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

/// Seven plausible forecast days with matching hourly vectors.
pub fn sample_forecast() -> Forecast {
    Forecast {
        hourly: HourlyForecast {
            temperature_2m: vec![14.0; 24],
            relative_humidity_2m: vec![70.0; 24],
            precipitation_probability: vec![20.0; 24],
            weathercode: vec![2; 24],
        },
        daily: DailyForecast {
            time: (1..=7).map(|d| format!("2024-05-{d:02}")).collect(),
            temperature_2m_max: vec![16.0, 17.0, 15.0, 18.0, 19.0, 16.0, 17.0],
            temperature_2m_min: vec![8.0, 9.0, 7.0, 10.0, 11.0, 8.0, 9.0],
            precipitation_sum: vec![0.5, 0.0, 1.2, 0.0, 0.3, 0.0, 0.8],
            weathercode: vec![1, 2, 61, 0, 2, 1, 3],
        },
    }
}

#[async_trait]
impl WeatherService for MockWeather {
    async fn forecast(&self, _latitude: f64, _longitude: f64) -> PortResult<Forecast> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PortError::Unexpected("weather service down".to_string()));
        }
        Ok(sample_forecast())
    }

    async fn geocode(&self, city: &str) -> PortResult<Option<GeoLocation>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PortError::Unexpected("weather service down".to_string()));
        }
        Ok(match city.to_lowercase().as_str() {
            "paris" => Some(GeoLocation {
                latitude: 48.8566,
                longitude: 2.3522,
                name: "Paris".to_string(),
                country: "France".to_string(),
            }),
            _ => None,
        })
    }
}

#[derive(Default)]
pub struct MockBlobs {
    fail: AtomicBool,
    counter: AtomicUsize,
}

impl MockBlobs {
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl BlobStore for MockBlobs {
    async fn store(&self, name: &str, _data: &[u8], _content_type: &str) -> PortResult<String> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PortError::Unexpected("blob store down".to_string()));
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(format!("blob://test/{n}-{name}"))
    }
}

#[derive(Default)]
pub struct MockAuth {
    created: Mutex<Vec<String>>,
    deleted: Mutex<Vec<String>>,
    subscribers: Mutex<Vec<mpsc::Sender<AuthEvent>>>,
}

impl MockAuth {
    pub fn created_count(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    pub fn deleted_count(&self) -> usize {
        self.deleted.lock().unwrap().len()
    }

    pub async fn emit(&self, event: AuthEvent) {
        let subscribers = self.subscribers.lock().unwrap().clone();
        for tx in subscribers {
            let _ = tx.send(event.clone()).await;
        }
    }
}

#[async_trait]
impl AuthProvider for MockAuth {
    async fn create_user(&self, email: &str, _password: &str) -> PortResult<String> {
        let uid = format!("uid-{email}");
        self.created.lock().unwrap().push(uid.clone());
        Ok(uid)
    }

    async fn delete_user(&self, uid: &str) -> PortResult<()> {
        self.deleted.lock().unwrap().push(uid.to_string());
        Ok(())
    }

    async fn sign_in(&self, email: &str, _password: &str) -> PortResult<String> {
        Ok(format!("uid-{email}"))
    }

    async fn sign_out(&self) -> PortResult<()> {
        Ok(())
    }

    fn subscribe(&self) -> mpsc::Receiver<AuthEvent> {
        let (tx, rx) = mpsc::channel(8);
        self.subscribers.lock().unwrap().push(tx);
        rx
    }
}

//=========================================================================================
// Harness
//=========================================================================================

pub struct TestHarness {
    pub store: Arc<MemoryStore>,
    pub auth: Arc<MockAuth>,
    pub llm: Arc<MockLlm>,
    pub tts: Arc<MockTts>,
    pub news: Arc<MockNews>,
    pub weather: Arc<MockWeather>,
    pub blobs: Arc<MockBlobs>,
    pub services: Arc<Services>,
    pub events_tx: mpsc::UnboundedSender<ChatEvent>,
    pub events_rx: Mutex<mpsc::UnboundedReceiver<ChatEvent>>,
}

impl TestHarness {
    pub async fn write_user(&self, user: &User) {
        let doc = serde_json::to_value(user).unwrap();
        self.services
            .store
            .write(&keys::user(&user.id), doc)
            .await
            .unwrap();
    }
}

fn test_config() -> Config {
    Config {
        database_url: "postgres://unused".to_string(),
        log_level: Level::INFO,
        openai_api_key: None,
        news_api_token: None,
        chat_model: "gpt-3.5-turbo".to_string(),
        json_model: "gpt-4-turbo-preview".to_string(),
        stt_model: "whisper-1".to_string(),
        default_voice: "alloy".to_string(),
        blob_dir: PathBuf::from("./blobs"),
        blob_base_url: "blob://test".to_string(),
        reminder_poll_secs: 1,
        history_window: 10,
        news_limit: 5,
        default_city: "Glasgow".to_string(),
        default_latitude: 55.8617,
        default_longitude: -4.2583,
        default_country: "United Kingdom".to_string(),
    }
}

pub fn harness() -> TestHarness {
    let store = Arc::new(MemoryStore::default());
    let auth = Arc::new(MockAuth::default());
    let llm = Arc::new(MockLlm::default());
    let tts = Arc::new(MockTts::default());
    let news = Arc::new(MockNews::default());
    let weather = Arc::new(MockWeather::default());
    let blobs = Arc::new(MockBlobs::default());
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    let services = Arc::new(Services {
        store: store.clone(),
        auth: auth.clone(),
        llm: llm.clone(),
        tts: tts.clone(),
        stt: Arc::new(MockStt),
        news: news.clone(),
        weather: weather.clone(),
        blobs: blobs.clone(),
        config: Arc::new(test_config()),
    });

    TestHarness {
        store,
        auth,
        llm,
        tts,
        news,
        weather,
        blobs,
        services,
        events_tx,
        events_rx: Mutex::new(events_rx),
    }
}

/// Writes a minimal user profile and returns it.
pub async fn seed_user(h: &TestHarness, id: &str, username: &str) -> User {
    let user = User {
        id: id.to_string(),
        username: username.to_string(),
        email: Some(format!("{id}@example.com")),
        avatar: None,
        blocked: Vec::new(),
    };
    h.write_user(&user).await;
    user
}

/// Collects every event emitted so far, after letting spawned tasks run.
pub async fn drain_events(h: &TestHarness) -> Vec<ChatEvent> {
    tokio::time::sleep(Duration::from_millis(20)).await;
    let mut rx = h.events_rx.lock().unwrap();
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    // A borrowing chunk sink must satisfy the streaming port's callback
    // signature through the trait object.
    #[tokio::test]
    async fn streaming_callback_accepts_borrowed_chunks() {
        let llm: Arc<dyn LanguageModelService> = Arc::new(MockLlm::default());
        let collected = Arc::new(Mutex::new(String::new()));

        let sink = collected.clone();
        let full = llm
            .complete_streaming(
                "system",
                &[],
                "hello",
                Box::new(move |chunk| sink.lock().unwrap().push_str(chunk)),
            )
            .await
            .unwrap();

        assert_eq!(full, "mock reply");
        assert_eq!(*collected.lock().unwrap(), "mock reply");
    }
}
