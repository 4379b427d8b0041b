//! services/chat/src/session/chat.rs
//!
//! The active-conversation manager: opening a conversation (with block
//! checks and subscription handover), sending messages, the AI reply
//! pipeline, and the per-user conversation index upkeep.

use crate::session::dispatch::DispatchEngine;
use crate::session::state::{AudioGate, ChatEvent, PlaybackAction, Services};
use carechat_core::domain::{
    agent_chat_id, direct_chat_id, keys, AgentProfile, ChatPreview, Conversation, Message,
    MessageKind, User, UserChats,
};
use carechat_core::ports::{DocumentStore, PortError, PortResult};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Longest preview text stored in the conversation index.
const PREVIEW_LIMIT: usize = 100;

/// The other party of a conversation.
#[derive(Debug, Clone)]
pub enum Counterpart {
    Human(User),
    Agent(AgentProfile),
}

impl Counterpart {
    pub fn id(&self) -> &str {
        match self {
            Counterpart::Human(user) => &user.id,
            Counterpart::Agent(agent) => &agent.id,
        }
    }

    pub fn username(&self) -> &str {
        match self {
            Counterpart::Human(user) => &user.username,
            Counterpart::Agent(agent) => &agent.username,
        }
    }
}

/// Block state of the open conversation, checked at open and before every
/// send. Agent conversations are never blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStatus {
    Open,
    BlockedByCounterpart,
    BlockedByUser,
}

/// An image attached to an outgoing message.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub name: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

struct ActiveChat {
    chat_id: String,
    counterpart: Counterpart,
    block_status: BlockStatus,
    messages: Arc<Mutex<Vec<Message>>>,
    watch_cancel: CancellationToken,
}

//=========================================================================================
// ChatManager
//=========================================================================================

/// Manages the single active conversation of a signed-in session. At most
/// one conversation subscription exists at a time: opening a new one
/// cancels the previous feed before subscribing.
pub struct ChatManager {
    services: Arc<Services>,
    dispatch: DispatchEngine,
    current_user: User,
    events: mpsc::UnboundedSender<ChatEvent>,
    audio: Arc<Mutex<AudioGate>>,
    session_cancel: CancellationToken,
    active: Mutex<Option<ActiveChat>>,
}

impl ChatManager {
    pub fn new(
        services: Arc<Services>,
        current_user: User,
        events: mpsc::UnboundedSender<ChatEvent>,
        session_cancel: CancellationToken,
    ) -> Self {
        let dispatch = DispatchEngine::new(services.clone());
        Self {
            services,
            dispatch,
            current_user,
            events,
            audio: Arc::new(Mutex::new(AudioGate::default())),
            session_cancel,
            active: Mutex::new(None),
        }
    }

    pub fn current_user(&self) -> &User {
        &self.current_user
    }

    /// Opens (or creates) the conversation with `counterpart`, replacing
    /// any previously open one. Returns the block state; when blocked, no
    /// history is loaded and no subscription is installed.
    pub async fn open_conversation(&self, counterpart: Counterpart) -> PortResult<BlockStatus> {
        let chat_id = match &counterpart {
            Counterpart::Human(peer) => direct_chat_id(&self.current_user.id, &peer.id),
            Counterpart::Agent(agent) => agent_chat_id(&agent.id, &self.current_user.id),
        };
        info!(chat_id, counterpart = counterpart.id(), "opening conversation");

        // Cancel the old feed before any new subscription exists, so a
        // stale snapshot can never land in the new conversation's view.
        if let Some(previous) = self.active.lock().await.take() {
            previous.watch_cancel.cancel();
        }

        let block_status = self.block_status_for(&counterpart).await?;
        if block_status != BlockStatus::Open {
            let mut active = self.active.lock().await;
            *active = Some(ActiveChat {
                chat_id: chat_id.clone(),
                counterpart,
                block_status,
                messages: Arc::new(Mutex::new(Vec::new())),
                watch_cancel: CancellationToken::new(),
            });
            self.emit(ChatEvent::HistoryChanged {
                chat_id,
                messages: Vec::new(),
            });
            return Ok(block_status);
        }

        let key = keys::chat(&chat_id);
        let initial = match self.services.store.read(&key).await? {
            Some(doc) => serde_json::from_value::<Conversation>(doc)
                .map_err(|e| PortError::Unexpected(format!("corrupt conversation: {e}")))?,
            None => {
                debug!(chat_id, "conversation does not exist yet, creating");
                let empty = Conversation::default();
                let doc = serde_json::to_value(&empty)
                    .map_err(|e| PortError::Unexpected(e.to_string()))?;
                self.services.store.write(&key, doc).await?;
                self.seed_index_entries(&chat_id, &counterpart).await;
                empty
            }
        };

        let subscription = self.services.store.watch(&key).await?;
        let watch_cancel = subscription.cancellation_token();
        let messages = Arc::new(Mutex::new(initial.messages.clone()));

        self.spawn_snapshot_consumer(subscription, chat_id.clone(), messages.clone());

        let mut active = self.active.lock().await;
        *active = Some(ActiveChat {
            chat_id: chat_id.clone(),
            counterpart,
            block_status,
            messages,
            watch_cancel,
        });
        self.emit(ChatEvent::HistoryChanged {
            chat_id,
            messages: initial.messages,
        });
        Ok(block_status)
    }

    /// Opens the conversation with a persona from the registry.
    pub async fn open_agent_conversation(&self, agent_id: &str) -> PortResult<BlockStatus> {
        let agent = crate::agents::find_agent(agent_id)
            .ok_or_else(|| PortError::NotFound(format!("agent {agent_id}")))?;
        self.open_conversation(Counterpart::Agent(agent)).await
    }

    /// Re-reads the counterpart's profile so the block check always sees
    /// the latest block list, not the snapshot held since sign-in.
    async fn block_status_for(&self, counterpart: &Counterpart) -> PortResult<BlockStatus> {
        let peer = match counterpart {
            Counterpart::Agent(_) => return Ok(BlockStatus::Open),
            Counterpart::Human(peer) => read_user(&self.services.store, &peer.id)
                .await?
                .unwrap_or_else(|| peer.clone()),
        };

        if peer.has_blocked(&self.current_user.id) {
            Ok(BlockStatus::BlockedByCounterpart)
        } else if self.current_user.has_blocked(&peer.id) {
            Ok(BlockStatus::BlockedByUser)
        } else {
            Ok(BlockStatus::Open)
        }
    }

    /// Seeds both participants' index entries when a conversation is first
    /// created, so it shows up in each conversation list immediately.
    async fn seed_index_entries(&self, chat_id: &str, counterpart: &Counterpart) {
        if let Err(e) = upsert_preview(
            &self.services.store,
            &self.current_user.id,
            chat_id,
            counterpart.id(),
            "",
            true,
        )
        .await
        {
            warn!(chat_id, "failed to seed own index entry: {e}");
        }
        if let Counterpart::Human(peer) = counterpart {
            if let Err(e) = upsert_preview(
                &self.services.store,
                &peer.id,
                chat_id,
                &self.current_user.id,
                "",
                true,
            )
            .await
            {
                warn!(chat_id, "failed to seed peer index entry: {e}");
            }
        }
    }

    /// Forwards document snapshots into the local message list. The task
    /// exits on subscription or session cancellation and drops any
    /// snapshot raced in after cancel.
    fn spawn_snapshot_consumer(
        &self,
        mut subscription: carechat_core::ports::Subscription,
        chat_id: String,
        messages: Arc<Mutex<Vec<Message>>>,
    ) {
        let events = self.events.clone();
        let audio = self.audio.clone();
        let session_cancel = self.session_cancel.clone();
        let current_user_id = self.current_user.id.clone();

        tokio::spawn(async move {
            let watch_cancel = subscription.cancellation_token();
            loop {
                let snapshot = tokio::select! {
                    _ = session_cancel.cancelled() => break,
                    _ = watch_cancel.cancelled() => break,
                    snapshot = subscription.snapshots.recv() => match snapshot {
                        Some(snapshot) => snapshot,
                        None => break,
                    },
                };
                // The select can resolve the recv arm in the same poll the
                // token is cancelled; never apply such a late snapshot.
                if watch_cancel.is_cancelled() || session_cancel.is_cancelled() {
                    break;
                }

                let conversation: Conversation = match serde_json::from_value(snapshot) {
                    Ok(conversation) => conversation,
                    Err(e) => {
                        error!(chat_id, "ignoring malformed conversation snapshot: {e}");
                        continue;
                    }
                };

                let grew = {
                    let mut held = messages.lock().await;
                    let grew = conversation.messages.len() > held.len();
                    *held = conversation.messages.clone();
                    grew
                };

                let _ = events.send(ChatEvent::HistoryChanged {
                    chat_id: chat_id.clone(),
                    messages: conversation.messages.clone(),
                });
                if grew {
                    let _ = events.send(ChatEvent::ScrollToLatest);
                    autoplay_latest(&audio, &events, &conversation.messages, &current_user_id)
                        .await;
                }
            }
            debug!(chat_id, "snapshot consumer stopped");
        });
    }

    /// Current message list of the open conversation.
    pub async fn messages(&self) -> Vec<Message> {
        match self.active.lock().await.as_ref() {
            Some(active) => active.messages.lock().await.clone(),
            None => Vec::new(),
        }
    }

    pub async fn active_chat_id(&self) -> Option<String> {
        self.active.lock().await.as_ref().map(|a| a.chat_id.clone())
    }

    pub async fn block_status(&self) -> Option<BlockStatus> {
        self.active.lock().await.as_ref().map(|a| a.block_status)
    }

    /// Sends a message into the open conversation. Empty input (after
    /// trimming) with no image is a silent no-op; a blocked conversation
    /// refuses the send.
    pub async fn send_message(&self, text: &str, image: Option<ImageUpload>) -> PortResult<()> {
        let text = text.trim();
        if text.is_empty() && image.is_none() {
            return Ok(());
        }

        let (chat_id, counterpart, block_status) = {
            let active = self.active.lock().await;
            let active = active
                .as_ref()
                .ok_or_else(|| PortError::Unexpected("no open conversation".to_string()))?;
            (
                active.chat_id.clone(),
                active.counterpart.clone(),
                active.block_status,
            )
        };
        if block_status != BlockStatus::Open {
            return Err(PortError::Blocked);
        }

        let img = match image {
            Some(upload) => Some(self.upload_image(upload).await?),
            None => None,
        };

        let user_message = Message {
            id: Utc::now().timestamp_millis().to_string(),
            sender_id: self.current_user.id.clone(),
            text: text.to_string(),
            img,
            audio_url: None,
            created_at: Utc::now(),
            kind: MessageKind::Plain,
        };
        self.append_message(&chat_id, &user_message).await?;
        self.update_indexes(&chat_id, &counterpart, text).await;

        if let Counterpart::Agent(agent) = &counterpart {
            self.dispatch_to_agent(&chat_id, agent, &user_message).await;
        }
        Ok(())
    }

    /// Voice input: transcribes the recorded audio and sends the text as
    /// a regular message through the full pipeline.
    pub async fn send_voice_input(&self, audio: &[u8]) -> PortResult<()> {
        let text = self.services.stt.transcribe(audio).await?;
        debug!(chars = text.len(), "voice input transcribed");
        self.send_message(&text, None).await
    }

    async fn upload_image(&self, upload: ImageUpload) -> PortResult<String> {
        self.services
            .blobs
            .store(&upload.name, &upload.data, &upload.content_type)
            .await
    }

    async fn append_message(&self, chat_id: &str, message: &Message) -> PortResult<()> {
        let item =
            serde_json::to_value(message).map_err(|e| PortError::Unexpected(e.to_string()))?;
        self.services
            .store
            .append(&keys::chat(chat_id), "messages", item)
            .await
    }

    /// The dual index write: sender's entry marked seen, counterpart's
    /// unseen. Not transactional with the message append; a failed half is
    /// logged and healed by the next message's write.
    async fn update_indexes(&self, chat_id: &str, counterpart: &Counterpart, preview: &str) {
        if let Err(e) = upsert_preview(
            &self.services.store,
            &self.current_user.id,
            chat_id,
            counterpart.id(),
            preview,
            true,
        )
        .await
        {
            error!(chat_id, "failed to update own chat index: {e}");
        }
        if let Counterpart::Human(peer) = counterpart {
            if let Err(e) = upsert_preview(
                &self.services.store,
                &peer.id,
                chat_id,
                &self.current_user.id,
                preview,
                false,
            )
            .await
            {
                error!(chat_id, "failed to update peer chat index: {e}");
            }
        }
    }

    /// Runs the dispatch pipeline and appends the persona's reply. Reply
    /// failures notify the user; the user's own message always stays.
    async fn dispatch_to_agent(&self, chat_id: &str, agent: &AgentProfile, user_message: &Message) {
        // The utterance goes to the model as the user turn; it must not
        // also appear as the final prior turn.
        let history: Vec<Message> = self
            .messages()
            .await
            .into_iter()
            .filter(|m| m.id != user_message.id)
            .collect();

        let reply = self
            .dispatch
            .dispatch(
                &user_message.text,
                agent,
                &self.current_user.username,
                &self.current_user.id,
                &history,
            )
            .await;

        let reply = match reply {
            Ok(reply) if !reply.trim().is_empty() => reply,
            Ok(_) => {
                error!(agent = %agent.id, "empty reply from dispatch");
                self.emit(ChatEvent::Notify(
                    "Failed to get AI response. Please try again.".to_string(),
                ));
                return;
            }
            Err(e) => {
                error!(agent = %agent.id, "dispatch failed: {e}");
                self.emit(ChatEvent::Notify(
                    "Failed to get AI response. Please try again.".to_string(),
                ));
                return;
            }
        };

        let audio_url = self.synthesize_reply(&reply, agent).await;
        let kind = if audio_url.is_some() {
            MessageKind::Voice
        } else {
            MessageKind::Plain
        };
        let ai_message = Message {
            id: (Utc::now().timestamp_millis() + 1).to_string(),
            sender_id: agent.id.clone(),
            text: reply.clone(),
            img: None,
            audio_url,
            created_at: Utc::now(),
            kind,
        };

        if let Err(e) = self.append_message(chat_id, &ai_message).await {
            error!(chat_id, "failed to append AI reply: {e}");
            self.emit(ChatEvent::Notify(
                "Failed to get AI response. Please try again.".to_string(),
            ));
            return;
        }
        if let Err(e) = upsert_preview(
            &self.services.store,
            &self.current_user.id,
            chat_id,
            &agent.id,
            &reply,
            true,
        )
        .await
        {
            error!(chat_id, "failed to update chat index after AI reply: {e}");
        }
    }

    /// Synthesizes the reply in the persona's voice, retrying once with
    /// the default voice. A second failure degrades to a text-only reply.
    async fn synthesize_reply(&self, reply: &str, agent: &AgentProfile) -> Option<String> {
        let audio = match self.services.tts.synthesize(reply, &agent.voice).await {
            Ok(audio) => audio,
            Err(first) => {
                warn!(voice = %agent.voice, "speech synthesis failed, retrying with default voice: {first}");
                match self
                    .services
                    .tts
                    .synthesize(reply, &self.services.config.default_voice)
                    .await
                {
                    Ok(audio) => audio,
                    Err(second) => {
                        error!("speech synthesis failed with default voice too: {second}");
                        return None;
                    }
                }
            }
        };

        match self
            .services
            .blobs
            .store("reply-audio", &audio, "audio/mpeg")
            .await
        {
            Ok(url) => Some(url),
            Err(e) => {
                warn!("failed to store reply audio, sending text only: {e}");
                None
            }
        }
    }

    /// Marks the open conversation seen in the user's own index.
    pub async fn mark_seen(&self) -> PortResult<()> {
        let chat_id = match self.active_chat_id().await {
            Some(chat_id) => chat_id,
            None => return Ok(()),
        };
        let key = keys::user_chats(&self.current_user.id);
        let mut index: UserChats = match self.services.store.read(&key).await? {
            Some(doc) => serde_json::from_value(doc)
                .map_err(|e| PortError::Unexpected(format!("corrupt chat index: {e}")))?,
            None => return Ok(()),
        };
        let Some(entry) = index.chats.iter_mut().find(|c| c.chat_id == chat_id) else {
            return Ok(());
        };
        if entry.is_seen {
            return Ok(());
        }
        entry.is_seen = true;
        let doc =
            serde_json::to_value(&index).map_err(|e| PortError::Unexpected(e.to_string()))?;
        self.services.store.write(&key, doc).await
    }

    //-------------------------------------------------------------------------------------
    // Audio playback
    //-------------------------------------------------------------------------------------

    /// The one-time user gesture that allows audio playback.
    pub async fn enable_audio(&self) {
        self.audio.lock().await.enable();
    }

    /// User tapped a message's audio control.
    pub async fn toggle_audio(&self, message_id: &str, url: &str) -> PlaybackAction {
        let action = self.audio.lock().await.toggle(message_id);
        match &action {
            PlaybackAction::Play { pause_first } => {
                if let Some(previous) = pause_first {
                    self.emit(ChatEvent::PauseAudio {
                        message_id: previous.clone(),
                    });
                }
                self.emit(ChatEvent::PlayAudio {
                    message_id: message_id.to_string(),
                    url: url.to_string(),
                });
            }
            PlaybackAction::Pause => self.emit(ChatEvent::PauseAudio {
                message_id: message_id.to_string(),
            }),
            PlaybackAction::Resume | PlaybackAction::Disabled => {}
        }
        action
    }

    pub async fn audio_finished(&self, message_id: &str) {
        self.audio.lock().await.finished(message_id);
    }

    /// Tears down the active conversation and its subscription.
    pub async fn close(&self) {
        if let Some(active) = self.active.lock().await.take() {
            active.watch_cancel.cancel();
            debug!(chat_id = %active.chat_id, "conversation closed");
        }
    }

    fn emit(&self, event: ChatEvent) {
        let _ = self.events.send(event);
    }
}

/// Autoplays the newest incoming message that carries audio, if playback
/// is enabled.
async fn autoplay_latest(
    audio: &Arc<Mutex<AudioGate>>,
    events: &mpsc::UnboundedSender<ChatEvent>,
    messages: &[Message],
    current_user_id: &str,
) {
    let Some(latest) = messages.last() else {
        return;
    };
    if latest.sender_id == current_user_id {
        return;
    }
    // Any incoming message carrying an audio reference qualifies,
    // whatever its kind.
    let Some(url) = &latest.audio_url else {
        return;
    };

    let mut gate = audio.lock().await;
    if let Some(previous) = gate.start(&latest.id) {
        if let Some(previous) = previous {
            let _ = events.send(ChatEvent::PauseAudio {
                message_id: previous,
            });
        }
        let _ = events.send(ChatEvent::PlayAudio {
            message_id: latest.id.clone(),
            url: url.clone(),
        });
    }
}

/// Reads a user profile document, `None` when absent.
pub(crate) async fn read_user(
    store: &Arc<dyn DocumentStore>,
    user_id: &str,
) -> PortResult<Option<User>> {
    match store.read(&keys::user(user_id)).await? {
        Some(doc) => serde_json::from_value(doc)
            .map(Some)
            .map_err(|e| PortError::Unexpected(format!("corrupt user document: {e}"))),
        None => Ok(None),
    }
}

/// Moves (or inserts) one conversation entry to the front of `owner_id`'s
/// index with a fresh preview and timestamp.
pub(crate) async fn upsert_preview(
    store: &Arc<dyn DocumentStore>,
    owner_id: &str,
    chat_id: &str,
    receiver_id: &str,
    last_message: &str,
    is_seen: bool,
) -> PortResult<()> {
    let key = keys::user_chats(owner_id);
    let mut index: UserChats = match store.read(&key).await? {
        Some(doc) => serde_json::from_value(doc)
            .map_err(|e| PortError::Unexpected(format!("corrupt chat index: {e}")))?,
        None => UserChats::default(),
    };

    if let Some(position) = index.chats.iter().position(|c| c.chat_id == chat_id) {
        index.chats.remove(position);
    }
    let preview: String = last_message.chars().take(PREVIEW_LIMIT).collect();
    index.chats.insert(
        0,
        ChatPreview {
            chat_id: chat_id.to_string(),
            receiver_id: receiver_id.to_string(),
            last_message: preview,
            updated_at: Utc::now(),
            is_seen,
        },
    );

    let doc = serde_json::to_value(&index).map_err(|e| PortError::Unexpected(e.to_string()))?;
    store.write(&key, doc).await
}
