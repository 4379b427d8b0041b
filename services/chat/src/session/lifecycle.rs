//! services/chat/src/session/lifecycle.rs
//!
//! Session establishment and teardown driven by auth state transitions,
//! plus multi-step account creation with compensating rollback.

use crate::session::chat::{read_user, ChatManager, ImageUpload};
use crate::session::reminders::ReminderLoop;
use crate::session::state::{ChatEvent, Services};
use carechat_core::domain::{keys, User, UserChats};
use carechat_core::ports::{AuthEvent, PortError, PortResult};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Everything owned by one signed-in session. All background work hangs
/// off the one cancellation token.
pub struct ActiveSession {
    pub user: User,
    pub chat: Arc<ChatManager>,
    cancel: CancellationToken,
    reminder_task: JoinHandle<()>,
    index_task: JoinHandle<()>,
}

//=========================================================================================
// SessionController
//=========================================================================================

/// Owns the signed-in session. Subscribes to auth transitions exactly
/// once; sign-in builds the session, sign-out cancels all of its work
/// before any state is cleared.
pub struct SessionController {
    services: Arc<Services>,
    events: mpsc::UnboundedSender<ChatEvent>,
    active: Option<ActiveSession>,
}

impl SessionController {
    pub fn new(services: Arc<Services>, events: mpsc::UnboundedSender<ChatEvent>) -> Self {
        Self {
            services,
            events,
            active: None,
        }
    }

    pub fn current_user(&self) -> Option<&User> {
        self.active.as_ref().map(|s| &s.user)
    }

    pub fn chat(&self) -> Option<Arc<ChatManager>> {
        self.active.as_ref().map(|s| s.chat.clone())
    }

    /// Drives the controller from the auth provider's event stream until
    /// the stream closes.
    pub async fn run(&mut self) {
        let mut auth_events = self.services.auth.subscribe();
        while let Some(event) = auth_events.recv().await {
            self.handle_auth_event(event).await;
        }
        self.teardown().await;
    }

    pub async fn handle_auth_event(&mut self, event: AuthEvent) {
        match event {
            AuthEvent::SignedIn(uid) => {
                if let Err(e) = self.establish(&uid).await {
                    error!(uid, "failed to establish session: {e}");
                    let _ = self.events.send(ChatEvent::Notify(
                        "Failed to load your account. Please sign in again.".to_string(),
                    ));
                }
            }
            AuthEvent::SignedOut => self.teardown().await,
        }
    }

    async fn establish(&mut self, uid: &str) -> PortResult<()> {
        // A sign-in replacing an existing session tears the old one down
        // first, so no subscription outlives its user.
        self.teardown().await;

        let user = read_user(&self.services.store, uid)
            .await?
            .ok_or_else(|| PortError::NotFound(format!("user {uid}")))?;
        info!(uid, username = %user.username, "session established");

        let cancel = CancellationToken::new();
        let chat = Arc::new(ChatManager::new(
            self.services.clone(),
            user.clone(),
            self.events.clone(),
            cancel.clone(),
        ));

        // All fallible setup happens before any task is spawned: an early
        // return here must not leave an orphaned loop running for a user
        // with no session.
        let index_task = self.spawn_index_watch(uid, cancel.child_token()).await?;

        let reminder_loop =
            ReminderLoop::new(self.services.clone(), user.clone(), self.events.clone());
        let reminder_task = tokio::spawn(reminder_loop.run(cancel.child_token()));

        self.active = Some(ActiveSession {
            user,
            chat,
            cancel,
            reminder_task,
            index_task,
        });
        Ok(())
    }

    /// Watches the user's conversation index and forwards each snapshot to
    /// the UI, starting with the current state.
    async fn spawn_index_watch(
        &self,
        uid: &str,
        cancel: CancellationToken,
    ) -> PortResult<JoinHandle<()>> {
        let key = keys::user_chats(uid);
        if let Some(doc) = self.services.store.read(&key).await? {
            if let Ok(index) = serde_json::from_value::<UserChats>(doc) {
                let _ = self.events.send(ChatEvent::ChatListChanged(index));
            }
        }

        let mut subscription = self.services.store.watch(&key).await?;
        let events = self.events.clone();
        Ok(tokio::spawn(async move {
            loop {
                let snapshot = tokio::select! {
                    _ = cancel.cancelled() => break,
                    snapshot = subscription.snapshots.recv() => match snapshot {
                        Some(snapshot) => snapshot,
                        None => break,
                    },
                };
                if cancel.is_cancelled() {
                    break;
                }
                match serde_json::from_value::<UserChats>(snapshot) {
                    Ok(index) => {
                        let _ = events.send(ChatEvent::ChatListChanged(index));
                    }
                    Err(e) => error!("ignoring malformed chat index snapshot: {e}"),
                }
            }
            subscription.cancel();
            debug!("chat index watch stopped");
        }))
    }

    /// Cancels all session work, then clears state. The cancel-then-clear
    /// order guarantees no callback runs against a half-cleared session.
    pub async fn teardown(&mut self) {
        let Some(session) = self.active.take() else {
            return;
        };
        info!(uid = %session.user.id, "tearing down session");

        session.cancel.cancel();
        session.chat.close().await;
        // Wait for background tasks so nothing writes after teardown.
        if let Err(e) = session.reminder_task.await {
            warn!("reminder task ended abnormally: {e}");
        }
        if let Err(e) = session.index_task.await {
            warn!("index watch task ended abnormally: {e}");
        }
    }

    //-------------------------------------------------------------------------------------
    // Account creation
    //-------------------------------------------------------------------------------------

    /// Creates an account: auth identity, optional avatar upload, profile
    /// document, empty conversation index, and the username registry
    /// claim. Any failure after the identity exists rolls the identity
    /// back.
    pub async fn create_account(
        &self,
        username: &str,
        email: &str,
        password: &str,
        avatar: Option<ImageUpload>,
    ) -> PortResult<User> {
        let username = username.trim();
        if username.is_empty() || email.trim().is_empty() || password.is_empty() {
            return Err(PortError::Unexpected(
                "Username, email and password are required".to_string(),
            ));
        }

        let registry = self.read_username_registry().await?;
        if registry.contains_key(username) {
            return Err(PortError::Unexpected(
                "Username already taken. Please choose another one.".to_string(),
            ));
        }

        let uid = self.services.auth.create_user(email, password).await?;
        match self
            .provision_profile(&uid, username, email, avatar, registry)
            .await
        {
            Ok(user) => {
                info!(uid, username, "account created");
                Ok(user)
            }
            Err(e) => {
                warn!(uid, "account provisioning failed, rolling back identity: {e}");
                if let Err(rollback) = self.services.auth.delete_user(&uid).await {
                    error!(uid, "failed to roll back auth identity: {rollback}");
                }
                Err(e)
            }
        }
    }

    async fn provision_profile(
        &self,
        uid: &str,
        username: &str,
        email: &str,
        avatar: Option<ImageUpload>,
        mut registry: Map<String, Value>,
    ) -> PortResult<User> {
        let avatar_url = match avatar {
            Some(upload) => Some(
                self.services
                    .blobs
                    .store(&upload.name, &upload.data, &upload.content_type)
                    .await?,
            ),
            None => None,
        };

        let user = User {
            id: uid.to_string(),
            username: username.to_string(),
            email: Some(email.to_string()),
            avatar: avatar_url,
            blocked: Vec::new(),
        };
        let doc = serde_json::to_value(&user).map_err(|e| PortError::Unexpected(e.to_string()))?;
        self.services.store.write(&keys::user(uid), doc).await?;

        let index = serde_json::to_value(UserChats::default())
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        self.services
            .store
            .write(&keys::user_chats(uid), index)
            .await?;

        registry.insert(username.to_string(), Value::String(uid.to_string()));
        self.services
            .store
            .write(&keys::usernames(), Value::Object(registry))
            .await?;

        Ok(user)
    }

    async fn read_username_registry(&self) -> PortResult<Map<String, Value>> {
        Ok(match self.services.store.read(&keys::usernames()).await? {
            Some(Value::Object(map)) => map,
            Some(_) => {
                return Err(PortError::Unexpected(
                    "corrupt username registry".to_string(),
                ))
            }
            None => Map::new(),
        })
    }
}
