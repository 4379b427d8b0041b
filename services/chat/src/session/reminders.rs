//! services/chat/src/session/reminders.rs
//!
//! Reminder scheduling: CRUD over the per-user reminder document, the
//! due-reminder query, and the lifecycle-owned delivery loop that
//! announces due reminders as chat messages.

use crate::agents::MED_REMINDER_AGENT_ID;
use crate::session::chat::upsert_preview;
use crate::session::state::{ChatEvent, Services};
use carechat_core::domain::{
    agent_chat_id, keys, Conversation, Message, MessageKind, Reminder, ReminderList, User,
};
use carechat_core::ports::{DocumentStore, PortError, PortResult};
use carechat_core::reminder::{self, ParsedReminder};
use chrono::{Local, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

//=========================================================================================
// ReminderStore (CRUD + Due Query)
//=========================================================================================

/// CRUD over reminder records in the document store, plus the due query.
#[derive(Clone)]
pub struct ReminderStore {
    store: Arc<dyn DocumentStore>,
}

impl ReminderStore {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    async fn read_list(&self, user_id: &str) -> PortResult<ReminderList> {
        let doc = self.store.read(&keys::reminders(user_id)).await?;
        Ok(match doc {
            Some(value) => serde_json::from_value(value)
                .map_err(|e| PortError::Unexpected(format!("corrupt reminder document: {e}")))?,
            None => ReminderList::default(),
        })
    }

    async fn write_list(&self, user_id: &str, list: &ReminderList) -> PortResult<()> {
        let value = serde_json::to_value(list)
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        self.store.write(&keys::reminders(user_id), value).await
    }

    pub async fn list(&self, user_id: &str) -> PortResult<Vec<Reminder>> {
        Ok(self.read_list(user_id).await?.reminders)
    }

    /// Persists a new reminder from an actionable parse. The time is
    /// already normalized; the creation day is stamped as the date.
    pub async fn add(&self, user_id: &str, parsed: &ParsedReminder) -> PortResult<Reminder> {
        let medication = parsed
            .medication
            .clone()
            .ok_or_else(|| PortError::Unexpected("reminder has no medication".to_string()))?;
        let time = parsed
            .time
            .clone()
            .ok_or_else(|| PortError::Unexpected("reminder has no time".to_string()))?;
        let time = reminder::normalize_time(&time).unwrap_or(time);

        let record = Reminder {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            medication,
            dosage: parsed.dosage.clone(),
            time,
            date: Some(Local::now().format("%Y-%m-%d").to_string()),
            frequency: parsed.frequency.clone(),
            is_completed: false,
            created_at: Utc::now(),
        };

        let item = serde_json::to_value(&record)
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        self.store
            .append(&keys::reminders(user_id), "reminders", item)
            .await?;

        info!(user_id, reminder_id = %record.id, medication = %record.medication, time = %record.time, "reminder created");
        Ok(record)
    }

    /// Replaces an existing reminder record by id.
    pub async fn update(&self, user_id: &str, updated: Reminder) -> PortResult<()> {
        let mut list = self.read_list(user_id).await?;
        let slot = list
            .reminders
            .iter_mut()
            .find(|r| r.id == updated.id)
            .ok_or_else(|| PortError::NotFound(format!("reminder {}", updated.id)))?;
        *slot = updated;
        self.write_list(user_id, &list).await
    }

    pub async fn delete(&self, user_id: &str, reminder_id: &str) -> PortResult<()> {
        let mut list = self.read_list(user_id).await?;
        let before = list.reminders.len();
        list.reminders.retain(|r| r.id != reminder_id);
        if list.reminders.len() == before {
            return Err(PortError::NotFound(format!("reminder {reminder_id}")));
        }
        self.write_list(user_id, &list).await
    }

    /// Returns reminders due at `now_time` ("HH:MM"). The completion
    /// status filter is the idempotency guard: "due" stays true all day
    /// once the scheduled time has passed, so the clock alone would
    /// re-announce on every poll.
    pub async fn find_due(&self, user_id: &str, now_time: &str) -> PortResult<Vec<Reminder>> {
        let list = self.read_list(user_id).await?;
        // Normalized "HH:MM" strings compare correctly lexicographically.
        Ok(list
            .reminders
            .into_iter()
            .filter(|r| !r.is_completed && r.time.as_str() <= now_time)
            .collect())
    }

    pub async fn mark_completed(&self, user_id: &str, reminder_id: &str) -> PortResult<()> {
        let mut list = self.read_list(user_id).await?;
        let slot = list
            .reminders
            .iter_mut()
            .find(|r| r.id == reminder_id)
            .ok_or_else(|| PortError::NotFound(format!("reminder {reminder_id}")))?;
        slot.is_completed = true;
        self.write_list(user_id, &list).await?;
        debug!(user_id, reminder_id, "reminder marked completed");
        Ok(())
    }
}

//=========================================================================================
// ReminderLoop (Delivery)
//=========================================================================================

/// The recurring due-check that announces due reminders as chat messages.
/// Owned by the session lifecycle, not by any UI surface: it runs for the
/// whole authenticated session and is cancelled on logout.
pub struct ReminderLoop {
    services: Arc<Services>,
    reminders: ReminderStore,
    user: User,
    events: mpsc::UnboundedSender<ChatEvent>,
}

impl ReminderLoop {
    pub fn new(
        services: Arc<Services>,
        user: User,
        events: mpsc::UnboundedSender<ChatEvent>,
    ) -> Self {
        let reminders = ReminderStore::new(services.store.clone());
        Self {
            services,
            reminders,
            user,
            events,
        }
    }

    /// Runs until cancelled: a fixed poll interval plus an opportunistic
    /// re-check whenever the user's reminder document changes.
    pub async fn run(self, cancel: CancellationToken) {
        info!(user_id = %self.user.id, "reminder loop started");

        let mut sub = match self
            .services
            .store
            .watch(&keys::reminders(&self.user.id))
            .await
        {
            Ok(sub) => sub,
            Err(e) => {
                error!("failed to watch reminder document: {e}");
                return;
            }
        };

        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.services.config.reminder_poll_secs));

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.check_due_reminders().await {
                        error!("reminder due-check failed: {e}");
                    }
                }
                changed = sub.snapshots.recv() => {
                    if changed.is_none() || cancel.is_cancelled() {
                        break;
                    }
                    debug!("reminder document changed, re-checking");
                    if let Err(e) = self.check_due_reminders().await {
                        error!("reminder due-check failed: {e}");
                    }
                }
            }
        }

        sub.cancel();
        info!(user_id = %self.user.id, "reminder loop stopped");
    }

    /// One due-check pass. Returns how many reminders were announced.
    pub async fn check_due_reminders(&self) -> PortResult<usize> {
        let now_time = Local::now().format("%H:%M").to_string();
        let due = self.reminders.find_due(&self.user.id, &now_time).await?;
        if due.is_empty() {
            return Ok(0);
        }

        info!(count = due.len(), "found due reminders");
        let chat_id = self.ensure_reminder_chat().await?;

        let mut announced = 0;
        for reminder in &due {
            match self.announce(reminder, &chat_id).await {
                Ok(()) => {
                    // Completion is the idempotency guard; a crash between
                    // announce and this call can duplicate one announcement,
                    // which is an accepted bounded risk.
                    if let Err(e) = self
                        .reminders
                        .mark_completed(&self.user.id, &reminder.id)
                        .await
                    {
                        error!(reminder_id = %reminder.id, "failed to mark reminder completed: {e}");
                    }
                    announced += 1;
                }
                Err(e) => {
                    error!(reminder_id = %reminder.id, "failed to announce reminder: {e}");
                    let _ = self
                        .events
                        .send(ChatEvent::Notify("Failed to deliver a reminder.".to_string()));
                }
            }
        }
        Ok(announced)
    }

    /// Creates the dedicated reminder conversation and its index entry on
    /// first use.
    async fn ensure_reminder_chat(&self) -> PortResult<String> {
        let chat_id = agent_chat_id(MED_REMINDER_AGENT_ID, &self.user.id);
        let key = keys::chat(&chat_id);

        if self.services.store.read(&key).await?.is_none() {
            info!(chat_id, "creating reminder conversation");
            let empty = serde_json::to_value(Conversation::default())
                .map_err(|e| PortError::Unexpected(e.to_string()))?;
            self.services.store.write(&key, empty).await?;
            upsert_preview(
                &self.services.store,
                &self.user.id,
                &chat_id,
                MED_REMINDER_AGENT_ID,
                "Medication Reminder",
                false,
            )
            .await?;
        }

        Ok(chat_id)
    }

    async fn announce(&self, reminder: &Reminder, chat_id: &str) -> PortResult<()> {
        let dosage = reminder
            .dosage
            .as_ref()
            .map(|d| format!("{d} "))
            .unwrap_or_default();
        let text = format!(
            "{}, you need to remember to take {}{}.",
            self.user.username, dosage, reminder.medication
        );

        let message = Message {
            id: format!("reminder-{}", reminder.id),
            sender_id: MED_REMINDER_AGENT_ID.to_string(),
            text: text.clone(),
            img: None,
            audio_url: None,
            created_at: Utc::now(),
            kind: MessageKind::Reminder,
        };
        let item = serde_json::to_value(&message)
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        self.services
            .store
            .append(&keys::chat(chat_id), "messages", item)
            .await?;

        if let Err(e) = upsert_preview(
            &self.services.store,
            &self.user.id,
            chat_id,
            MED_REMINDER_AGENT_ID,
            &text,
            false,
        )
        .await
        {
            // Self-healing on the next message; log and carry on.
            warn!(chat_id, "failed to update reminder chat preview: {e}");
        }

        info!(chat_id, "sent reminder message: {text}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{harness, seed_user};
    use carechat_core::reminder::parse;

    #[tokio::test]
    async fn add_normalizes_and_stamps_date() {
        let h = harness();
        let store = ReminderStore::new(h.services.store.clone());

        let parsed = parse("take 2 aspirin at 9am every day");
        let record = store.add("u1", &parsed).await.unwrap();
        assert_eq!(record.time, "09:00");
        assert_eq!(record.dosage.as_deref(), Some("2"));
        assert!(record.date.is_some());
        assert!(!record.is_completed);

        let listed = store.list("u1").await.unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn update_and_delete_by_id() {
        let h = harness();
        let store = ReminderStore::new(h.services.store.clone());

        let mut record = store.add("u1", &parse("take aspirin at 9am")).await.unwrap();
        record.time = "10:00".to_string();
        store.update("u1", record.clone()).await.unwrap();
        assert_eq!(store.list("u1").await.unwrap()[0].time, "10:00");

        store.delete("u1", &record.id).await.unwrap();
        assert!(store.list("u1").await.unwrap().is_empty());
        assert!(matches!(
            store.delete("u1", &record.id).await,
            Err(PortError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn find_due_filters_on_status_and_time() {
        let h = harness();
        let store = ReminderStore::new(h.services.store.clone());

        let early = store.add("u1", &parse("take aspirin at 12am")).await.unwrap();
        store.add("u1", &parse("take melatonin at 11:59pm")).await.unwrap();

        let due = store.find_due("u1", "12:00").await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, early.id);

        store.mark_completed("u1", &early.id).await.unwrap();
        let due = store.find_due("u1", "12:00").await.unwrap();
        assert!(due.is_empty());
    }

    #[tokio::test]
    async fn delivery_is_idempotent_across_passes() {
        let h = harness();
        let user = seed_user(&h, "u1", "Margaret").await;
        let store = ReminderStore::new(h.services.store.clone());
        // Midnight has always passed, so this is due immediately.
        store.add("u1", &parse("take 2 aspirin at 12am")).await.unwrap();

        let delivery = ReminderLoop::new(h.services.clone(), user, h.events_tx.clone());

        assert_eq!(delivery.check_due_reminders().await.unwrap(), 1);
        // Second pass must find nothing due.
        assert_eq!(delivery.check_due_reminders().await.unwrap(), 0);

        let chat_id = agent_chat_id(MED_REMINDER_AGENT_ID, "u1");
        let doc = h.services.store.read(&keys::chat(&chat_id)).await.unwrap().unwrap();
        let convo: Conversation = serde_json::from_value(doc).unwrap();
        assert_eq!(convo.messages.len(), 1);
        assert_eq!(convo.messages[0].kind, MessageKind::Reminder);
        assert_eq!(
            convo.messages[0].text,
            "Margaret, you need to remember to take 2 aspirin."
        );
    }

    #[tokio::test]
    async fn announcement_creates_index_entry() {
        let h = harness();
        let user = seed_user(&h, "u1", "Margaret").await;
        let store = ReminderStore::new(h.services.store.clone());
        store.add("u1", &parse("take aspirin at 12am")).await.unwrap();

        let delivery = ReminderLoop::new(h.services.clone(), user, h.events_tx.clone());
        delivery.check_due_reminders().await.unwrap();

        let doc = h
            .services
            .store
            .read(&keys::user_chats("u1"))
            .await
            .unwrap()
            .unwrap();
        let index: carechat_core::domain::UserChats = serde_json::from_value(doc).unwrap();
        assert_eq!(index.chats.len(), 1);
        assert_eq!(index.chats[0].receiver_id, MED_REMINDER_AGENT_ID);
        assert!(!index.chats[0].is_seen);
    }
}
