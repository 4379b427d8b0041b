//! services/chat/src/session/state.rs
//!
//! Defines the shared service context, the UI-facing event stream, and
//! the single-flight audio playback slot.

use crate::config::Config;
use carechat_core::domain::{Message, UserChats};
use carechat_core::ports::{
    AuthProvider, BlobStore, DocumentStore, LanguageModelService, NewsService,
    SpeechSynthesisService, SpeechToTextService, WeatherService,
};
use std::sync::Arc;

//=========================================================================================
// Services (Shared Across the Whole Session)
//=========================================================================================

/// The explicit context object handed to every session component.
/// Constructed once at startup; there are no ambient singletons.
#[derive(Clone)]
pub struct Services {
    pub store: Arc<dyn DocumentStore>,
    pub auth: Arc<dyn AuthProvider>,
    pub llm: Arc<dyn LanguageModelService>,
    pub tts: Arc<dyn SpeechSynthesisService>,
    pub stt: Arc<dyn SpeechToTextService>,
    pub news: Arc<dyn NewsService>,
    pub weather: Arc<dyn WeatherService>,
    pub blobs: Arc<dyn BlobStore>,
    pub config: Arc<Config>,
}

//=========================================================================================
// ChatEvent (Pushed to the UI Layer)
//=========================================================================================

/// Events the orchestration layer emits for the (out-of-scope) UI to
/// render. Errors surface here as `Notify`, never as panics.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    /// The active conversation's message list was replaced wholesale.
    HistoryChanged {
        chat_id: String,
        messages: Vec<Message>,
    },
    /// The message list grew; the view should scroll to the latest entry.
    ScrollToLatest,
    /// The per-user conversation index changed.
    ChatListChanged(UserChats),
    PlayAudio { message_id: String, url: String },
    PauseAudio { message_id: String },
    /// A user-visible notification (collaborator failures land here).
    Notify(String),
}

//=========================================================================================
// AudioGate (Single-Flight Playback Slot)
//=========================================================================================

/// What the UI should do with its audio element after a toggle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackAction {
    /// Start playing this clip; pause `pause_first` if present.
    Play { pause_first: Option<String> },
    Pause,
    Resume,
    /// Playback is disabled until the user's enabling gesture.
    Disabled,
}

/// Tracks the one currently-playing clip. Autoplay is gated behind a
/// one-time user gesture; starting a new clip releases the previous one.
#[derive(Debug, Default)]
pub struct AudioGate {
    enabled: bool,
    playing: Option<String>,
    paused: bool,
}

impl AudioGate {
    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Claims the playback slot for `message_id`, returning the clip to
    /// pause first, if any. `None` result when playback is not enabled.
    pub fn start(&mut self, message_id: &str) -> Option<Option<String>> {
        if !self.enabled {
            return None;
        }
        let previous = self.playing.replace(message_id.to_string());
        self.paused = false;
        Some(previous.filter(|prev| prev != message_id))
    }

    /// User tapped the audio control of `message_id`.
    pub fn toggle(&mut self, message_id: &str) -> PlaybackAction {
        if !self.enabled {
            return PlaybackAction::Disabled;
        }
        match &self.playing {
            Some(current) if current == message_id => {
                self.paused = !self.paused;
                if self.paused {
                    PlaybackAction::Pause
                } else {
                    PlaybackAction::Resume
                }
            }
            _ => {
                let pause_first = self.playing.replace(message_id.to_string());
                self.paused = false;
                PlaybackAction::Play { pause_first }
            }
        }
    }

    /// The UI reports that a clip finished.
    pub fn finished(&mut self, message_id: &str) {
        if self.playing.as_deref() == Some(message_id) {
            self.playing = None;
            self.paused = false;
        }
    }
}
