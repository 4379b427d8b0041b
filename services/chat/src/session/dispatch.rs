//! services/chat/src/session/dispatch.rs
//!
//! Routes a user utterance to the handler for the addressed persona's
//! specialization. Deterministic handlers (reminders, news triggers,
//! weather narratives) run their own logic and fall back to fixed reply
//! strings on collaborator failure; everything else goes to the language
//! model with the persona's system prompt.

use crate::agents;
use crate::session::reminders::ReminderStore;
use crate::session::state::Services;
use carechat_core::domain::{
    AgentProfile, Forecast, GeoLocation, Headline, Message, Specialization,
};
use carechat_core::ports::{ChatTurn, PortResult};
use carechat_core::reminder;
use chrono::{Local, NaiveDate, Timelike};
use regex::Regex;
use std::sync::Arc;
use std::sync::OnceLock;
use tracing::{debug, error, info};

/// Phrases that trigger a news summary. Anything else addressed to the
/// news persona gets a capability prompt instead of a collaborator call.
const NEWS_TRIGGERS: &[&str] = &[
    "summarize today's news",
    "summarize todays news",
    "today's news summary",
    "todays news summary",
    "news summary",
    "summarize news",
];

const REMINDER_CLARIFICATION: &str = "I'm sorry, I couldn't understand your reminder request. \
     Please try again with a medication name and time.";

const REMINDER_STORE_FAILURE: &str =
    "I'm sorry, there was an error setting your reminder. Please try again.";

const NEWS_CAPABILITY_PROMPT: &str = "I'm here to summarize news for you. You can ask me to \
     'summarize today's news' for a quick update on current events.";

const NEWS_FAILURE: &str =
    "I'm sorry, I couldn't fetch the news summary at the moment. Please try again later.";

const WEATHER_FAILURE: &str = "I'm sorry, I'm having trouble getting the weather information \
     right now. Can you please try again in a moment?";

fn location_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)(?:in|for|at)\s+([A-Za-z\s]+)$").unwrap())
}

//=========================================================================================
// DispatchEngine
//=========================================================================================

/// Dispatches one utterance per call; stateless between calls apart from
/// what the document store holds.
pub struct DispatchEngine {
    services: Arc<Services>,
    reminders: ReminderStore,
}

impl DispatchEngine {
    pub fn new(services: Arc<Services>) -> Self {
        let reminders = ReminderStore::new(services.store.clone());
        Self {
            services,
            reminders,
        }
    }

    /// Produces the persona's textual reply to `utterance`. Collaborator
    /// failures inside specialized handlers surface as apology replies,
    /// not errors; only reply-channel failures propagate.
    pub async fn dispatch(
        &self,
        utterance: &str,
        agent: &AgentProfile,
        username: &str,
        user_id: &str,
        history: &[Message],
    ) -> PortResult<String> {
        debug!(agent = %agent.id, specialization = ?agent.specialization, "dispatching utterance");

        match agent.specialization {
            Specialization::MedicationReminders => self.handle_reminder(utterance, user_id).await,
            Specialization::NewsSummarization => Ok(self.handle_news(utterance).await),
            Specialization::WeatherForecasting => Ok(self.handle_weather(utterance).await),
            Specialization::Companionship => {
                let prior = self.history_turns(history, user_id);
                self.complete(agent, username, &prior, utterance).await
            }
            Specialization::Medical
            | Specialization::Entertainment
            | Specialization::General => self.complete(agent, username, &[], utterance).await,
        }
    }

    async fn complete(
        &self,
        agent: &AgentProfile,
        username: &str,
        prior: &[ChatTurn],
        utterance: &str,
    ) -> PortResult<String> {
        let prompt = agents::system_prompt(agent, username);
        self.services.llm.complete(&prompt, prior, utterance).await
    }

    /// Maps the recent message window to language-model turns, attributing
    /// each message to the user or the persona by sender id.
    fn history_turns(&self, history: &[Message], user_id: &str) -> Vec<ChatTurn> {
        let window = self.services.config.history_window;
        let start = history.len().saturating_sub(window);
        history[start..]
            .iter()
            .map(|m| ChatTurn {
                from_user: m.sender_id == user_id,
                text: m.text.clone(),
            })
            .collect()
    }

    //-------------------------------------------------------------------------------------
    // Medication reminders
    //-------------------------------------------------------------------------------------

    /// Parses the utterance as a reminder request. Unactionable parses get
    /// a clarification reply without touching the store or the model.
    async fn handle_reminder(&self, utterance: &str, user_id: &str) -> PortResult<String> {
        let parsed = reminder::parse(utterance);
        if !parsed.is_actionable() {
            info!("reminder request not actionable, asking for clarification");
            return Ok(REMINDER_CLARIFICATION.to_string());
        }

        match self.reminders.add(user_id, &parsed).await {
            Ok(_) => Ok(reminder::format_confirmation(&parsed)),
            Err(e) => {
                error!("failed to store reminder: {e}");
                Ok(REMINDER_STORE_FAILURE.to_string())
            }
        }
    }

    //-------------------------------------------------------------------------------------
    // News summarization
    //-------------------------------------------------------------------------------------

    async fn handle_news(&self, utterance: &str) -> String {
        let lowered = utterance.to_lowercase();
        if !NEWS_TRIGGERS.iter().any(|t| lowered.contains(t)) {
            return NEWS_CAPABILITY_PROMPT.to_string();
        }

        let headlines = match self
            .services
            .news
            .top_headlines(self.services.config.news_limit)
            .await
        {
            Ok(headlines) if !headlines.is_empty() => headlines,
            Ok(_) => {
                error!("news collaborator returned no headlines");
                return NEWS_FAILURE.to_string();
            }
            Err(e) => {
                error!("failed to fetch headlines: {e}");
                return NEWS_FAILURE.to_string();
            }
        };

        let mut summary = String::from("Here's a summary of today's top news:\n\n");
        for (index, headline) in headlines.iter().enumerate() {
            let line = self.summarize_headline(headline).await;
            summary.push_str(&format!("{}. {}\n\n", index + 1, line));
        }
        summary.trim_end().to_string()
    }

    /// One-sentence summary per headline; falls back to the raw title when
    /// the model call fails, so one bad call never loses the whole digest.
    async fn summarize_headline(&self, headline: &Headline) -> String {
        let prompt = "You are a news summarizer. Summarize the given headline and description \
             in one concise sentence.";
        let text = format!("{}. {}", headline.title, headline.description);
        match self.services.llm.complete(prompt, &[], &text).await {
            Ok(summary) if !summary.trim().is_empty() => summary.trim().to_string(),
            Ok(_) | Err(_) => headline.title.clone(),
        }
    }

    //-------------------------------------------------------------------------------------
    // Weather forecasting
    //-------------------------------------------------------------------------------------

    async fn handle_weather(&self, utterance: &str) -> String {
        let location = self.resolve_location(utterance).await;
        let forecast = match self
            .services
            .weather
            .forecast(location.latitude, location.longitude)
            .await
        {
            Ok(forecast) => forecast,
            Err(e) => {
                error!("failed to fetch forecast: {e}");
                return WEATHER_FAILURE.to_string();
            }
        };

        let lowered = utterance.to_lowercase();
        if lowered.contains("current weather") {
            let hour = Local::now().hour() as usize;
            format_current_weather(&forecast, &location, hour)
                .unwrap_or_else(|| WEATHER_FAILURE.to_string())
        } else if lowered.contains("weather forecast") || lowered.contains("forecast") {
            format_weekly_forecast(&forecast, &location)
                .unwrap_or_else(|| WEATHER_FAILURE.to_string())
        } else {
            format!(
                "Hi there! I'd be happy to help you with the weather in {}, {}. Would you like \
                 to know about the current weather or get a 7-day forecast? Just ask me \
                 something like \"What's the current weather?\" or \"Give me a weather \
                 forecast.\"",
                location.name, location.country
            )
        }
    }

    /// Extracts a trailing "in/for/at <city>" clause and geocodes it; any
    /// miss falls back to the configured default location.
    async fn resolve_location(&self, utterance: &str) -> GeoLocation {
        let config = &self.services.config;
        let fallback = GeoLocation {
            latitude: config.default_latitude,
            longitude: config.default_longitude,
            name: config.default_city.clone(),
            country: config.default_country.clone(),
        };

        let city = match location_re()
            .captures(utterance.trim())
            .and_then(|caps| caps.get(1))
        {
            Some(m) => m.as_str().trim().to_string(),
            None => return fallback,
        };

        match self.services.weather.geocode(&city).await {
            Ok(Some(location)) => location,
            Ok(None) => {
                debug!(city, "city not found, using default location");
                fallback
            }
            Err(e) => {
                error!("geocoding failed: {e}");
                fallback
            }
        }
    }
}

//=========================================================================================
// Weather Narratives
//=========================================================================================

use crate::adapters::weather::interpret_weather_code;

/// Renders the current-hour conditions with clothing advice. `None` when
/// the forecast data is missing the requested hour.
fn format_current_weather(
    forecast: &Forecast,
    location: &GeoLocation,
    hour: usize,
) -> Option<String> {
    let hourly = &forecast.hourly;
    if hourly.temperature_2m.is_empty() {
        return None;
    }
    let hour = hour.min(hourly.temperature_2m.len() - 1);

    let temperature = *hourly.temperature_2m.get(hour)?;
    let humidity = *hourly.relative_humidity_2m.get(hour)?;
    let rain_chance = *hourly.precipitation_probability.get(hour)?;
    let condition = interpret_weather_code(*hourly.weathercode.get(hour)?);

    let mut narrative = format!(
        "Right now in {}, {}: {}. \u{1F321}\u{FE0F} The temperature is {:.0}\u{B0}C with \
         {:.0}% humidity \u{1F4A7} and a {:.0}% chance of rain \u{2614}.",
        location.name, location.country, condition, temperature, humidity, rain_chance
    );
    narrative.push(' ');
    narrative.push_str(clothing_suggestion(temperature, rain_chance));
    Some(narrative)
}

/// Renders the 7-day outlook, one line per day, closed by a weekly
/// activity suggestion.
fn format_weekly_forecast(forecast: &Forecast, location: &GeoLocation) -> Option<String> {
    let daily = &forecast.daily;
    let days = daily
        .time
        .len()
        .min(daily.temperature_2m_max.len())
        .min(daily.temperature_2m_min.len())
        .min(daily.precipitation_sum.len())
        .min(daily.weathercode.len())
        .min(7);
    if days == 0 {
        return None;
    }

    let mut narrative = format!(
        "Here's the 7-day forecast for {}, {}: \u{1F324}\u{FE0F}\n\n",
        location.name, location.country
    );
    for day in 0..days {
        let label = NaiveDate::parse_from_str(&daily.time[day], "%Y-%m-%d")
            .map(|date| date.format("%A, %B %d").to_string())
            .unwrap_or_else(|_| daily.time[day].clone());
        narrative.push_str(&format!(
            "{}: {} with a high of {:.0}\u{B0}C and a low of {:.0}\u{B0}C. Expected \
             precipitation: {:.1} mm.\n",
            label,
            interpret_weather_code(daily.weathercode[day]),
            daily.temperature_2m_max[day],
            daily.temperature_2m_min[day],
            daily.precipitation_sum[day],
        ));
    }

    let average_high =
        daily.temperature_2m_max[..days].iter().sum::<f64>() / days as f64;
    let total_precipitation: f64 = daily.precipitation_sum[..days].iter().sum();
    narrative.push('\n');
    narrative.push_str(weekly_suggestion(average_high, total_precipitation));
    Some(narrative)
}

fn clothing_suggestion(temperature: f64, rain_chance: f64) -> &'static str {
    if rain_chance > 50.0 {
        "Don't forget an umbrella if you're heading out! \u{2602}\u{FE0F}"
    } else if temperature < 5.0 {
        "It's cold out there, so wrap up warm with a coat and gloves. \u{1F9E4}"
    } else if temperature < 15.0 {
        "A light jacket should keep you comfortable outside. \u{1F9E5}"
    } else if temperature < 25.0 {
        "It's a pleasant temperature, perfect for a walk. \u{1F33A}"
    } else {
        "It's warm, so light clothing and plenty of water are the way to go. \u{1F31E}"
    }
}

fn weekly_suggestion(average_high: f64, total_precipitation: f64) -> &'static str {
    if total_precipitation < 10.0 && average_high >= 15.0 {
        "Looks like a mostly dry week ahead, a great time to plan something outdoors! \u{1F333}"
    } else if total_precipitation < 10.0 {
        "A dry but cool week ahead, so keep a warm layer handy for outdoor plans. \u{1F9E5}"
    } else {
        "Expect some wet spells this week, so keep indoor activities in mind and take an \
         umbrella when you go out. \u{2614}"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::find_agent;
    use crate::testutil::{harness, sample_forecast};
    use carechat_core::domain::MessageKind;
    use chrono::Utc;

    fn message(sender_id: &str, text: &str) -> Message {
        Message {
            id: "1".to_string(),
            sender_id: sender_id.to_string(),
            text: text.to_string(),
            img: None,
            audio_url: None,
            created_at: Utc::now(),
            kind: MessageKind::Plain,
        }
    }

    #[tokio::test]
    async fn unactionable_reminder_gets_clarification_without_model_call() {
        let h = harness();
        let engine = DispatchEngine::new(h.services.clone());
        let molly = find_agent("med-reminder").unwrap();

        let reply = engine
            .dispatch("remind me about something", &molly, "Margaret", "u1", &[])
            .await
            .unwrap();

        assert_eq!(reply, REMINDER_CLARIFICATION);
        assert!(h.llm.calls.lock().unwrap().is_empty());
        assert!(h.store.read_sync("reminders/u1").is_none());
    }

    #[tokio::test]
    async fn actionable_reminder_is_stored_and_confirmed() {
        let h = harness();
        let engine = DispatchEngine::new(h.services.clone());
        let molly = find_agent("med-reminder").unwrap();

        let reply = engine
            .dispatch("take 2 aspirin at 9am every day", &molly, "Margaret", "u1", &[])
            .await
            .unwrap();

        assert_eq!(
            reply,
            "I've set a reminder for you to take 2 aspirin at 9:00 AM every day. \
             Is there anything else you'd like me to remind you about?"
        );
        let stored = ReminderStore::new(h.services.store.clone());
        let listed = stored.list("u1").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].time, "09:00");
    }

    #[tokio::test]
    async fn news_summary_requires_trigger_phrase() {
        let h = harness();
        let engine = DispatchEngine::new(h.services.clone());
        let neil = find_agent("neil-news").unwrap();

        let reply = engine
            .dispatch("what's happening?", &neil, "Margaret", "u1", &[])
            .await
            .unwrap();
        assert_eq!(reply, NEWS_CAPABILITY_PROMPT);
        assert_eq!(h.news.calls(), 0);

        let reply = engine
            .dispatch("Please summarize today's news", &neil, "Margaret", "u1", &[])
            .await
            .unwrap();
        assert!(reply.starts_with("Here's a summary of today's top news:"));
        assert_eq!(h.news.calls(), 1);
    }

    #[tokio::test]
    async fn news_failure_yields_apology() {
        let h = harness();
        h.news.set_fail(true);
        let engine = DispatchEngine::new(h.services.clone());
        let neil = find_agent("neil-news").unwrap();

        let reply = engine
            .dispatch("news summary please", &neil, "Margaret", "u1", &[])
            .await
            .unwrap();
        assert_eq!(reply, NEWS_FAILURE);
    }

    #[tokio::test]
    async fn companionship_receives_history_other_specializations_do_not() {
        let h = harness();
        let engine = DispatchEngine::new(h.services.clone());
        let history = vec![
            message("u1", "I like hiking in the hills"),
            message("colin-companion", "That sounds lovely!"),
        ];

        let colin = find_agent("colin-companion").unwrap();
        engine
            .dispatch("any ideas for the weekend?", &colin, "Margaret", "u1", &history)
            .await
            .unwrap();
        {
            let calls = h.llm.calls.lock().unwrap();
            let call = calls.last().unwrap();
            assert_eq!(call.prior_turns.len(), 2);
            assert!(call.prior_turns[0].from_user);
            assert_eq!(call.prior_turns[0].text, "I like hiking in the hills");
            assert!(!call.prior_turns[1].from_user);
        }

        let tom = find_agent("doctor-tom").unwrap();
        engine
            .dispatch("my knee hurts", &tom, "Margaret", "u1", &history)
            .await
            .unwrap();
        let calls = h.llm.calls.lock().unwrap();
        assert!(calls.last().unwrap().prior_turns.is_empty());
    }

    #[tokio::test]
    async fn weather_geocodes_named_city_and_narrates_current_conditions() {
        let h = harness();
        let engine = DispatchEngine::new(h.services.clone());
        let walter = find_agent("walter-weather").unwrap();

        let reply = engine
            .dispatch(
                "what's the current weather in Paris",
                &walter,
                "Margaret",
                "u1",
                &[],
            )
            .await
            .unwrap();
        assert!(reply.contains("Paris, France"), "got: {reply}");
        assert!(reply.contains("humidity"));
    }

    #[tokio::test]
    async fn weather_without_keywords_offers_capabilities() {
        let h = harness();
        let engine = DispatchEngine::new(h.services.clone());
        let walter = find_agent("walter-weather").unwrap();

        let reply = engine
            .dispatch("hello there", &walter, "Margaret", "u1", &[])
            .await
            .unwrap();
        assert!(reply.contains("current weather or get a 7-day forecast"));
        // No city clause, so the configured default location is used.
        assert!(reply.contains("Glasgow"));
    }

    #[tokio::test]
    async fn weather_collaborator_failure_yields_apology() {
        let h = harness();
        h.weather.set_fail(true);
        let engine = DispatchEngine::new(h.services.clone());
        let walter = find_agent("walter-weather").unwrap();

        let reply = engine
            .dispatch("current weather please", &walter, "Margaret", "u1", &[])
            .await
            .unwrap();
        assert_eq!(reply, WEATHER_FAILURE);
    }

    #[test]
    fn weekly_forecast_lists_each_day() {
        let forecast = sample_forecast();
        let location = GeoLocation {
            latitude: 0.0,
            longitude: 0.0,
            name: "Paris".to_string(),
            country: "France".to_string(),
        };
        let narrative = format_weekly_forecast(&forecast, &location).unwrap();
        assert!(narrative.starts_with("Here's the 7-day forecast for Paris, France:"));
        assert_eq!(narrative.matches("high of").count(), 7);
    }
}
