//! crates/carechat_core/src/reminder.rs
//!
//! Pure, stateless parsing of free-text medication reminder requests and
//! formatting of confirmation replies. Missing fields are a valid outcome,
//! not an error; the dispatch engine turns them into a clarification reply.

use regex::Regex;
use std::sync::OnceLock;

/// The structured result of parsing a reminder request. All fields are
/// optional; `medication` and `time` must both be present for the request
/// to be actionable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedReminder {
    pub medication: Option<String>,
    pub dosage: Option<String>,
    /// Normalized 24-hour "HH:MM".
    pub time: Option<String>,
    pub frequency: Option<String>,
}

impl ParsedReminder {
    pub fn is_actionable(&self) -> bool {
        self.medication.is_some() && self.time.is_some()
    }
}

fn medication_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)take\s+(?:(\d+(?:\.\d+)?)\s+)?(.+?)\s+(?:at|every|each)").unwrap()
    })
}

fn time_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)at\s+(\d{1,2}(?::\d{2})?(?:\s*[ap]m)?)").unwrap())
}

fn frequency_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(?:every|each)\s+(?:day|week|month|\d+\s+(?:days?|weeks?|months?))")
            .unwrap()
    })
}

/// Parses free text into a structured reminder. The three extractions are
/// independent pattern matches over the same input.
pub fn parse(input: &str) -> ParsedReminder {
    let mut result = ParsedReminder::default();

    if let Some(caps) = medication_re().captures(input) {
        result.dosage = caps.get(1).map(|m| m.as_str().to_string());
        result.medication = caps.get(2).map(|m| m.as_str().trim().to_lowercase());
    }

    if let Some(caps) = time_re().captures(input) {
        result.time = normalize_time(&caps[1]);
    }

    if let Some(m) = frequency_re().find(input) {
        result.frequency = Some(m.as_str().to_lowercase());
    }

    result
}

/// Normalizes a matched time like "9", "9:30", "9:30 PM" to 24-hour
/// "HH:MM". 12am maps to 00:00, 12pm stays 12:00, other PM hours gain 12.
pub fn normalize_time(raw: &str) -> Option<String> {
    let lowered = raw.trim().to_lowercase();

    let (clock, period) = match lowered.find(|c| c == 'a' || c == 'p') {
        Some(idx) => {
            let (clock, suffix) = lowered.split_at(idx);
            (clock.trim().to_string(), Some(suffix.trim().to_string()))
        }
        None => (lowered, None),
    };

    let mut parts = clock.split(':');
    let mut hours: u32 = parts.next()?.trim().parse().ok()?;
    let minutes: u32 = match parts.next() {
        Some(m) => m.trim().parse().ok()?,
        None => 0,
    };
    if hours > 23 || minutes > 59 {
        return None;
    }

    match period.as_deref() {
        Some("pm") if hours != 12 => hours += 12,
        Some("am") if hours == 12 => hours = 0,
        _ => {}
    }
    if hours > 23 {
        return None;
    }

    Some(format!("{hours:02}:{minutes:02}"))
}

/// Renders a normalized "HH:MM" time back to a 12-hour display form.
pub fn format_time_for_display(time: &str) -> String {
    let mut parts = time.split(':');
    let hours: u32 = parts
        .next()
        .and_then(|h| h.parse().ok())
        .unwrap_or_default();
    let minutes = parts.next().unwrap_or("00");
    let period = if hours >= 12 { "PM" } else { "AM" };
    let display_hours = match hours % 12 {
        0 => 12,
        h => h,
    };
    format!("{display_hours}:{minutes} {period}")
}

/// Renders the confirmation utterance for an actionable parsed reminder.
/// The caller guarantees medication and time are present.
pub fn format_confirmation(parsed: &ParsedReminder) -> String {
    let medication = parsed.medication.as_deref().unwrap_or_default();
    let time = parsed.time.as_deref().unwrap_or_default();

    let mut response = String::from("I've set a reminder for you to take");
    if let Some(dosage) = &parsed.dosage {
        response.push(' ');
        response.push_str(dosage);
    }
    response.push(' ');
    response.push_str(medication);
    response.push_str(" at ");
    response.push_str(&format_time_for_display(time));
    if let Some(frequency) = &parsed.frequency {
        response.push(' ');
        response.push_str(frequency);
    }
    response.push_str(". Is there anything else you'd like me to remind you about?");
    response
}
