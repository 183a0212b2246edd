//! Normalizing noisy window titles.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::Event;

/// Unread counters browsers and chat apps prepend, e.g. `"(3) Inbox"`.
static COUNTER_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\([0-9]+\)\s*").expect("counter pattern is valid"));

/// Frame-rate readouts games put in their titles, e.g. `"FPS: 59.9"`.
static FPS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"FPS:\s+[0-9.]+").expect("fps pattern is valid"));

/// Strips volatile fragments from the string at `key`.
///
/// Removes a leading `(N)` counter and masks `FPS: <number>` readouts as
/// `FPS: ...`, so titles that differ only in those fragments merge. Events
/// whose `key` is missing or not a string are returned unchanged.
pub fn simplify_string(events: Vec<Event>, key: &str) -> Vec<Event> {
    events
        .into_iter()
        .map(|mut event| {
            if let Some(Value::String(text)) = event.data.get_mut(key) {
                let stripped = COUNTER_PREFIX_RE.replace(text.as_str(), "");
                let masked = FPS_RE.replace_all(&stripped, "FPS: ...").into_owned();
                *text = masked;
            }
            event
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::testing::event;
    use serde_json::json;

    #[test]
    fn strips_counters_and_masks_fps() {
        let events = simplify_string(
            vec![
                event(0, 1, json!({"title": "(12) Inbox - Mail"})),
                event(1, 1, json!({"title": "Cemu - FPS: 59.2 - Zelda"})),
                event(2, 1, json!({"title": "notes (1)"})),
            ],
            "title",
        );

        let titles: Vec<_> = events.iter().map(|e| e.data()["title"].clone()).collect();
        assert_eq!(
            titles,
            [json!("Inbox - Mail"), json!("Cemu - FPS: ... - Zelda"), json!("notes (1)")]
        );
    }

    #[test]
    fn other_keys_and_non_strings_are_untouched() {
        let input = vec![
            event(0, 1, json!({"title": 3, "app": "(2) chat"})),
            event(1, 1, json!({"app": "(2) chat"})),
        ];
        assert_eq!(simplify_string(input.clone(), "title"), input);
    }
}
