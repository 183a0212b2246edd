//! Rule-based categorization and tagging.
//!
//! Rules are written as JSON objects, matching the format activity watchers
//! use for their category settings:
//!
//! ```json
//! {"type": "regex", "regex": "vim|emacs", "ignore_case": true, "select_keys": ["app"]}
//! {"type": "none"}
//! ```

use regex::{Regex, RegexBuilder};
use serde_json::{Map, Value};

use super::TransformError;
use crate::Event;

/// Data key holding an event's category path.
pub const CATEGORY_KEY: &str = "$category";

/// Data key holding an event's tags.
pub const TAGS_KEY: &str = "$tags";

/// Label given to events no rule matched.
pub const UNCATEGORIZED: &str = "Uncategorized";

/// A category path, e.g. `["Work", "Programming"]`.
pub type Category = Vec<String>;

/// A predicate over event data.
#[derive(Debug, Clone)]
pub enum Rule {
    /// Matches when any selected string value contains a regex match.
    Regex {
        regex: Regex,
        /// Keys to inspect; `None` inspects every value.
        select_keys: Option<Vec<String>>,
    },
    /// Never matches. Used for categories that only group subcategories.
    None,
}

impl Rule {
    /// Builds a regex rule.
    pub fn regex(
        pattern: &str,
        ignore_case: bool,
        select_keys: Option<Vec<String>>,
    ) -> Result<Self, TransformError> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(ignore_case)
            .build()
            .map_err(|e| TransformError::InvalidRegex {
                pattern: pattern.to_string(),
                message: e.to_string(),
            })?;
        Ok(Self::Regex { regex, select_keys })
    }

    /// Parses a rule from its JSON object form.
    pub fn from_json(value: &Value) -> Result<Self, TransformError> {
        let Value::Object(fields) = value else {
            return Err(invalid_rule("rule must be an object"));
        };
        match fields.get("type").and_then(Value::as_str) {
            Some("none") => Ok(Self::None),
            Some("regex") => {
                let pattern = fields
                    .get("regex")
                    .and_then(Value::as_str)
                    .filter(|p| !p.is_empty())
                    .ok_or_else(|| invalid_rule("regex rule needs a non-empty \"regex\""))?;
                let ignore_case = fields
                    .get("ignore_case")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                let select_keys = match fields.get("select_keys") {
                    None | Some(Value::Null) => None,
                    Some(Value::Array(keys)) => Some(
                        keys.iter()
                            .map(|k| {
                                k.as_str()
                                    .map(String::from)
                                    .ok_or_else(|| invalid_rule("select_keys must be strings"))
                            })
                            .collect::<Result<Vec<_>, _>>()?,
                    ),
                    Some(_) => return Err(invalid_rule("select_keys must be a list")),
                };
                Self::regex(pattern, ignore_case, select_keys)
            }
            Some(other) => Err(invalid_rule(&format!("unknown rule type {other:?}"))),
            None => Err(invalid_rule("rule needs a \"type\"")),
        }
    }

    /// True when the rule matches the event data.
    pub fn matches(&self, data: &Map<String, Value>) -> bool {
        match self {
            Self::None => false,
            Self::Regex { regex, select_keys } => {
                let is_match = |value: &Value| value.as_str().is_some_and(|s| regex.is_match(s));
                match select_keys {
                    Some(keys) => keys
                        .iter()
                        .filter_map(|k| data.get(k))
                        .any(is_match),
                    None => data.values().any(is_match),
                }
            }
        }
    }
}

fn invalid_rule(message: &str) -> TransformError {
    TransformError::InvalidRule {
        message: message.to_string(),
    }
}

/// Attaches a category to every event under [`CATEGORY_KEY`].
///
/// Rules are tried in order and the first match wins. Events matching no rule
/// get `["Uncategorized"]`.
pub fn categorize(events: Vec<Event>, rules: &[(Category, Rule)]) -> Vec<Event> {
    events
        .into_iter()
        .map(|mut event| {
            let category = rules
                .iter()
                .find(|(_, rule)| rule.matches(&event.data))
                .map_or_else(|| vec![UNCATEGORIZED.to_string()], |(c, _)| c.clone());
            event.data.insert(
                CATEGORY_KEY.to_string(),
                Value::Array(category.into_iter().map(Value::String).collect()),
            );
            event
        })
        .collect()
}

/// Attaches every matching label to each event under [`TAGS_KEY`].
pub fn tag(events: Vec<Event>, rules: &[(String, Rule)]) -> Vec<Event> {
    events
        .into_iter()
        .map(|mut event| {
            let tags: Vec<Value> = rules
                .iter()
                .filter(|(_, rule)| rule.matches(&event.data))
                .map(|(label, _)| Value::String(label.clone()))
                .collect();
            event.data.insert(TAGS_KEY.to_string(), Value::Array(tags));
            event
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::testing::event;
    use serde_json::json;

    fn category(path: &[&str]) -> Category {
        path.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn first_matching_rule_wins() {
        let rules = vec![
            (category(&["Work", "Editor"]), Rule::regex("vim", false, None).unwrap()),
            (category(&["Work"]), Rule::regex("v", false, None).unwrap()),
        ];
        let events = vec![
            event(0, 1, json!({"app": "vim"})),
            event(1, 1, json!({"app": "vlc"})),
            event(2, 1, json!({"app": "steam"})),
        ];

        let categorized = categorize(events, &rules);
        assert_eq!(categorized[0].data()[CATEGORY_KEY], json!(["Work", "Editor"]));
        assert_eq!(categorized[1].data()[CATEGORY_KEY], json!(["Work"]));
        assert_eq!(categorized[2].data()[CATEGORY_KEY], json!(["Uncategorized"]));
    }

    #[test]
    fn rule_order_changes_result() {
        let broad = (category(&["Media"]), Rule::regex("v", false, None).unwrap());
        let narrow = (category(&["Editor"]), Rule::regex("vim", false, None).unwrap());
        let events = vec![event(0, 1, json!({"app": "vim"}))];

        let a = categorize(events.clone(), &[narrow.clone(), broad.clone()]);
        let b = categorize(events, &[broad, narrow]);
        assert_eq!(a[0].data()[CATEGORY_KEY], json!(["Editor"]));
        assert_eq!(b[0].data()[CATEGORY_KEY], json!(["Media"]));
    }

    #[test]
    fn select_keys_limits_matching() {
        let rule = Rule::regex("github", true, Some(vec!["url".to_string()])).unwrap();
        assert!(rule.matches(&crate::transform::testing::obj(
            json!({"url": "https://GitHub.com", "title": "x"})
        )));
        assert!(!rule.matches(&crate::transform::testing::obj(
            json!({"url": "https://example.com", "title": "github"})
        )));
    }

    #[test]
    fn parses_rules_from_json() {
        let rule = Rule::from_json(&json!({"type": "regex", "regex": "Code", "ignore_case": true}))
            .unwrap();
        assert!(rule.matches(&crate::transform::testing::obj(json!({"app": "code"}))));

        assert!(matches!(
            Rule::from_json(&json!({"type": "none"})).unwrap(),
            Rule::None
        ));
        assert!(Rule::from_json(&json!({"type": "regex"})).is_err());
        assert!(Rule::from_json(&json!({"type": "glob", "regex": "x"})).is_err());
        assert!(matches!(
            Rule::from_json(&json!({"type": "regex", "regex": "("})),
            Err(TransformError::InvalidRegex { .. })
        ));
    }

    #[test]
    fn tag_attaches_all_matches() {
        let rules = vec![
            ("editor".to_string(), Rule::regex("vim", false, None).unwrap()),
            ("terminal".to_string(), Rule::regex("term", false, None).unwrap()),
            ("never".to_string(), Rule::None),
        ];
        let tagged = tag(vec![event(0, 1, json!({"app": "vim", "title": "term"}))], &rules);
        assert_eq!(tagged[0].data()[TAGS_KEY], json!(["editor", "terminal"]));
    }
}
