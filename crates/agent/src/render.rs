//! `{{ key }}` template rendering for starter messages.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use chrono::Local;
use regex_lite::Regex;
use tandem_core::message::{AssistantMessage, Message, MessageBlock};

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").expect("placeholder pattern is a valid regex")
});

/// Replace `{{ key }}` placeholders with `values`. Unknown keys render empty.
pub fn render(template: &str, values: &BTreeMap<String, String>) -> String {
    if !template.contains("{{") {
        return template.to_string();
    }
    PLACEHOLDER.replace_all(template, |caps: &regex_lite::Captures<'_>| {
        values.get(&caps[1]).cloned().unwrap_or_default()
    })
    .into_owned()
}

/// Template values available to every agent: `name`, `date`, `time` and
/// `datetime`, overlaid with the caller's values.
pub fn builtin_values(agent_name: &str, values: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let now = Local::now();
    let mut merged = BTreeMap::from([
        ("name".to_string(), agent_name.to_string()),
        ("date".to_string(), now.format("%Y-%m-%d").to_string()),
        ("time".to_string(), now.format("%H:%M:%S").to_string()),
        ("datetime".to_string(), now.format("%Y-%m-%d %H:%M:%S").to_string()),
    ]);
    merged.extend(values.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

/// Render the text of a message, leaving tool traffic untouched.
pub fn render_message(message: &Message, values: &BTreeMap<String, String>) -> Message {
    match message {
        Message::System { content } => Message::system(render(content, values)),
        Message::User { content } => Message::user(render(content, values)),
        Message::Assistant(reply) => Message::Assistant(AssistantMessage::new(
            reply
                .content
                .iter()
                .map(|block| match block {
                    MessageBlock::Text { text } => MessageBlock::Text {
                        text: render(text, values),
                    },
                    other => other.clone(),
                })
                .collect(),
        )),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn substitutes_known_keys() {
        let out = render("Hello {{ user }}, I am {{name}}.", &values(&[("user", "Ada"), ("name", "bot")]));
        assert_eq!(out, "Hello Ada, I am bot.");
    }

    #[test]
    fn unknown_keys_render_empty() {
        assert_eq!(render("[{{ missing }}]", &BTreeMap::new()), "[]");
    }

    #[test]
    fn dotted_keys_render_on_every_call() {
        let vals = values(&[("user.first-name", "Ada")]);
        for _ in 0..3 {
            assert_eq!(render("Hi {{ user.first-name }}!", &vals), "Hi Ada!");
        }
        // Braces that do not form a key are left alone
        assert_eq!(render("{{ not a key }}", &vals), "{{ not a key }}");
    }

    #[test]
    fn text_without_placeholders_is_untouched() {
        assert_eq!(render("plain {text}", &BTreeMap::new()), "plain {text}");
    }

    #[test]
    fn builtins_can_be_overridden() {
        let merged = builtin_values("helper", &values(&[("date", "someday")]));
        assert_eq!(merged["name"], "helper");
        assert_eq!(merged["date"], "someday");
        assert!(merged.contains_key("datetime"));
    }

    #[test]
    fn renders_message_text_only() {
        let vals = values(&[("topic", "rust")]);
        let msg = render_message(&Message::system("Talk about {{ topic }}"), &vals);
        assert_eq!(msg, Message::system("Talk about rust"));

        let result = Message::tool_result("c1", serde_json::json!("{{ topic }}"));
        assert_eq!(render_message(&result, &vals), result);
    }
}
