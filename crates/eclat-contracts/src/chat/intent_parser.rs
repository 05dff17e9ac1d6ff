use std::collections::BTreeMap;

use serde_json::Value;

use super::command_registry::{
    CommandSpec, KEY_ARG_COMMANDS, MENU_COMMAND, NO_ARG_COMMANDS, RECOMMEND_COMMAND,
};
use crate::menu::Category;

#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub action: String,
    pub raw: String,
    pub message: Option<String>,
    pub command_args: BTreeMap<String, Value>,
}

impl Intent {
    fn new(action: &str, raw: &str) -> Self {
        Self {
            action: action.to_string(),
            raw: raw.to_string(),
            message: None,
            command_args: BTreeMap::new(),
        }
    }

    fn with_arg(mut self, key: &str, value: Value) -> Self {
        self.command_args.insert(key.to_string(), value);
        self
    }

    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.command_args
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

fn find_action(command: &str, specs: &[CommandSpec]) -> Option<&'static str> {
    specs
        .iter()
        .find(|spec| spec.command == command)
        .map(|spec| spec.action)
}

fn split_words(arg: &str) -> Vec<String> {
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect(),
        Err(_) => arg.split_whitespace().map(str::to_string).collect(),
    }
}

/// `/menu mains homard` → category `Mains`, query `homard`. A leading word
/// that is not a category name is part of the query.
fn parse_menu_args(arg: &str) -> (Option<Category>, String) {
    let words = split_words(arg);
    let Some(first) = words.first() else {
        return (None, String::new());
    };
    match Category::parse(first) {
        Some(category) => (Some(category), words[1..].join(" ")),
        None => (None, words.join(" ")),
    }
}

fn parse_recommend_args(arg: &str) -> (String, String) {
    match arg.split_once('|') {
        Some((mood, prefs)) => (mood.trim().to_string(), prefs.trim().to_string()),
        None => (arg.trim().to_string(), String::new()),
    }
}

pub fn parse_intent(text: &str) -> Intent {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return Intent::new("noop", text);
    }

    if let Some(slash_tail) = raw_trimmed.strip_prefix('/') {
        let command_len = slash_tail
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
            .count();
        if command_len > 0 {
            let command = slash_tail[..command_len].to_ascii_lowercase();
            let arg = slash_tail[command_len..].trim();

            if let Some(action) = find_action(&command, KEY_ARG_COMMANDS) {
                let key = split_words(arg).into_iter().next().unwrap_or_default();
                return Intent::new(action, text).with_arg("key", Value::String(key));
            }

            if let Some(action) = find_action(&command, NO_ARG_COMMANDS) {
                return Intent::new(action, text);
            }

            if command == MENU_COMMAND.command {
                let (category, query) = parse_menu_args(arg);
                return Intent::new(MENU_COMMAND.action, text)
                    .with_arg(
                        "category",
                        category
                            .map(|value| Value::String(value.as_str().to_string()))
                            .unwrap_or(Value::Null),
                    )
                    .with_arg("query", Value::String(query));
            }

            if command == RECOMMEND_COMMAND.command {
                let (mood, prefs) = parse_recommend_args(arg);
                return Intent::new(RECOMMEND_COMMAND.action, text)
                    .with_arg("mood", Value::String(mood))
                    .with_arg("prefs", Value::String(prefs));
            }

            return Intent::new("unknown", text)
                .with_arg("command", Value::String(command))
                .with_arg("arg", Value::String(arg.to_string()));
        }
    }

    let mut intent = Intent::new("chat", text);
    intent.message = Some(raw_trimmed.to_string());
    intent
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::parse_intent;

    #[test]
    fn blank_input_is_noop() {
        assert_eq!(parse_intent("   ").action, "noop");
        assert_eq!(parse_intent("").action, "noop");
    }

    #[test]
    fn plain_text_is_chat_message() {
        let intent = parse_intent("  Proposez-vous des accords mets-vins ?  ");
        assert_eq!(intent.action, "chat");
        assert_eq!(
            intent.message.as_deref(),
            Some("Proposez-vous des accords mets-vins ?")
        );
    }

    #[test]
    fn dish_commands_take_the_item_key() {
        let dish = parse_intent("/dish dish-7");
        assert_eq!(dish.action, "generate_image");
        assert_eq!(dish.arg_str("key"), Some("dish-7"));

        let regenerate = parse_intent("/REGENERATE dish-2 extra");
        assert_eq!(regenerate.action, "generate_image");
        assert_eq!(regenerate.arg_str("key"), Some("dish-2"));

        let save = parse_intent("/save \"dish-3\"");
        assert_eq!(save.action, "save_image");
        assert_eq!(save.arg_str("key"), Some("dish-3"));

        assert_eq!(parse_intent("/dish").arg_str("key"), None);
    }

    #[test]
    fn no_arg_commands() {
        assert_eq!(parse_intent("/key").action, "acquire_credential");
        assert_eq!(parse_intent("/status").action, "status");
        assert_eq!(parse_intent("/history").action, "history");
        assert_eq!(parse_intent("/exit").action, "quit");
        assert_eq!(parse_intent("/help").action, "help");
    }

    #[test]
    fn menu_command_splits_category_and_query() {
        let intent = parse_intent("/menu mains homard bleu");
        assert_eq!(intent.action, "list_menu");
        assert_eq!(intent.command_args["category"], json!("Mains"));
        assert_eq!(intent.command_args["query"], json!("homard bleu"));

        let query_only = parse_intent("/menu truffe");
        assert_eq!(query_only.command_args["category"], Value::Null);
        assert_eq!(query_only.command_args["query"], json!("truffe"));
    }

    #[test]
    fn recommend_splits_on_pipe() {
        let intent = parse_intent("/recommend nostalgique | sans gluten");
        assert_eq!(intent.action, "recommend");
        assert_eq!(intent.arg_str("mood"), Some("nostalgique"));
        assert_eq!(intent.arg_str("prefs"), Some("sans gluten"));

        let mood_only = parse_intent("/recommend joyeux");
        assert_eq!(mood_only.arg_str("mood"), Some("joyeux"));
        assert_eq!(mood_only.arg_str("prefs"), None);
    }

    #[test]
    fn unknown_command_keeps_raw_argument() {
        let intent = parse_intent("/reserve 20h pour deux");
        assert_eq!(intent.action, "unknown");
        assert_eq!(intent.command_args["command"], json!("reserve"));
        assert_eq!(intent.command_args["arg"], json!("20h pour deux"));
    }
}
