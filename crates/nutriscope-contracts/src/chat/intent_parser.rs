use std::collections::BTreeMap;

use serde_json::Value;

use super::command_registry::{CommandSpec, NO_ARG_COMMANDS, RAW_ARG_COMMANDS, SINGLE_PATH_COMMANDS};

#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub action: String,
    pub command_args: BTreeMap<String, Value>,
}

impl Intent {
    fn new(action: &str) -> Self {
        Self {
            action: action.to_string(),
            command_args: BTreeMap::new(),
        }
    }

    fn with_arg(mut self, key: &str, value: String) -> Self {
        self.command_args
            .insert(key.to_string(), Value::String(value));
        self
    }

    pub fn arg(&self, key: &str) -> Option<&str> {
        self.command_args.get(key).and_then(Value::as_str)
    }
}

fn find_spec(command: &str, specs: &'static [CommandSpec]) -> Option<&'static CommandSpec> {
    specs.iter().find(|spec| spec.command == command)
}

fn parse_path_args(arg: &str) -> Vec<String> {
    if arg.trim().is_empty() {
        return Vec::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect(),
        Err(_) => arg
            .split_whitespace()
            .map(str::to_string)
            .filter(|value| !value.is_empty())
            .collect(),
    }
}

fn parse_single_path_arg(arg: &str) -> String {
    let parts = parse_path_args(arg);
    match parts.len() {
        0 => String::new(),
        1 => parts[0].clone(),
        _ => parts.join(" "),
    }
}

/// Parses one line typed into an interactive session.
///
/// Slash commands map to session actions; anything else replaces the notes.
pub fn parse_intent(text: &str) -> Intent {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return Intent::new("noop");
    }

    if let Some(slash_tail) = raw_trimmed.strip_prefix('/') {
        let command_len = slash_tail
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
            .count();
        if command_len > 0 {
            let command = slash_tail[..command_len].to_ascii_lowercase();
            let arg = slash_tail[command_len..].trim();

            if let Some(spec) = find_spec(&command, RAW_ARG_COMMANDS) {
                return Intent::new(spec.action).with_arg(spec.arg_key, arg.to_string());
            }

            if let Some(spec) = find_spec(&command, SINGLE_PATH_COMMANDS) {
                return Intent::new(spec.action)
                    .with_arg(spec.arg_key, parse_single_path_arg(arg));
            }

            if let Some(spec) = find_spec(&command, NO_ARG_COMMANDS) {
                return Intent::new(spec.action);
            }

            return Intent::new("unknown")
                .with_arg("command", command)
                .with_arg("arg", arg.to_string());
        }
    }

    Intent::new("set_notes").with_arg("notes", raw_trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::parse_intent;

    #[test]
    fn parse_image_paths() {
        let intent = parse_intent("/image lunch.jpg");
        assert_eq!(intent.action, "set_image");
        assert_eq!(intent.command_args["path"], json!("lunch.jpg"));

        let quoted = parse_intent("/image \"/tmp/my lunch.png\"");
        assert_eq!(quoted.arg("path"), Some("/tmp/my lunch.png"));

        let alias = parse_intent("/use plate.webp");
        assert_eq!(alias.action, "set_image");
    }

    #[test]
    fn parse_raw_argument_commands() {
        let notes = parse_intent("/notes Restaurant serving, extra sauce");
        assert_eq!(notes.action, "set_notes");
        assert_eq!(notes.arg("notes"), Some("Restaurant serving, extra sauce"));

        let goal = parse_intent("/goal weight-loss");
        assert_eq!(goal.action, "set_goal");
        assert_eq!(goal.arg("goal"), Some("weight-loss"));

        let model = parse_intent("/MODEL gemini-2.5-flash");
        assert_eq!(model.action, "set_model");
        assert_eq!(model.arg("model"), Some("gemini-2.5-flash"));
    }

    #[test]
    fn parse_save_with_and_without_path() {
        let bare = parse_intent("/save");
        assert_eq!(bare.action, "save");
        assert_eq!(bare.arg("path"), Some(""));

        let explicit = parse_intent("/save '/tmp/out dir/lunch.txt'");
        assert_eq!(explicit.arg("path"), Some("/tmp/out dir/lunch.txt"));
    }

    #[test]
    fn parse_no_arg_commands() {
        assert_eq!(parse_intent("/analyze").action, "analyze");
        assert_eq!(parse_intent("/show").action, "show");
        assert_eq!(parse_intent("/prompt").action, "show_prompt");
        assert_eq!(parse_intent("/clear").action, "clear");
        assert_eq!(parse_intent("/help").action, "help");
        assert_eq!(parse_intent("/quit").action, "quit");
        assert_eq!(parse_intent("/exit").action, "quit");
    }

    #[test]
    fn plain_text_becomes_notes() {
        let intent = parse_intent("  homemade pasta with olive oil  ");
        assert_eq!(intent.action, "set_notes");
        assert_eq!(intent.arg("notes"), Some("homemade pasta with olive oil"));
    }

    #[test]
    fn blank_line_is_noop() {
        assert_eq!(parse_intent("   ").action, "noop");
    }

    #[test]
    fn parse_unknown_command() {
        let intent = parse_intent("/magic foo bar");
        assert_eq!(intent.action, "unknown");
        assert_eq!(intent.command_args["command"], json!("magic"));
        assert_eq!(intent.command_args["arg"], json!("foo bar"));
    }
}
