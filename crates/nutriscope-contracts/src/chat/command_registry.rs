#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
    pub arg_key: &'static str,
}

pub(crate) const RAW_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "notes",
        action: "set_notes",
        arg_key: "notes",
    },
    CommandSpec {
        command: "goal",
        action: "set_goal",
        arg_key: "goal",
    },
    CommandSpec {
        command: "model",
        action: "set_model",
        arg_key: "model",
    },
];

pub(crate) const SINGLE_PATH_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "image",
        action: "set_image",
        arg_key: "path",
    },
    CommandSpec {
        command: "use",
        action: "set_image",
        arg_key: "path",
    },
    CommandSpec {
        command: "save",
        action: "save",
        arg_key: "path",
    },
];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "analyze",
        action: "analyze",
        arg_key: "",
    },
    CommandSpec {
        command: "show",
        action: "show",
        arg_key: "",
    },
    CommandSpec {
        command: "prompt",
        action: "show_prompt",
        arg_key: "",
    },
    CommandSpec {
        command: "clear",
        action: "clear",
        arg_key: "",
    },
    CommandSpec {
        command: "help",
        action: "help",
        arg_key: "",
    },
    CommandSpec {
        command: "quit",
        action: "quit",
        arg_key: "",
    },
    CommandSpec {
        command: "exit",
        action: "quit",
        arg_key: "",
    },
];

pub const SESSION_HELP_COMMANDS: &[&str] = &[
    "/image <path>",
    "/notes <text>",
    "/goal <general|weight-loss|muscle-gain|maintenance>",
    "/model <name>",
    "/analyze",
    "/show",
    "/prompt",
    "/save [path]",
    "/clear",
    "/help",
    "/quit",
];
