#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
}

/// Commands whose single argument is a menu item identifier.
pub(crate) const KEY_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "dish",
        action: "generate_image",
    },
    CommandSpec {
        command: "regenerate",
        action: "generate_image",
    },
    CommandSpec {
        command: "save",
        action: "save_image",
    },
];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "help",
        action: "help",
    },
    CommandSpec {
        command: "key",
        action: "acquire_credential",
    },
    CommandSpec {
        command: "status",
        action: "status",
    },
    CommandSpec {
        command: "history",
        action: "history",
    },
    CommandSpec {
        command: "quit",
        action: "quit",
    },
    CommandSpec {
        command: "exit",
        action: "quit",
    },
];

pub(crate) const MENU_COMMAND: CommandSpec = CommandSpec {
    command: "menu",
    action: "list_menu",
};

pub(crate) const RECOMMEND_COMMAND: CommandSpec = CommandSpec {
    command: "recommend",
    action: "recommend",
};

pub const CHAT_HELP_COMMANDS: &[&str] = &[
    "/help",
    "/menu [category] [query]",
    "/dish <id>",
    "/regenerate <id>",
    "/save <id>",
    "/key",
    "/status",
    "/recommend <mood> | <preferences>",
    "/history",
    "/quit",
];
