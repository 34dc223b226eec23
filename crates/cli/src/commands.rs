//! Slash commands typed into the input line.

pub const HELP: &str = "**Commands**

- `/help` show this list
- `/status` provider, model, database and loop settings
- `/beliefs` what has been verified so far
- `/clear` clear the transcript and forget beliefs
- `/db <postgres-url>` connect to a database (resets beliefs)
- `/models [provider [model]]` list known models or switch backend

Anything else is a question. `list schemas`, `show tables` and
`describe <table>` are answered directly from the database.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlashCommand {
    Help,
    Status,
    Beliefs,
    Clear,
    Db(Option<String>),
    Models { provider: Option<String>, model: Option<String> },
    Unknown(String),
}

/// `None` when `input` is not a slash command.
pub fn parse(input: &str) -> Option<SlashCommand> {
    let rest = input.trim().strip_prefix('/')?;
    let mut parts = rest.split_whitespace();
    let name = parts.next().unwrap_or_default().to_lowercase();
    let arg = |p: Option<&str>| p.map(str::to_owned);
    let cmd = match name.as_str() {
        "help" | "h" | "?" => SlashCommand::Help,
        "status" => SlashCommand::Status,
        "beliefs" => SlashCommand::Beliefs,
        "clear" => SlashCommand::Clear,
        "db" | "connect" => SlashCommand::Db(arg(parts.next())),
        "models" | "model" => SlashCommand::Models {
            provider: arg(parts.next()),
            model: arg(parts.next()),
        },
        _ => SlashCommand::Unknown(name),
    };
    Some(cmd)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_not_a_command() {
        assert_eq!(parse("how many users"), None);
    }

    #[test]
    fn commands_with_arguments() {
        assert_eq!(
            parse("/db postgres://me@localhost/shop"),
            Some(SlashCommand::Db(Some("postgres://me@localhost/shop".into())))
        );
        assert_eq!(parse("/db"), Some(SlashCommand::Db(None)));
        assert_eq!(
            parse("  /models anthropic claude-3-5-haiku-20241022 "),
            Some(SlashCommand::Models {
                provider: Some("anthropic".into()),
                model: Some("claude-3-5-haiku-20241022".into()),
            })
        );
        assert_eq!(parse("/Beliefs"), Some(SlashCommand::Beliefs));
    }

    #[test]
    fn unknown_commands_are_kept() {
        assert_eq!(parse("/frobnicate"), Some(SlashCommand::Unknown("frobnicate".into())));
        assert_eq!(parse("/"), Some(SlashCommand::Unknown(String::new())));
    }
}
