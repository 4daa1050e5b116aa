//! Slash commands recognized at the start of a message.

use async_trait::async_trait;

/// A `/name args` prefix, before it is matched against the command table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    /// Lowercased, without the slash or any `@botname` suffix.
    pub name: String,
    pub args: String,
}

/// Split a trimmed body into command name and arguments.
#[must_use]
pub fn parse_command(body: &str) -> Option<ParsedCommand> {
    let rest = body.trim().strip_prefix('/')?;
    if rest.starts_with(char::is_whitespace) {
        return None;
    }
    let head = rest.split_whitespace().next()?;
    // Telegram appends the bot name in groups: /status@my_bot
    let name = head.split('@').next().unwrap_or(head).to_ascii_lowercase();
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return None;
    }
    Some(ParsedCommand {
        name,
        args: rest[head.len()..].trim().to_string(),
    })
}

/// The fixed command table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `/new`, `/reset`: drop the session and start over.
    New,
    /// `/stop`: cancel the in-flight turn.
    Stop,
    /// `/compact [instructions]`
    Compact(Option<String>),
    /// `/model [value]`: show or set the per-session model override.
    Model(Option<String>),
    Status,
}

impl Command {
    /// Match a parsed command against the table.
    #[must_use]
    pub fn from_parsed(parsed: &ParsedCommand) -> Option<Self> {
        let args = (!parsed.args.is_empty()).then(|| parsed.args.clone());
        Some(match parsed.name.as_str() {
            "new" | "reset" => Self::New,
            "stop" | "abort" => Self::Stop,
            "compact" => Self::Compact(args),
            "model" => Self::Model(args),
            "status" => Self::Status,
            _ => return None,
        })
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Stop => "stop",
            Self::Compact(_) => "compact",
            Self::Model(_) => "model",
            Self::Status => "status",
        }
    }
}

/// Expands unknown `/name` commands (skills) into a prompt body.
#[async_trait]
pub trait SkillResolver: Send + Sync {
    /// The body to run as a normal turn, or `None` if `name` is not a skill.
    async fn resolve(&self, name: &str, args: &str) -> anyhow::Result<Option<String>>;
}

/// What preprocessing decided to do with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Handle the command instead of running a turn.
    Run(Command),
    /// Run a turn with this (possibly expanded) body.
    Passthrough(String),
}

/// Resolve `body` into a command or the body to run.
pub async fn resolve_command(body: &str, skills: Option<&dyn SkillResolver>) -> anyhow::Result<CommandOutcome> {
    let Some(parsed) = parse_command(body) else {
        return Ok(CommandOutcome::Passthrough(body.to_string()));
    };
    if let Some(command) = Command::from_parsed(&parsed) {
        return Ok(CommandOutcome::Run(command));
    }
    if let Some(skills) = skills
        && let Some(expanded) = skills.resolve(&parsed.name, &parsed.args).await?
    {
        return Ok(CommandOutcome::Passthrough(expanded));
    }
    Ok(CommandOutcome::Passthrough(body.to_string()))
}
