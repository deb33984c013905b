//! Slash commands for interactive mode

use haven_ai::Message;

use crate::utils::truncate_chars;

/// Result of executing a slash command
#[derive(Debug, PartialEq)]
pub enum CommandResult {
    /// Start a fresh conversation
    Reset,
    /// Print the transcript
    History,
    /// Show a message to the user (not sent to the model)
    Message(String),
    /// Exit the application
    Exit,
    /// Unknown command
    Unknown(String),
}

/// Parse and execute a slash command
pub fn execute_command(input: &str) -> Option<CommandResult> {
    let input = input.trim();

    let rest = input.strip_prefix('/')?;
    let command = rest.split_whitespace().next().unwrap_or("").to_lowercase();

    Some(match command.as_str() {
        "help" | "h" | "?" => CommandResult::Message(help_message()),

        "reset" | "clear" | "c" => CommandResult::Reset,

        "history" => CommandResult::History,

        "quit" | "exit" | "q" => CommandResult::Exit,

        _ => CommandResult::Unknown(command),
    })
}

/// One line per message: index, role and a short preview
pub fn format_history(messages: &[Message]) -> String {
    messages
        .iter()
        .enumerate()
        .map(|(i, msg)| {
            let text = match msg.text() {
                t if t.is_empty() => summarize_parts(msg),
                t => t,
            };
            let preview = truncate_chars(&text, 60).replace('\n', " ");
            format!("  {}: [{}] {}", i, msg.role.as_str(), preview)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn summarize_parts(msg: &Message) -> String {
    let calls = msg.tool_calls();
    if !calls.is_empty() {
        let names: Vec<&str> = calls.iter().map(|(_, name, _)| *name).collect();
        return format!("(calls {})", names.join(", "));
    }
    format!("({} part(s))", msg.content.len())
}

fn help_message() -> String {
    r#"Available commands:
  /help, /h, /?        Show this help message
  /reset, /clear, /c   Start a fresh conversation
  /history             Show the conversation so far
  /quit, /exit, /q     Exit haven

Press Ctrl-C while an answer is streaming to stop it; the partial answer is kept."#
        .to_string()
}
