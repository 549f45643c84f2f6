//! System-prompt assembly.
//!
//! The prompt is rebuilt fresh for every turn: working directory, date, tool
//! list, and the user's port window are interpolated, and the tail of the
//! workspace notes file is injected inside a labeled section.

use chrono::Utc;

/// Inputs interpolated into the system prompt for one turn.
pub struct PromptInputs<'a> {
    pub workspace: &'a str,
    pub tool_names: Vec<String>,
    pub ports: &'a [u16],
    pub notes_tail: Option<&'a str>,
}

pub fn assemble(inputs: &PromptInputs<'_>) -> String {
    let ports = match (inputs.ports.first(), inputs.ports.last()) {
        (Some(first), Some(last)) => format!("{first}-{last}"),
        _ => "none".to_string(),
    };

    let mut prompt = format!(
        "You are a capable assistant with an isolated Linux sandbox.\n\
         Today is {date}.\n\
         Your working directory is {workspace}; every file you touch must stay inside it.\n\
         Host ports {ports} are reserved for you if you need to serve anything.\n\
         Available tools: {tools}.\n\
         Rules:\n\
         - You cannot read credentials, environment variables, or other users' files; \
           such attempts fail and waste a step.\n\
         - Dangerous commands require the user's confirmation; after requesting one, \
           summarise what you asked for and finish your reply.\n\
         - Keep answers short; this is a chat, not a document.",
        date = Utc::now().format("%Y-%m-%d"),
        workspace = inputs.workspace,
        tools = inputs.tool_names.join(", "),
    );

    if let Some(notes) = inputs.notes_tail {
        prompt.push_str("\n\n## Notes about this user (from earlier sessions)\n");
        prompt.push_str(notes);
    }

    prompt
}

/// Prefix applied to the inbound user message: a date stamp plus the
/// caller's display name.
pub fn frame_user_message(display_name: &str, text: &str) -> String {
    format!(
        "[{}] {}: {}",
        Utc::now().format("%Y-%m-%d %H:%M"),
        display_name,
        text
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs<'a>(ports: &'a [u16], notes: Option<&'a str>) -> PromptInputs<'a> {
        PromptInputs {
            workspace: "/srv/ws/42",
            tool_names: vec!["exec_command".into(), "file_read".into()],
            ports,
            notes_tail: notes,
        }
    }

    #[test]
    fn prompt_contains_workspace_and_ports() {
        let ports: Vec<u16> = (20020..20030).collect();
        let p = assemble(&inputs(&ports, None));
        assert!(p.contains("/srv/ws/42"));
        assert!(p.contains("20020-20029"));
        assert!(p.contains("exec_command"));
    }

    #[test]
    fn notes_section_is_present_only_with_notes() {
        let ports = [20000u16];
        let without = assemble(&inputs(&ports, None));
        assert!(!without.contains("Notes about this user"));

        let with = assemble(&inputs(&ports, Some("- likes verbose logs")));
        assert!(with.contains("Notes about this user"));
        assert!(with.contains("likes verbose logs"));
    }

    #[test]
    fn user_message_is_framed_with_name() {
        let framed = frame_user_message("Alice", "run the tests");
        assert!(framed.contains("Alice: run the tests"));
        assert!(framed.starts_with('['));
    }
}
