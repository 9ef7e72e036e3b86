//! Bootstrap prompt composition.

use crate::models::turn::Turn;

/// Separator placed between prompt sections.
pub const SECTION_DELIMITER: &str = "\n\n---\n\n";

const GLOBAL_MEMORY_HEADER: &str = "Global memory shared by all assistants (read-only):";
const ASSISTANT_MEMORY_HEADER: &str = "Long-term memory for this assistant:";
const HISTORY_HEADER: &str = "Recent conversation history (oldest first):";

/// Inputs for a bootstrap prompt.
#[derive(Debug, Clone, Default)]
pub struct BootstrapContext<'a> {
    /// Memory shared across every assistant.
    pub global_memory: Option<&'a str>,
    /// Memory owned by the session's assistant.
    pub assistant_memory: Option<&'a str>,
    /// Most recent history entries, oldest first, already capped.
    pub history: &'a [Turn],
}

/// Compose the prompt sent when no valid continuation exists.
///
/// Sections appear as global memory, assistant memory, recent history, then
/// `message`. Empty sections are left out. `message` is appended exactly as
/// given, and the output depends only on the inputs.
#[must_use]
pub fn compose_bootstrap_prompt(context: &BootstrapContext<'_>, message: &str) -> String {
    let mut sections: Vec<String> = Vec::with_capacity(4);

    if let Some(memory) = non_blank(context.global_memory) {
        sections.push(format!("{GLOBAL_MEMORY_HEADER}\n\n{memory}"));
    }
    if let Some(memory) = non_blank(context.assistant_memory) {
        sections.push(format!("{ASSISTANT_MEMORY_HEADER}\n\n{memory}"));
    }
    if !context.history.is_empty() {
        let rendered: Vec<String> = context.history.iter().map(Turn::render).collect();
        sections.push(format!("{HISTORY_HEADER}\n\n{}", rendered.join("\n\n")));
    }
    sections.push(message.to_owned());

    sections.join(SECTION_DELIMITER)
}

fn non_blank(text: Option<&str>) -> Option<&str> {
    text.map(str::trim).filter(|t| !t.is_empty())
}
