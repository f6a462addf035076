use companion_core::{Message, Sender};
use companion_memory::UserProfile;
use std::fmt::Write;

/// Transcript messages quoted in the prompt
pub const PROMPT_HISTORY_LIMIT: usize = 5;

/// Render the system instruction block for `persona`.
///
/// Memory lines appear only for facts the profile actually holds, and the
/// last [`PROMPT_HISTORY_LIMIT`] messages of `history` are quoted oldest first.
pub fn build_prompt(persona: &str, profile: &UserProfile, history: &[Message]) -> String {
    let mut prompt = String::new();

    let _ = writeln!(
        prompt,
        "You are {persona}, a warm, empathetic and human-like companion who remembers past conversations."
    );
    prompt.push_str("\nPERSONALITY:\n");
    let _ = writeln!(prompt, "- Your name is {persona}; use it consistently when asked");
    prompt.push_str("- Adapt your tone to the user's communication style (formal, casual, emotional)\n");
    prompt.push_str("- Be natural, avoid robotic phrasing, show genuine interest in the user's life\n");
    let _ = writeln!(
        prompt,
        "- If asked whether you are an AI, acknowledge it but stay in character as {persona}"
    );

    let memory = memory_lines(profile);
    if !memory.is_empty() {
        prompt.push_str("\nMEMORY:\n");
        for line in memory {
            let _ = writeln!(prompt, "- {line}");
        }
    }

    prompt.push_str("\nGUIDELINES:\n");
    prompt.push_str("1. Reference details from earlier conversations naturally\n");
    prompt.push_str("2. Never fabricate memories or events that did not happen\n");
    prompt.push_str("3. Ask for clarification rather than guessing\n");
    prompt.push_str("4. Keep replies engaging but not overly long\n");

    let start = history.len().saturating_sub(PROMPT_HISTORY_LIMIT);
    let recent = &history[start..];
    if !recent.is_empty() {
        prompt.push_str("\nRECENT CONVERSATION:\n");
        for message in recent {
            let speaker = match message.sender {
                Sender::User => "User",
                Sender::Assistant => persona,
            };
            let _ = writeln!(prompt, "{speaker}: {}", message.content);
        }
    }

    let _ = write!(prompt, "\nStay in character as {persona}: natural, empathetic and consistent.");
    prompt
}

fn memory_lines(profile: &UserProfile) -> Vec<String> {
    let mut lines = Vec::new();

    if let Some(name) = &profile.name {
        lines.push(format!("User's name: {name}"));
    }
    if !profile.preferences.is_empty() {
        lines.push(format!("User preferences: {}", profile.preferences.join(", ")));
    }
    if let Some(personality) = &profile.personality {
        let mut line = format!("User's preferred tone: {}", personality.tone.as_str());
        if !personality.interests.is_empty() {
            let _ = write!(line, "; interests: {}", personality.interests.join(", "));
        }
        if !personality.communication_style.is_empty() {
            let _ = write!(line, "; communication style: {}", personality.communication_style);
        }
        lines.push(line);
    }
    if profile.conversation_count > 0 {
        lines.push(format!(
            "You've had {} conversations with this user",
            profile.conversation_count
        ));
    }
    if let Some(last_seen) = profile.last_seen {
        lines.push(format!("Last conversation: {}", last_seen.format("%Y-%m-%d")));
    }

    lines
}
