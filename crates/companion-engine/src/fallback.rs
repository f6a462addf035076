use companion_memory::UserProfile;
use once_cell::sync::Lazy;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::Regex;
use tracing::debug;

// "name is", "I'm" or "call me", then a capitalized word
static NAME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i:name is|i'm|i’m|call me)\s+([A-Z][a-zA-Z]*)").expect("Invalid regex pattern")
});

/// Canned openers served in order while nothing more specific applies.
/// `{persona}` is replaced with the assistant's name.
pub const CANNED_OPENERS: [&str; 10] = [
    "Hi there! I'm {persona}, your AI companion. What's your name?",
    "Nice to meet you! I'll remember that. What are some things you enjoy doing?",
    "That's awesome! I love learning about people's interests. I'll remember you're into that.",
    "I can already tell we're going to have great conversations! Is there anything on your mind today?",
    "I notice you seem more casual in your communication style - I like that! What's been the highlight of your week?",
    "That sounds really interesting! You know, I was just thinking about what you mentioned earlier. How did that turn out?",
    "I can sense you might be feeling a bit different today. Want to talk about it?",
    "Based on our conversations, I think you might enjoy this perspective on things...",
    "You know what I appreciate about you? The way you express yourself. It makes our chats feel really genuine.",
    "I've been thinking about our previous conversations - you have such an interesting way of looking at things!",
];

pub const AI_IDENTITY_REPLY: &str = "Yes, I'm {persona} - an AI companion, but I prefer to think of myself as your digital friend who's here to chat and get to know you better!";

pub const EMPATHY_REPLY: &str = "I can hear that you're going through a tough time. I'm here to listen if you want to talk about it. Sometimes it helps just to have someone who cares.";

pub const ENTHUSIASM_REPLY: &str = "That's wonderful to hear! Your positive energy is contagious. I love when people share good news with me - it genuinely makes my day better too.";

const FAMILIARITY_THRESHOLD: u32 = 3;

/// Find the name a user introduces themselves with, if any
pub fn extract_name(text: &str) -> Option<String> {
    NAME_REGEX
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Rule-based stand-in for the remote model.
///
/// Owns the rotation index over [`CANNED_OPENERS`] and the random source for
/// familiarity replies; both live as long as the responder does.
pub struct FallbackResponder {
    persona: String,
    response_index: usize,
    rng: StdRng,
}

impl FallbackResponder {
    pub fn new(persona: impl Into<String>) -> Self {
        Self {
            persona: persona.into(),
            response_index: 0,
            rng: StdRng::from_os_rng(),
        }
    }

    /// Deterministic familiarity picks, for tests and reproducible sessions
    pub fn with_seed(persona: impl Into<String>, seed: u64) -> Self {
        Self {
            persona: persona.into(),
            response_index: 0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn reset(&mut self) {
        self.response_index = 0;
    }

    pub fn response_index(&self) -> usize {
        self.response_index
    }

    /// First matching rule wins: introduction, AI question, negative mood,
    /// positive mood, familiarity, then the next canned opener.
    pub fn respond(&mut self, utterance: &str, profile: &UserProfile) -> String {
        let lower = utterance.to_lowercase();

        if profile.name.is_none() {
            if let Some(name) = extract_name(utterance) {
                debug!("Fallback: introduction from {}", name);
                return format!("Great to meet you, {name}! I'll remember that. What brings you here today?");
            }
        }

        if lower.contains("are you")
            && (lower.contains("ai") || lower.contains("bot") || lower.contains("robot"))
        {
            return self.personalize(AI_IDENTITY_REPLY);
        }

        if ["sad", "down", "upset"].iter().any(|word| lower.contains(word)) {
            return EMPATHY_REPLY.to_string();
        }

        if ["happy", "great", "awesome"].iter().any(|word| lower.contains(word)) {
            return ENTHUSIASM_REPLY.to_string();
        }

        if profile.conversation_count > FAMILIARITY_THRESHOLD {
            let friend = profile.name.as_deref().unwrap_or("friend");
            let replies = [
                format!("You know, {friend}, I've really enjoyed our conversations so far. You always bring such interesting perspectives!"),
                "I was actually thinking about something you mentioned in one of our earlier chats. It really stuck with me.".to_string(),
                "It's nice having someone I can have real conversations with. You feel like a genuine friend already.".to_string(),
            ];
            let pick = self.rng.random_range(0..replies.len());
            return replies[pick].clone();
        }

        let opener = CANNED_OPENERS[self.response_index % CANNED_OPENERS.len()];
        self.response_index += 1;
        self.personalize(opener)
    }

    fn personalize(&self, template: &str) -> String {
        template.replace("{persona}", &self.persona)
    }
}
