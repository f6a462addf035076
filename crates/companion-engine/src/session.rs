use companion_core::Message;
use companion_memory::{MemoryStore, ProfileUpdate, UserProfile};
use tracing::{debug, info};

use crate::engine::{ChatContext, ConversationEngine};
use crate::fallback::extract_name;

/// One chat window: the visible transcript plus the memory and engine behind it
pub struct ChatSession {
    memory: MemoryStore,
    engine: ConversationEngine,
    /// Stored exchanges from earlier chats, quoted ahead of the transcript
    recalled: Vec<Message>,
    transcript: Vec<Message>,
    context_limit: usize,
}

impl ChatSession {
    pub fn new(memory: MemoryStore, engine: ConversationEngine, context_limit: usize) -> Self {
        let mut session = Self {
            memory,
            engine,
            recalled: Vec::new(),
            transcript: Vec::new(),
            context_limit,
        };
        session.recall();
        session
    }

    /// Refill the recalled messages from the most recent stored exchanges
    fn recall(&mut self) {
        self.recalled = self
            .memory
            .get_recent_context(self.context_limit)
            .iter()
            .flat_map(|entry| entry.to_messages())
            .collect();
        debug!("Recalled {} stored messages", self.recalled.len());
    }

    /// Messages handed to the engine: recalled history, then the transcript
    fn context_messages(&self) -> Vec<Message> {
        let messages: Vec<Message> = self
            .recalled
            .iter()
            .chain(self.transcript.iter())
            .cloned()
            .collect();
        let start = messages.len().saturating_sub(self.context_limit);
        messages[start..].to_vec()
    }

    pub fn greeting(&self) -> String {
        match &self.memory.profile().name {
            Some(name) => format!("Hey {name}! Great to see you again. What's on your mind today?"),
            None => format!(
                "Hey there! I'm {}, your AI companion. I'm here to chat, help, and remember what matters to you. What's your name?",
                self.engine.persona()
            ),
        }
    }

    /// Reset the transcript to the greeting
    pub fn start(&mut self) -> &Message {
        self.recall();
        let greeting = Message::assistant(self.greeting());
        self.transcript = vec![greeting];
        &self.transcript[0]
    }

    /// Start over with a welcome-back line; memory is kept
    pub fn new_chat(&mut self) -> &Message {
        self.recall();
        let name = self.memory.profile().name.as_deref().unwrap_or("friend");
        let welcome = Message::assistant(format!(
            "Welcome back, {name}! Ready for another conversation?"
        ));
        self.transcript = vec![welcome];
        &self.transcript[0]
    }

    /// Handle one line of user input. Blank input is ignored.
    pub async fn send(&mut self, text: &str) -> Option<Message> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        // Snapshot before this turn touches memory or the transcript
        let context = ChatContext::new(self.memory.profile().clone(), self.context_messages());

        self.transcript.push(Message::user(text));

        if self.memory.profile().name.is_none() {
            if let Some(name) = extract_name(text) {
                info!("Learned user's name: {}", name);
                self.memory.update_profile(ProfileUpdate::name(name));
            }
        }

        let reply = self.engine.send_message(text, &context).await;
        let message = Message::assistant(reply);
        self.transcript.push(message.clone());

        self.memory.add_to_history(text, &message.content);
        debug!("Transcript now has {} messages", self.transcript.len());

        Some(message)
    }

    pub fn remember_preference(&mut self, preference: &str) {
        let preference = preference.trim();
        if !preference.is_empty() {
            self.memory.add_preference(preference);
        }
    }

    pub fn clear_memory(&mut self) {
        self.memory.clear();
        self.recalled.clear();
    }

    pub fn profile(&self) -> &UserProfile {
        self.memory.profile()
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    pub fn engine(&self) -> &ConversationEngine {
        &self.engine
    }

    pub fn transcript(&self) -> &[Message] {
        &self.transcript
    }
}
