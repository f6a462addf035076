use companion_client::{GeminiClient, TextGenerator};
use companion_config::CompanionConfig;
use companion_core::Message;
use companion_memory::UserProfile;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::fallback::FallbackResponder;
use crate::prompt::build_prompt;

/// Read-only snapshot of memory handed to the engine for one reply
#[derive(Debug, Clone, Default)]
pub struct ChatContext {
    pub profile: UserProfile,
    pub history: Vec<Message>,
}

impl ChatContext {
    pub fn new(profile: UserProfile, history: Vec<Message>) -> Self {
        Self { profile, history }
    }
}

/// Produces replies from the remote model, degrading to the local
/// fallback responder whenever the remote call does not yield text.
pub struct ConversationEngine {
    persona: String,
    generator: Option<Arc<dyn TextGenerator>>,
    fallback: FallbackResponder,
}

impl ConversationEngine {
    pub fn new(persona: impl Into<String>, generator: Arc<dyn TextGenerator>) -> Self {
        let persona = persona.into();
        Self {
            fallback: FallbackResponder::new(persona.clone()),
            persona,
            generator: Some(generator),
        }
    }

    /// An engine that never calls out and always answers from the fallback responder
    pub fn offline(persona: impl Into<String>) -> Self {
        let persona = persona.into();
        Self {
            fallback: FallbackResponder::new(persona.clone()),
            persona,
            generator: None,
        }
    }

    pub fn from_config(config: &CompanionConfig) -> Self {
        if config.is_offline() {
            info!("No API key configured, replies come from the fallback responder");
            return Self::offline(&config.persona.name);
        }

        match GeminiClient::new(&config.model) {
            Ok(client) => Self::new(&config.persona.name, Arc::new(client)),
            Err(e) => {
                warn!("Failed to create Gemini client, continuing offline: {}", e);
                Self::offline(&config.persona.name)
            }
        }
    }

    pub fn with_fallback(mut self, fallback: FallbackResponder) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn persona(&self) -> &str {
        &self.persona
    }

    pub fn is_offline(&self) -> bool {
        self.generator.is_none()
    }

    pub fn build_prompt(&self, context: &ChatContext) -> String {
        build_prompt(&self.persona, &context.profile, &context.history)
    }

    /// Reply to `utterance`. Never fails: any remote error resolves to a fallback reply.
    #[instrument(skip(self, utterance, context))]
    pub async fn send_message(&mut self, utterance: &str, context: &ChatContext) -> String {
        let Some(generator) = self.generator.clone() else {
            debug!("Offline, using fallback responder");
            return self.generate_fallback_reply(utterance, context);
        };

        let prompt = format!(
            "{}\n\nUser: {}\n\n{}:",
            self.build_prompt(context),
            utterance,
            self.persona
        );

        match generator.generate(&prompt).await {
            Ok(text) => {
                let reply = self.strip_speaker_label(&text);
                if reply.is_empty() {
                    warn!("Model returned an empty reply, using fallback responder");
                    return self.generate_fallback_reply(utterance, context);
                }
                reply
            }
            Err(e) => {
                warn!("Model unavailable, using fallback responder: {}", e);
                self.generate_fallback_reply(utterance, context)
            }
        }
    }

    pub fn generate_fallback_reply(&mut self, utterance: &str, context: &ChatContext) -> String {
        self.fallback.respond(utterance, &context.profile)
    }

    fn strip_speaker_label(&self, text: &str) -> String {
        let label = format!("{}:", self.persona);
        text.trim()
            .strip_prefix(&label)
            .unwrap_or(text.trim())
            .trim_start()
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fallback::{EMPATHY_REPLY, CANNED_OPENERS};
    use async_trait::async_trait;
    use companion_core::{CompanionError, Result};
    use mockall::mock;

    mock! {
        pub Generator {}

        #[async_trait]
        impl TextGenerator for Generator {
            async fn generate(&self, prompt: &str) -> Result<String>;
        }
    }

    fn failing_generator() -> MockGenerator {
        let mut generator = MockGenerator::new();
        generator
            .expect_generate()
            .times(1)
            .returning(|_| Err(CompanionError::TransportError("connection refused".into())));
        generator
    }

    #[tokio::test]
    async fn test_transport_failure_falls_back_to_empathy() {
        let mut engine = ConversationEngine::new("Alex", Arc::new(failing_generator()));
        let reply = engine
            .send_message("I'm feeling sad today", &ChatContext::default())
            .await;
        assert_eq!(reply, EMPATHY_REPLY);
    }

    #[tokio::test]
    async fn test_api_and_malformed_errors_fall_back() {
        let mut generator = MockGenerator::new();
        let mut calls = 0;
        generator.expect_generate().times(2).returning(move |_| {
            calls += 1;
            if calls == 1 {
                Err(CompanionError::ApiError { status: 503, body: "unavailable".into() })
            } else {
                Err(CompanionError::MalformedResponse("no candidates".into()))
            }
        });

        let mut engine = ConversationEngine::new("Alex", Arc::new(generator));
        let context = ChatContext::default();
        let first = engine.send_message("tell me something", &context).await;
        let second = engine.send_message("tell me something", &context).await;

        assert_eq!(first, CANNED_OPENERS[0].replace("{persona}", "Alex"));
        assert_eq!(second, CANNED_OPENERS[1]);
    }

    #[tokio::test]
    async fn test_success_strips_echoed_label() {
        let mut generator = MockGenerator::new();
        generator
            .expect_generate()
            .withf(|prompt| {
                prompt.contains("- User's name: Sam")
                    && prompt.ends_with("\n\nUser: how are things?\n\nAlex:")
            })
            .times(1)
            .returning(|_| Ok("Alex: Things are good, Sam!".to_string()));

        let context = ChatContext::new(
            UserProfile {
                name: Some("Sam".into()),
                ..Default::default()
            },
            vec![Message::user("hi"), Message::assistant("hello Sam")],
        );

        let mut engine = ConversationEngine::new("Alex", Arc::new(generator));
        let reply = engine.send_message("how are things?", &context).await;
        assert_eq!(reply, "Things are good, Sam!");
    }

    #[tokio::test]
    async fn test_reply_without_label_is_untouched() {
        let mut generator = MockGenerator::new();
        generator
            .expect_generate()
            .returning(|_| Ok("Alexandra is a lovely name: tell me more.".to_string()));

        let mut engine = ConversationEngine::new("Alex", Arc::new(generator));
        let reply = engine.send_message("hi", &ChatContext::default()).await;
        assert_eq!(reply, "Alexandra is a lovely name: tell me more.");
    }

    #[tokio::test]
    async fn test_blank_reply_falls_back_to_opener() {
        let mut generator = MockGenerator::new();
        generator
            .expect_generate()
            .times(1)
            .returning(|_| Ok("Alex:   ".to_string()));

        let mut engine = ConversationEngine::new("Alex", Arc::new(generator))
            .with_fallback(FallbackResponder::with_seed("Alex", 7));
        let reply = engine.send_message("what's new?", &ChatContext::default()).await;
        assert_eq!(reply, CANNED_OPENERS[0].replace("{persona}", "Alex"));
    }

    #[tokio::test]
    async fn test_offline_engine_uses_fallback() {
        let mut engine = ConversationEngine::offline("Robin")
            .with_fallback(FallbackResponder::with_seed("Robin", 1));
        assert!(engine.is_offline());

        let reply = engine.send_message("hello", &ChatContext::default()).await;
        assert_eq!(reply, "Hi there! I'm Robin, your AI companion. What's your name?");
    }

    #[test]
    fn test_from_config_without_key_is_offline() {
        let mut config = CompanionConfig::default();
        config.model.api_key.clear();
        assert!(ConversationEngine::from_config(&config).is_offline());

        config.model.api_key = "key".into();
        assert!(!ConversationEngine::from_config(&config).is_offline());
    }
}
