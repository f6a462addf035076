pub mod prompt;
pub mod fallback;
pub mod engine;
pub mod session;

pub use prompt::{build_prompt, PROMPT_HISTORY_LIMIT};
pub use fallback::{extract_name, FallbackResponder, CANNED_OPENERS};
pub use engine::{ChatContext, ConversationEngine};
pub use session::ChatSession;
