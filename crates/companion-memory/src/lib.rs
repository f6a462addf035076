pub mod storage;
pub mod profile;
pub mod store;

pub use storage::{FileStore, InMemoryStore, KeyValueStore, HISTORY_KEY, PROFILE_KEY};
pub use profile::{ConversationEntry, Personality, ProfileUpdate, Tone, UserProfile};
pub use store::{MemoryStore, DEFAULT_CONTEXT_LIMIT, MAX_HISTORY_ENTRIES};
