use chrono::Utc;
use companion_core::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::profile::{ConversationEntry, ProfileUpdate, UserProfile};
use crate::storage::{KeyValueStore, HISTORY_KEY, PROFILE_KEY};

/// Oldest entries are evicted past this many exchanges
pub const MAX_HISTORY_ENTRIES: usize = 50;

/// Default slice size for `get_recent_context`
pub const DEFAULT_CONTEXT_LIMIT: usize = 10;

/// Owns the user profile and conversation history and writes every change through
/// to durable storage. Storage failures are logged and never surface to callers.
pub struct MemoryStore {
    storage: Box<dyn KeyValueStore>,
    profile: UserProfile,
    history: Vec<ConversationEntry>,
}

impl MemoryStore {
    /// Load both records; absent or unreadable records start out empty
    pub fn load(storage: impl KeyValueStore + 'static) -> Self {
        let profile: UserProfile = Self::load_record(&storage, PROFILE_KEY);
        let mut history: Vec<ConversationEntry> = Self::load_record(&storage, HISTORY_KEY);

        if history.len() > MAX_HISTORY_ENTRIES {
            let excess = history.len() - MAX_HISTORY_ENTRIES;
            history.drain(..excess);
        }

        info!(
            "Loaded memory: name={:?}, conversations={}, history={}",
            profile.name,
            profile.conversation_count,
            history.len()
        );

        Self {
            storage: Box::new(storage),
            profile,
            history,
        }
    }

    fn load_record<T: DeserializeOwned + Default>(storage: &dyn KeyValueStore, key: &str) -> T {
        match storage.get(key) {
            Ok(Some(json)) => match serde_json::from_str(&json) {
                Ok(value) => value,
                Err(e) => {
                    warn!("Ignoring corrupt record {}: {}", key, e);
                    T::default()
                }
            },
            Ok(None) => {
                debug!("No stored record for {}", key);
                T::default()
            }
            Err(e) => {
                error!("Error loading record {}: {}", key, e);
                T::default()
            }
        }
    }

    pub fn profile(&self) -> &UserProfile {
        &self.profile
    }

    pub fn history(&self) -> &[ConversationEntry] {
        &self.history
    }

    /// Merge `update` into the profile and stamp last-seen.
    /// The conversation count grows by one only when a name is set for the first time.
    pub fn update_profile(&mut self, update: ProfileUpdate) {
        let first_name = self.profile.name.is_none() && update.name.is_some();

        if let Some(name) = update.name {
            self.profile.name = Some(name);
        }
        if let Some(preferences) = update.preferences {
            self.profile.preferences.clear();
            for preference in preferences {
                if !self.profile.preferences.contains(&preference) {
                    self.profile.preferences.push(preference);
                }
            }
        }
        if let Some(personality) = update.personality {
            self.profile.personality = Some(personality);
        }

        if first_name {
            self.profile.conversation_count += 1;
        }
        self.profile.last_seen = Some(Utc::now());

        self.save_profile();
    }

    pub fn add_preference(&mut self, preference: impl Into<String>) {
        let preference = preference.into();
        if self.profile.preferences.contains(&preference) {
            debug!("Preference already known: {}", preference);
            return;
        }

        self.profile.preferences.push(preference);
        self.save_profile();
    }

    pub fn add_to_history(
        &mut self,
        user_message: impl Into<String>,
        assistant_response: impl Into<String>,
    ) {
        self.history.push(ConversationEntry::new(user_message, assistant_response));
        if self.history.len() > MAX_HISTORY_ENTRIES {
            let excess = self.history.len() - MAX_HISTORY_ENTRIES;
            self.history.drain(..excess);
        }

        self.profile.conversation_count += 1;
        self.profile.last_seen = Some(Utc::now());

        self.save_history();
        self.save_profile();
    }

    /// The most recent `limit` entries, oldest first
    pub fn get_recent_context(&self, limit: usize) -> &[ConversationEntry] {
        let start = self.history.len().saturating_sub(limit);
        &self.history[start..]
    }

    pub fn get_preferences_context(&self) -> String {
        if self.profile.preferences.is_empty() {
            return String::new();
        }
        format!("User preferences: {}", self.profile.preferences.join(", "))
    }

    /// Forget everything, in memory and in storage
    pub fn clear(&mut self) {
        self.profile = UserProfile::default();
        self.history.clear();

        for key in [PROFILE_KEY, HISTORY_KEY] {
            if let Err(e) = self.storage.remove(key) {
                error!("Error removing record {}: {}", key, e);
            }
        }
        info!("Cleared chat memory");
    }

    fn save_profile(&self) {
        if let Err(e) = self.persist(PROFILE_KEY, &self.profile) {
            error!("Error saving user profile: {}", e);
        }
    }

    fn save_history(&self) {
        if let Err(e) = self.persist(HISTORY_KEY, &self.history) {
            error!("Error saving conversation history: {}", e);
        }
    }

    fn persist<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string(value)?;
        self.storage.set(key, &json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{Personality, Tone};
    use crate::storage::{FileStore, InMemoryStore};
    use companion_core::CompanionError;
    use tempfile::TempDir;

    struct ReadOnlyStore;

    impl KeyValueStore for ReadOnlyStore {
        fn get(&self, _key: &str) -> Result<Option<String>> {
            Ok(None)
        }

        fn set(&self, _key: &str, _value: &str) -> Result<()> {
            Err(CompanionError::StorageError("quota exceeded".into()))
        }

        fn remove(&self, _key: &str) -> Result<()> {
            Err(CompanionError::StorageError("quota exceeded".into()))
        }
    }

    #[test]
    fn test_load_empty_storage() {
        let store = MemoryStore::load(InMemoryStore::new());
        assert_eq!(store.profile(), &UserProfile::default());
        assert!(store.history().is_empty());
    }

    #[test]
    fn test_history_is_capped_and_keeps_latest() {
        let mut store = MemoryStore::load(InMemoryStore::new());
        for i in 0..73 {
            store.add_to_history(format!("user {}", i), format!("reply {}", i));
            assert!(store.history().len() <= MAX_HISTORY_ENTRIES);
        }

        let history = store.history();
        assert_eq!(history.len(), MAX_HISTORY_ENTRIES);
        assert_eq!(history.first().unwrap().user_message, "user 23");
        assert_eq!(history.last().unwrap().user_message, "user 72");
        assert!(history.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert_eq!(store.profile().conversation_count, 73);
    }

    #[test]
    fn test_first_name_increments_count_once() {
        let mut store = MemoryStore::load(InMemoryStore::new());

        store.update_profile(ProfileUpdate::name("Sam"));
        assert_eq!(store.profile().conversation_count, 1);
        assert_eq!(store.profile().name.as_deref(), Some("Sam"));
        assert!(store.profile().last_seen.is_some());

        store.update_profile(ProfileUpdate::name("Sam"));
        assert_eq!(store.profile().conversation_count, 1);
    }

    #[test]
    fn test_update_without_name_keeps_name() {
        let mut store = MemoryStore::load(InMemoryStore::new());
        store.update_profile(ProfileUpdate::name("Sam"));

        let personality = Personality {
            tone: Tone::Casual,
            interests: vec!["chess".into()],
            communication_style: "short and direct".into(),
        };
        store.update_profile(ProfileUpdate::default().with_personality(personality.clone()));

        assert_eq!(store.profile().name.as_deref(), Some("Sam"));
        assert_eq!(store.profile().personality.as_ref(), Some(&personality));
        assert_eq!(store.profile().conversation_count, 1);
    }

    #[test]
    fn test_preferences_deduplicated_in_insertion_order() {
        let mut store = MemoryStore::load(InMemoryStore::new());
        assert_eq!(store.get_preferences_context(), "");

        store.add_preference("hiking");
        store.add_preference("jazz");
        store.add_preference("hiking");
        store.add_preference("Hiking");

        assert_eq!(store.profile().preferences, vec!["hiking", "jazz", "Hiking"]);
        assert_eq!(store.get_preferences_context(), "User preferences: hiking, jazz, Hiking");
    }

    #[test]
    fn test_recent_context() {
        let mut store = MemoryStore::load(InMemoryStore::new());
        assert!(store.get_recent_context(DEFAULT_CONTEXT_LIMIT).is_empty());

        for i in 0..15 {
            store.add_to_history(format!("u{}", i), format!("a{}", i));
        }

        let recent = store.get_recent_context(DEFAULT_CONTEXT_LIMIT);
        assert_eq!(recent.len(), 10);
        assert_eq!(recent[0].user_message, "u5");
        assert_eq!(recent[9].user_message, "u14");

        assert_eq!(store.get_recent_context(100).len(), 15);
        assert!(store.get_recent_context(0).is_empty());
    }

    #[test]
    fn test_reload_round_trip() {
        let storage = InMemoryStore::new();
        let mut store = MemoryStore::load(storage.clone());
        store.update_profile(ProfileUpdate::name("Sam"));
        store.add_preference("tea");
        store.add_to_history("hello", "hi Sam");

        let reloaded = MemoryStore::load(storage);
        assert_eq!(reloaded.profile(), store.profile());
        assert_eq!(reloaded.history(), store.history());
        assert!(reloaded.profile().last_seen.is_some());
    }

    #[test]
    fn test_reload_from_files() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = MemoryStore::load(FileStore::new(temp_dir.path()));
        store.update_profile(ProfileUpdate::name("Ada"));
        store.add_to_history("are you there?", "always");

        let reloaded = MemoryStore::load(FileStore::new(temp_dir.path()));
        assert_eq!(reloaded.profile(), store.profile());
        assert_eq!(reloaded.history()[0].timestamp, store.history()[0].timestamp);
    }

    #[test]
    fn test_corrupt_records_fall_back_independently() {
        let storage = InMemoryStore::new();
        storage.set(PROFILE_KEY, "{not json").unwrap();
        storage
            .set(
                HISTORY_KEY,
                r#"[{"userMessage":"hi","assistantResponse":"hey","timestamp":"2024-05-01T10:00:00Z"}]"#,
            )
            .unwrap();

        let store = MemoryStore::load(storage);
        assert_eq!(store.profile(), &UserProfile::default());
        assert_eq!(store.history().len(), 1);
        assert_eq!(store.history()[0].timestamp.to_rfc3339(), "2024-05-01T10:00:00+00:00");
    }

    #[test]
    fn test_oversized_stored_history_truncated_on_load() {
        let storage = InMemoryStore::new();
        let entries: Vec<ConversationEntry> = (0..60)
            .map(|i| ConversationEntry::new(format!("user {}", i), format!("reply {}", i)))
            .collect();
        storage
            .set(HISTORY_KEY, &serde_json::to_string(&entries).unwrap())
            .unwrap();

        let store = MemoryStore::load(storage);
        let history = store.history();
        assert_eq!(history.len(), MAX_HISTORY_ENTRIES);
        assert_eq!(history.first().unwrap().user_message, "user 10");
        assert_eq!(history.last().unwrap().user_message, "user 59");
        assert!(history
            .iter()
            .zip(10..)
            .all(|(entry, i)| entry.user_message == format!("user {}", i)));
    }

    #[test]
    fn test_clear_purges_storage() {
        let storage = InMemoryStore::new();
        let mut store = MemoryStore::load(storage.clone());
        store.update_profile(ProfileUpdate::name("Sam"));
        store.add_to_history("hello", "hi");

        store.clear();

        assert_eq!(store.profile(), &UserProfile::default());
        assert!(store.history().is_empty());
        assert!(!storage.contains(PROFILE_KEY));
        assert!(!storage.contains(HISTORY_KEY));
    }

    #[test]
    fn test_persistence_failures_are_not_fatal() {
        let mut store = MemoryStore::load(ReadOnlyStore);
        store.update_profile(ProfileUpdate::name("Sam"));
        store.add_preference("tea");
        store.add_to_history("hello", "hi");
        store.clear();

        assert!(store.profile().name.is_none());
    }
}
