//! Persistence
//!
//! Chats, presets and settings are kept as JSON strings in a key-value store,
//! one key per collection. [`Library`] is the typed view over those keys.
//! A stored value that fails to parse is logged and read as empty, so one
//! corrupt key never prevents the others from loading.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use uuid::Uuid;

use crate::error::LlmError;
use crate::types::{AppSettings, Chat, LlmConfig, Message, unique_preset_name};

pub const CHATS_KEY: &str = "llm-chats";
pub const PRESETS_KEY: &str = "llm-config-presets";
pub const SELECTED_CHAT_KEY: &str = "llm-selected-chat-id";
pub const SELECTED_CONFIG_KEY: &str = "llm-selected-config-id";
pub const APP_SETTINGS_KEY: &str = "llm-app-config";

/// String key-value storage.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, LlmError>;
    fn set(&self, key: &str, value: &str) -> Result<(), LlmError>;
    fn remove(&self, key: &str) -> Result<(), LlmError>;
}

/// In-process store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, LlmError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), LlmError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), LlmError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }
}

/// One file per key in a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{name}.json"))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, LlmError> {
        let path = self.path_for(key);
        match std::fs::read_to_string(&path) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(LlmError::StorageError(format!(
                "Failed to read {}: {e}",
                path.display()
            ))),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), LlmError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| {
            LlmError::StorageError(format!(
                "Failed to create storage directory {}: {e}",
                self.dir.display()
            ))
        })?;
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, value)
            .and_then(|()| std::fs::rename(&tmp, &path))
            .map_err(|e| LlmError::StorageError(format!("Failed to write {}: {e}", path.display())))
    }

    fn remove(&self, key: &str) -> Result<(), LlmError> {
        let path = self.path_for(key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LlmError::StorageError(format!(
                "Failed to remove {}: {e}",
                path.display()
            ))),
        }
    }
}

/// Typed access to persisted chats, presets and settings.
#[derive(Debug)]
pub struct Library<S> {
    store: S,
}

impl<S: KeyValueStore> Library<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn read<T: DeserializeOwned + Default>(&self, key: &str) -> Result<T, LlmError> {
        let Some(text) = self.store.get(key)? else {
            return Ok(T::default());
        };
        match serde_json::from_str(&text) {
            Ok(value) => Ok(value),
            Err(e) => {
                tracing::warn!(key = key, error = %e, "Ignoring malformed stored value");
                Ok(T::default())
            }
        }
    }

    fn write<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), LlmError> {
        let text = serde_json::to_string(value)?;
        self.store.set(key, &text)
    }

    pub fn load_chats(&self) -> Result<Vec<Chat>, LlmError> {
        self.read(CHATS_KEY)
    }

    pub fn save_chats(&self, chats: &[Chat]) -> Result<(), LlmError> {
        self.write(CHATS_KEY, chats)
    }

    pub fn add_chat(&self, chat: Chat) -> Result<(), LlmError> {
        let mut chats = self.load_chats()?;
        tracing::debug!(chat_id = %chat.id, "Adding chat");
        chats.push(chat);
        self.save_chats(&chats)
    }

    pub fn delete_chat(&self, chat_id: Uuid) -> Result<(), LlmError> {
        let mut chats = self.load_chats()?;
        chats.retain(|c| c.id != chat_id);
        self.save_chats(&chats)
    }

    /// Replace the stored chat with the same id, or append it.
    pub fn modify_chat(&self, chat: Chat) -> Result<(), LlmError> {
        let mut chats = self.load_chats()?;
        upsert(&mut chats, chat, |c| c.id);
        self.save_chats(&chats)
    }

    /// Store new messages for a chat. Unknown ids are ignored.
    pub fn update_messages(&self, chat_id: Uuid, messages: &[Message]) -> Result<(), LlmError> {
        let mut chats = self.load_chats()?;
        let Some(chat) = chats.iter_mut().find(|c| c.id == chat_id) else {
            tracing::debug!(chat_id = %chat_id, "Messages changed for a chat that is not stored");
            return Ok(());
        };
        chat.messages = messages.to_vec();
        self.save_chats(&chats)
    }

    /// Stored presets. JSON-typed fields stored as text are decoded.
    pub fn load_presets(&self) -> Result<Vec<LlmConfig>, LlmError> {
        let mut presets: Vec<LlmConfig> = self.read(PRESETS_KEY)?;
        presets.iter_mut().for_each(LlmConfig::decode_json_fields);
        Ok(presets)
    }

    pub fn save_presets(&self, presets: &[LlmConfig]) -> Result<(), LlmError> {
        self.write(PRESETS_KEY, presets)
    }

    pub fn add_preset(&self, preset: LlmConfig) -> Result<(), LlmError> {
        let mut presets = self.load_presets()?;
        presets.push(preset);
        self.save_presets(&presets)
    }

    pub fn delete_preset(&self, preset_id: Uuid) -> Result<(), LlmError> {
        let mut presets = self.load_presets()?;
        presets.retain(|p| p.id != preset_id);
        self.save_presets(&presets)
    }

    pub fn modify_preset(&self, preset: LlmConfig) -> Result<(), LlmError> {
        let mut presets = self.load_presets()?;
        upsert(&mut presets, preset, |p| p.id);
        self.save_presets(&presets)
    }

    /// Copy a preset under a fresh id and a `" (copy N)"` name.
    pub fn duplicate_preset(&self, preset_id: Uuid) -> Result<LlmConfig, LlmError> {
        let mut presets = self.load_presets()?;
        let original = presets
            .iter()
            .find(|p| p.id == preset_id)
            .ok_or_else(|| LlmError::InvalidInput(format!("No preset with id {preset_id}")))?;

        let names: Vec<String> = presets.iter().map(|p| p.name.clone()).collect();
        let mut copy = original.clone();
        copy.id = Uuid::new_v4();
        copy.name = unique_preset_name(&names, &original.name);
        presets.push(copy.clone());
        self.save_presets(&presets)?;
        Ok(copy)
    }

    pub fn selected_chat_id(&self) -> Result<Option<Uuid>, LlmError> {
        self.read_id(SELECTED_CHAT_KEY)
    }

    pub fn set_selected_chat_id(&self, id: Option<Uuid>) -> Result<(), LlmError> {
        self.write_id(SELECTED_CHAT_KEY, id)
    }

    pub fn selected_config_id(&self) -> Result<Option<Uuid>, LlmError> {
        self.read_id(SELECTED_CONFIG_KEY)
    }

    pub fn set_selected_config_id(&self, id: Option<Uuid>) -> Result<(), LlmError> {
        self.write_id(SELECTED_CONFIG_KEY, id)
    }

    // Selection ids are stored as bare strings, not JSON.
    fn read_id(&self, key: &str) -> Result<Option<Uuid>, LlmError> {
        let Some(text) = self.store.get(key)? else {
            return Ok(None);
        };
        match Uuid::parse_str(text.trim().trim_matches('"')) {
            Ok(id) => Ok(Some(id)),
            Err(e) => {
                tracing::warn!(key = key, error = %e, "Ignoring malformed stored id");
                Ok(None)
            }
        }
    }

    fn write_id(&self, key: &str, id: Option<Uuid>) -> Result<(), LlmError> {
        match id {
            Some(id) => self.store.set(key, &id.to_string()),
            None => self.store.remove(key),
        }
    }

    pub fn app_settings(&self) -> Result<AppSettings, LlmError> {
        self.read(APP_SETTINGS_KEY)
    }

    pub fn save_app_settings(&self, settings: &AppSettings) -> Result<(), LlmError> {
        self.write(APP_SETTINGS_KEY, settings)
    }
}

fn upsert<T>(items: &mut Vec<T>, item: T, id: impl Fn(&T) -> Uuid) {
    let key = id(&item);
    match items.iter_mut().find(|existing| id(existing) == key) {
        Some(slot) => *slot = item,
        None => items.push(item),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn library() -> Library<MemoryStore> {
        Library::new(MemoryStore::new())
    }

    #[test]
    fn missing_keys_read_as_empty() {
        let lib = library();
        assert!(lib.load_chats().unwrap().is_empty());
        assert!(lib.load_presets().unwrap().is_empty());
        assert_eq!(lib.selected_chat_id().unwrap(), None);
        assert_eq!(lib.app_settings().unwrap(), AppSettings::default());
    }

    #[test]
    fn malformed_json_is_treated_as_empty() {
        let lib = library();
        lib.store().set(CHATS_KEY, "[{not json").unwrap();
        lib.store().set(SELECTED_CHAT_KEY, "nope").unwrap();
        assert!(lib.load_chats().unwrap().is_empty());
        assert_eq!(lib.selected_chat_id().unwrap(), None);
    }

    #[test]
    fn modify_replaces_or_appends() {
        let lib = library();
        let mut chat = Chat::new("Chat 1", None);
        lib.add_chat(chat.clone()).unwrap();

        chat.name = "Renamed".into();
        lib.modify_chat(chat.clone()).unwrap();
        lib.modify_chat(Chat::new("Chat 2", None)).unwrap();

        let chats = lib.load_chats().unwrap();
        assert_eq!(chats.len(), 2);
        assert_eq!(chats[0].name, "Renamed");

        lib.delete_chat(chat.id).unwrap();
        assert_eq!(lib.load_chats().unwrap()[0].name, "Chat 2");
    }

    #[test]
    fn messages_are_written_back_to_their_chat() {
        let lib = library();
        let chat = Chat::new("Chat 1", None);
        lib.add_chat(chat.clone()).unwrap();
        lib.update_messages(chat.id, &[Message::user("hi"), Message::assistant("hello")])
            .unwrap();
        assert_eq!(lib.load_chats().unwrap()[0].messages.len(), 2);
        lib.update_messages(Uuid::new_v4(), &[]).unwrap();
    }

    #[test]
    fn duplicate_gets_fresh_id_and_copy_name() {
        let lib = library();
        let preset = LlmConfig::default_preset();
        lib.add_preset(preset.clone()).unwrap();

        let first = lib.duplicate_preset(preset.id).unwrap();
        let second = lib.duplicate_preset(preset.id).unwrap();
        assert_ne!(first.id, preset.id);
        assert_eq!(first.name, "Default (copy 1)");
        assert_eq!(second.name, "Default (copy 2)");
        assert_eq!(lib.load_presets().unwrap().len(), 3);
        assert!(lib.duplicate_preset(Uuid::new_v4()).is_err());
    }

    #[test]
    fn selection_ids_round_trip_as_plain_strings() {
        let lib = library();
        let id = Uuid::new_v4();
        lib.set_selected_config_id(Some(id)).unwrap();
        assert_eq!(lib.store().get(SELECTED_CONFIG_KEY).unwrap(), Some(id.to_string()));
        assert_eq!(lib.selected_config_id().unwrap(), Some(id));
        lib.set_selected_config_id(None).unwrap();
        assert_eq!(lib.selected_config_id().unwrap(), None);
    }

    #[test]
    fn file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let chat = Chat::new("Chat 1", Some(&LlmConfig::default_preset()));
        Library::new(FileStore::new(dir.path())).add_chat(chat.clone()).unwrap();

        let reopened = Library::new(FileStore::new(dir.path()));
        assert_eq!(reopened.load_chats().unwrap(), vec![chat]);
        assert!(dir.path().join("llm-chats.json").exists());

        reopened.store().remove(CHATS_KEY).unwrap();
        reopened.store().remove(CHATS_KEY).unwrap();
        assert!(reopened.load_chats().unwrap().is_empty());
    }
}
