use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};

use super::VoiceSession;
use crate::common::types::GuildId;

/// Concurrent map of guild to its voice session; the single source of truth
/// for which guilds are active.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<GuildId, Arc<VoiceSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, guild: GuildId) -> Option<Arc<VoiceSession>> {
        self.sessions.get(&guild).map(|s| s.clone())
    }

    /// Returns the guild's session, creating it with `factory` if absent.
    /// The flag is `true` only for the caller whose factory was used.
    pub fn get_or_create(
        &self,
        guild: GuildId,
        factory: impl FnOnce() -> Arc<VoiceSession>,
    ) -> (Arc<VoiceSession>, bool) {
        match self.sessions.entry(guild) {
            Entry::Occupied(entry) => (entry.get().clone(), false),
            Entry::Vacant(entry) => (entry.insert(factory()).clone(), true),
        }
    }

    pub fn remove(&self, guild: GuildId) -> Option<Arc<VoiceSession>> {
        self.sessions.remove(&guild).map(|(_, s)| s)
    }

    /// Removes the entry only if it still holds `session`.
    pub fn remove_if_same(&self, guild: GuildId, session: &Arc<VoiceSession>) -> bool {
        self.sessions
            .remove_if(&guild, |_, current| Arc::ptr_eq(current, session))
            .is_some()
    }

    /// Point-in-time copy of all sessions.
    pub fn all(&self) -> Vec<Arc<VoiceSession>> {
        self.sessions.iter().map(|s| s.value().clone()).collect()
    }

    pub fn guild_ids(&self) -> Vec<GuildId> {
        let mut ids: Vec<GuildId> = self.sessions.iter().map(|s| *s.key()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
