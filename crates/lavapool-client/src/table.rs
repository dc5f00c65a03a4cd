//! Guild -> session ownership table
//!
//! The registry-wide view and each node's local view are two lookup keys
//! over one table. Both live behind a single lock, so every insert and
//! remove updates them together.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::config::NodeId;
use crate::error::{ClientError, Result};
use crate::session::Session;
use lavapool_core::GuildId;

#[derive(Default)]
struct Views {
    guilds: HashMap<GuildId, Arc<Session>>,
    nodes: HashMap<NodeId, HashMap<GuildId, Arc<Session>>>,
}

impl Views {
    fn release(&mut self, session: &Session) {
        let guild_id = session.guild_id();
        self.guilds.remove(guild_id);
        if let Some(local) = self.nodes.get_mut(session.node_id()) {
            local.remove(guild_id);
            if local.is_empty() {
                self.nodes.remove(session.node_id());
            }
        }
    }
}

#[derive(Default)]
pub(crate) struct SessionTable {
    views: Mutex<Views>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session under its guild and owning node.
    ///
    /// Fails with [`ClientError::AlreadyJoined`] if the guild already has a
    /// live one. A closed session still waiting for its terminal hook does
    /// not hold the slot and is released here.
    pub fn insert(&self, session: Arc<Session>) -> Result<()> {
        let mut views = self.views.lock();
        let guild_id = session.guild_id().to_string();
        if let Some(current) = views.guilds.get(&guild_id).cloned() {
            if !current.is_closed() {
                return Err(ClientError::AlreadyJoined(guild_id));
            }
            debug!("Releasing closed session for guild {}", guild_id);
            views.release(&current);
        }

        views
            .nodes
            .entry(session.node_id().to_string())
            .or_default()
            .insert(guild_id.clone(), session.clone());
        views.guilds.insert(guild_id, session);
        Ok(())
    }

    /// Remove `session` from both views.
    ///
    /// Only the exact instance is removed; a newer session that has since
    /// taken the guild slot is left alone.
    pub fn remove(&self, session: &Session) -> bool {
        let mut views = self.views.lock();
        let guild_id = session.guild_id();

        let owned = views
            .guilds
            .get(guild_id)
            .map_or(false, |current| std::ptr::eq(Arc::as_ptr(current), session));
        if !owned {
            return false;
        }

        views.release(session);
        debug!("Released session for guild {}", guild_id);
        true
    }

    pub fn get(&self, guild_id: &str) -> Option<Arc<Session>> {
        self.views.lock().guilds.get(guild_id).cloned()
    }

    /// Lookup through one node's local view
    pub fn node_get(&self, node_id: &str, guild_id: &str) -> Option<Arc<Session>> {
        self.views
            .lock()
            .nodes
            .get(node_id)
            .and_then(|local| local.get(guild_id))
            .cloned()
    }

    pub fn node_sessions(&self, node_id: &str) -> Vec<Arc<Session>> {
        self.views
            .lock()
            .nodes
            .get(node_id)
            .map(|local| local.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.views.lock().guilds.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.views.lock().guilds.len()
    }

    #[cfg(test)]
    pub fn assert_consistent(&self) {
        let views = self.views.lock();
        let local_total: usize = views.nodes.values().map(HashMap::len).sum();
        assert_eq!(local_total, views.guilds.len(), "view sizes differ");
        for (guild_id, session) in &views.guilds {
            let owners: Vec<_> = views
                .nodes
                .iter()
                .filter_map(|(node, local)| local.get(guild_id).map(|s| (node, s)))
                .collect();
            assert_eq!(owners.len(), 1, "guild {} not owned by exactly one node", guild_id);
            assert!(Arc::ptr_eq(owners[0].1, session), "views disagree for guild {}", guild_id);
        }
    }
}
