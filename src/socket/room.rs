use crate::socket::{RoomId, Session, SessionId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Owned registry of rooms and their members.
///
/// Sessions and rooms reference each other only by ID; a room is created on
/// first join and deleted when its member set becomes empty. All membership
/// mutation is serialized behind the registry write lock.
pub struct RoomRegistry {
    rooms: RwLock<HashMap<RoomId, HashMap<SessionId, Arc<Session>>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        RoomRegistry {
            rooms: RwLock::new(HashMap::new()),
        }
    }

    /// Adds the session to the room, creating the room on first join.
    pub async fn join(&self, room_id: &str, session: Arc<Session>) {
        let mut rooms = self.rooms.write().await;
        rooms
            .entry(room_id.to_string())
            .or_default()
            .insert(session.id, session);
    }

    /// Removes the session from the room; returns `true` if it was a
    /// member. An emptied room is deleted.
    pub async fn leave(&self, room_id: &str, session_id: SessionId) -> bool {
        let mut rooms = self.rooms.write().await;
        let Some(members) = rooms.get_mut(room_id) else {
            return false;
        };
        let was_member = members.remove(&session_id).is_some();
        if members.is_empty() {
            rooms.remove(room_id);
        }
        was_member
    }

    /// Snapshot of a room's members. Broadcast iterates this snapshot so a
    /// slow member never holds the registry lock.
    pub async fn members(&self, room_id: &str) -> Vec<Arc<Session>> {
        let rooms = self.rooms.read().await;
        rooms
            .get(room_id)
            .map(|members| members.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Removes the session from each of the given rooms in one pass,
    /// deleting rooms left empty. Returns the rooms it was actually in.
    pub async fn remove_session(
        &self,
        session_id: SessionId,
        room_ids: &[RoomId],
    ) -> Vec<RoomId> {
        let mut rooms = self.rooms.write().await;
        let mut left = Vec::new();
        for room_id in room_ids {
            if let Some(members) = rooms.get_mut(room_id) {
                if members.remove(&session_id).is_some() {
                    left.push(room_id.clone());
                }
                if members.is_empty() {
                    rooms.remove(room_id);
                }
            }
        }
        left
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Principal;

    fn session() -> Arc<Session> {
        let principal = Principal {
            user_id: "u".to_string(),
            email: None,
            roles: Default::default(),
            resource_roles: Default::default(),
            groups: Default::default(),
        };
        Session::new(principal, 4).0
    }

    #[tokio::test]
    async fn room_created_on_first_join_deleted_when_empty() {
        let registry = RoomRegistry::new();
        let s = session();

        registry.join("R1", s.clone()).await;
        assert_eq!(registry.room_count().await, 1);

        assert!(registry.leave("R1", s.id).await);
        assert_eq!(registry.room_count().await, 0);
    }

    #[tokio::test]
    async fn leave_of_non_member_is_a_no_op() {
        let registry = RoomRegistry::new();
        let s = session();
        assert!(!registry.leave("R1", s.id).await);
    }

    #[tokio::test]
    async fn remove_session_reports_only_actual_memberships() {
        let registry = RoomRegistry::new();
        let a = session();
        let b = session();
        registry.join("R1", a.clone()).await;
        registry.join("R2", a.clone()).await;
        registry.join("R2", b.clone()).await;

        let left = registry
            .remove_session(a.id, &["R1".to_string(), "R2".to_string(), "R3".to_string()])
            .await;
        assert_eq!(left.len(), 2);
        // R1 emptied and deleted, R2 still has b.
        assert_eq!(registry.room_count().await, 1);
        assert_eq!(registry.members("R2").await.len(), 1);
    }
}
