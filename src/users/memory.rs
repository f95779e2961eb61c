use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{
    query::UserQuery,
    repo::{StoreError, UserStore},
    repo_types::{NewUser, Role, User},
};
use crate::clock::Clock;

/// In-memory store for tests. Every operation runs under one lock, mirroring
/// the single-statement updates of the Postgres store.
pub struct MemoryUserStore {
    users: Mutex<Vec<User>>,
    clock: Arc<dyn Clock>,
}

fn vanished(id: Uuid) -> StoreError {
    StoreError::Other(anyhow::anyhow!("user {id} vanished"))
}

impl MemoryUserStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            users: Mutex::new(Vec::new()),
            clock,
        }
    }

    /// Raw record, ignoring the active filter.
    pub fn get(&self, id: Uuid) -> Option<User> {
        self.users.lock().unwrap().iter().find(|u| u.id == id).cloned()
    }

    pub fn set_role(&self, id: Uuid, role: Role) {
        let mut users = self.users.lock().unwrap();
        if let Some(u) = users.iter_mut().find(|u| u.id == id) {
            u.role = role;
        }
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find(&self, query: &UserQuery) -> Result<Option<User>, StoreError> {
        let users = self.users.lock().unwrap();
        Ok(users.iter().find(|u| query.matches(u)).cloned())
    }

    async fn list(&self, query: &UserQuery) -> Result<Vec<User>, StoreError> {
        let users = self.users.lock().unwrap();
        let mut found: Vec<User> = users.iter().filter(|u| query.matches(u)).cloned().collect();
        found.sort_by_key(|u| u.created_at);
        Ok(found)
    }

    async fn insert(&self, new_user: NewUser) -> Result<User, StoreError> {
        let mut users = self.users.lock().unwrap();
        if users.iter().any(|u| u.email == new_user.email) {
            return Err(StoreError::DuplicateEmail);
        }
        let user = User {
            id: Uuid::new_v4(),
            name: new_user.name,
            email: new_user.email,
            password_hash: new_user.password_hash,
            password_changed_at: None,
            password_reset_digest: None,
            password_reset_expires: None,
            role: Role::User,
            active: true,
            created_at: self.clock.now(),
        };
        users.push(user.clone());
        Ok(user)
    }

    async fn write(&self, user: &User) -> Result<User, StoreError> {
        let mut users = self.users.lock().unwrap();
        if users
            .iter()
            .any(|u| u.id != user.id && u.email == user.email)
        {
            return Err(StoreError::DuplicateEmail);
        }
        let slot = users
            .iter_mut()
            .find(|u| u.id == user.id)
            .ok_or_else(|| vanished(user.id))?;
        slot.name = user.name.clone();
        slot.email = user.email.clone();
        slot.role = user.role;
        slot.active = user.active;
        Ok(slot.clone())
    }

    async fn set_password(
        &self,
        id: Uuid,
        password_hash: &str,
        changed_at: OffsetDateTime,
    ) -> Result<User, StoreError> {
        let mut users = self.users.lock().unwrap();
        let slot = users
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or_else(|| vanished(id))?;
        slot.password_hash = password_hash.to_string();
        slot.password_changed_at = Some(changed_at);
        slot.password_reset_digest = None;
        slot.password_reset_expires = None;
        Ok(slot.clone())
    }

    async fn set_reset_token(
        &self,
        id: Uuid,
        digest: &str,
        expires_at: OffsetDateTime,
    ) -> Result<(), StoreError> {
        let mut users = self.users.lock().unwrap();
        let slot = users
            .iter_mut()
            .find(|u| u.id == id && u.active)
            .ok_or_else(|| vanished(id))?;
        slot.password_reset_digest = Some(digest.to_string());
        slot.password_reset_expires = Some(expires_at);
        Ok(())
    }

    async fn clear_reset_token(&self, id: Uuid, digest: &str) -> Result<bool, StoreError> {
        let mut users = self.users.lock().unwrap();
        match users
            .iter_mut()
            .find(|u| u.id == id && u.password_reset_digest.as_deref() == Some(digest))
        {
            Some(slot) => {
                slot.password_reset_digest = None;
                slot.password_reset_expires = None;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn consume_reset_token(
        &self,
        digest: &str,
        now: OffsetDateTime,
        password_hash: &str,
        changed_at: OffsetDateTime,
    ) -> Result<Option<User>, StoreError> {
        let query = UserQuery::by_reset_digest(digest, now);
        let mut users = self.users.lock().unwrap();
        Ok(users.iter_mut().find(|u| query.matches(u)).map(|slot| {
            slot.password_hash = password_hash.to_string();
            slot.password_changed_at = Some(changed_at);
            slot.password_reset_digest = None;
            slot.password_reset_expires = None;
            slot.clone()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use time::{macros::datetime, Duration};

    const NOW: OffsetDateTime = datetime!(2024-06-01 12:00 UTC);

    fn store() -> (MemoryUserStore, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::new(NOW));
        (MemoryUserStore::new(clock.clone()), clock)
    }

    async fn insert(store: &MemoryUserStore, email: &str) -> User {
        store
            .insert(NewUser {
                name: "Tester".into(),
                email: email.into(),
                password_hash: "hash".into(),
            })
            .await
            .expect("insert")
    }

    #[tokio::test]
    async fn list_follows_creation_order_on_the_injected_clock() {
        let (store, clock) = store();
        let first = insert(&store, "a@x.com").await;
        clock.advance(Duration::minutes(1));
        let second = insert(&store, "b@x.com").await;

        assert_eq!(first.created_at, NOW);
        let ids: Vec<Uuid> = store
            .list(&UserQuery::active())
            .await
            .expect("list")
            .iter()
            .map(|u| u.id)
            .collect();
        assert_eq!(ids, vec![first.id, second.id]);
    }

    #[tokio::test]
    async fn profile_write_leaves_credentials_alone() {
        let (store, _) = store();
        let user = insert(&store, "a@x.com").await;
        store
            .set_password(user.id, "newer-hash", NOW)
            .await
            .expect("set password");

        // stale snapshot still carries the old hash
        let mut stale = user.clone();
        stale.name = "Renamed".into();
        let saved = store.write(&stale).await.expect("write");
        assert_eq!(saved.name, "Renamed");
        assert_eq!(saved.password_hash, "newer-hash");
        assert_eq!(saved.password_changed_at, Some(NOW));
    }

    #[tokio::test]
    async fn clear_reset_token_only_matches_its_own_digest() {
        let (store, _) = store();
        let user = insert(&store, "a@x.com").await;
        store
            .set_reset_token(user.id, "current", NOW + Duration::minutes(10))
            .await
            .expect("set token");

        assert!(!store.clear_reset_token(user.id, "older").await.expect("clear"));
        assert_eq!(
            store.get(user.id).expect("user").password_reset_digest.as_deref(),
            Some("current")
        );

        assert!(store.clear_reset_token(user.id, "current").await.expect("clear"));
        let stored = store.get(user.id).expect("user");
        assert!(stored.password_reset_digest.is_none());
        assert!(stored.password_reset_expires.is_none());
    }

    #[tokio::test]
    async fn reset_token_is_consumed_once() {
        let (store, _) = store();
        let user = insert(&store, "a@x.com").await;
        store
            .set_reset_token(user.id, "digest", NOW + Duration::minutes(10))
            .await
            .expect("set token");

        let consumed = store
            .consume_reset_token("digest", NOW, "fresh-hash", NOW)
            .await
            .expect("consume")
            .expect("matched");
        assert_eq!(consumed.password_hash, "fresh-hash");
        assert!(consumed.password_reset_digest.is_none());
        assert!(consumed.password_reset_expires.is_none());

        assert!(store
            .consume_reset_token("digest", NOW, "other-hash", NOW)
            .await
            .expect("consume")
            .is_none());
    }
}
