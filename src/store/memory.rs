use super::{NewPrincipal, Principal, PrincipalStore, StoreError};
use async_trait::async_trait;
use chrono::Utc;
use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
};
use uuid::Uuid;

/// Process-local store used when no DSN is configured, and by tests.
#[derive(Debug, Default)]
pub struct MemoryPrincipalStore {
    by_email: RwLock<HashMap<String, Principal>>,
}

impl MemoryPrincipalStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PrincipalStore for MemoryPrincipalStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<Principal>, StoreError> {
        let principals = self.by_email.read().unwrap_or_else(PoisonError::into_inner);
        Ok(principals.get(email).cloned())
    }

    async fn create(&self, fields: NewPrincipal) -> Result<Principal, StoreError> {
        let mut principals = self.by_email.write().unwrap_or_else(PoisonError::into_inner);
        if principals.contains_key(&fields.email) {
            return Err(StoreError::Duplicate);
        }
        let now = Utc::now();
        let principal = Principal {
            id: Uuid::now_v7(),
            name: fields.name,
            email: fields.email,
            password_hash: fields.password_hash,
            role: fields.role,
            created_at: now,
            updated_at: now,
        };
        principals.insert(principal.email.clone(), principal.clone());
        Ok(principal)
    }

    async fn list(&self) -> Result<Vec<Principal>, StoreError> {
        let principals = self.by_email.read().unwrap_or_else(PoisonError::into_inner);
        let mut all: Vec<Principal> = principals.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(all)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Role;

    fn fields(email: &str) -> NewPrincipal {
        NewPrincipal {
            name: "Alice".to_string(),
            email: email.to_string(),
            password_hash: "$argon2id$v=19$stub".to_string(),
            role: Role::User,
        }
    }

    #[tokio::test]
    async fn create_then_find() -> Result<(), StoreError> {
        let store = MemoryPrincipalStore::new();
        let created = store.create(fields("a@x.com")).await?;
        let found = store.find_by_email("a@x.com").await?;
        assert_eq!(found.map(|p| p.id), Some(created.id));
        assert!(store.find_by_email("b@x.com").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() -> Result<(), StoreError> {
        let store = MemoryPrincipalStore::new();
        store.create(fields("a@x.com")).await?;
        let again = store.create(fields("a@x.com")).await;
        assert!(matches!(again, Err(StoreError::Duplicate)));
        assert_eq!(store.list().await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn list_is_newest_first() -> Result<(), StoreError> {
        let store = MemoryPrincipalStore::new();
        let first = store.create(fields("a@x.com")).await?;
        let second = store.create(fields("b@x.com")).await?;
        let ids: Vec<Uuid> = store.list().await?.into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
        Ok(())
    }
}
