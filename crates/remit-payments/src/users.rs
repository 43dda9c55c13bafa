//! User Directory
//!
//! Read-only view of the user store. The payments core never mutates users.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::model::{User, UserId};

/// User lookup trait
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_user(&self, id: UserId) -> Result<Option<User>>;
}

/// In-memory user directory (for development and tests)
#[derive(Default)]
pub struct MemoryUserDirectory {
    users: RwLock<HashMap<UserId, User>>,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a user; returns its id
    pub async fn add(&self, user: User) -> UserId {
        let id = user.id;
        self.users.write().await.insert(id, user);
        id
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn get_user(&self, id: UserId) -> Result<Option<User>> {
        Ok(self.users.read().await.get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_directory() {
        let directory = MemoryUserDirectory::new();
        let id = directory
            .add(User::new("Maria Santos", "maria@example.com", "09171234567"))
            .await;

        let user = directory.get_user(id).await.unwrap().unwrap();
        assert_eq!(user.full_name, "Maria Santos");
        assert!(directory.get_user(UserId::new()).await.unwrap().is_none());
    }
}
