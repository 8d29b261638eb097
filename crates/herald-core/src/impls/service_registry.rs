//! ServiceRegistry - サービス名から Capability への登録表
//!
//! # 学習ポイント
//! - HashMap<String, Arc<dyn Capability>> で型消去された trait object を管理
//! - 二重登録はエラー（黙って上書きしない）

use std::collections::HashMap;
use std::sync::Arc;

use crate::ports::{Capability, CapabilityRegistry};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Service '{0}' is already registered")]
    AlreadyRegistered(String),
}

/// ServiceRegistry は下流サービスを名前で登録・管理
///
/// # 使用例
/// ```ignore
/// let mut registry = ServiceRegistry::new();
/// registry.register("users", Arc::new(UsersService::default()))?;
/// let users = registry.lookup("users");
/// ```
#[derive(Default, Clone)]
pub struct ServiceRegistry {
    services: HashMap<String, Arc<dyn Capability>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        capability: Arc<dyn Capability>,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        if self.services.contains_key(&name) {
            return Err(RegistryError::AlreadyRegistered(name));
        }
        self.services.insert(name, capability);
        Ok(())
    }

    pub fn registered_services(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.keys().cloned().collect();
        names.sort();
        names
    }
}

impl CapabilityRegistry for ServiceRegistry {
    fn lookup(&self, service: &str) -> Option<Arc<dyn Capability>> {
        self.services.get(service).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Users;
    impl Capability for Users {}

    struct Mailer;
    impl Capability for Mailer {}

    #[test]
    fn register_and_lookup() {
        let mut registry = ServiceRegistry::new();
        registry.register("users", Arc::new(Users)).unwrap();

        assert!(registry.lookup("users").is_some());
        assert!(registry.lookup("mailer").is_none());
    }

    #[test]
    fn double_registration_is_rejected() {
        let mut registry = ServiceRegistry::new();
        registry.register("users", Arc::new(Users)).unwrap();
        let result = registry.register("users", Arc::new(Mailer));
        assert!(matches!(result, Err(RegistryError::AlreadyRegistered(name)) if name == "users"));
    }

    #[test]
    fn registered_services_are_sorted() {
        let mut registry = ServiceRegistry::new();
        registry.register("users", Arc::new(Users)).unwrap();
        registry.register("mailer", Arc::new(Mailer)).unwrap();
        assert_eq!(registry.registered_services(), vec!["mailer", "users"]);
    }
}
