use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::config::{Config, ProviderConfig};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Duplicate provider key: {0}")]
    DuplicateKey(String),

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),
}

/// Read-only lookup from provider key to its endpoint configuration.
///
/// Providers keep their declaration order so rounds launch probes in a
/// stable sequence.
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    providers: Vec<Arc<ProviderConfig>>,
    index: HashMap<String, usize>,
}

impl ProviderRegistry {
    pub fn new(providers: Vec<ProviderConfig>) -> Result<Self, RegistryError> {
        let mut index = HashMap::with_capacity(providers.len());
        for (position, provider) in providers.iter().enumerate() {
            if index.insert(provider.key.clone(), position).is_some() {
                return Err(RegistryError::DuplicateKey(provider.key.clone()));
            }
        }

        Ok(Self {
            providers: providers.into_iter().map(Arc::new).collect(),
            index,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, RegistryError> {
        Self::new(config.providers.clone())
    }

    pub fn get(&self, key: &str) -> Option<&Arc<ProviderConfig>> {
        self.index.get(key).map(|&i| &self.providers[i])
    }

    /// Resolves keys in the given order, failing on the first unknown key.
    pub fn resolve(&self, keys: &[String]) -> Result<Vec<Arc<ProviderConfig>>, RegistryError> {
        keys.iter()
            .map(|key| {
                self.get(key)
                    .cloned()
                    .ok_or_else(|| RegistryError::UnknownProvider(key.clone()))
            })
            .collect()
    }

    pub fn keys(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.key.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(key: &str) -> ProviderConfig {
        ProviderConfig {
            key: key.to_string(),
            display_name: key.to_uppercase(),
            url: format!("http://127.0.0.1:1/{}", key),
            api_key: String::new(),
            model: None,
        }
    }

    #[test]
    fn test_resolve_keeps_requested_order() {
        let registry =
            ProviderRegistry::new(vec![provider("a"), provider("b"), provider("c")]).unwrap();
        let resolved = registry
            .resolve(&["c".to_string(), "a".to_string()])
            .unwrap();
        let keys: Vec<_> = resolved.iter().map(|p| p.key.as_str()).collect();
        assert_eq!(keys, vec!["c", "a"]);
        assert_eq!(registry.keys(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_unknown_and_duplicate_keys() {
        let registry = ProviderRegistry::new(vec![provider("a")]).unwrap();
        assert_eq!(
            registry.resolve(&["z".to_string()]).unwrap_err(),
            RegistryError::UnknownProvider("z".to_string())
        );

        let err = ProviderRegistry::new(vec![provider("a"), provider("a")]).unwrap_err();
        assert_eq!(err, RegistryError::DuplicateKey("a".to_string()));
    }
}
