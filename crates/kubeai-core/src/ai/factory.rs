//! Provider registry
//!
//! Maps provider names to constructors. Lookup is case-insensitive.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use super::bedrock::BedrockProvider;
use super::gemini::GeminiProvider;
use super::ollama::OllamaProvider;
use super::openai::OpenAiProvider;
use super::provider::Provider;
use super::types::ProviderConfig;
use crate::error::{ProviderError, Result};

/// Builds a provider from static configuration
pub type ProviderConstructor =
    Arc<dyn Fn(&ProviderConfig) -> Result<Box<dyn Provider>> + Send + Sync>;

#[derive(Clone)]
pub struct ProviderFactory {
    constructors: BTreeMap<String, ProviderConstructor>,
}

impl Default for ProviderFactory {
    fn default() -> Self {
        let mut factory = Self::empty();
        factory.register("openai", |cfg| Ok(Box::new(OpenAiProvider::new(cfg)?)));
        factory.register("solar", |cfg| Ok(Box::new(OpenAiProvider::solar(cfg)?)));
        factory.register("embedded", |cfg| Ok(Box::new(OpenAiProvider::embedded(cfg)?)));
        factory.register("llamacpp", |cfg| Ok(Box::new(OpenAiProvider::embedded(cfg)?)));
        factory.register("ollama", |cfg| Ok(Box::new(OllamaProvider::new(cfg)?)));
        factory.register("gemini", |cfg| Ok(Box::new(GeminiProvider::new(cfg)?)));
        factory.register("bedrock", |cfg| Ok(Box::new(BedrockProvider::new(cfg)?)));
        factory
    }
}

impl ProviderFactory {
    /// Factory with the built-in providers
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory with nothing registered
    pub fn empty() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }

    /// Register or replace a constructor
    pub fn register<F>(&mut self, name: &str, constructor: F)
    where
        F: Fn(&ProviderConfig) -> Result<Box<dyn Provider>> + Send + Sync + 'static,
    {
        self.constructors
            .insert(name.to_lowercase(), Arc::new(constructor));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(&name.to_lowercase())
    }

    pub fn create(&self, config: &ProviderConfig) -> Result<Box<dyn Provider>> {
        let name = config.provider.to_lowercase();
        let constructor = self.constructors.get(&name).ok_or_else(|| {
            ProviderError::UnknownProvider(config.provider.clone(), self.list_providers())
        })?;

        let provider = constructor(config)?;
        debug!(
            provider = %name,
            model = provider.model(),
            endpoint = provider.endpoint(),
            "Provider created"
        );
        Ok(provider)
    }

    /// Registered names, sorted and comma-joined
    pub fn list_providers(&self) -> String {
        self.constructors
            .keys()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_providers_listed_sorted() {
        assert_eq!(
            ProviderFactory::new().list_providers(),
            "bedrock, embedded, gemini, llamacpp, ollama, openai, solar"
        );
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let factory = ProviderFactory::new();
        assert!(factory.contains("Ollama"));
        let provider = factory
            .create(&ProviderConfig::new("OLLAMA", ""))
            .unwrap();
        assert_eq!(provider.name(), "ollama");
        assert!(provider.as_tool_provider().is_some());
    }

    #[test]
    fn test_unknown_provider() {
        let err = ProviderFactory::new()
            .create(&ProviderConfig::new("azure", "gpt-4o"))
            .err()
            .unwrap();
        assert!(matches!(err, ProviderError::UnknownProvider(..)));
        let message = err.to_string();
        assert!(message.starts_with("unknown provider: azure"), "{message}");
        assert!(message.contains("openai"), "{message}");
    }

    #[test]
    fn test_key_requirements_checked_at_construction() {
        let factory = ProviderFactory::new();
        assert!(matches!(
            factory.create(&ProviderConfig::new("openai", "gpt-4o")).err(),
            Some(ProviderError::MissingApiKey(_))
        ));
        assert!(factory.create(&ProviderConfig::new("embedded", "")).is_ok());
        assert!(factory.create(&ProviderConfig::new("llamacpp", "")).is_ok());
    }

    #[test]
    fn test_register_custom_constructor() {
        let mut factory = ProviderFactory::empty();
        factory.register("Local", |cfg| Ok(Box::new(OllamaProvider::new(cfg)?)));
        assert_eq!(factory.list_providers(), "local");
        assert!(factory.create(&ProviderConfig::new("local", "")).is_ok());
        assert!(factory.create(&ProviderConfig::new("openai", "")).is_err());
    }
}
