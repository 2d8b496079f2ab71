use std::collections::BTreeMap;
use std::sync::Arc;

use likeness_contracts::routing::normalize_provider_name;
use likeness_contracts::settings::ProviderSettings;

use crate::error::RegistryError;
use crate::provider::ImageProvider;
use crate::providers::{
    ComfyUiProvider, LocalLibraryProvider, OpenAiProvider, StabilityProvider, StubProvider,
};

pub type ProviderFactory = Box<dyn Fn() -> Arc<dyn ImageProvider> + Send + Sync>;

/// Name to adapter lookup, built once at startup and then shared read-only.
#[derive(Default)]
pub struct ProviderRegistry {
    factories: BTreeMap<String, ProviderFactory>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every built-in adapter.
    pub fn with_defaults(settings: &ProviderSettings) -> Self {
        let mut registry = Self::new();
        registry.register_instance("stub", Arc::new(StubProvider::new()));
        registry.register_instance(
            "local",
            Arc::new(LocalLibraryProvider::new(settings.local_library.clone())),
        );
        registry.register_instance(
            "comfyui",
            Arc::new(ComfyUiProvider::new(
                settings.comfyui_url.clone(),
                settings.comfyui_timeout,
            )),
        );
        registry.register_instance(
            "openai",
            Arc::new(OpenAiProvider::new(
                settings.openai_api_base.clone(),
                settings.openai_api_key.clone(),
                settings.openai_model.clone(),
            )),
        );
        registry.register_instance(
            "stability",
            Arc::new(StabilityProvider::new(
                settings.stability_api_base.clone(),
                settings.stability_api_key.clone(),
            )),
        );
        registry
    }

    /// Later registrations under the same name replace earlier ones.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Arc<dyn ImageProvider> + Send + Sync + 'static,
    {
        self.factories
            .insert(normalize_provider_name(name), Box::new(factory));
    }

    pub fn register_instance(&mut self, name: &str, provider: Arc<dyn ImageProvider>) {
        self.register(name, move || provider.clone());
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn ImageProvider>, RegistryError> {
        let key = normalize_provider_name(name);
        match self.factories.get(&key) {
            Some(factory) => Ok(factory()),
            None => Err(RegistryError::UnknownProvider {
                name: key,
                available: self.names(),
            }),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(&normalize_provider_name(name))
    }

    pub fn names(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }
}
