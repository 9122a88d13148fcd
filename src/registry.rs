//! Provider registry and prompt overrides over the configuration store.
//!
//! Providers live as a JSON map (id -> record) under a single store key, so
//! every write is a whole-record replacement. The registry is read-mostly;
//! jobs take a [`JudgeEndpoint`] snapshot at start and never re-fetch
//! configuration mid-job.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::gateway::{JudgeEndpoint, ProviderCapabilities};
use crate::store::{ConfigStore, StoreError};

const PROVIDERS_KEY: &str = "ai_providers";
const PROMPTS_KEY: &str = "ranking_prompts";

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("corrupt record: {0}")]
    Serde(String),
    #[error("provider name already in use: {0}")]
    DuplicateName(String),
    #[error("unknown provider: {0}")]
    NotFound(String),
    #[error("provider is disabled: {0}")]
    Disabled(String),
}

// =============================================================================
// Records
// =============================================================================

/// Stored provider configuration. The `api_key` is write-only from the
/// admin surface's perspective: it is persisted, but only
/// [`ProviderSummary`] is ever handed back to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRecord {
    pub id: String,
    pub name: String,
    pub base_url: String,
    pub model: String,
    pub api_key: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Caller-visible projection. Never includes the key.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ProviderSummary {
    pub id: String,
    pub name: String,
    pub model: String,
}

impl From<&ProviderRecord> for ProviderSummary {
    fn from(r: &ProviderRecord) -> Self {
        Self {
            id: r.id.clone(),
            name: r.name.clone(),
            model: r.model.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewProvider {
    pub name: String,
    pub base_url: String,
    pub model: String,
    pub api_key: String,
    pub enabled: bool,
}

/// Partial update. `None` leaves a field untouched; an empty `api_key`
/// string also leaves the stored key untouched, so admin forms can omit it.
#[derive(Debug, Clone, Default)]
pub struct ProviderUpdate {
    pub name: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub enabled: Option<bool>,
}

/// Admin-configured prompt override per ranking type. Blank means "use the
/// built-in default".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptOverrides {
    #[serde(default)]
    pub submission_prompt: String,
    #[serde(default)]
    pub comment_prompt: String,
}

// =============================================================================
// Registry
// =============================================================================

pub struct ProviderRegistry {
    store: Arc<dyn ConfigStore>,
}

impl ProviderRegistry {
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        Self { store }
    }

    async fn load_providers(&self) -> Result<BTreeMap<String, ProviderRecord>, RegistryError> {
        match self.store.get(PROVIDERS_KEY).await? {
            Some(raw) => {
                serde_json::from_str(&raw).map_err(|e| RegistryError::Serde(e.to_string()))
            }
            None => Ok(BTreeMap::new()),
        }
    }

    async fn save_providers(
        &self,
        providers: &BTreeMap<String, ProviderRecord>,
    ) -> Result<(), RegistryError> {
        let raw =
            serde_json::to_string(providers).map_err(|e| RegistryError::Serde(e.to_string()))?;
        self.store.put(PROVIDERS_KEY, &raw).await?;
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<ProviderRecord>, RegistryError> {
        Ok(self.load_providers().await?.into_values().collect())
    }

    /// Enabled providers as id/name/model summaries — the read-only listing
    /// endpoint the rest of the platform sees.
    pub async fn list_enabled(&self) -> Result<Vec<ProviderSummary>, RegistryError> {
        Ok(self
            .load_providers()
            .await?
            .values()
            .filter(|p| p.enabled)
            .map(ProviderSummary::from)
            .collect())
    }

    pub async fn get(&self, id: &str) -> Result<Option<ProviderRecord>, RegistryError> {
        Ok(self.load_providers().await?.remove(id))
    }

    pub async fn create(&self, new: NewProvider) -> Result<ProviderRecord, RegistryError> {
        let mut providers = self.load_providers().await?;
        if providers.values().any(|p| p.name == new.name) {
            return Err(RegistryError::DuplicateName(new.name));
        }

        let now = Utc::now();
        let record = ProviderRecord {
            id: Uuid::new_v4().to_string(),
            name: new.name,
            base_url: new.base_url,
            model: new.model,
            api_key: new.api_key,
            enabled: new.enabled,
            created_at: now,
            updated_at: now,
        };
        providers.insert(record.id.clone(), record.clone());
        self.save_providers(&providers).await?;
        Ok(record)
    }

    pub async fn update(
        &self,
        id: &str,
        update: ProviderUpdate,
    ) -> Result<ProviderRecord, RegistryError> {
        let mut providers = self.load_providers().await?;
        if let Some(name) = &update.name {
            if providers.values().any(|p| p.id != id && &p.name == name) {
                return Err(RegistryError::DuplicateName(name.clone()));
            }
        }

        let record = providers
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;

        if let Some(name) = update.name {
            record.name = name;
        }
        if let Some(base_url) = update.base_url {
            record.base_url = base_url;
        }
        if let Some(model) = update.model {
            record.model = model;
        }
        if let Some(api_key) = update.api_key {
            // Empty key means "keep the stored secret".
            if !api_key.is_empty() {
                record.api_key = api_key;
            }
        }
        if let Some(enabled) = update.enabled {
            record.enabled = enabled;
        }
        record.updated_at = Utc::now();

        let updated = record.clone();
        self.save_providers(&providers).await?;
        Ok(updated)
    }

    pub async fn delete(&self, id: &str) -> Result<(), RegistryError> {
        let mut providers = self.load_providers().await?;
        if providers.remove(id).is_none() {
            return Err(RegistryError::NotFound(id.to_string()));
        }
        self.save_providers(&providers).await
    }

    /// Resolve the requested provider ids into call-ready endpoints.
    ///
    /// Fail-fast: any unknown or disabled id fails the whole request.
    /// Capabilities are detected here, once, so a job runs against a
    /// consistent snapshot even if configuration changes concurrently.
    pub async fn snapshot(&self, ids: &[String]) -> Result<Vec<JudgeEndpoint>, RegistryError> {
        let providers = self.load_providers().await?;
        let mut endpoints = Vec::with_capacity(ids.len());
        for id in ids {
            let record = providers
                .get(id)
                .ok_or_else(|| RegistryError::NotFound(id.clone()))?;
            if !record.enabled {
                return Err(RegistryError::Disabled(id.clone()));
            }
            endpoints.push(JudgeEndpoint {
                id: record.id.clone(),
                name: record.name.clone(),
                base_url: record.base_url.clone(),
                model: record.model.clone(),
                api_key: record.api_key.clone(),
                capabilities: ProviderCapabilities::detect(&record.base_url),
            });
        }
        Ok(endpoints)
    }

    pub async fn prompt_overrides(&self) -> Result<PromptOverrides, RegistryError> {
        match self.store.get(PROMPTS_KEY).await? {
            Some(raw) => {
                serde_json::from_str(&raw).map_err(|e| RegistryError::Serde(e.to_string()))
            }
            None => Ok(PromptOverrides::default()),
        }
    }

    pub async fn set_prompt_overrides(
        &self,
        overrides: &PromptOverrides,
    ) -> Result<(), RegistryError> {
        let raw =
            serde_json::to_string(overrides).map_err(|e| RegistryError::Serde(e.to_string()))?;
        self.store.put(PROMPTS_KEY, &raw).await?;
        Ok(())
    }
}
