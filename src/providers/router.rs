use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use url::Url;

use super::openai::OpenAiCompatClient;
use super::traits::Completion;
use super::types::{ApiType, ProviderError, API_PREFERENCE};
use crate::config::{AppConfig, Secrets};

const OPENAI_BASE_URL: &str = "https://api.openai.com";

/// Credential-gated provider catalog. An API is *available* when all its
/// required keys are present; it additionally has a *backend* when a
/// built-in client speaks its wire shape. Model aliases resolve per API,
/// with unknown aliases passed through as literal model names.
pub struct ProviderRouter {
    backends: HashMap<ApiType, Arc<dyn Completion>>,
    available: Vec<ApiType>,
    aliases: HashMap<ApiType, HashMap<String, String>>,
    default_api: Option<ApiType>,
}

impl ProviderRouter {
    pub fn from_config(config: &AppConfig, secrets: &Secrets) -> Self {
        let mut backends: HashMap<ApiType, Arc<dyn Completion>> = HashMap::new();
        let mut available = Vec::new();

        for api in API_PREFERENCE {
            let credentialed = api
                .required_keys()
                .iter()
                .all(|key| secrets.get(key).is_some_and(|v| !v.is_empty()));
            if !credentialed {
                tracing::debug!(api = %api, "provider disabled, missing credentials");
                continue;
            }
            match Self::build_backend(api, secrets) {
                Ok(Some(backend)) => {
                    backends.insert(api, backend);
                    available.push(api);
                }
                Ok(None) => available.push(api),
                Err(reason) => {
                    tracing::warn!(api = %api, %reason, "provider disabled");
                }
            }
        }
        tracing::info!(
            available = ?available.iter().map(|a| a.as_str()).collect::<Vec<_>>(),
            "provider catalog ready"
        );

        let default_api = config.llm.default_api.as_deref().and_then(|name| {
            ApiType::from_str(name)
                .map_err(|reason| tracing::warn!(%reason, "ignoring default_api"))
                .ok()
        });

        let mut aliases = default_aliases();
        for (api_name, table) in &config.llm.aliases {
            let Ok(api) = ApiType::from_str(api_name) else {
                tracing::warn!(api = %api_name, "ignoring alias table for unknown api");
                continue;
            };
            aliases.entry(api).or_default().extend(table.clone());
        }

        Self {
            backends,
            available,
            aliases,
            default_api,
        }
    }

    fn build_backend(
        api: ApiType,
        secrets: &Secrets,
    ) -> Result<Option<Arc<dyn Completion>>, String> {
        match api {
            ApiType::OpenAi => {
                let base = Url::parse(OPENAI_BASE_URL).map_err(|e| e.to_string())?;
                let key = secrets.get("OPENAI_API_KEY");
                Ok(Some(Arc::new(OpenAiCompatClient::new(base, key))))
            }
            ApiType::Ollama => {
                let endpoint = secrets
                    .get("OLLAMA_ENDPOINT")
                    .ok_or_else(|| "OLLAMA_ENDPOINT unset".to_string())?;
                let base = Url::parse(&endpoint)
                    .map_err(|e| format!("invalid OLLAMA_ENDPOINT {endpoint:?}: {e}"))?;
                Ok(Some(Arc::new(OpenAiCompatClient::new(base, None))))
            }
            // Catalogued for credential reporting; no built-in client.
            ApiType::Azure | ApiType::Anthropic | ApiType::Bedrock | ApiType::Google => Ok(None),
        }
    }

    pub fn available(&self) -> &[ApiType] {
        &self.available
    }

    /// Pick a backend and concrete model: the unit's forced API wins, then
    /// the configured default, then the first credentialed API.
    pub fn resolve(
        &self,
        force_api: Option<ApiType>,
        model_alias: &str,
    ) -> Result<(Arc<dyn Completion>, String), ProviderError> {
        let api = match force_api.or(self.default_api) {
            Some(api) => api,
            None => *self
                .available
                .first()
                .ok_or(ProviderError::NoneAvailable)?,
        };
        if !self.available.contains(&api) {
            return Err(ProviderError::MissingCredentials(api));
        }
        let backend = self
            .backends
            .get(&api)
            .cloned()
            .ok_or(ProviderError::Unsupported(api))?;
        let model = self
            .aliases
            .get(&api)
            .and_then(|table| table.get(model_alias))
            .cloned()
            .unwrap_or_else(|| model_alias.to_string());
        Ok((backend, model))
    }

    #[cfg(test)]
    pub(crate) fn with_backend(api: ApiType, backend: Arc<dyn Completion>) -> Self {
        Self {
            backends: HashMap::from([(api, backend)]),
            available: vec![api],
            aliases: default_aliases(),
            default_api: Some(api),
        }
    }
}

fn default_aliases() -> HashMap<ApiType, HashMap<String, String>> {
    let mut aliases = HashMap::new();
    aliases.insert(
        ApiType::OpenAi,
        HashMap::from([
            ("A".to_string(), "gpt-4o-mini".to_string()),
            ("B".to_string(), "gpt-4o".to_string()),
        ]),
    );
    aliases.insert(
        ApiType::Anthropic,
        HashMap::from([
            ("A".to_string(), "claude-3-5-haiku-latest".to_string()),
            ("B".to_string(), "claude-3-5-sonnet-latest".to_string()),
        ]),
    );
    aliases.insert(
        ApiType::Ollama,
        HashMap::from([
            ("A".to_string(), "llama3.2".to_string()),
            ("B".to_string(), "llama3.1".to_string()),
        ]),
    );
    aliases
}
