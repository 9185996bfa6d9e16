use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{AppConfig, LlmConfig};
use crate::errors::{SteadyhandError, SteadyhandResult};
use crate::llm::oracle::RoleOracle;
use crate::llm::provider::LlmProvider;
use crate::llm::providers::openai_compatible::OpenAiCompatibleProvider;
use crate::llm::types::CallConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OracleRole {
    /// Proposes and regenerates pointer commands.
    Planner,
    /// Judges whether an action landed.
    Verifier,
}

impl OracleRole {
    pub fn as_str(self) -> &'static str {
        match self {
            OracleRole::Planner => "planner",
            OracleRole::Verifier => "verifier",
        }
    }
}

/// Registry of all available LLM providers, keyed by their config.toml identifier.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    active: String,
    llm_config: LlmConfig,
}

impl ProviderRegistry {
    pub fn new(active: String) -> Self {
        Self {
            providers: HashMap::new(),
            active,
            llm_config: LlmConfig::default(),
        }
    }

    pub fn register(&mut self, provider: Arc<dyn LlmProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn get_active(&self) -> SteadyhandResult<Arc<dyn LlmProvider>> {
        self.providers.get(&self.active).cloned().ok_or_else(|| {
            SteadyhandError::Config(format!("Active provider '{}' not found in registry", self.active))
        })
    }

    pub fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Provider and call configuration for a role.
    ///
    /// Resolution order:
    /// 1. `[llm.roles.<role>]` in config.toml
    /// 2. Fallback: active provider with its default model / temperature, non-streaming
    pub fn call_config_for_role(&self, role: OracleRole) -> SteadyhandResult<(Arc<dyn LlmProvider>, CallConfig)> {
        let role_entry = match role {
            OracleRole::Planner => self.llm_config.roles.planner.as_ref(),
            OracleRole::Verifier => self.llm_config.roles.verifier.as_ref(),
        };

        if let Some(entry) = role_entry {
            let provider = self.providers.get(&entry.provider).cloned().ok_or_else(|| {
                SteadyhandError::Config(format!(
                    "Role '{}' references unknown provider '{}'",
                    role.as_str(),
                    entry.provider
                ))
            })?;
            let temperature = entry.temperature.unwrap_or_else(|| {
                self.llm_config
                    .providers
                    .get(&entry.provider)
                    .map(|p| p.temperature)
                    .unwrap_or(0.1)
            });
            tracing::debug!(
                role = role.as_str(),
                provider = %entry.provider,
                model = %entry.model,
                stream = entry.stream,
                temperature,
                "resolved role config"
            );
            return Ok((
                provider,
                CallConfig {
                    model: entry.model.clone(),
                    stream: entry.stream,
                    temperature,
                },
            ));
        }

        let provider = self.get_active()?;
        let (model, temperature) = self
            .llm_config
            .providers
            .get(&self.active)
            .map(|p| (p.model.clone(), p.temperature))
            .unwrap_or_else(|| (String::new(), 0.1));
        tracing::debug!(
            role = role.as_str(),
            provider = %self.active,
            model = %model,
            "role not configured, using active provider fallback"
        );
        Ok((
            provider,
            CallConfig {
                model,
                stream: false,
                temperature,
            },
        ))
    }

    /// Build an oracle for `role` with the given system prompt and call timeout.
    pub fn oracle_for_role(
        &self,
        role: OracleRole,
        system_prompt: &str,
        timeout: Duration,
    ) -> SteadyhandResult<RoleOracle> {
        let (provider, call) = self.call_config_for_role(role)?;
        Ok(RoleOracle::new(provider, call, system_prompt, timeout))
    }

    /// Build a registry from the loaded app config.
    /// API keys come from `STEADYHAND_<ID>_API_KEY`, falling back to the provider entry.
    pub fn from_config(config: &AppConfig) -> Self {
        let mut registry = Self {
            providers: HashMap::new(),
            active: config.llm.active_provider.clone(),
            llm_config: config.llm.clone(),
        };
        for (id, entry) in &config.llm.providers {
            let api_key = std::env::var(api_key_var(id))
                .unwrap_or_else(|_| entry.api_key.clone().unwrap_or_default());
            let provider = OpenAiCompatibleProvider::new(id.clone(), entry.api_base.clone(), api_key);
            registry.register(Arc::new(provider));
        }
        tracing::info!(providers = ?registry.list_names(), active = %registry.active, "provider registry built");
        registry
    }
}

fn api_key_var(provider_id: &str) -> String {
    format!(
        "STEADYHAND_{}_API_KEY",
        provider_id.to_uppercase().replace(['-', '.'], "_")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    fn config() -> AppConfig {
        parse_config(
            r#"
            [llm]
            active_provider = "local"

            [llm.providers.local]
            display_name = "Local"
            api_base = "http://localhost:8000/v1/chat/completions"
            model = "small-vl"
            temperature = 0.3

            [llm.providers.cloud]
            display_name = "Cloud"
            api_base = "https://example.invalid/v1/chat/completions"
            model = "big-vl"

            [llm.roles.verifier]
            provider = "cloud"
            model = "big-vl-judge"
            stream = true
            "#,
        )
        .unwrap()
    }

    #[test]
    fn roles_resolve_with_fallback() {
        let registry = ProviderRegistry::from_config(&config());
        assert_eq!(registry.list_names(), vec!["cloud".to_string(), "local".to_string()]);

        let (provider, call) = registry.call_config_for_role(OracleRole::Verifier).unwrap();
        assert_eq!(provider.name(), "cloud");
        assert_eq!(call.model, "big-vl-judge");
        assert!(call.stream);
        assert_eq!(call.temperature, 0.1);

        let (provider, call) = registry.call_config_for_role(OracleRole::Planner).unwrap();
        assert_eq!(provider.name(), "local");
        assert_eq!(call.model, "small-vl");
        assert!(!call.stream);
        assert_eq!(call.temperature, 0.3);
    }

    #[test]
    fn missing_active_provider_is_a_config_error() {
        let registry = ProviderRegistry::new("nowhere".into());
        assert!(matches!(
            registry.call_config_for_role(OracleRole::Planner),
            Err(SteadyhandError::Config(_))
        ));
    }

    #[test]
    fn api_key_variable_names() {
        assert_eq!(api_key_var("open-router"), "STEADYHAND_OPEN_ROUTER_API_KEY");
    }
}
