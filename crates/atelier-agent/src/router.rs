//! Model-name → provider adapter routing.

use std::sync::Arc;

use atelier_core::config::ProvidersConfig;

use crate::anthropic::AnthropicAdapter;
use crate::gemini::GeminiAdapter;
use crate::openai::OpenAiAdapter;
use crate::provider::{ProviderAdapter, ProviderError};

/// Holds one adapter per configured wire protocol and picks by model name:
/// `claude*` → Anthropic, `*gemini*` → Gemini, everything else →
/// OpenAI-compatible.
pub struct ProviderRouter {
    openai: Option<Arc<dyn ProviderAdapter>>,
    anthropic: Option<Arc<dyn ProviderAdapter>>,
    gemini: Option<Arc<dyn ProviderAdapter>>,
}

impl ProviderRouter {
    pub fn from_config(providers: &ProvidersConfig) -> Self {
        let openai = providers.openai.as_ref().map(|c| {
            Arc::new(OpenAiAdapter::with_path(
                "openai",
                c.api_key.clone(),
                c.base_url.clone(),
                c.chat_path.clone(),
            )) as Arc<dyn ProviderAdapter>
        });
        let anthropic = providers.anthropic.as_ref().map(|c| {
            Arc::new(AnthropicAdapter::new(
                c.api_key.clone(),
                Some(c.base_url.clone()),
            )) as Arc<dyn ProviderAdapter>
        });
        let gemini = providers.gemini.as_ref().map(|c| {
            Arc::new(GeminiAdapter::new(
                c.api_key.clone(),
                Some(c.base_url.clone()),
            )) as Arc<dyn ProviderAdapter>
        });
        Self {
            openai,
            anthropic,
            gemini,
        }
    }

    /// Build a router from pre-constructed adapters (used by tests).
    pub fn from_adapters(
        openai: Option<Arc<dyn ProviderAdapter>>,
        anthropic: Option<Arc<dyn ProviderAdapter>>,
        gemini: Option<Arc<dyn ProviderAdapter>>,
    ) -> Self {
        Self {
            openai,
            anthropic,
            gemini,
        }
    }

    pub fn adapter_for(&self, model: &str) -> Result<Arc<dyn ProviderAdapter>, ProviderError> {
        let lower = model.to_lowercase();
        let slot = if lower.starts_with("claude") {
            &self.anthropic
        } else if lower.contains("gemini") {
            &self.gemini
        } else {
            &self.openai
        };
        slot.clone().ok_or_else(|| ProviderError::Api {
            status: 0,
            message: format!("no provider configured for model '{model}'"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atelier_core::config::{AnthropicConfig, GeminiConfig, OpenAiProviderConfig};

    fn full_config() -> ProvidersConfig {
        ProvidersConfig {
            openai: Some(OpenAiProviderConfig {
                api_key: "k".into(),
                base_url: "https://api.openai.com".into(),
                chat_path: "/v1/chat/completions".into(),
            }),
            anthropic: Some(AnthropicConfig {
                api_key: "k".into(),
                base_url: "https://api.anthropic.com".into(),
            }),
            gemini: Some(GeminiConfig {
                api_key: "k".into(),
                base_url: "https://generativelanguage.googleapis.com".into(),
            }),
            search_api_key: None,
        }
    }

    #[test]
    fn routes_by_model_family() {
        let router = ProviderRouter::from_config(&full_config());
        assert_eq!(router.adapter_for("claude-sonnet-4").unwrap().name(), "anthropic");
        assert_eq!(router.adapter_for("gemini-2.5-pro").unwrap().name(), "gemini");
        assert_eq!(router.adapter_for("gpt-5").unwrap().name(), "openai");
        assert_eq!(router.adapter_for("glm-4.7").unwrap().name(), "openai");
    }

    #[test]
    fn unconfigured_provider_is_an_error() {
        let router = ProviderRouter::from_adapters(None, None, None);
        assert!(router.adapter_for("gpt-5").is_err());
    }
}
