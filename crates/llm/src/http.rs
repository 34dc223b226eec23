//! HTTP-based LLM providers.
//!
//! Supports OpenAI-compatible APIs (OpenAI, Google Gemini, DeepSeek, etc.)
//! and Anthropic's native Messages API. The backend is chosen once, when the
//! provider is built; callers only ever see `dyn LlmProvider`.

use std::sync::Arc;

use crate::anthropic::AnthropicProvider;
use crate::openai::OpenAiCompatProvider;
use crate::provider::{LlmError, LlmProvider, Role};

/// Inferred provider kind from model name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    Google,
    DeepSeek,
    /// Falls back to OpenAI-compatible format.
    Unknown,
}

impl ProviderKind {
    /// Infer provider from model name prefix.
    pub fn from_model(model: &str) -> Self {
        let m = model.to_lowercase();
        if m.starts_with("gpt-")
            || m.starts_with("o1-")
            || m.starts_with("o3-")
            || m.starts_with("o4-")
        {
            Self::OpenAi
        } else if m.starts_with("claude-") {
            Self::Anthropic
        } else if m.starts_with("gemini-") {
            Self::Google
        } else if m.starts_with("deepseek-") {
            Self::DeepSeek
        } else {
            Self::Unknown
        }
    }

    /// Parse an explicit provider name (`google`, `openai`, `anthropic`, `deepseek`).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "openai" => Some(Self::OpenAi),
            "anthropic" | "claude" => Some(Self::Anthropic),
            "google" | "gemini" => Some(Self::Google),
            "deepseek" => Some(Self::DeepSeek),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Google => "google",
            Self::DeepSeek => "deepseek",
            Self::Unknown => "unknown",
        }
    }

    pub(crate) fn default_base_url(self) -> &'static str {
        match self {
            Self::OpenAi | Self::Unknown => "https://api.openai.com/v1",
            Self::Anthropic => "https://api.anthropic.com",
            Self::Google => "https://generativelanguage.googleapis.com/v1beta/openai",
            Self::DeepSeek => "https://api.deepseek.com",
        }
    }

    /// Provider-specific API key variable consulted when `SCOUT_LLM_API_KEY` is unset.
    pub fn api_key_var(self) -> Option<&'static str> {
        match self {
            Self::OpenAi => Some("OPENAI_API_KEY"),
            Self::Anthropic => Some("ANTHROPIC_API_KEY"),
            Self::Google => Some("GOOGLE_API_KEY"),
            Self::DeepSeek => Some("DEEPSEEK_API_KEY"),
            Self::Unknown => None,
        }
    }
}

/// Everything needed to construct one backend.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub kind: ProviderKind,
    pub model: String,
    pub api_key: String,
    pub base_url: Option<String>,
}

impl ProviderSettings {
    /// Settings for `model`, inferring the provider from its name.
    pub fn for_model(model: impl Into<String>, api_key: impl Into<String>) -> Self {
        let model = model.into();
        Self {
            kind: ProviderKind::from_model(&model),
            model,
            api_key: api_key.into(),
            base_url: None,
        }
    }

    /// Read `SCOUT_LLM_PROVIDER`, `SCOUT_LLM_MODEL`, `SCOUT_LLM_API_KEY`
    /// (or the provider's own key variable), optionally `SCOUT_LLM_BASE_URL`.
    /// Returns `None` if the model or key is not set.
    pub fn from_env() -> Option<Self> {
        let explicit = std::env::var("SCOUT_LLM_PROVIDER")
            .ok()
            .and_then(|p| ProviderKind::from_name(&p));
        let model = match std::env::var("SCOUT_LLM_MODEL") {
            Ok(m) => m,
            Err(_) => crate::models::default_model(explicit?)?.to_owned(),
        };
        let kind = explicit.unwrap_or_else(|| ProviderKind::from_model(&model));
        let api_key = std::env::var("SCOUT_LLM_API_KEY")
            .ok()
            .or_else(|| kind.api_key_var().and_then(|v| std::env::var(v).ok()))?;
        let base_url = std::env::var("SCOUT_LLM_BASE_URL").ok();
        Some(Self { kind, model, api_key, base_url })
    }

    /// Same settings pointed at another provider/model, keeping the base URL
    /// only when the provider does not change.
    pub fn switch(&self, kind: ProviderKind, model: String, api_key: String) -> Self {
        let base_url = if kind == self.kind { self.base_url.clone() } else { None };
        Self { kind, model, api_key, base_url }
    }
}

/// Build the backend matching `settings.kind`.
pub fn connect(settings: ProviderSettings) -> Arc<dyn LlmProvider> {
    let ProviderSettings { kind, model, api_key, base_url } = settings;
    match kind {
        ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(model, api_key, base_url)),
        _ => Arc::new(OpenAiCompatProvider::new(kind, model, api_key, base_url)),
    }
}

pub(crate) fn role_str(role: &Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

/// Parse error response, returning RateLimited for 429.
pub(crate) fn check_error(status: reqwest::StatusCode, body: String) -> LlmError {
    if status.as_u16() == 429 {
        LlmError::RateLimited
    } else {
        LlmError::RequestFailed(format!("{status}: {body}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infer_openai_models() {
        assert_eq!(ProviderKind::from_model("gpt-4o"), ProviderKind::OpenAi);
        assert_eq!(ProviderKind::from_model("gpt-3.5-turbo"), ProviderKind::OpenAi);
        assert_eq!(ProviderKind::from_model("o1-preview"), ProviderKind::OpenAi);
        assert_eq!(ProviderKind::from_model("o3-mini"), ProviderKind::OpenAi);
    }

    #[test]
    fn infer_anthropic_models() {
        assert_eq!(ProviderKind::from_model("claude-3-opus"), ProviderKind::Anthropic);
        assert_eq!(ProviderKind::from_model("claude-3-5-haiku-20241022"), ProviderKind::Anthropic);
    }

    #[test]
    fn infer_google_and_deepseek_models() {
        assert_eq!(ProviderKind::from_model("gemini-1.5-flash"), ProviderKind::Google);
        assert_eq!(ProviderKind::from_model("deepseek-chat"), ProviderKind::DeepSeek);
    }

    #[test]
    fn infer_unknown_falls_back() {
        assert_eq!(ProviderKind::from_model("llama-3"), ProviderKind::Unknown);
        assert_eq!(ProviderKind::from_model("GPT-4o"), ProviderKind::OpenAi);
    }

    #[test]
    fn explicit_provider_names() {
        assert_eq!(ProviderKind::from_name("Google"), Some(ProviderKind::Google));
        assert_eq!(ProviderKind::from_name(" anthropic "), Some(ProviderKind::Anthropic));
        assert_eq!(ProviderKind::from_name("openai"), Some(ProviderKind::OpenAi));
        assert_eq!(ProviderKind::from_name("mistral"), None);
    }

    #[test]
    fn connect_selects_backend_by_kind() {
        let p = connect(ProviderSettings::for_model("claude-3-5-haiku-20241022", "k"));
        assert_eq!(p.name(), "anthropic");
        assert_eq!(p.model(), "claude-3-5-haiku-20241022");

        let p = connect(ProviderSettings::for_model("gemini-1.5-pro", "k"));
        assert_eq!(p.name(), "google");

        let p = connect(ProviderSettings::for_model("gpt-4o", "k"));
        assert_eq!(p.name(), "openai");
    }

    #[test]
    fn switch_drops_base_url_across_providers() {
        let mut s = ProviderSettings::for_model("gpt-4o", "k");
        s.base_url = Some("https://proxy.local/v1".into());
        let same = s.switch(ProviderKind::OpenAi, "gpt-4o-mini".into(), "k".into());
        assert_eq!(same.base_url.as_deref(), Some("https://proxy.local/v1"));
        let other = s.switch(ProviderKind::Anthropic, "claude-3-opus-20240229".into(), "k2".into());
        assert!(other.base_url.is_none());
    }
}
