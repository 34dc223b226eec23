//! Static model catalogue per provider.

use crate::http::ProviderKind;

const GOOGLE: &[&str] = &[
    "gemini-2.0-flash-exp",
    "gemini-1.5-pro",
    "gemini-1.5-flash",
    "gemini-1.5-flash-8b",
];

const OPENAI: &[&str] = &["gpt-4o", "gpt-4o-mini", "gpt-4-turbo", "gpt-3.5-turbo"];

const ANTHROPIC: &[&str] = &[
    "claude-3-5-sonnet-20241022",
    "claude-3-5-haiku-20241022",
    "claude-3-opus-20240229",
];

const DEEPSEEK: &[&str] = &["deepseek-chat", "deepseek-reasoner"];

/// Known models for `kind`; empty for providers we know nothing about.
pub fn fallback_models(kind: ProviderKind) -> &'static [&'static str] {
    match kind {
        ProviderKind::Google => GOOGLE,
        ProviderKind::OpenAi => OPENAI,
        ProviderKind::Anthropic => ANTHROPIC,
        ProviderKind::DeepSeek => DEEPSEEK,
        ProviderKind::Unknown => &[],
    }
}

pub fn default_model(kind: ProviderKind) -> Option<&'static str> {
    fallback_models(kind).first().copied()
}
