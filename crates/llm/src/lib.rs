pub mod anthropic;
pub mod http;
pub mod models;
pub mod openai;
pub mod provider;

pub use http::{ProviderKind, ProviderSettings, connect};
pub use provider::*;
