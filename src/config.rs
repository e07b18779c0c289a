// src/config.rs
// Provider configuration for the upstream integration core.
//
// The embedding application owns process bootstrap (§1 out-of-scope), but
// `from_env` is provided in the teacher's `config/helpers.rs` style
// (`env_or`, `require_env`) for standalone use and tests.

use serde::{Deserialize, Serialize};

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn require_env(key: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| panic!("missing required env var: {key}"))
}

/// Which credential flavor a provider config uses (§4.E).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    Social,
    Idc,
}

/// User-supplied model mapping rule, consulted after the caller's exact map
/// and before the built-in defaults (§4.C).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMapRule {
    pub pattern: String,
    pub target: String,
}

/// Immutable, shared, read-only-for-the-request provider configuration
/// (§3 "Provider config").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub auth_method: AuthMethod,
    pub refresh_token: String,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub model_exact_map: std::collections::HashMap<String, String>,
    #[serde(default)]
    pub model_rules: Vec<ModelMapRule>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl ProviderConfig {
    pub fn social(refresh_token: impl Into<String>) -> Self {
        Self {
            auth_method: AuthMethod::Social,
            refresh_token: refresh_token.into(),
            client_id: None,
            client_secret: None,
            region: default_region(),
            model_exact_map: Default::default(),
            model_rules: Vec::new(),
        }
    }

    pub fn idc(
        refresh_token: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            auth_method: AuthMethod::Idc,
            refresh_token: refresh_token.into(),
            client_id: Some(client_id.into()),
            client_secret: Some(client_secret.into()),
            region: default_region(),
            model_exact_map: Default::default(),
            model_rules: Vec::new(),
        }
    }

    /// Build a config from environment variables. Panics on missing
    /// required variables, matching the teacher's `require_env` idiom —
    /// this is a convenience for standalone binaries/tests, not the path
    /// the enclosing gateway uses in production (it builds `ProviderConfig`
    /// from its own admin-configured provider records).
    pub fn from_env() -> Self {
        let auth_method = match env_or("KIRO_AUTH_METHOD", "social").as_str() {
            "idc" => AuthMethod::Idc,
            _ => AuthMethod::Social,
        };

        Self {
            auth_method,
            refresh_token: require_env("KIRO_REFRESH_TOKEN"),
            client_id: std::env::var("KIRO_CLIENT_ID").ok(),
            client_secret: std::env::var("KIRO_CLIENT_SECRET").ok(),
            region: env_or("KIRO_REGION", "us-east-1"),
            model_exact_map: Default::default(),
            model_rules: Vec::new(),
        }
    }

    pub fn refresh_token_url(&self) -> &'static str {
        "https://prod.us-east-1.auth.desktop.kiro.dev/refreshToken"
    }

    pub fn oidc_token_url(&self) -> &'static str {
        "https://oidc.us-east-1.amazonaws.com/token"
    }

    pub fn generate_assistant_response_url(&self) -> String {
        format!(
            "https://codewhisperer.{}.amazonaws.com/generateAssistantResponse",
            self.region
        )
    }

    pub fn usage_limits_url(&self) -> String {
        "https://codewhisperer.us-east-1.amazonaws.com/getUsageLimits?isEmailRequired=true&origin=AI_EDITOR&resourceType=AGENTIC_REQUEST".to_string()
    }
}
