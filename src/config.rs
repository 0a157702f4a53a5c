//! Provider configuration helpers for LM Studio, Ollama, llama.cpp, and vLLM.
//!
//! Simplifies endpoint and model name resolution with environment variable support: each
//! [`Provider`] knows its own conventional default base URL and model, and both can be
//! overridden per-process via environment variables without touching code.

/// One of the OpenAI-compatible local/self-hosted inference servers this SDK's default
/// provider adapter targets out of the box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    LMStudio,
    Ollama,
    LlamaCpp,
    VLLM,
}

impl Provider {
    /// The environment variable consulted to override this provider's base URL.
    fn base_url_env_var(&self) -> &'static str {
        match self {
            Provider::LMStudio => "LMSTUDIO_BASE_URL",
            Provider::Ollama => "OLLAMA_BASE_URL",
            Provider::LlamaCpp => "LLAMACPP_BASE_URL",
            Provider::VLLM => "VLLM_BASE_URL",
        }
    }

    /// The environment variable consulted to override this provider's default model name.
    fn model_env_var(&self) -> &'static str {
        match self {
            Provider::LMStudio => "LMSTUDIO_MODEL",
            Provider::Ollama => "OLLAMA_MODEL",
            Provider::LlamaCpp => "LLAMACPP_MODEL",
            Provider::VLLM => "VLLM_MODEL",
        }
    }

    fn default_base_url(&self) -> &'static str {
        match self {
            Provider::LMStudio => "http://localhost:1234/v1",
            Provider::Ollama => "http://localhost:11434/v1",
            Provider::LlamaCpp => "http://localhost:8080/v1",
            Provider::VLLM => "http://localhost:8000/v1",
        }
    }

    fn default_model(&self) -> &'static str {
        match self {
            Provider::LMStudio => "local-model",
            Provider::Ollama => "llama3",
            Provider::LlamaCpp => "local-model",
            Provider::VLLM => "local-model",
        }
    }

    /// Resolve this provider's base URL: the environment variable override if set, else
    /// its conventional default.
    pub fn get_base_url(&self) -> String {
        std::env::var(self.base_url_env_var()).unwrap_or_else(|_| self.default_base_url().to_string())
    }

    /// Resolve this provider's default model name: the environment variable override if
    /// set, else its conventional default.
    pub fn get_model(&self) -> String {
        std::env::var(self.model_env_var()).unwrap_or_else(|_| self.default_model().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variable mutation is process-global; serialize these tests so they
    // don't race each other's env::set_var/remove_var calls.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn defaults_without_env_override() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::remove_var("OLLAMA_BASE_URL");
        std::env::remove_var("OLLAMA_MODEL");
        assert_eq!(Provider::Ollama.get_base_url(), "http://localhost:11434/v1");
        assert_eq!(Provider::Ollama.get_model(), "llama3");
    }

    #[test]
    fn env_var_overrides_base_url() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("LMSTUDIO_BASE_URL", "http://example.com/v1");
        assert_eq!(Provider::LMStudio.get_base_url(), "http://example.com/v1");
        std::env::remove_var("LMSTUDIO_BASE_URL");
    }

    #[test]
    fn env_var_overrides_model() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("VLLM_MODEL", "custom-model");
        assert_eq!(Provider::VLLM.get_model(), "custom-model");
        std::env::remove_var("VLLM_MODEL");
    }

    #[test]
    fn each_provider_has_distinct_defaults() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::remove_var("LMSTUDIO_BASE_URL");
        std::env::remove_var("LLAMACPP_BASE_URL");
        assert_ne!(Provider::LMStudio.get_base_url(), Provider::LlamaCpp.get_base_url());
    }
}
