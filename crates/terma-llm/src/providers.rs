use serde::Serialize;

/// One selectable model offered by a provider.
#[derive(Debug, Clone, Serialize)]
pub struct ModelEntry {
    pub id: &'static str,
    pub name: &'static str,
}

/// A provider in the static catalog exposed over the LLM management API.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderEntry {
    pub id: &'static str,
    pub name: &'static str,
    pub models: &'static [ModelEntry],
    pub default_model: &'static str,
}

static PROVIDERS: &[ProviderEntry] = &[
    ProviderEntry {
        id: "claude",
        name: "Claude",
        models: &[
            ModelEntry {
                id: "claude-3-opus-20240229",
                name: "Claude 3 Opus",
            },
            ModelEntry {
                id: "claude-3-sonnet-20240229",
                name: "Claude 3 Sonnet",
            },
            ModelEntry {
                id: "claude-3-haiku-20240307",
                name: "Claude 3 Haiku",
            },
        ],
        default_model: "claude-3-sonnet-20240229",
    },
    ProviderEntry {
        id: "openai",
        name: "OpenAI",
        models: &[
            ModelEntry {
                id: "gpt-4",
                name: "GPT-4",
            },
            ModelEntry {
                id: "gpt-4-turbo",
                name: "GPT-4 Turbo",
            },
            ModelEntry {
                id: "gpt-3.5-turbo",
                name: "GPT-3.5 Turbo",
            },
        ],
        default_model: "gpt-4",
    },
    ProviderEntry {
        id: "local",
        name: "Local LLM",
        models: &[
            ModelEntry {
                id: "mistral-7b",
                name: "Mistral 7B",
            },
            ModelEntry {
                id: "llama-2-13b",
                name: "LLaMA 2 13B",
            },
        ],
        default_model: "mistral-7b",
    },
];

pub fn providers() -> &'static [ProviderEntry] {
    PROVIDERS
}

pub fn provider(id: &str) -> Option<&'static ProviderEntry> {
    PROVIDERS.iter().find(|p| p.id == id)
}

/// Whether `model` is offered by `provider_id`.
pub fn model_exists(provider_id: &str, model: &str) -> bool {
    provider(provider_id)
        .map(|p| p.models.iter().any(|m| m.id == model))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_lists_known_providers() {
        let ids: Vec<&str> = providers().iter().map(|p| p.id).collect();
        assert!(ids.contains(&"claude"));
        assert!(ids.contains(&"openai"));
        assert!(ids.contains(&"local"));
    }

    #[test]
    fn default_models_exist_in_their_provider() {
        for p in providers() {
            assert!(
                model_exists(p.id, p.default_model),
                "default model of {} should be listed",
                p.id
            );
        }
    }

    #[test]
    fn unknown_provider_has_no_models() {
        assert!(provider("nope").is_none());
        assert!(!model_exists("nope", "claude-3-sonnet-20240229"));
    }
}
