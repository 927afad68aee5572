use super::{non_empty, provider_index, uses_provider};
use crate::config::Config;
use crate::providers::ProviderKind;

#[test]
fn provider_index_follows_selector_resolution() {
    assert_eq!(provider_index("ollama"), 0);
    assert_eq!(provider_index("OLLAMA"), 0);
    assert_eq!(provider_index("openai"), 1);
    assert_eq!(provider_index("something-else"), 1);
}

#[test]
fn empty_input_is_rejected() {
    assert!(non_empty(&"llama3".to_string()).is_ok());
    assert!(non_empty(&String::new()).is_err());
    assert!(non_empty(&"   ".to_string()).is_err());
}

#[test]
fn provider_usage_follows_edits_to_config() {
    let mut config = Config::default();
    config.providers.embedding = "ollama".to_string();
    config.providers.generation = "ollama".to_string();
    assert!(uses_provider(&config, ProviderKind::Ollama));
    assert!(!uses_provider(&config, ProviderKind::OpenAi));

    config.providers.generation = "OpenAI".to_string();
    config.index.embedding_dimension = 1536;
    assert!(uses_provider(&config, ProviderKind::Ollama));
    assert!(uses_provider(&config, ProviderKind::OpenAi));
}
