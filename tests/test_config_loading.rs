//! Configuration loading and validation tests
//!
//! Tests focus on behavior of loading, defaults, validation, and key lookup.

use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;
use tutor_router::config::{ConfigError, TutorConfig};
use tutor_router::session::Persona;

const MINIMAL: &str = r#"
[service]
id = "tutor-1"

[llm]
provider = "openai"
model = "gpt-4o-mini"
api_key_env = "OPENAI_API_KEY"
"#;

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    write!(temp_file, "{content}").unwrap();
    temp_file
}

#[test]
fn test_config_loads_successfully_from_minimal_toml() {
    let file = write_config(MINIMAL);
    let config = TutorConfig::load_from_file(file.path()).unwrap();

    assert_eq!(config.service.id, "tutor-1");
    assert_eq!(config.service.persona, Persona::Teacher);
    assert_eq!(config.service.health_port, 8080);
    assert_eq!(config.llm.model, "gpt-4o-mini");
    assert!(config.image.is_none());
}

#[test]
fn test_config_applies_section_defaults() {
    let config = TutorConfig::from_toml(MINIMAL).unwrap();

    assert_eq!(config.router_model(), "gpt-4o-mini");
    assert_eq!(config.embedding.dimensions, 1536);
    assert_eq!(config.vector_store.url, "http://localhost:6333");
    assert_eq!(config.retrieval.top_k, 5);
    assert_eq!(config.retrieval.score_threshold, None);

    let ingestion = config.ingestion_settings();
    assert_eq!(ingestion.chunk_size, 1000);
    assert_eq!(ingestion.chunk_overlap, 200);

    let sweep = config.sweep_config();
    assert_eq!(sweep.interval, Duration::from_secs(3600));
    assert_eq!(sweep.ttl, chrono::Duration::hours(24));
}

#[test]
fn test_config_loads_every_section() {
    let file = write_config(
        r#"
[service]
id = "student.tutor"
persona = "student"
health_port = 9090

[llm]
provider = "openai"
model = "gpt-4o"
api_key_env = "OPENAI_API_KEY"
base_url = "http://llm.internal/v1"
temperature = 0.4
max_tokens = 800

[router]
model = "gpt-4o-mini"
temperature = 0.0

[embedding]
model = "text-embedding-3-large"
dimensions = 3072
batch_size = 16
max_concurrency = 2

[vector_store]
url = "http://qdrant:6333"
api_key_env = "QDRANT_API_KEY"

[retrieval]
top_k = 8
score_threshold = 0.55
chunk_size = 500
chunk_overlap = 50

[session]
retain_messages = 20
recent_for_planner = 4

[sweep]
interval_secs = 600
ttl_hours = 48
scroll_limit = 200

[web_search]
api_key_env = "SEARCH_KEY"
max_results = 3

[image]
url = "http://images.internal/v1/predict"
api_key_env = "IMAGE_KEY"
enhance_prompts = false
backoff_ms = [10, 20]
"#,
    );

    let config = TutorConfig::load_from_file(file.path()).unwrap();

    assert_eq!(config.service.persona, Persona::Student);
    assert_eq!(config.service.health_port, 9090);
    assert_eq!(config.router_model(), "gpt-4o-mini");
    assert_eq!(config.llm.temperature, Some(0.4));
    assert_eq!(config.llm.max_tokens, Some(800));
    assert_eq!(config.retrieval.score_threshold, Some(0.55));

    let batching = config.embedding_batching();
    assert_eq!(batching.batch_size, 16);
    assert_eq!(batching.max_concurrency, 2);

    let history = config.history_settings();
    assert_eq!(history.retain_messages, 20);
    assert_eq!(history.recent_for_planner, 4);

    assert_eq!(config.sweep_config().ttl, chrono::Duration::hours(48));

    let image = config.image_client_config("k".to_string()).unwrap();
    assert_eq!(image.url, "http://images.internal/v1/predict");
    assert_eq!(
        image.backoff,
        vec![Duration::from_millis(10), Duration::from_millis(20)]
    );
    assert!(!config.image.as_ref().unwrap().enhance_prompts);
}

#[test]
fn test_config_returns_error_when_llm_section_missing() {
    let result = TutorConfig::from_toml(
        r#"
[service]
id = "tutor-1"
"#,
    );
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_config_returns_error_for_invalid_toml_syntax() {
    let file = write_config("[service\nid = ");
    assert!(matches!(
        TutorConfig::load_from_file(file.path()),
        Err(ConfigError::TomlParse(_))
    ));
}

#[test]
fn test_config_returns_error_for_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let result = TutorConfig::load_from_file(&dir.path().join("absent.toml"));
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_config_rejects_invalid_service_id() {
    let content = MINIMAL.replace("tutor-1", "tutor one!");
    assert!(matches!(
        TutorConfig::from_toml(&content),
        Err(ConfigError::InvalidServiceId(_))
    ));
}

#[test]
fn test_config_rejects_unsupported_provider() {
    let content = MINIMAL.replace("provider = \"openai\"", "provider = \"carrier-pigeon\"");
    assert!(matches!(
        TutorConfig::from_toml(&content),
        Err(ConfigError::InvalidConfig(_))
    ));
}

#[test]
fn test_config_rejects_overlap_not_smaller_than_chunk() {
    let content = format!("{MINIMAL}\n[retrieval]\nchunk_size = 100\nchunk_overlap = 100\n");
    match TutorConfig::from_toml(&content) {
        Err(ConfigError::InvalidConfig(message)) => assert!(message.contains("chunk_overlap")),
        other => panic!("expected InvalidConfig, got {other:?}"),
    }
}

#[test]
fn test_config_rejects_threshold_out_of_range() {
    let content = format!("{MINIMAL}\n[retrieval]\nscore_threshold = 1.5\n");
    assert!(matches!(
        TutorConfig::from_toml(&content),
        Err(ConfigError::InvalidConfig(_))
    ));
}

#[test]
fn test_config_rejects_empty_image_url() {
    let content = format!("{MINIMAL}\n[image]\nurl = \"\"\napi_key_env = \"IMAGE_KEY\"\n");
    assert!(matches!(
        TutorConfig::from_toml(&content),
        Err(ConfigError::InvalidConfig(_))
    ));
}

#[test]
fn test_config_resolves_api_keys_from_environment() {
    let content = MINIMAL.replace("OPENAI_API_KEY", "TUTOR_TEST_LLM_KEY_PRESENT");
    let config = TutorConfig::from_toml(&content).unwrap();

    std::env::set_var("TUTOR_TEST_LLM_KEY_PRESENT", "sk-test");
    assert_eq!(config.get_llm_api_key().unwrap(), "sk-test");
    std::env::remove_var("TUTOR_TEST_LLM_KEY_PRESENT");
}

#[test]
fn test_config_reports_missing_required_key() {
    let content = MINIMAL.replace("OPENAI_API_KEY", "TUTOR_TEST_LLM_KEY_ABSENT");
    let config = TutorConfig::from_toml(&content).unwrap();

    match config.get_llm_api_key() {
        Err(ConfigError::EnvVarNotFound(name)) => assert_eq!(name, "TUTOR_TEST_LLM_KEY_ABSENT"),
        other => panic!("expected EnvVarNotFound, got {other:?}"),
    }
}

#[test]
fn test_config_optional_web_search_key_disables_handler_when_empty() {
    let content = format!("{MINIMAL}\n[web_search]\napi_key_env = \"TUTOR_TEST_SEARCH_KEY_EMPTY\"\n");
    let config = TutorConfig::from_toml(&content).unwrap();

    std::env::set_var("TUTOR_TEST_SEARCH_KEY_EMPTY", "");
    assert_eq!(config.get_web_search_api_key(), None);
    std::env::remove_var("TUTOR_TEST_SEARCH_KEY_EMPTY");
}

#[test]
fn test_config_round_trips_through_toml() {
    let config = TutorConfig::from_toml(MINIMAL).unwrap();
    let rendered = toml::to_string_pretty(&config).unwrap();
    assert_eq!(TutorConfig::from_toml(&rendered).unwrap(), config);
}
