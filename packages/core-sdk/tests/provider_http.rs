use std::sync::Arc;
use std::time::Duration;

use dbplanner_core_sdk::assist::{self, DesignInputs, SuggestionKind, SQL_SYSTEM};
use dbplanner_core_sdk::llm::Endpoints;
use dbplanner_core_sdk::models::{ConversationRequest, ProviderConfig, ProviderKind, Role, Turn};
use dbplanner_core_sdk::{ChatBackend, ChatError, ChatSession, LlmClient, Submission};
use serde_json::json;
use wiremock::matchers::{body_json, body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer, timeout: Duration) -> LlmClient {
    LlmClient::with_endpoints(
        Endpoints {
            mistral_base: server.uri(),
            gemini_base: server.uri(),
        },
        timeout,
    )
    .expect("build client")
}

fn session_for(server: &MockServer, config: ProviderConfig) -> ChatSession {
    let backend: Arc<dyn ChatBackend> = Arc::new(client_for(server, Duration::from_secs(5)));
    let session = ChatSession::new("You are on the Logical Design page.", backend);
    session.configure(config);
    session
}

#[tokio::test]
async fn test_mistral_exchange_appends_both_turns() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({
            "messages": [
                {"role": "system", "content": "You are a helpful AI assistant for database design. You are on the Logical Design page."},
                {"role": "user", "content": "hello"}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": "hi there"}}]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let session = session_for(&mock_server, ProviderConfig::new(ProviderKind::Mistral, "test-key"));
    let out = session.submit("hello").await.expect("submit");

    assert_eq!(out, Submission::Replied("hi there".to_string()));
    assert_eq!(
        session.transcript(),
        vec![Turn::user("hello"), Turn::assistant("hi there")]
    );
    assert!(!session.is_pending());
}

#[tokio::test]
async fn test_gemini_key_in_query_and_model_role() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/models/gemini-pro:generateContent"))
        .and(query_param("key", "g-key"))
        .and(body_partial_json(json!({
            "contents": [
                {"role": "system", "parts": [{"text": "You are a helpful AI assistant for database design. You are on the Logical Design page."}]},
                {"role": "user", "parts": [{"text": "first"}]},
                {"role": "model", "parts": [{"text": "answer"}]},
                {"role": "user", "parts": [{"text": "second"}]}
            ],
            "generationConfig": {"temperature": 0.2}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{"content": {"parts": [{"text": "from gemini"}]}}]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut cfg = ProviderConfig::new(ProviderKind::Gemini, "g-key");
    cfg.model = "gemini-pro".to_string();
    cfg.temperature = 0.2;
    let conversation = ConversationRequest::new(
        "You are a helpful AI assistant for database design. You are on the Logical Design page.",
        vec![Turn::user("first"), Turn::assistant("answer")],
        "second",
    );

    let reply = client_for(&mock_server, Duration::from_secs(5))
        .complete(&cfg, &conversation)
        .await
        .expect("complete");
    assert_eq!(reply, "from gemini");
}

#[tokio::test]
async fn test_gemini_missing_candidates_is_malformed() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"promptFeedback": {}})))
        .mount(&mock_server)
        .await;

    let session = session_for(&mock_server, ProviderConfig::new(ProviderKind::Gemini, "g-key"));
    let err = session.submit("x").await.unwrap_err();

    assert!(matches!(
        err,
        ChatError::MalformedResponse {
            provider: ProviderKind::Gemini,
            ..
        }
    ));
    let transcript = session.transcript();
    assert_eq!(transcript.len(), 1);
    assert_eq!(transcript[0].role, Role::User);
    assert_eq!(transcript[0].content, "x");
}

#[tokio::test]
async fn test_custom_falls_back_to_response_field() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(header("authorization", "Bearer c-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"response": "ok"})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut cfg = ProviderConfig::new(ProviderKind::Custom, "c-key");
    cfg.custom_endpoint = Some(format!("{}/api/chat", mock_server.uri()));
    let session = session_for(&mock_server, cfg);

    let out = session.submit("ping").await.expect("submit");
    assert_eq!(out, Submission::Replied("ok".to_string()));
}

#[tokio::test]
async fn test_custom_without_known_fields_uses_placeholder() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": 1})))
        .mount(&mock_server)
        .await;

    let mut cfg = ProviderConfig::new(ProviderKind::Custom, "c-key");
    cfg.custom_endpoint = Some(mock_server.uri());
    let session = session_for(&mock_server, cfg);

    let out = session.submit("ping").await.expect("submit");
    assert_eq!(out, Submission::Replied("No response from API".to_string()));
}

#[tokio::test]
async fn test_non_success_status_keeps_user_turn() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_string("Unauthorized"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let session = session_for(&mock_server, ProviderConfig::new(ProviderKind::Mistral, "bad"));
    let err = session.submit("hello").await.unwrap_err();

    match &err {
        ChatError::ProviderError {
            provider,
            status,
            body,
        } => {
            assert_eq!(*provider, ProviderKind::Mistral);
            assert_eq!(*status, 401);
            assert_eq!(body, "Unauthorized");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.to_string(), "Mistral API error: 401 Unauthorized");
    assert_eq!(session.transcript(), vec![Turn::user("hello")]);
    assert!(!session.is_pending());
}

#[tokio::test]
async fn test_invalid_config_never_reaches_network() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"response": "unused"})))
        .expect(0)
        .mount(&mock_server)
        .await;

    for kind in ProviderKind::ALL {
        let session = session_for(&mock_server, ProviderConfig::new(kind, "  "));
        let err = session.submit("hello").await.unwrap_err();
        assert!(matches!(err, ChatError::CredentialMissing), "{kind}: {err}");
        assert!(session.transcript().is_empty());
    }

    let session = session_for(&mock_server, ProviderConfig::new(ProviderKind::Custom, "k"));
    let err = session.submit("hello").await.unwrap_err();
    assert!(matches!(err, ChatError::EndpointMissing));
    assert!(session.transcript().is_empty());
}

#[tokio::test]
async fn test_slow_provider_times_out() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_secs(2))
                .set_body_json(json!({"choices": [{"message": {"content": "late"}}]})),
        )
        .mount(&mock_server)
        .await;

    let backend: Arc<dyn ChatBackend> =
        Arc::new(client_for(&mock_server, Duration::from_millis(200)));
    let session = ChatSession::new("", backend);
    session.configure(ProviderConfig::new(ProviderKind::Mistral, "k"));

    let err = session.submit("hello").await.unwrap_err();
    assert!(matches!(err, ChatError::Timeout(_)), "{err}");
    assert_eq!(session.transcript(), vec![Turn::user("hello")]);
    assert!(!session.is_pending());
}

#[tokio::test]
async fn test_gemini_generation_sends_single_user_content() {
    let mock_server = MockServer::start().await;

    let inputs = DesignInputs {
        entities: "Customer".to_string(),
        ..DesignInputs::default()
    };
    let prompt = assist::build_prompt(SuggestionKind::Tables, &inputs).expect("prompt");

    Mock::given(method("POST"))
        .and(path("/v1/models/gemini-pro:generateContent"))
        .and(query_param("key", "g-key"))
        .and(body_json(json!({
            "contents": [{"role": "user", "parts": [{"text": prompt}]}],
            "generationConfig": {"temperature": 0.7}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{"content": {"parts": [{"text": "CREATE TABLE customer (id INT);"}]}}]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut cfg = ProviderConfig::new(ProviderKind::Gemini, "g-key");
    cfg.model = "gemini-pro".to_string();
    let client = client_for(&mock_server, Duration::from_secs(5));

    let suggestion = assist::generate(&client, Some(&cfg), SuggestionKind::Tables, &inputs, "")
        .await
        .expect("generate");
    assert_eq!(suggestion.merged, "CREATE TABLE customer (id INT);");
}

#[tokio::test]
async fn test_mistral_generation_uses_sql_instruction_for_tables() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({
            "messages": [{"role": "system", "content": SQL_SYSTEM}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"content": "CREATE TABLE t (id INT);"}}]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let inputs = DesignInputs {
        entities: "Customer".to_string(),
        ..DesignInputs::default()
    };
    let cfg = ProviderConfig::new(ProviderKind::Mistral, "k");
    let client = client_for(&mock_server, Duration::from_secs(5));
    let suggestion = assist::generate(&client, Some(&cfg), SuggestionKind::Tables, &inputs, "")
        .await
        .expect("generate");
    assert_eq!(suggestion.reply, "CREATE TABLE t (id INT);");
}
