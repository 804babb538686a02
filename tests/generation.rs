use std::time::{Duration, Instant};

use assert_matches::assert_matches;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use scholar_mcp::config::GenerationConfig;
use scholar_mcp::domain::generation::{GenerationOptions, Generator};
use scholar_mcp::infrastructure::GeminiGenerator;
use scholar_mcp::RagError;

const GENERATE_PATH: &str = "/v1beta/models/gemini-pro:generateContent";
const STREAM_PATH: &str = "/v1beta/models/gemini-pro:streamGenerateContent";

fn test_config(base_url: String) -> GenerationConfig {
    GenerationConfig {
        base_url,
        model: "gemini-pro".to_string(),
        api_key: Some("test-key".to_string()),
        timeout_secs: 1,
        max_retries: 2,
        retry_base_delay_ms: 10,
        min_chars: 10,
        ..GenerationConfig::default()
    }
}

fn candidate_body(text: &str) -> serde_json::Value {
    serde_json::json!({
        "candidates": [ { "content": { "parts": [ { "text": text } ] } } ]
    })
}

#[tokio::test]
async fn generate_returns_the_model_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .and(query_param("key", "test-key"))
        .and(body_partial_json(serde_json::json!({
            "generationConfig": { "temperature": 0.7, "topK": 50 }
        })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(candidate_body("A thorough summary of recent work.")),
        )
        .mount(&server)
        .await;

    let generator = GeminiGenerator::new(&test_config(server.uri())).unwrap();
    let text = generator
        .generate("Summarize the latest research on testing:", &GenerationOptions::default(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(text, "A thorough summary of recent work.");
}

#[tokio::test]
async fn transient_provider_error_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(candidate_body("Recovered on the second attempt.")))
        .mount(&server)
        .await;

    let generator = GeminiGenerator::new(&test_config(server.uri())).unwrap();
    let text = generator
        .generate("flaky provider prompt", &GenerationOptions::default(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(text, "Recovered on the second attempt.");
}

#[tokio::test]
async fn persistent_failure_reports_the_attempt_count() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let generator = GeminiGenerator::new(&test_config(server.uri())).unwrap();
    let result = generator
        .generate("provider is down", &GenerationOptions::default(), &CancellationToken::new())
        .await;
    assert_matches!(result, Err(RagError::GenerationFailed { attempts: 3, .. }));
}

#[tokio::test]
async fn too_short_responses_count_as_failures() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(candidate_body("short")))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(candidate_body("A usable, full-length answer.")),
        )
        .mount(&server)
        .await;

    let generator = GeminiGenerator::new(&test_config(server.uri())).unwrap();
    let text = generator
        .generate("needs a real answer", &GenerationOptions::default(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(text, "A usable, full-length answer.");
}

#[tokio::test]
async fn a_timed_out_attempt_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(candidate_body("too late to matter, sadly"))
                .set_delay(Duration::from_secs(5)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let generator = GeminiGenerator::new(&test_config(server.uri())).unwrap();
    let started = Instant::now();
    let result = generator
        .generate("slow provider", &GenerationOptions::default(), &CancellationToken::new())
        .await;
    let elapsed = started.elapsed();

    assert_matches!(result, Err(RagError::GenerationTimeout(_)));
    assert!(elapsed >= Duration::from_secs(1));
    assert!(elapsed < Duration::from_secs(3), "timeout must not be retried");
}

#[tokio::test]
async fn empty_prompt_after_sanitization_is_invalid_input() {
    let server = MockServer::start().await;
    let generator = GeminiGenerator::new(&test_config(server.uri())).unwrap();
    let result = generator.generate("<<<>>>", &GenerationOptions::default(), &CancellationToken::new()).await;
    assert_matches!(result, Err(RagError::InvalidInput(_)));
}

#[tokio::test]
async fn streaming_yields_chunks_in_order() {
    let server = MockServer::start().await;
    let sse = concat!(
        "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Recent \"}]}}]}\n\n",
        "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"studies \"}]}}]}\n\n",
        "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"agree.\"}]}}]}\n\n",
        "data: [DONE]\n\n",
    );
    Mock::given(method("POST"))
        .and(path(STREAM_PATH))
        .and(query_param("alt", "sse"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(sse.as_bytes().to_vec(), "text/event-stream"),
        )
        .mount(&server)
        .await;

    let generator = GeminiGenerator::new(&test_config(server.uri())).unwrap();
    let stream = generator
        .generate_streaming("streaming prompt", &GenerationOptions::default(), &CancellationToken::new())
        .await
        .unwrap();
    let chunks: Vec<String> = stream
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .collect::<Result<_, _>>()
        .unwrap();

    assert_eq!(chunks, vec!["Recent ", "studies ", "agree."]);
}

#[tokio::test]
async fn streaming_surfaces_an_error_status_before_the_stream_opens() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(STREAM_PATH))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let generator = GeminiGenerator::new(&test_config(server.uri())).unwrap();
    let result = generator
        .generate_streaming("rate limited", &GenerationOptions::default(), &CancellationToken::new())
        .await;
    assert_matches!(result.err(), Some(RagError::GenerationFailed { .. }));
}

#[tokio::test]
async fn a_cancelled_token_prevents_any_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(candidate_body("never requested")))
        .expect(0)
        .mount(&server)
        .await;

    let generator = GeminiGenerator::new(&test_config(server.uri())).unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = generator
        .generate("already abandoned", &GenerationOptions::default(), &cancel)
        .await;
    assert_matches!(result, Err(RagError::Cancelled));
}

#[tokio::test]
async fn cancellation_during_backoff_stops_retrying() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let config = GenerationConfig {
        retry_base_delay_ms: 5_000,
        ..test_config(server.uri())
    };
    let generator = GeminiGenerator::new(&config).unwrap();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let result = generator
        .generate("client walked away", &GenerationOptions::default(), &cancel)
        .await;

    assert_matches!(result, Err(RagError::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(2), "backoff must not run out");
}
