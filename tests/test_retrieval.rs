//! Retrieval over the Qdrant REST client: ingestion, the relaxation ladder,
//! and the TTL sweep, with embeddings served by a mocked embeddings API

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tutor_router::llm::{Embedder, OpenAiEmbedder, OpenAiEmbedderConfig};
use tutor_router::retrieval::{
    CollectionKey, QdrantConfig, QdrantStore, RetrievalQuery, RetrievalStage, Retriever,
    SourceDocument, SweepConfig, TtlSweeper,
};
use tutor_router::session::LearnerProfile;
use tutor_router::testing::MockEmbedder;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn qdrant(server: &MockServer) -> Arc<QdrantStore> {
    Arc::new(
        QdrantStore::new(QdrantConfig {
            url: server.uri(),
            api_key: None,
            timeout: Duration::from_secs(5),
        })
        .unwrap(),
    )
}

fn session_key() -> CollectionKey {
    CollectionKey::session("chat-42", &LearnerProfile::default())
}

fn hit(text: &str, url: &str, score: f32) -> serde_json::Value {
    serde_json::json!({
        "id": "p-1",
        "version": 1,
        "score": score,
        "payload": {"text": text, "source": {"url": url, "chunk_index": 0}, "timestamp": 1}
    })
}

async fn mount_exists(server: &MockServer, name: &str, exists: bool) {
    Mock::given(method("GET"))
        .and(path(format!("/collections/{name}/exists")))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"result": {"exists": exists}})),
        )
        .mount(server)
        .await;
}

fn search_path(name: &str) -> String {
    format!("/collections/{name}/points/search")
}

#[tokio::test]
async fn test_ingestion_embeds_and_creates_collection() {
    let llm = MockServer::start().await;
    let db = MockServer::start().await;
    let key = session_key();

    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .and(header("Authorization", "Bearer embed-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "object": "list",
            "data": [
                {"object": "embedding", "index": 1, "embedding": [0.0, 1.0, 0.0]},
                {"object": "embedding", "index": 0, "embedding": [1.0, 0.0, 0.0]}
            ],
            "model": "text-embedding-3-small"
        })))
        .expect(1)
        .mount(&llm)
        .await;

    mount_exists(&db, key.name(), false).await;
    Mock::given(method("PUT"))
        .and(path(format!("/collections/{}", key.name())))
        .and(body_partial_json(serde_json::json!({"vectors": {"size": 3}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"result": true})))
        .expect(1)
        .mount(&db)
        .await;
    Mock::given(method("PUT"))
        .and(path(format!("/collections/{}/points", key.name())))
        .and(body_partial_json(serde_json::json!({
            "points": [
                {"vector": [1.0, 0.0, 0.0], "payload": {"text": "0123456789", "source": {"url": "http://files/a.txt", "chunk_index": 0}}},
                {"vector": [0.0, 1.0, 0.0], "payload": {"text": "abcdef", "source": {"url": "http://files/a.txt", "chunk_index": 1}}}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "result": {"operation_id": 7, "status": "completed"}
        })))
        .expect(1)
        .mount(&db)
        .await;

    let embedder = OpenAiEmbedder::new(OpenAiEmbedderConfig {
        api_key: "embed-key".to_string(),
        base_url: llm.uri(),
        dimensions: 3,
        ..Default::default()
    })
    .unwrap();
    assert_eq!(embedder.dimensions(), 3);

    let retriever = Retriever::new(qdrant(&db), Arc::new(embedder));
    let stored = retriever
        .store(
            &key,
            &[SourceDocument {
                url: "http://files/a.txt".to_string(),
                file_name: Some("a.txt".to_string()),
                text: "0123456789abcdef".to_string(),
            }],
            10,
            0,
        )
        .await
        .unwrap();

    assert_eq!(stored, 2);
}

#[tokio::test]
async fn test_threshold_hits_are_returned_directly() {
    let db = MockServer::start().await;
    let key = session_key();
    mount_exists(&db, key.name(), true).await;

    Mock::given(method("POST"))
        .and(path(search_path(key.name())))
        .and(body_partial_json(serde_json::json!({"score_threshold": 0.5, "limit": 4})))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "result": [hit("Mitosis has four phases", "http://files/bio.pdf", 0.82)]
        })))
        .expect(1)
        .mount(&db)
        .await;

    let retriever = Retriever::new(qdrant(&db), Arc::new(MockEmbedder::new(8)));
    let (docs, stage) = retriever
        .retrieve_with_stage(
            &key,
            RetrievalQuery {
                query: "phases of mitosis",
                top_k: 4,
                score_threshold: 0.5,
                url_filter: None,
            },
        )
        .await
        .unwrap();

    assert_eq!(stage, Some(RetrievalStage::Threshold));
    assert_eq!(docs[0].text, "Mitosis has four phases");
}

#[tokio::test]
async fn test_empty_threshold_search_relaxes_to_zero() {
    let db = MockServer::start().await;
    let key = session_key();
    mount_exists(&db, key.name(), true).await;

    Mock::given(method("POST"))
        .and(path(search_path(key.name())))
        .and(body_partial_json(serde_json::json!({"score_threshold": 0.5})))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"result": []})))
        .expect(1)
        .mount(&db)
        .await;
    Mock::given(method("POST"))
        .and(path(search_path(key.name())))
        .and(body_partial_json(serde_json::json!({"score_threshold": 0.0})))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "result": [hit("Loosely related", "http://files/bio.pdf", 0.21)]
        })))
        .expect(1)
        .mount(&db)
        .await;

    let retriever = Retriever::new(qdrant(&db), Arc::new(MockEmbedder::new(8)));
    let (docs, stage) = retriever
        .retrieve_with_stage(
            &key,
            RetrievalQuery {
                query: "mitosis",
                top_k: 5,
                score_threshold: 0.5,
                url_filter: None,
            },
        )
        .await
        .unwrap();

    assert_eq!(stage, Some(RetrievalStage::ZeroThreshold));
    assert_eq!(docs.len(), 1);
}

#[tokio::test]
async fn test_unmatched_url_filter_falls_back_to_unfiltered_search() {
    let db = MockServer::start().await;
    let key = session_key();
    mount_exists(&db, key.name(), true).await;

    // Filtered searches find nothing at either threshold
    Mock::given(method("POST"))
        .and(path(search_path(key.name())))
        .and(body_partial_json(serde_json::json!({
            "filter": {"must": [{"key": "source.url", "match": {"any": ["http://files/new.pdf"]}}]}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"result": []})))
        .expect(2)
        .mount(&db)
        .await;
    Mock::given(method("POST"))
        .and(path(search_path(key.name())))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "result": [hit("From an older upload", "http://files/old.pdf", 0.4)]
        })))
        .expect(1)
        .mount(&db)
        .await;

    let urls = vec!["http://files/new.pdf".to_string()];
    let retriever = Retriever::new(qdrant(&db), Arc::new(MockEmbedder::new(8)));
    let (docs, stage) = retriever
        .retrieve_with_stage(
            &key,
            RetrievalQuery {
                query: "summarize",
                top_k: 5,
                score_threshold: 0.5,
                url_filter: Some(&urls),
            },
        )
        .await
        .unwrap();

    assert_eq!(stage, Some(RetrievalStage::Unfiltered));
    assert_eq!(docs[0].source.url, "http://files/old.pdf");
}

#[tokio::test]
async fn test_missing_collection_skips_embedding_and_search() {
    let db = MockServer::start().await;
    let key = session_key();
    mount_exists(&db, key.name(), false).await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&db)
        .await;

    // A failing embedder proves the query is never embedded
    let retriever = Retriever::new(qdrant(&db), Arc::new(MockEmbedder::with_failure(8)));
    let docs = retriever
        .retrieve(
            &key,
            RetrievalQuery {
                query: "anything",
                top_k: 5,
                score_threshold: 0.5,
                url_filter: None,
            },
        )
        .await
        .unwrap();

    assert!(docs.is_empty());
}

#[tokio::test]
async fn test_sweep_deletes_only_expired_session_collections() {
    let db = MockServer::start().await;
    let now = Utc::now();
    let stale = (now - ChronoDuration::hours(30)).timestamp();
    let fresh = (now - ChronoDuration::minutes(5)).timestamp();

    Mock::given(method("GET"))
        .and(path("/collections"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "result": {"collections": [
                {"name": "session_old_5_math_en"},
                {"name": "session_new_5_math_en"},
                {"name": "kb_5_math_en"}
            ]}
        })))
        .mount(&db)
        .await;

    for (name, ts) in [("session_old_5_math_en", stale), ("session_new_5_math_en", fresh)] {
        Mock::given(method("POST"))
            .and(path(format!("/collections/{name}/points/scroll")))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "result": {"points": [
                    {"id": "p-1", "payload": {"text": "t", "source": {"url": "u"}, "timestamp": ts}}
                ]}
            })))
            .mount(&db)
            .await;
    }

    Mock::given(method("DELETE"))
        .and(path("/collections/session_old_5_math_en"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"result": true})))
        .expect(1)
        .mount(&db)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/collections/session_new_5_math_en"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"result": true})))
        .expect(0)
        .mount(&db)
        .await;
    Mock::given(method("POST"))
        .and(path("/collections/kb_5_math_en/points/scroll"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&db)
        .await;

    let sweeper = TtlSweeper::new(
        qdrant(&db),
        SweepConfig {
            ttl: ChronoDuration::hours(24),
            ..Default::default()
        },
    );
    let report = sweeper.sweep_once(now).await.unwrap();

    assert_eq!(report.scanned, 2);
    assert_eq!(report.deleted, vec!["session_old_5_math_en".to_string()]);
    assert!(report.skipped.is_empty());
}

#[tokio::test]
async fn test_sweep_finds_oldest_point_on_a_later_page() {
    let db = MockServer::start().await;
    let now = Utc::now();
    let stale = (now - ChronoDuration::hours(30)).timestamp();
    let fresh = (now - ChronoDuration::minutes(5)).timestamp();
    let point = |id: &str, ts: i64| {
        serde_json::json!({"id": id, "payload": {"text": "t", "source": {"url": "u"}, "timestamp": ts}})
    };

    Mock::given(method("GET"))
        .and(path("/collections"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "result": {"collections": [{"name": "session_big_5_math_en"}]}
        })))
        .mount(&db)
        .await;
    Mock::given(method("POST"))
        .and(path("/collections/session_big_5_math_en/points/scroll"))
        .and(body_partial_json(serde_json::json!({"offset": "p-2"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "result": {"points": [point("p-2", stale)], "next_page_offset": null}
        })))
        .expect(1)
        .mount(&db)
        .await;
    Mock::given(method("POST"))
        .and(path("/collections/session_big_5_math_en/points/scroll"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "result": {"points": [point("p-1", fresh)], "next_page_offset": "p-2"}
        })))
        .expect(1)
        .mount(&db)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/collections/session_big_5_math_en"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"result": true})))
        .expect(1)
        .mount(&db)
        .await;

    let sweeper = TtlSweeper::new(
        qdrant(&db),
        SweepConfig {
            ttl: ChronoDuration::hours(24),
            scroll_limit: 1,
            ..Default::default()
        },
    );
    let report = sweeper.sweep_once(now).await.unwrap();

    assert_eq!(report.deleted, vec!["session_big_5_math_en".to_string()]);
}

#[tokio::test]
async fn test_sweep_aborts_when_listing_fails() {
    let db = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/collections"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&db)
        .await;

    let sweeper = TtlSweeper::new(qdrant(&db), SweepConfig::default());
    assert!(sweeper.sweep_once(Utc::now()).await.is_err());
}
