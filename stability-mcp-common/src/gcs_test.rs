//! Tests for the GCS module.

use proptest::prelude::*;

use crate::gcs::GcsUri;

/// Bucket names must be 3-63 characters, lowercase letters, numbers, hyphens, underscores.
fn bucket_name_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_-]{2,62}"
}

fn object_name_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_.-]{1,60}\\.(png|jpeg|webp)"
}

proptest! {
    #[test]
    fn gcs_uri_round_trip(
        bucket in bucket_name_strategy(),
        object in object_name_strategy()
    ) {
        let original_uri = format!("gs://{}/{}", bucket, object);

        let parsed = GcsUri::parse(&original_uri).expect("valid URI should parse");
        prop_assert_eq!(&parsed.bucket, &bucket);
        prop_assert_eq!(&parsed.object, &object);
        prop_assert_eq!(parsed.to_string(), original_uri);
    }

    #[test]
    fn invalid_uri_rejected(uri in "[^g].*|g[^s].*|gs[^:].*") {
        prop_assert!(GcsUri::parse(&uri).is_err(), "should be rejected: {}", uri);
    }
}

mod unit_tests {
    use super::*;

    #[test]
    fn parse_valid_uri() {
        let uri = GcsUri::parse("gs://my-bucket/cat.png").unwrap();
        assert_eq!(uri, GcsUri::new("my-bucket", "cat.png"));
    }

    #[test]
    fn parse_uri_missing_path() {
        assert!(GcsUri::parse("gs://bucket").is_err());
    }

    #[test]
    fn parse_uri_empty_bucket() {
        assert!(GcsUri::parse("gs:///cat.png").is_err());
    }
}

mod gcs_client_tests {
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::auth::AuthProvider;
    use crate::error::{GcsError, GcsOperation};
    use crate::gcs::{GcsClient, GcsUri};

    const TEST_TOKEN: &str = "test-token-12345";

    fn client(server: &MockServer) -> GcsClient {
        GcsClient::with_base_url(AuthProvider::mock(TEST_TOKEN), server.uri())
    }

    #[tokio::test]
    async fn upload_sends_bytes_with_content_type() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/upload/storage/v1/b/images/o"))
            .and(query_param("name", "cat.png"))
            .and(header("Authorization", format!("Bearer {}", TEST_TOKEN).as_str()))
            .and(header("Content-Type", "image/png"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "name": "cat.png",
                "bucket": "images"
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let result = client(&mock_server)
            .upload(&GcsUri::new("images", "cat.png"), b"png bytes", "image/png")
            .await;
        assert!(result.is_ok(), "upload should succeed: {:?}", result);
    }

    #[tokio::test]
    async fn upload_failure_includes_status_and_uri() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/upload/storage/v1/b/images/o"))
            .respond_with(ResponseTemplate::new(403).set_body_string("Access denied"))
            .mount(&mock_server)
            .await;

        let err = client(&mock_server)
            .upload(&GcsUri::new("images", "cat.png"), b"data", "image/png")
            .await
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("403") && msg.contains("gs://images/cat.png"), "{}", msg);
    }

    #[tokio::test]
    async fn download_returns_bytes_and_content_type() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/storage/v1/b/images/o/cat.webp"))
            .and(query_param("alt", "media"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", "image/webp")
                    .set_body_bytes(b"webp bytes".to_vec()),
            )
            .mount(&mock_server)
            .await;

        let download = client(&mock_server)
            .download(&GcsUri::new("images", "cat.webp"))
            .await
            .unwrap();
        assert_eq!(download.data, b"webp bytes".to_vec());
        assert_eq!(download.content_type.as_deref(), Some("image/webp"));
    }

    #[tokio::test]
    async fn download_missing_object_is_not_found() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/storage/v1/b/images/o/missing.png"))
            .respond_with(ResponseTemplate::new(404).set_body_string("No such object"))
            .mount(&mock_server)
            .await;

        let err = client(&mock_server)
            .download(&GcsUri::new("images", "missing.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, GcsError::NotFound(ref uri) if uri == "gs://images/missing.png"));
    }

    #[tokio::test]
    async fn download_server_error_is_operation_failure() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/storage/v1/b/images/o/cat.png"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&mock_server)
            .await;

        let err = client(&mock_server)
            .download(&GcsUri::new("images", "cat.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, GcsError::OperationFailed { .. }));
    }

    #[tokio::test]
    async fn list_follows_page_tokens() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/storage/v1/b/images/o"))
            .and(query_param("pageToken", "page-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [
                    { "name": "c.webp", "contentType": "image/webp", "size": "30" }
                ]
            })))
            .with_priority(1)
            .expect(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .and(path("/storage/v1/b/images/o"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [
                    { "name": "a.png", "contentType": "image/png", "size": "10" },
                    { "name": "a.txt", "contentType": "text/plain", "size": "2" }
                ],
                "nextPageToken": "page-2"
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let objects = client(&mock_server).list("images").await.unwrap();
        let names: Vec<&str> = objects.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["a.png", "a.txt", "c.webp"]);
        assert_eq!(objects[0].size_bytes(), Some(10));
    }

    #[tokio::test]
    async fn list_of_empty_bucket_is_empty() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/storage/v1/b/images/o"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "kind": "storage#objects"
            })))
            .mount(&mock_server)
            .await;

        let objects = client(&mock_server).list("images").await.unwrap();
        assert!(objects.is_empty());
    }

    #[tokio::test]
    async fn list_with_malformed_body_names_bucket() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/storage/v1/b/images/o"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>not json</html>"))
            .mount(&mock_server)
            .await;

        let err = client(&mock_server).list("images").await.unwrap_err();
        assert!(matches!(
            err,
            GcsError::OperationFailed { operation: GcsOperation::List, .. }
        ));
        let message = err.to_string();
        assert!(message.starts_with("GCS list failed for gs://images/"), "{}", message);
        assert!(message.contains("Failed to parse listing"), "{}", message);
    }
}
