//! Tests for the resource stores.

mod filesystem_tests {
    use proptest::prelude::*;
    use tempfile::TempDir;

    use crate::context::CallerContext;
    use crate::error::Error;
    use crate::storage::{FilesystemStore, ResourceStore};

    fn store() -> (TempDir, FilesystemStore) {
        let dir = TempDir::new().unwrap();
        let store = FilesystemStore::new(dir.path().join("images"));
        (dir, store)
    }

    #[tokio::test]
    async fn write_then_read_returns_identical_bytes_and_type() {
        let (_dir, store) = store();
        let ctx = CallerContext::default();

        let written = store
            .write_resource("cat.webp", b"RIFF....WEBP", "image/webp")
            .await
            .unwrap();
        assert!(written.uri.starts_with("file://"));
        assert_eq!(written.size, Some(12));

        let read = store.read_resource(&written.uri, &ctx).await.unwrap();
        assert_eq!(read.bytes, b"RIFF....WEBP".to_vec());
        assert_eq!(read.content_type, "image/webp");
        assert_eq!(read.uri, written.uri);
    }

    #[tokio::test]
    async fn read_by_bare_name() {
        let (_dir, store) = store();
        store.write_resource("dog.png", b"png", "image/png").await.unwrap();

        let read = store
            .read_resource("dog.png", &CallerContext::default())
            .await
            .unwrap();
        assert_eq!(read.bytes, b"png".to_vec());
    }

    #[tokio::test]
    async fn write_overwrites_existing_resource() {
        let (_dir, store) = store();
        store.write_resource("a.png", b"first", "image/png").await.unwrap();
        store.write_resource("a.png", b"second", "image/png").await.unwrap();

        let read = store.read_resource("a.png", &CallerContext::default()).await.unwrap();
        assert_eq!(read.bytes, b"second".to_vec());
    }

    #[tokio::test]
    async fn listing_returns_each_image_once_and_skips_sidecars() {
        let (_dir, store) = store();
        let names = ["a.png", "b.jpeg", "c.webp", "d.jpg"];
        for name in names {
            store.write_resource(name, b"x", "image/png").await.unwrap();
        }
        store.write_resource("a.txt", b"{}", "text/plain").await.unwrap();

        let listed = store.list_resources(&CallerContext::default()).await.unwrap();
        let listed_names: Vec<&str> = listed.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(listed_names, names.to_vec());
        assert_eq!(listed[3].mime_type, "image/jpeg");
    }

    #[tokio::test]
    async fn listing_missing_directory_is_empty() {
        let (_dir, store) = store();
        let listed = store.list_resources(&CallerContext::default()).await.unwrap();
        assert!(listed.is_empty());
    }

    #[tokio::test]
    async fn listing_ignores_subdirectories() {
        let (_dir, store) = store();
        store.write_resource("a.png", b"x", "image/png").await.unwrap();
        std::fs::create_dir(store.root().join("nested.png")).unwrap();

        let listed = store.list_resources(&CallerContext::default()).await.unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn listing_skips_bad_entries_and_keeps_scanning() {
        let (_dir, store) = store();
        store.write_resource("a.png", b"x", "image/png").await.unwrap();
        store.write_resource("z.png", b"x", "image/png").await.unwrap();
        std::os::unix::fs::symlink(store.root().join("gone.png"), store.root().join("m.png"))
            .unwrap();
        std::fs::create_dir(store.root().join("n.png")).unwrap();

        let listed = store.list_resources(&CallerContext::default()).await.unwrap();
        let listed_names: Vec<&str> = listed.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(listed_names, vec!["a.png", "z.png"]);
    }

    #[tokio::test]
    async fn read_outside_root_is_not_found() {
        let (dir, store) = store();
        store.write_resource("a.png", b"x", "image/png").await.unwrap();
        let outside = dir.path().join("secret.png");
        std::fs::write(&outside, b"secret").unwrap();

        let ctx = CallerContext::default();
        let by_path = store
            .read_resource(&format!("file://{}", outside.display()), &ctx)
            .await;
        assert!(matches!(by_path, Err(Error::NotFound(_))));

        let by_traversal = store.read_resource("../secret.png", &ctx).await;
        assert!(matches!(by_traversal, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn read_missing_resource_is_not_found() {
        let (_dir, store) = store();
        store.write_resource("a.png", b"x", "image/png").await.unwrap();

        let result = store.read_resource("b.png", &CallerContext::default()).await;
        assert!(matches!(result, Err(Error::NotFound(ref id)) if id == "b.png"));
    }

    #[tokio::test]
    async fn write_rejects_path_like_names() {
        let (_dir, store) = store();
        let result = store.write_resource("../escape.png", b"x", "image/png").await;
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn listing_after_n_writes_has_n_entries(n in 1usize..12) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let (_dir, store) = store();
                for i in 0..n {
                    store
                        .write_resource(&format!("img-{:02}.png", i), b"x", "image/png")
                        .await
                        .unwrap();
                }
                let listed = store.list_resources(&CallerContext::default()).await.unwrap();
                prop_assert_eq!(listed.len(), n);
                Ok(())
            })?;
        }
    }
}

mod gcs_store_tests {
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::auth::AuthProvider;
    use crate::context::CallerContext;
    use crate::error::Error;
    use crate::gcs::GcsClient;
    use crate::storage::{GcsStore, ResourceStore};

    fn store(server: &MockServer) -> GcsStore {
        let client = GcsClient::with_base_url(AuthProvider::mock("token"), server.uri());
        GcsStore::new(client, "images")
    }

    #[tokio::test]
    async fn write_returns_gs_uri() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/upload/storage/v1/b/images/o"))
            .and(query_param("name", "cat.png"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let written = store(&server)
            .write_resource("cat.png", b"png", "image/png")
            .await
            .unwrap();
        assert_eq!(written.uri, "gs://images/cat.png");
        assert_eq!(written.mime_type, "image/png");
    }

    #[tokio::test]
    async fn read_uses_stored_content_type() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/storage/v1/b/images/o/cat.jpeg"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", "image/jpeg")
                    .set_body_bytes(b"jpeg".to_vec()),
            )
            .mount(&server)
            .await;

        let read = store(&server)
            .read_resource("gs://images/cat.jpeg", &CallerContext::with_ip("10.1.1.1"))
            .await
            .unwrap();
        assert_eq!(read.bytes, b"jpeg".to_vec());
        assert_eq!(read.content_type, "image/jpeg");
    }

    #[tokio::test]
    async fn read_from_other_bucket_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let result = store(&server)
            .read_resource("gs://other/cat.png", &CallerContext::default())
            .await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn read_missing_object_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/storage/v1/b/images/o/gone.png"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let result = store(&server)
            .read_resource("gone.png", &CallerContext::default())
            .await;
        assert!(matches!(result, Err(Error::NotFound(ref id)) if id == "gone.png"));
    }

    #[tokio::test]
    async fn listing_keeps_only_images() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/storage/v1/b/images/o"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [
                    { "name": "a.png", "contentType": "image/png", "size": "3" },
                    { "name": "a.txt", "contentType": "text/plain", "size": "2" },
                    { "name": "b.webp", "size": "4" }
                ]
            })))
            .mount(&server)
            .await;

        let listed = store(&server)
            .list_resources(&CallerContext::default())
            .await
            .unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].uri, "gs://images/a.png");
        assert_eq!(listed[1].mime_type, "image/webp");
        assert_eq!(listed[1].size, Some(4));
    }
}
