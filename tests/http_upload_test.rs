//! Resumable Upload HTTP Integration Tests
//!
//! Verifies the requests the HTTP transport sends and how it interprets the
//! responses of a resumable upload endpoint.
//!
//! ## Test Coverage
//!
//! - Session initiation and Location handling
//! - Content-Range headers for intermediate and final chunks
//! - Status queries and cancellation
//! - Retries on transient failures
//! - Full upload through a write channel, including capture/restore

#[cfg(test)]
mod tests {
    use cirrus_upload::channel::{ChannelError, Chunk, ChunkSink};
    use cirrus_upload::retry::RetryParams;
    use cirrus_upload::upload::{
        HttpChunkSink, ObjectRef, ResumableClient, ResumableClientConfig, UploadError,
        UploadStatus,
    };
    use std::time::Duration;
    use wiremock::matchers::{body_bytes, header, header_exists, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const MIN: usize = 256 * 1024;

    fn fast_retry() -> RetryParams {
        RetryParams {
            min_attempts: 1,
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_factor: 2.0,
            total_retry_period: Duration::from_secs(5),
        }
    }

    /// Helper to create a client pointing to the mock server
    fn create_test_client(mock_server: &MockServer) -> ResumableClient {
        let config = ResumableClientConfig {
            endpoint: mock_server.uri(),
            bearer_token: Some("test-token".to_string()),
            timeout: Some(Duration::from_secs(5)),
            retry: fast_retry(),
            chunk_size: Some(MIN),
        };
        ResumableClient::new(config).unwrap()
    }

    fn session_uri(mock_server: &MockServer) -> String {
        format!("{}/session/abc", mock_server.uri())
    }

    async fn mount_start_session(mock_server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/upload/storage/v1/b/test-bucket/o"))
            .and(query_param("uploadType", "resumable"))
            .and(query_param("name", "dir/data.bin"))
            .respond_with(
                ResponseTemplate::new(200).insert_header("Location", session_uri(mock_server)),
            )
            .expect(1)
            .mount(mock_server)
            .await;
    }

    // ========================================================================
    // TEST: Session initiation
    // ========================================================================

    #[tokio::test]
    async fn test_start_session_returns_location() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/upload/storage/v1/b/test-bucket/o"))
            .and(query_param("uploadType", "resumable"))
            .and(query_param("name", "dir/data.bin"))
            .and(header("authorization", "Bearer test-token"))
            .and(header("x-upload-content-type", "application/octet-stream"))
            .respond_with(
                ResponseTemplate::new(200).insert_header("Location", session_uri(&mock_server)),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server);
        let upload_id = client
            .start_session(
                &ObjectRef::new("test-bucket", "dir/data.bin"),
                Some("application/octet-stream"),
            )
            .await
            .unwrap();

        assert_eq!(upload_id, session_uri(&mock_server));
    }

    #[tokio::test]
    async fn test_start_session_missing_location() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server);
        let result = client
            .start_session(&ObjectRef::new("test-bucket", "x"), None)
            .await;

        assert!(matches!(result, Err(UploadError::MissingSessionUri)));
    }

    #[tokio::test]
    async fn test_start_session_retries_server_errors() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&mock_server)
            .await;
        mount_start_session(&mock_server).await;

        let client = create_test_client(&mock_server);
        let upload_id = client
            .start_session(&ObjectRef::new("test-bucket", "dir/data.bin"), None)
            .await
            .unwrap();

        assert_eq!(upload_id, session_uri(&mock_server));
    }

    #[tokio::test]
    async fn test_start_session_does_not_retry_client_errors() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("denied"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server);
        let result = client
            .start_session(&ObjectRef::new("test-bucket", "x"), None)
            .await;

        match result {
            Err(UploadError::Status { status, body }) => {
                assert_eq!(status, 403);
                assert_eq!(body, "denied");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    // ========================================================================
    // TEST: Chunk uploads
    // ========================================================================

    #[tokio::test]
    async fn test_put_chunk_intermediate() {
        let mock_server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/session/abc"))
            .and(header("content-range", "bytes 0-3/*"))
            .and(body_bytes(b"abcd".to_vec()))
            .respond_with(ResponseTemplate::new(308).insert_header("Range", "bytes=0-3"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server);
        let upload_id = session_uri(&mock_server);
        let status = client
            .put_chunk(Chunk {
                upload_id: &upload_id,
                offset: 0,
                data: b"abcd",
                last: false,
            })
            .await
            .unwrap();

        assert_eq!(status, UploadStatus::Incomplete { persisted: 4 });
    }

    #[tokio::test]
    async fn test_sink_rejects_short_persist() {
        let mock_server = MockServer::start().await;

        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(308).insert_header("Range", "bytes=0-1"))
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server);
        let upload_id = session_uri(&mock_server);
        let mut sink = HttpChunkSink::new(client);
        let result = sink
            .flush_chunk(Chunk {
                upload_id: &upload_id,
                offset: 0,
                data: b"abcd",
                last: false,
            })
            .await;

        assert!(matches!(
            result,
            Err(UploadError::OffsetMismatch {
                expected: 4,
                persisted: 2
            })
        ));
    }

    #[tokio::test]
    async fn test_sink_final_chunk_requires_completion() {
        let mock_server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(header("content-range", "bytes 4-5/6"))
            .respond_with(ResponseTemplate::new(308).insert_header("Range", "bytes=0-3"))
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server);
        let upload_id = session_uri(&mock_server);
        let mut sink = client.sink();
        let result = sink
            .flush_chunk(Chunk {
                upload_id: &upload_id,
                offset: 4,
                data: b"ef",
                last: true,
            })
            .await;

        assert!(matches!(
            result,
            Err(UploadError::Incomplete { persisted: 4 })
        ));
    }

    #[tokio::test]
    async fn test_expired_session() {
        let mock_server = MockServer::start().await;

        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(410))
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server);
        let result = client.query_status(&session_uri(&mock_server)).await;

        assert!(matches!(result, Err(UploadError::SessionExpired)));
    }

    // ========================================================================
    // TEST: Status and cancel
    // ========================================================================

    #[tokio::test]
    async fn test_query_status() {
        let mock_server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/session/abc"))
            .and(header("content-range", "bytes */*"))
            .respond_with(ResponseTemplate::new(308).insert_header("Range", "bytes=0-524287"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server);
        let status = client
            .query_status(&session_uri(&mock_server))
            .await
            .unwrap();

        assert_eq!(
            status,
            UploadStatus::Incomplete {
                persisted: 524_288
            }
        );
    }

    #[tokio::test]
    async fn test_query_status_nothing_persisted() {
        let mock_server = MockServer::start().await;

        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(308))
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server);
        let status = client
            .query_status(&session_uri(&mock_server))
            .await
            .unwrap();

        assert_eq!(status, UploadStatus::Incomplete { persisted: 0 });
    }

    #[tokio::test]
    async fn test_cancel_accepts_499() {
        let mock_server = MockServer::start().await;

        Mock::given(method("DELETE"))
            .and(path("/session/abc"))
            .and(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(499))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server);
        client.cancel(&session_uri(&mock_server)).await.unwrap();
    }

    // ========================================================================
    // TEST: Full upload through a channel
    // ========================================================================

    #[tokio::test]
    async fn test_channel_upload_end_to_end() {
        let mock_server = MockServer::start().await;
        mount_start_session(&mock_server).await;

        Mock::given(method("PUT"))
            .and(path("/session/abc"))
            .and(header("content-range", format!("bytes 0-{}/*", MIN - 1).as_str()))
            .respond_with(
                ResponseTemplate::new(308)
                    .insert_header("Range", format!("bytes=0-{}", MIN - 1).as_str()),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("PUT"))
            .and(path("/session/abc"))
            .and(header(
                "content-range",
                format!("bytes {}-{}/{}", MIN, MIN + 99, MIN + 100).as_str(),
            ))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server);
        let mut channel = client
            .open_channel(ObjectRef::new("test-bucket", "dir/data.bin"), None)
            .await
            .unwrap();
        assert_eq!(channel.chunk_size(), MIN);
        assert_eq!(channel.upload_id(), session_uri(&mock_server));

        channel.write(&vec![1u8; MIN + 100]).await.unwrap();
        assert_eq!(channel.position(), MIN as u64);

        channel.close().await.unwrap();
        assert_eq!(channel.position(), (MIN + 100) as u64);
    }

    #[tokio::test]
    async fn test_channel_restore_continues_session() {
        let mock_server = MockServer::start().await;
        mount_start_session(&mock_server).await;

        Mock::given(method("PUT"))
            .and(path("/session/abc"))
            .and(header("content-range", "bytes 0-9/10"))
            .and(body_bytes(b"0123456789".to_vec()))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server);
        let mut channel = client
            .open_channel(ObjectRef::new("test-bucket", "dir/data.bin"), None)
            .await
            .unwrap();
        channel.write(b"01234").await.unwrap();

        let state = channel.capture().await.unwrap();
        drop(channel);

        let mut resumed = client.resume_channel(&state);
        assert_eq!(resumed.entity(), &ObjectRef::new("test-bucket", "dir/data.bin"));
        resumed.write(b"56789").await.unwrap();
        resumed.close().await.unwrap();
        assert!(!resumed.is_open());
    }

    #[tokio::test]
    async fn test_channel_retries_chunk_then_fails_cleanly() {
        let mock_server = MockServer::start().await;
        mount_start_session(&mock_server).await;

        Mock::given(method("PUT"))
            .and(path("/session/abc"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&mock_server)
            .await;

        let client = create_test_client(&mock_server);
        let mut channel = client
            .open_channel(ObjectRef::new("test-bucket", "dir/data.bin"), None)
            .await
            .unwrap();
        channel.write(b"first").await.unwrap();

        let err = channel.write(&vec![0u8; MIN]).await.unwrap_err();
        match err {
            ChannelError::Flush(UploadError::Status { status, .. }) => assert_eq!(status, 503),
            other => panic!("unexpected error: {:?}", other),
        }

        // the failed write was not accepted
        assert_eq!(channel.limit(), 5);
        assert_eq!(channel.position(), 0);
        assert!(channel.is_open());
    }
}
