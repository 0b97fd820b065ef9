//! End-to-end tests for session processing.
//!
//! Wires the pipeline, status reporting and worker pool to in-memory
//! adapters: blob store, session store, scripted oracle, channel queue and
//! the status broadcaster.
//!
//! Verifies:
//! - One result entry per document, in order, whatever fails
//! - Status transitions in the store and on the event stream
//! - The oracle conversation is released on every path
//! - Workers survive undecodable messages and ack what they consume
//! - A closed message source stops the whole pool with an error

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use matchwork_ai::{OracleChunk, Reply, ScriptedOracle, scoring_prompt};
    use matchwork_core::{DocumentRef, Session, SessionId, SessionStatus, StatusEvent, UserId};
    use matchwork_events::{StatusBroadcaster, Subscription};

    use crate::blob::InMemoryBlobStore;
    use crate::decode::MimeDecoder;
    use crate::pipeline::{PipelineConfig, PipelineError, SessionPipeline, StatusReporter};
    use crate::queue::{AckMode, QueueError, channel};
    use crate::retry::RetryPolicy;
    use crate::store::InMemorySessionStore;
    use crate::workers::{WorkerContext, WorkerPool};

    const VERDICT: &str = r#"{
        "candidate_email": "ana@example.com",
        "match_score": 84,
        "relevant_experiences": ["Built payment workers in Rust"],
        "relevant_skills": ["rust", "postgres"],
        "missing_skills": ["kubernetes"],
        "summary": "Strong backend profile.",
        "recommendation": "Interview"
    }"#;

    struct Harness {
        blobs: Arc<InMemoryBlobStore>,
        store: Arc<InMemorySessionStore>,
        oracle: ScriptedOracle,
        hub: Arc<StatusBroadcaster>,
        ctx: Arc<WorkerContext>,
    }

    fn fast_config() -> PipelineConfig {
        let base = Duration::from_millis(1);
        PipelineConfig {
            app_name: "resume analyzer".into(),
            fetch_retry: RetryPolicy::linear(3, base),
            oracle_retry: RetryPolicy::linear(2, base),
            persist_retry: RetryPolicy::linear(3, base),
        }
    }

    fn harness(oracle: ScriptedOracle) -> Harness {
        let blobs = Arc::new(InMemoryBlobStore::new());
        let store = Arc::new(InMemorySessionStore::new());
        let hub = Arc::new(StatusBroadcaster::new(32));
        let pipeline = SessionPipeline::new(
            blobs.clone(),
            Arc::new(MimeDecoder),
            Arc::new(oracle.clone()),
            store.clone(),
        )
        .with_config(fast_config());
        let reporter = StatusReporter::new(hub.clone(), store.clone());
        let ctx = Arc::new(WorkerContext::new(pipeline, reporter));
        Harness {
            blobs,
            store,
            oracle,
            hub,
            ctx,
        }
    }

    fn session() -> Session {
        Session::new(
            UserId::new(),
            "Backend hiring",
            "Rust Engineer",
            "Build and run queue workers.",
        )
    }

    impl Harness {
        fn add_doc(&self, session: &Session, key: &str, mime: &str, body: &[u8]) -> DocumentRef {
            let doc = DocumentRef::new(session.id, key, mime);
            self.blobs.insert(key, body.to_vec());
            self.store.add_document(doc.clone());
            doc
        }
    }

    fn drain(sub: &mut Subscription) -> Vec<StatusEvent> {
        std::iter::from_fn(|| sub.try_recv()).collect()
    }

    #[tokio::test]
    async fn failed_download_degrades_only_that_document() {
        let h = harness(ScriptedOracle::new().fallback(Reply::text(VERDICT)));
        let s = session();
        h.add_doc(&s, "s/first.txt", "text/plain", b"first resume");
        h.add_doc(&s, "s/second.txt", "text/plain", b"second resume");
        h.blobs.fail_next("s/first.txt", 3, "connection reset by peer");
        let mut events = h.hub.subscribe(s.id);

        let report = h.ctx.run_session(&s).await.unwrap();

        assert_eq!(report.documents(), 2);
        assert_eq!(report.failures(), 1);
        let entries = report.results.results();
        assert_eq!(
            entries[0].error(),
            Some(
                "file download error: after 3 attempts: blob transport error: connection reset by peer"
            )
        );
        let scored = entries[1].verdict().unwrap();
        assert_eq!(scored.match_score, 84);
        assert_eq!(scored.missing_skills, vec!["kubernetes"]);
        assert_eq!(h.blobs.fetch_count(), 4);

        assert_eq!(

            h.store.status_history(s.id),

            vec![SessionStatus::Processing, SessionStatus::Completed]

        );
        let statuses: Vec<_> = drain(&mut events)
            .into_iter()
            .map(|e| (e.status, e.message))
            .collect();
        assert_eq!(
            statuses,
            vec![
                (SessionStatus::Processing, "analysis started".to_owned()),
                (SessionStatus::Completed, "analysis completed".to_owned()),
            ]
        );

        let stored = h.store.results(s.id).unwrap();
        let stored = stored.as_array().unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0]["is_error_result"], true);
        assert_eq!(stored[1]["is_error_result"], false);
        assert!(stored[1].get("error").is_none());
    }

    #[tokio::test]
    async fn fenced_and_plain_answers_give_the_same_verdict() {
        let fenced = format!("```json\n{VERDICT}\n```");
        let h = harness(
            ScriptedOracle::new()
                .reply(Reply::text(VERDICT))
                .reply(Reply::text(fenced)),
        );
        let s = session();
        h.add_doc(&s, "a.txt", "text/plain", b"a");
        h.add_doc(&s, "b.txt", "text/plain", b"b");

        let report = h.ctx.run_session(&s).await.unwrap();
        let entries = report.results.results();
        assert!(entries[0].verdict().is_some());
        assert_eq!(entries[0], entries[1]);
    }

    #[tokio::test]
    async fn document_list_failure_fails_without_persisting() {
        let h = harness(ScriptedOracle::new().fallback(Reply::text(VERDICT)));
        let s = session();
        h.store.fail_documents("relation \"resumes\" does not exist");
        let mut events = h.hub.subscribe(s.id);

        let err = h.ctx.run_session(&s).await.unwrap_err();

        assert!(matches!(err, PipelineError::LoadDocuments(_)));
        assert_eq!(h.store.upsert_calls(), 0);
        assert!(h.oracle.opened().is_empty());
        assert_eq!(
            h.store.status_history(s.id),
            vec![SessionStatus::Processing, SessionStatus::Failed]
        );
        let statuses: Vec<_> = drain(&mut events).into_iter().map(|e| e.status).collect();
        assert_eq!(statuses, vec![SessionStatus::Processing, SessionStatus::Failed]);
    }

    #[tokio::test]
    async fn unsupported_mime_does_not_touch_siblings() {
        let h = harness(ScriptedOracle::new().fallback(Reply::text(VERDICT)));
        let s = session();
        h.add_doc(&s, "photo.png", "image/png", b"\x89PNG");
        h.add_doc(&s, "cv.txt", "text/plain", b"ten years of rust");

        let report = h.ctx.run_session(&s).await.unwrap();
        let entries = report.results.results();

        let err = entries[0].error().unwrap();
        assert!(err.starts_with("text extraction error: "), "{err}");
        assert!(err.contains("image/png"));
        assert!(entries[1].verdict().is_some());
        assert_eq!(h.oracle.prompts().len(), 1);
    }

    #[tokio::test]
    async fn prompt_carries_job_and_resume_text() {
        let h = harness(ScriptedOracle::new().fallback(Reply::text(VERDICT)));
        let s = session();
        h.add_doc(&s, "cv.txt", "text/plain; charset=utf-8", b"Ana Lima\nRust, Postgres");

        h.ctx.run_session(&s).await.unwrap();

        let expected = scoring_prompt(
            "Rust Engineer",
            "Build and run queue workers.",
            "Ana Lima\nRust, Postgres",
        );
        assert_eq!(h.oracle.prompts(), vec![expected]);
        let opened = h.oracle.opened();
        assert_eq!(opened.len(), 1);
        assert_eq!(opened[0].app_name, "resume analyzer");
        assert_eq!(opened[0].session_id, s.id);
        assert_eq!(opened[0].user_id, s.user_id);
    }

    #[tokio::test]
    async fn oracle_is_retried_then_gives_up() {
        let h = harness(
            ScriptedOracle::new()
                .reply(Reply::error("upstream 503"))
                .reply(Reply::text(VERDICT))
                .reply(Reply::error("upstream 503"))
                .reply(Reply::Chunks(vec![OracleChunk::partial("thinking")])),
        );
        let s = session();
        h.add_doc(&s, "a.txt", "text/plain", b"a");
        h.add_doc(&s, "b.txt", "text/plain", b"b");

        let report = h.ctx.run_session(&s).await.unwrap();
        let entries = report.results.results();

        assert!(entries[0].verdict().is_some());
        assert_eq!(
            entries[1].error(),
            Some("agent stream error: after 2 attempts: empty agent response")
        );
        let prompts = h.oracle.prompts();
        assert_eq!(prompts.len(), 4);
        assert_eq!(prompts[0], prompts[1]);
    }

    #[tokio::test]
    async fn malformed_answer_is_recorded() {
        let h = harness(
            ScriptedOracle::new().fallback(Reply::text("Sure! The candidate looks great.")),
        );
        let s = session();
        h.add_doc(&s, "a.txt", "text/plain", b"a");

        let report = h.ctx.run_session(&s).await.unwrap();
        let err = report.results.results()[0].error().unwrap();
        assert!(err.starts_with("json unmarshal error: "), "{err}");
    }

    #[tokio::test]
    async fn upsert_exhaustion_fails_the_session() {
        let h = harness(ScriptedOracle::new().fallback(Reply::text(VERDICT)));
        let s = session();
        h.add_doc(&s, "a.txt", "text/plain", b"a");
        h.store.fail_upserts(3);

        let err = h.ctx.run_session(&s).await.unwrap_err();

        match &err {
            PipelineError::Persist(retry) => assert_eq!(retry.attempts(), 3),
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().contains("after 3 attempts"));
        assert_eq!(h.store.upsert_calls(), 3);
        assert_eq!(
            h.store.status_history(s.id),
            vec![SessionStatus::Processing, SessionStatus::Failed]
        );
        assert_eq!(h.oracle.closed().len(), 1);
    }

    #[tokio::test]
    async fn upsert_recovers_within_budget() {
        let h = harness(ScriptedOracle::new().fallback(Reply::text(VERDICT)));
        let s = session();
        h.add_doc(&s, "a.txt", "text/plain", b"a");
        h.store.fail_upserts(2);

        h.ctx.run_session(&s).await.unwrap();
        assert_eq!(h.store.upsert_calls(), 3);
        assert!(h.store.results(s.id).is_some());
    }

    #[tokio::test]
    async fn conversation_is_closed_on_success_and_empty_sessions() {
        let h = harness(ScriptedOracle::new().fallback(Reply::text(VERDICT)));
        let with_docs = session();
        h.add_doc(&with_docs, "a.txt", "text/plain", b"a");
        let empty = session();

        h.ctx.run_session(&with_docs).await.unwrap();
        let report = h.ctx.run_session(&empty).await.unwrap();

        assert_eq!(report.documents(), 0);
        assert_eq!(h.store.results(empty.id), Some(serde_json::json!([])));
        assert_eq!(h.oracle.opened(), h.oracle.closed());
        assert_eq!(h.oracle.closed().len(), 2);
    }

    #[tokio::test]
    async fn conversation_open_failure_fails_the_session() {
        let h = harness(ScriptedOracle::new().fail_open("quota exceeded"));
        let s = session();
        h.add_doc(&s, "a.txt", "text/plain", b"a");

        let err = h.ctx.run_session(&s).await.unwrap_err();
        assert!(matches!(err, PipelineError::OpenConversation(_)));
        assert_eq!(h.store.upsert_calls(), 0);
        assert_eq!(h.store.status_history(s.id).last(), Some(&SessionStatus::Failed));
    }

    #[tokio::test]
    async fn worker_pool_survives_bad_messages_and_acks_everything() {
        let h = harness(ScriptedOracle::new().fallback(Reply::text(VERDICT)));
        let good = session();
        h.add_doc(&good, "cv.txt", "text/plain", b"cv");
        let recoverable = SessionId::new();

        let mut nil_events = h.hub.subscribe(SessionId::nil());
        let mut good_events = h.hub.subscribe(good.id);

        let (tx, source) = channel(8, AckMode::AfterProcessing);
        let handle = WorkerPool::new(2)
            .spawn(h.ctx.clone(), |_| {
                let source = source.clone();
                async move { Ok::<_, QueueError>(source) }
            })
            .await
            .unwrap();

        tx.send(b"{\"id\": 12".to_vec()).await.unwrap();
        tx.send(format!(r#"{{"id":"{recoverable}","user_id":"nope"}}"#)).await.unwrap();
        tx.send_json(&good).await.unwrap();
        drop(tx);

        let stopped = tokio::time::timeout(Duration::from_secs(10), handle.wait())
            .await
            .unwrap();
        assert!(matches!(stopped, Err(QueueError::SourceClosed { .. })));

        assert_eq!(source.acked(), 3);
        assert!(h.store.results(good.id).is_some());
        assert_eq!(h.store.status_history(recoverable), vec![SessionStatus::Failed]);
        assert_eq!(drain(&mut nil_events).len(), 1);
        let statuses: Vec<_> = drain(&mut good_events).into_iter().map(|e| e.status).collect();
        assert_eq!(statuses, vec![SessionStatus::Processing, SessionStatus::Completed]);
    }

    #[tokio::test]
    async fn immediate_ack_mode_needs_no_worker_ack() {
        let h = harness(ScriptedOracle::new().fallback(Reply::text(VERDICT)));
        let s = session();
        let (tx, source) = channel(1, AckMode::Immediate);
        let handle = WorkerPool::new(1)
            .spawn(h.ctx.clone(), |_| {
                let source = source.clone();
                async move { Ok::<_, QueueError>(source) }
            })
            .await
            .unwrap();

        tx.send_json(&s).await.unwrap();
        drop(tx);
        let stopped = tokio::time::timeout(Duration::from_secs(10), handle.wait())
            .await
            .unwrap();
        assert!(matches!(stopped, Err(QueueError::SourceClosed { .. })));

        assert_eq!(source.acked(), 1);
        assert_eq!(
            h.store.status_history(s.id),
            vec![SessionStatus::Processing, SessionStatus::Completed]
        );
    }

    #[tokio::test]
    async fn closed_source_stops_the_pool_with_an_error() {
        let h = harness(ScriptedOracle::new().fallback(Reply::text(VERDICT)));
        let (closed_tx, closed) = channel(1, AckMode::AfterProcessing);
        drop(closed_tx);
        let (tx, open) = channel(1, AckMode::AfterProcessing);

        let handle = WorkerPool::new(3)
            .spawn(h.ctx.clone(), |worker| {
                let source = if worker == 0 { closed.clone() } else { open.clone() };
                async move { Ok::<_, QueueError>(source) }
            })
            .await
            .unwrap();

        let stopped = tokio::time::timeout(Duration::from_secs(10), handle.wait())
            .await
            .unwrap();
        assert!(matches!(stopped, Err(QueueError::SourceClosed { worker: 0 })));

        // The healthy workers were stopped too, so nothing consumes this.
        let s = session();
        tx.send_json(&s).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(open.acked(), 0);
        assert!(h.store.status_history(s.id).is_empty());
    }

    #[tokio::test]
    async fn pool_start_fails_when_a_source_cannot_connect() {
        let h = harness(ScriptedOracle::new());
        let (_tx, source) = channel(1, AckMode::AfterProcessing);
        let result = WorkerPool::new(3)
            .spawn(h.ctx.clone(), |worker| {
                let source = source.clone();
                async move {
                    if worker == 2 {
                        Err(QueueError::Connection("broker unreachable".into()))
                    } else {
                        Ok(source)
                    }
                }
            })
            .await;
        assert!(matches!(result, Err(QueueError::Connection(_))));
    }
}
