/// Fake collaborators that record every invocation.
pub mod support {
    use crate::{
        collab::{
            markdown::MarkdownRenderer, tabular::CsvFilter, Collaborators, FetchedBody, Fetcher, QueryEngine, QueryRows,
            Renderer, Transcriber, VersionControl,
        },
        config::Config,
        errors::TaskError,
        tasks::TaskContext,
    };
    use async_trait::async_trait;
    use bytes::Bytes;
    use serde_json::json;
    use std::{
        path::Path,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc, Mutex,
        },
        time::Duration,
    };

    enum Reply {
        Body(Vec<u8>),
        Fail(String),
    }

    pub struct FakeFetcher {
        calls: AtomicUsize,
        reply: Mutex<Reply>,
        delay: Mutex<Option<Duration>>,
    }

    impl FakeFetcher {
        pub fn respond(&self, body: &[u8]) { *self.reply.lock().unwrap() = Reply::Body(body.to_vec()); }
        pub fn fail(&self, msg: &str) { *self.reply.lock().unwrap() = Reply::Fail(msg.to_string()); }
        pub fn delay(&self, d: Duration) { *self.delay.lock().unwrap() = Some(d); }
        pub fn calls(&self) -> usize { self.calls.load(Ordering::SeqCst) }
    }

    #[async_trait]
    impl Fetcher for FakeFetcher {
        async fn get(&self, _url: &str) -> Result<FetchedBody, TaskError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let delay = *self.delay.lock().unwrap();
            if let Some(d) = delay {
                tokio::time::sleep(d).await;
            }
            match &*self.reply.lock().unwrap() {
                Reply::Body(b) => Ok(FetchedBody { content_type: Some("text/plain".into()), bytes: Bytes::from(b.clone()) }),
                Reply::Fail(m) => Err(TaskError::ExternalService(m.clone())),
            }
        }
    }

    #[derive(Default)]
    pub struct FakeVcs {
        calls: Mutex<Vec<(String, String)>>,
    }

    impl FakeVcs {
        pub fn calls(&self) -> Vec<(String, String)> { self.calls.lock().unwrap().clone() }
    }

    #[async_trait]
    impl VersionControl for FakeVcs {
        async fn clone_and_commit(&self, source: &str, dest: &Path, message: &str) -> Result<String, TaskError> {
            self.calls.lock().unwrap().push((source.to_string(), message.to_string()));
            std::fs::create_dir(dest).map_err(TaskError::internal)?;
            Ok("0".repeat(40))
        }
    }

    #[derive(Default)]
    pub struct FakeQuery {
        calls: Mutex<Vec<String>>,
    }

    impl FakeQuery {
        pub fn calls(&self) -> Vec<String> { self.calls.lock().unwrap().clone() }
    }

    #[async_trait]
    impl QueryEngine for FakeQuery {
        async fn query(&self, _db: &Path, sql: &str) -> Result<QueryRows, TaskError> {
            self.calls.lock().unwrap().push(sql.to_string());
            Ok(QueryRows {
                columns: vec!["id".into(), "name".into()],
                rows: vec![vec![json!(1), json!("a")], vec![json!(2), json!("b")]],
            })
        }
    }

    #[derive(Default)]
    pub struct FakeTranscriber {
        calls: AtomicUsize,
    }

    impl FakeTranscriber {
        pub fn calls(&self) -> usize { self.calls.load(Ordering::SeqCst) }
    }

    #[async_trait]
    impl Transcriber for FakeTranscriber {
        async fn transcribe(&self, file_name: &str, audio: Vec<u8>) -> Result<String, TaskError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("transcript of {file_name} ({} bytes)", audio.len()))
        }
    }

    /// Counts renders; the HTML itself comes from the real Markdown renderer.
    #[derive(Default)]
    pub struct FakeRenderer {
        calls: AtomicUsize,
    }

    impl FakeRenderer {
        pub fn calls(&self) -> usize { self.calls.load(Ordering::SeqCst) }
    }

    impl Renderer for FakeRenderer {
        fn render(&self, source: &str) -> String {
            self.calls.fetch_add(1, Ordering::SeqCst);
            MarkdownRenderer.render(source)
        }
    }

    pub struct Fakes {
        pub fetcher: Arc<FakeFetcher>,
        pub vcs: Arc<FakeVcs>,
        pub query: Arc<FakeQuery>,
        pub renderer: Arc<FakeRenderer>,
        pub transcriber: Arc<FakeTranscriber>,
    }

    pub fn config(root: &Path) -> Config {
        let mut cfg = Config::with_root(root);
        cfg.limits.task_timeout_s = 5;
        cfg
    }

    /// A context over a fresh temporary root, with counting fakes for every
    /// collaborator except the CSV filter.
    pub fn context() -> (tempfile::TempDir, TaskContext, Fakes) {
        let dir = tempfile::tempdir().unwrap();
        let fakes = Fakes {
            fetcher: Arc::new(FakeFetcher {
                calls: AtomicUsize::new(0),
                reply: Mutex::new(Reply::Body(Vec::new())),
                delay: Mutex::new(None),
            }),
            vcs: Arc::new(FakeVcs::default()),
            query: Arc::new(FakeQuery::default()),
            renderer: Arc::new(FakeRenderer::default()),
            transcriber: Arc::new(FakeTranscriber::default()),
        };
        let collab = Collaborators {
            fetcher: fakes.fetcher.clone(),
            vcs: fakes.vcs.clone(),
            query: fakes.query.clone(),
            renderer: fakes.renderer.clone(),
            transcriber: fakes.transcriber.clone(),
            tabular: Arc::new(CsvFilter),
        };
        let ctx = TaskContext::new(Arc::new(config(dir.path())), collab).unwrap();
        (dir, ctx, fakes)
    }
}

#[cfg(test)]
mod integration {
    use super::support;
    use crate::{collab::Collaborators, dispatch::registry::TaskRegistry, server::{build_router, AppState}, tasks::TaskContext};
    use axum::{
        body::Body,
        http::{Request, StatusCode},
        Router,
    };
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fake_app() -> (tempfile::TempDir, Router, support::Fakes) {
        let (dir, ctx, fakes) = support::context();
        (dir, build_router(AppState::new(ctx, TaskRegistry::new())), fakes)
    }

    fn post(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .method("POST")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn capabilities_list_every_task() {
        let (_dir, app, _fakes) = fake_app();
        let req = Request::builder().uri("/tasks/capabilities").body(Body::empty()).unwrap();
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["tasks"].as_array().unwrap().len(), 7);
        assert_eq!(body["tasks"][0]["name"], "clone-and-commit");
    }

    #[tokio::test]
    async fn unknown_task_is_reported_with_its_kind() {
        let (_dir, app, fakes) = fake_app();
        let (status, body) = send(&app, post("/tasks/call", json!({"id": "7", "task": "nope", "args": {}}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({"id": "7", "ok": false, "error": {"code": "UnknownTask", "message": "unknown task: nope"}}));
        assert_eq!(fakes.fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn malformed_body_is_invalid_argument() {
        let (_dir, app, _fakes) = fake_app();
        let (status, body) = send(&app, post("/tasks/call", json!({"args": {}}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "InvalidArgument");
    }

    #[tokio::test]
    async fn oversized_body_without_length_is_too_large() {
        let (_dir, mut ctx, fakes) = support::context();
        let mut cfg = (*ctx.cfg).clone();
        cfg.limits.max_request_kb = 1;
        ctx.cfg = Arc::new(cfg);
        let app = build_router(AppState::new(ctx, TaskRegistry::new()));

        let call = json!({"task": "fetch-and-store", "args": {"url": "http://example.com/", "output": "x".repeat(4096)}});
        let (status, body) = send(&app, post("/tasks/call", call)).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body["code"], "RequestTooLarge");
        assert_eq!(fakes.fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn filter_endpoint_returns_records() {
        let (dir, app, _fakes) = fake_app();
        std::fs::write(dir.path().join("rows.csv"), "col,v\na,1\na,2\nb,3\n").unwrap();
        let body = json!({"csv_path": "rows.csv", "filter_column": "col", "filter_value": "a"});
        let (status, records) = send(&app, post("/filter_csv", body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(records, json!([{"col":"a","v":1},{"col":"a","v":2}]));
    }

    #[tokio::test]
    async fn filter_endpoint_still_confines_paths() {
        let (_dir, app, _fakes) = fake_app();
        let body = json!({"csv_path": "/etc/passwd", "filter_column": "a", "filter_value": "b"});
        let (status, err) = send(&app, post("/filter_csv", body)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(err["code"], "PathViolation");
    }

    #[tokio::test]
    async fn bearer_token_is_enforced_when_configured() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = support::config(dir.path());
        cfg.auth.bearer_token = Some("secret".into());
        let cfg = Arc::new(cfg);
        let ctx = TaskContext::new(cfg.clone(), Collaborators::from_config(&cfg).unwrap()).unwrap();
        let app = build_router(AppState::new(ctx, TaskRegistry::new()));

        let (status, _) = send(&app, Request::builder().uri("/healthz").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let req = Request::builder().uri("/healthz").header("Authorization", "Bearer secret").body(Body::empty()).unwrap();
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn fetch_once_then_refuse_without_touching_the_network() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(ResponseTemplate::new(200).set_body_string("fetched body"))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let cfg = Arc::new(support::config(dir.path()));
        let ctx = TaskContext::new(cfg.clone(), Collaborators::from_config(&cfg).unwrap()).unwrap();
        let root = ctx.guard.root().to_path_buf();
        let app = build_router(AppState::new(ctx, TaskRegistry::new()));

        let output = root.join("out.txt").display().to_string();
        let call = json!({"id": "1", "task": "fetch-and-store", "args": {"url": format!("{}/feed", server.uri()), "output": output}});

        let (status, body) = send(&app, post("/tasks/call", call.clone())).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["result"]["output"], output);
        assert_eq!(std::fs::read_to_string(root.join("out.txt")).unwrap(), "fetched body");

        let (status, body) = send(&app, post("/tasks/call", call)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "AlreadyExists");
        // the mock's expect(1) is verified when `server` drops
    }

    #[tokio::test]
    async fn redirect_off_the_allowlist_stores_nothing() {
        let internal = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("INTERNAL"))
            .expect(0)
            .mount(&internal)
            .await;
        let listed = MockServer::start().await;
        let target = format!("http://localhost:{}/secret", internal.address().port());
        Mock::given(method("GET"))
            .and(path("/go"))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", target.as_str()))
            .mount(&listed)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mut cfg = support::config(dir.path());
        cfg.network.allowed_hosts = vec!["127.0.0.1".into()];
        let cfg = Arc::new(cfg);
        let ctx = TaskContext::new(cfg.clone(), Collaborators::from_config(&cfg).unwrap()).unwrap();
        let root = ctx.guard.root().to_path_buf();
        let app = build_router(AppState::new(ctx, TaskRegistry::new()));

        let direct = json!({"task": "fetch-and-store", "args": {"url": target, "output": "direct.txt"}});
        let (status, body) = send(&app, post("/tasks/call", direct)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "InvalidArgument");

        let call = json!({"task": "fetch-and-store", "args": {"url": format!("{}/go", listed.uri()), "output": "leak.txt"}});
        let (status, body) = send(&app, post("/tasks/call", call)).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"]["code"], "ExternalServiceError");
        assert!(!root.join("leak.txt").exists());
    }

    #[tokio::test]
    async fn requested_timeout_bounds_a_slow_fetch() {
        let (_dir, app, fakes) = fake_app();
        fakes.fetcher.delay(std::time::Duration::from_secs(30));
        let call = json!({"task": "fetch-and-store", "args": {"url": "http://example.com/", "output": "slow.txt"}, "timeout_s": 1});
        let (status, body) = send(&app, post("/tasks/call", call)).await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(body["error"]["code"], "Timeout");
    }
}
