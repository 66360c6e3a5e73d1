use crate::{
    accounts::{AccountStore, TokenIssuer},
    config::ServerConfig,
    detector::Detector,
    history::HistoryStore,
    registry::SessionRegistry,
    routes::api_routes,
    telemetry::Metrics,
};
use axum::Router;
use axum_otel_metrics::HttpMetricsLayerBuilder;
use std::sync::Arc;
use tokio::{net::TcpListener, sync::broadcast::Receiver, task::JoinHandle};

#[derive(Clone)]
pub struct SharedState {
    pub detector: Arc<dyn Detector>,
    pub history: Arc<dyn HistoryStore>,
    pub accounts: Arc<dyn AccountStore>,
    pub tokens: Arc<TokenIssuer>,
    pub registry: Arc<SessionRegistry>,
    pub metrics: Arc<Metrics>,
    pub max_upload_bytes: usize,
}

impl SharedState {
    pub fn new(
        detector: Arc<dyn Detector>,
        history: Arc<dyn HistoryStore>,
        accounts: Arc<dyn AccountStore>,
        tokens: Arc<TokenIssuer>,
        metrics: Arc<Metrics>,
        max_upload_bytes: usize,
    ) -> Self {
        Self {
            detector,
            history,
            accounts,
            tokens,
            registry: Arc::new(SessionRegistry::new(metrics.clone())),
            metrics,
            max_upload_bytes,
        }
    }
}

pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .merge(api_routes(state.max_upload_bytes))
        .with_state(state)
}

pub struct HttpServer {
    router: Router,
    listener: TcpListener,
}

impl HttpServer {
    pub async fn new(state: SharedState, config: &ServerConfig) -> anyhow::Result<Self> {
        let addr = config.get_address();
        let metrics_layer = HttpMetricsLayerBuilder::new().build();

        let router = build_router(state).layer(metrics_layer);
        let listener = TcpListener::bind(addr).await?;

        Ok(Self { router, listener })
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run(
        self,
        shutdown_rx: Receiver<()>,
    ) -> anyhow::Result<JoinHandle<anyhow::Result<()>>> {
        tracing::info!("Starting app on {}", self.listener.local_addr()?);

        let listener = self.listener;
        let router = self.router;
        let server_handle = tokio::spawn({
            let mut shutdown_rx = shutdown_rx.resubscribe();
            async move {
                axum::serve(listener, router)
                    .with_graceful_shutdown(async move {
                        shutdown_rx.recv().await.ok();
                    })
                    .await?;
                Ok(())
            }
        });

        Ok(server_handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        accounts::InMemoryAccountStore, history::MediaHistoryStore, session::tests::ColorDetector,
    };
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
    };
    use detection_wire::{HistoryList, LabelList, StatusReply};
    use tower::ServiceExt;

    const BOUNDARY: &str = "X-TEST-BOUNDARY";

    fn state(dir: &std::path::Path) -> SharedState {
        SharedState::new(
            Arc::new(ColorDetector::new()),
            Arc::new(MediaHistoryStore::open(dir).unwrap()),
            Arc::new(InMemoryAccountStore::new()),
            Arc::new(TokenIssuer::new("route-test-signing-secret", 60)),
            Arc::new(Metrics::new().unwrap()),
            1024 * 1024,
        )
    }

    async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn upload_request(field: &str, file_name: &str, content: &str) -> Request<Body> {
        let body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\n\
             Content-Type: video/mp4\r\n\r\n{content}\r\n--{b}--\r\n",
            b = BOUNDARY,
        );
        Request::builder()
            .method("POST")
            .uri("/upload/")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn json_request(method: &str, uri: &str, token: Option<&str>, body: &str) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, StatusReply) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        (status, body_json(response).await)
    }

    async fn register_and_login(router: &Router, username: &str, password: &str) -> String {
        let body = format!(r#"{{"username":"{}","password":"{}"}}"#, username, password);
        let (status, _) = send(router, json_request("POST", "/register/", None, &body)).await;
        assert_eq!(status, StatusCode::OK);
        let (status, reply) = send(router, json_request("POST", "/login/", None, &body)).await;
        assert_eq!(status, StatusCode::OK);
        reply.token.unwrap()
    }

    #[tokio::test]
    async fn test_labels_route() {
        let dir = tempfile::tempdir().unwrap();
        let router = build_router(state(dir.path()));

        let response = router
            .oneshot(Request::get("/labels/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let labels: LabelList = body_json(response).await;
        assert_eq!(labels.labels, vec!["person", "bicycle", "car"]);
    }

    #[tokio::test]
    async fn test_healthcheck() {
        let dir = tempfile::tempdir().unwrap();
        let router = build_router(state(dir.path()));

        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let status: serde_json::Value = body_json(response).await;
        assert_eq!(status["status"], "Available");
    }

    #[tokio::test]
    async fn test_upload_list_delete() {
        let dir = tempfile::tempdir().unwrap();
        let router = build_router(state(dir.path()));

        let response = router
            .clone()
            .oneshot(upload_request("video", "test video.mp4", "fake video content"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let reply: StatusReply = body_json(response).await;
        assert_eq!(reply.status, "success");
        let record = reply.record.unwrap();
        assert_eq!(record.name, "test_video.mp4");
        assert_eq!(
            std::fs::read_to_string(dir.path().join("test_video.mp4")).unwrap(),
            "fake video content"
        );

        let response = router
            .clone()
            .oneshot(Request::get("/history/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let history: HistoryList = body_json(response).await;
        assert_eq!(history.history, vec![record.clone()]);

        let response = router
            .clone()
            .oneshot(
                Request::delete(format!("/delete/{}/", record.id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!dir.path().join("test_video.mp4").exists());

        let response = router
            .oneshot(Request::get("/history/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let history: HistoryList = body_json(response).await;
        assert!(history.history.is_empty());
    }

    #[tokio::test]
    async fn test_upload_without_video_field() {
        let dir = tempfile::tempdir().unwrap();
        let router = build_router(state(dir.path()));

        let response = router
            .oneshot(upload_request("document", "a.mp4", "x"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let reply: StatusReply = body_json(response).await;
        assert_eq!(reply, StatusReply::fail("No file selected"));
    }

    #[tokio::test]
    async fn test_delete_unknown_record_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let router = build_router(state(dir.path()));

        let response = router
            .oneshot(Request::post("/delete/99/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let reply: StatusReply = body_json(response).await;
        assert_eq!(reply, StatusReply::success());
    }

    #[tokio::test]
    async fn test_register_validation() {
        let dir = tempfile::tempdir().unwrap();
        let router = build_router(state(dir.path()));

        let body = r#"{"username":"alice","password":"pw","email":"a@example.com"}"#;
        let (status, reply) = send(&router, json_request("POST", "/register/", None, body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reply, StatusReply::success_with("User registered successfully"));

        let (status, reply) = send(&router, json_request("POST", "/register/", None, body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(reply, StatusReply::fail("Username already exists"));

        let (status, reply) = send(
            &router,
            json_request("POST", "/register/", None, r#"{"username":"bob"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(reply, StatusReply::fail("Username and password are required"));

        let (status, reply) =
            send(&router, json_request("POST", "/register/", None, "{not json")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(reply, StatusReply::fail("Invalid JSON"));
    }

    #[tokio::test]
    async fn test_login_with_bad_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let router = build_router(state(dir.path()));
        register_and_login(&router, "carol", "secret").await;

        let (status, reply) = send(
            &router,
            json_request(
                "POST",
                "/login/",
                None,
                r#"{"username":"carol","password":"wrong"}"#,
            ),
        )
        .await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(reply, StatusReply::fail("Invalid credentials"));
        assert_eq!(reply.token, None);
    }

    #[tokio::test]
    async fn test_profile_read_update_and_logout() {
        let dir = tempfile::tempdir().unwrap();
        let router = build_router(state(dir.path()));
        let token = register_and_login(&router, "dave", "secret").await;

        let (status, reply) =
            send(&router, json_request("GET", "/profile/", Some(&token), "")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reply.data.unwrap().username, "dave");

        let update = r#"{"username":"david","email":"d@example.com"}"#;
        let (status, reply) =
            send(&router, json_request("PUT", "/profile/", Some(&token), update)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reply, StatusReply::success_with("Profile updated successfully"));

        let (_, reply) = send(&router, json_request("GET", "/profile/", Some(&token), "")).await;
        let profile = reply.data.unwrap();
        assert_eq!(profile.username, "david");
        assert_eq!(profile.email, "d@example.com");

        let (status, reply) =
            send(&router, json_request("POST", "/logout/", Some(&token), "")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reply, StatusReply::success_with("Logout successful"));

        let (status, reply) =
            send(&router, json_request("GET", "/profile/", Some(&token), "")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(reply, StatusReply::fail("Not authenticated"));
    }

    #[tokio::test]
    async fn test_profile_rename_to_taken_username() {
        let dir = tempfile::tempdir().unwrap();
        let router = build_router(state(dir.path()));
        register_and_login(&router, "erin", "pw").await;
        let token = register_and_login(&router, "frank", "pw").await;

        let (status, reply) = send(
            &router,
            json_request("PUT", "/profile/", Some(&token), r#"{"username":"erin"}"#),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(reply, StatusReply::fail("Username already taken"));
    }

    #[tokio::test]
    async fn test_delete_account() {
        let dir = tempfile::tempdir().unwrap();
        let router = build_router(state(dir.path()));
        let token = register_and_login(&router, "gina", "pw").await;

        let (status, reply) =
            send(&router, json_request("DELETE", "/delete_account/", None, "")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(reply, StatusReply::fail("Not authenticated"));

        let (status, reply) = send(
            &router,
            json_request("DELETE", "/delete_account/", Some(&token), ""),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reply, StatusReply::success_with("Account deleted successfully"));

        let (status, _) = send(
            &router,
            json_request(
                "POST",
                "/login/",
                None,
                r#"{"username":"gina","password":"pw"}"#,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_account_routes_reject_wrong_method() {
        let dir = tempfile::tempdir().unwrap();
        let router = build_router(state(dir.path()));

        for (method, uri) in [
            ("GET", "/register/"),
            ("GET", "/login/"),
            ("GET", "/logout/"),
            ("POST", "/delete_account/"),
            ("DELETE", "/profile/"),
        ] {
            let (status, reply) = send(&router, json_request(method, uri, None, "")).await;
            assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED, "{} {}", method, uri);
            assert_eq!(reply, StatusReply::fail("Method not allowed"));
        }
    }
}
