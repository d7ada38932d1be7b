use axum::{
    body::Body,
    http::Request,
    routing::{any, delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::Span;

use super::handlers;
use super::proxy::{forward, Upstream};
use crate::proxy::{Director, DirectorError};
use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Result<Router, DirectorError> {
    // Session routes -- sign-in needs the account service
    let mut session_routes =
        Router::new().route("/v1/sessions/:id", delete(handlers::sign_out));
    if state.accounts.is_some() {
        session_routes = session_routes.route("/v1/sessions", post(handlers::sign_in));
    } else {
        tracing::info!("No account service configured, sign-in is disabled");
    }

    // Internal routes -- never proxied
    let internal_routes = Router::new().route("/_internal/health", get(handlers::health));

    let mut router: Router = Router::new()
        .merge(session_routes)
        .merge(internal_routes)
        .with_state(Arc::clone(&state));

    // Upstream routes -- one director (and one round-robin cursor) per group
    for group in &state.config.upstreams {
        let upstream = Arc::new(Upstream {
            director: Director::new(
                group.name.clone(),
                group.targets.clone(),
                state.sessions.clone(),
            )?,
            http_client: state.http_client.clone(),
        });

        let mut group_routes = Router::new();
        for prefix in &group.routes {
            group_routes = group_routes
                .route(prefix, any(forward))
                .route(&format!("{prefix}/*rest"), any(forward));
        }
        router = router.merge(group_routes.with_state::<()>(upstream));

        tracing::info!(
            group = %group.name,
            routes = ?group.routes,
            targets = group.targets.len(),
            "Registered upstream group"
        );
    }

    Ok(router.layer(TraceLayer::new_for_http().make_span_with(request_span::<Body>)))
}

/// Request span without the query string, which may carry a session token.
fn request_span<B>(request: &Request<B>) -> Span {
    tracing::debug_span!(
        "request",
        method = %request.method(),
        path = %request.uri().path(),
        version = ?request.version(),
    )
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::Mutex;

    use axum::http::{header, Method, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::accounts::Accounts;
    use crate::storage::SessionStore;
    use crate::testutil::{
        memory_store, test_config, test_state, StaticAccounts, UnavailableStore, TEST_EMAIL,
        TEST_PASSWORD,
    };

    async fn call(router: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn sign_in_request() -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri("/v1/sessions")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({"email": TEST_EMAIL, "password": TEST_PASSWORD}).to_string(),
            ))
            .unwrap()
    }

    #[tokio::test]
    async fn test_sign_in_with_store_down() {
        let accounts = Arc::new(StaticAccounts::default());
        let state = test_state(
            test_config(&["127.0.0.1:1"]),
            Arc::new(UnavailableStore),
            Some(Arc::clone(&accounts) as Arc<dyn Accounts>),
        );
        let router = create_router(state).unwrap();

        let response = router.oneshot(sign_in_request()).await.unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(response.headers().get(header::AUTHORIZATION).is_none());
        assert!(accounts.sign_ins.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sign_in_records_sign_in() {
        let accounts = Arc::new(StaticAccounts::default());
        let store = memory_store();
        let state = test_state(
            test_config(&["127.0.0.1:1"]),
            Arc::clone(&store) as Arc<dyn SessionStore>,
            Some(Arc::clone(&accounts) as Arc<dyn Accounts>),
        );

        let (status, body) = call(create_router(state).unwrap(), sign_in_request()).await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["userName"], "ada");
        assert_eq!(store.len(), 1);
        let sign_ins = accounts.sign_ins.lock().unwrap();
        assert_eq!(sign_ins.len(), 1);
        assert_eq!(sign_ins[0].ip, None);
    }

    #[tokio::test]
    async fn test_malformed_sign_in_body() {
        let state = test_state(
            test_config(&["127.0.0.1:1"]),
            memory_store(),
            Some(Arc::new(StaticAccounts::default()) as Arc<dyn Accounts>),
        );
        let request = Request::builder()
            .method(Method::POST)
            .uri("/v1/sessions")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"email": 7}"#))
            .unwrap();

        let (status, body) = call(create_router(state).unwrap(), request).await;

        assert!(status.is_client_error());
        assert_eq!(body["status"], "fail");
    }

    #[tokio::test]
    async fn test_health_reports_store_backend() {
        let state = test_state(test_config(&["127.0.0.1:1"]), Arc::new(UnavailableStore), None);
        let request = Request::builder()
            .uri("/_internal/health")
            .body(Body::empty())
            .unwrap();

        let (status, body) = call(create_router(state).unwrap(), request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["store"], "unavailable");
    }

    #[tokio::test]
    async fn test_sign_out_without_token() {
        let state = test_state(test_config(&["127.0.0.1:1"]), memory_store(), None);
        let request = Request::builder()
            .method(Method::DELETE)
            .uri("/v1/sessions/mine")
            .body(Body::empty())
            .unwrap();

        let (status, body) = call(create_router(state).unwrap(), request).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["data"]["message"], "unauthenticated");
    }

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for Capture {
        type Writer = Capture;

        fn make_writer(&'a self) -> Capture {
            self.clone()
        }
    }

    #[test]
    fn test_request_span_omits_query_string() {
        let capture = Capture::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(capture.clone())
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .finish();
        let request = Request::builder()
            .uri("/v1/users/7?auth=c2Vzc2lvbi10b2tlbg%3D%3D")
            .body(())
            .unwrap();

        tracing::subscriber::with_default(subscriber, || {
            let span = request_span(&request);
            let _entered = span.enter();
            tracing::debug!("handled");
        });

        let logged = String::from_utf8(capture.0.lock().unwrap().clone()).unwrap();
        assert!(logged.contains("path=/v1/users/7"));
        assert!(!logged.contains("auth="));
        assert!(!logged.contains("c2Vzc2lvbi10b2tlbg"));
    }
}
