use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::state::AppState;
use crate::api;

/// Build the axum router with all routes and middleware.
pub fn build(state: AppState) -> Router {
    Router::new()
        .merge(api::routes())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::config::AgentConfig;
    use crate::error::Result;
    use crate::llm::{OracleReply, ToolCall};
    use crate::runtime::AgentRuntime;
    use crate::testing::{Behavior, FakeTools, ScriptedOracle};

    fn app(replies: Vec<Result<OracleReply>>, tools: Arc<FakeTools>) -> Router {
        let runtime = AgentRuntime::builder(AgentConfig::default())
            .oracle(ScriptedOracle::new(replies))
            .tools(tools)
            .build()
            .unwrap();
        build(AppState::new(Arc::new(runtime)))
    }

    fn maps_tools() -> Arc<FakeTools> {
        FakeTools::new(vec![
            ("maps_geocode", Behavior::Reply(r#"{"lat":48.85,"lng":2.35}"#)),
            ("maps_search_places", Behavior::Reply("[]")),
        ])
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn run_body(session_id: Option<&str>, text: &str) -> Value {
        let mut body = json!({
            "app_name": "google_map_adk",
            "user_id": "alice",
            "new_message": { "role": "user", "parts": [{ "text": text }] }
        });
        if let Some(id) = session_id {
            body["session_id"] = json!(id);
        }
        body
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = app(vec![], maps_tools())
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_create_session_twice() {
        let app = app(vec![], maps_tools());
        let uri = "/apps/google_map_adk/users/alice/sessions/s1";

        let response = app.clone().oneshot(post_json(uri, json!({}))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["message"], "Session created");
        assert_eq!(body["session_id"], "s1");

        let response = app.oneshot(post_json(uri, json!({}))).await.unwrap();
        assert_eq!(body_json(response).await["message"], "Session already exists");
    }

    #[tokio::test]
    async fn test_delete_session() {
        let app = app(vec![], maps_tools());
        let uri = "/apps/google_map_adk/users/alice/sessions/s1";
        app.clone().oneshot(post_json(uri, json!({}))).await.unwrap();

        let delete = || Request::delete(uri).body(Body::empty()).unwrap();
        let response = app.clone().oneshot(delete()).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app.oneshot(delete()).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(body_json(response).await["error"].is_string());
    }

    #[tokio::test]
    async fn test_run_with_tool_call() {
        let app = app(
            vec![
                Ok(OracleReply::tool_calls(vec![ToolCall {
                    id: "call_1".to_string(),
                    name: "maps_geocode".to_string(),
                    args: json!({"address": "Eiffel Tower"}),
                }])),
                Ok(OracleReply::text("It is at 48.85, 2.35.")),
            ],
            maps_tools(),
        );

        let response = app
            .oneshot(post_json("/run", run_body(Some("s1"), "Where is the Eiffel Tower?")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["session_id"], "s1");
        assert_eq!(body["user_id"], "alice");
        let kinds: Vec<&str> = body["response_events"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["type"].as_str().unwrap())
            .collect();
        assert_eq!(
            kinds,
            vec!["tool_call_started", "tool_call_result", "text_fragment", "turn_ended"]
        );
        let last = body["response_events"].as_array().unwrap().last().unwrap();
        assert!(last.get("error").map_or(true, Value::is_null));
    }

    #[tokio::test]
    async fn test_run_generates_session_id() {
        let app = app(vec![Ok(OracleReply::text("Hi."))], maps_tools());
        let response = app
            .clone()
            .oneshot(post_json("/run", run_body(None, "hello")))
            .await
            .unwrap();
        let body = body_json(response).await;
        let session_id = body["session_id"].as_str().unwrap().to_string();
        assert!(uuid::Uuid::parse_str(&session_id).is_ok());

        let response = app
            .oneshot(Request::get("/sessions").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let sessions = body_json(response).await;
        assert_eq!(sessions["sessions"][0]["id"], session_id.as_str());
        assert_eq!(sessions["sessions"][0]["messages"], 2);
    }

    #[tokio::test]
    async fn test_run_without_parts_is_bad_request() {
        let app = app(vec![], maps_tools());
        let response = app
            .oneshot(post_json(
                "/run",
                json!({"app_name": "google_map_adk", "user_id": "alice", "new_message": {"parts": []}}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_run_blank_text_is_bad_request() {
        let app = app(vec![], maps_tools());
        for uri in ["/run", "/run_sse"] {
            let response = app
                .clone()
                .oneshot(post_json(uri, run_body(Some("fresh"), "   ")))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        }

        // Rejected before the session was resolved
        let response = app
            .oneshot(Request::get("/sessions").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body_json(response).await["sessions"], json!([]));
    }

    #[tokio::test]
    async fn test_run_sse_streams_named_events() {
        let app = app(vec![Ok(OracleReply::text("Bonjour."))], maps_tools());
        let response = app
            .oneshot(post_json("/run_sse", run_body(Some("s1"), "hello")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-session-id"], "s1");
        assert!(response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream"));

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("event: text_fragment"));
        assert!(text.contains("Bonjour."));
        assert!(text.contains("event: turn_ended"));
    }

    #[tokio::test]
    async fn test_list_apps() {
        let response = app(vec![], maps_tools())
            .oneshot(Request::get("/list-apps").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["status"], "active");
        assert_eq!(body["app_name"], "google_map_adk");
        assert_eq!(
            body["available_tools"],
            json!(["maps_geocode", "maps_search_places"])
        );
    }

    #[tokio::test]
    async fn test_list_apps_degraded_without_tool_server() {
        let response = app(vec![], FakeTools::unavailable())
            .oneshot(Request::get("/list-apps").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["available_tools"], json!([]));
    }

    #[tokio::test]
    async fn test_reconnect_tools() {
        let tools = maps_tools();
        let response = app(vec![], tools.clone())
            .oneshot(post_json("/tools/reconnect", json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            tools.reconnects.load(std::sync::atomic::Ordering::SeqCst),
            1
        );
    }
}
