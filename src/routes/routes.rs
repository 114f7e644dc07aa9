//! Defines routes for account, folder and file operations.
//!
//! ## Structure
//! - **Auth**
//!   - `POST   /auth/register` — create an account
//!   - `POST   /auth/login` — exchange credentials for tokens
//!
//! - **Files**
//!   - `GET    /files/items` — one level of the owner's tree
//!   - `POST   /files/folder` — create folder
//!   - `PUT    /files/folder/rename` — rename folder
//!   - `DELETE /files/folder` — delete folder (shallow or recursive)
//!   - `POST   /files/file` — save file metadata
//!   - `DELETE /files/file` — delete payload, then metadata
//!   - `POST   /files/upload` — store a payload (multipart)
//!   - `GET    /files/blob/{*key}` — download a saved payload
//!
//! The `/files` routes sit behind bearer-token auth only when
//! `enforce_token_owner` is set.

use crate::{
    handlers::{
        auth_handlers::{login, register},
        file_handlers::{
            create_folder, delete_file, delete_folder, download_file, list_items, rename_folder,
            save_file_meta, upload_file,
        },
        health_handlers::{healthz, readyz},
    },
    middleware::require_auth,
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post, put},
};

/// Build the full router with its state applied.
pub fn routes(state: AppState, max_upload_bytes: usize) -> Router {
    let auth = Router::new()
        .route("/register", post(register))
        .route("/login", post(login));

    let mut files = Router::new()
        .route("/items", get(list_items))
        .route("/folder", post(create_folder).delete(delete_folder))
        .route("/folder/rename", put(rename_folder))
        .route("/file", post(save_file_meta).delete(delete_file))
        .route("/upload", post(upload_file))
        .route("/blob/{*key}", get(download_file));

    if state.enforce_token_owner {
        files = files.route_layer(middleware::from_fn_with_state(state.clone(), require_auth));
    }

    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .nest("/auth", auth)
        .nest("/files", files)
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::memory_pool,
        services::{
            blob_store::testing::MemoryBlobStore,
            identity_service::{
                AuthOutcome, Identity, IdentityProvider, IdentityResult, LocalIdentityProvider,
            },
            tree_service::TreeService,
        },
    };
    use async_trait::async_trait;
    use axum::{
        body::Body,
        http::{Method, Request, StatusCode, header},
    };
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use std::sync::Arc;
    use tower::ServiceExt;

    const BOUNDARY: &str = "X-TEST-BOUNDARY";

    async fn app_with(enforce_token_owner: bool) -> Router {
        let db = Arc::new(memory_pool().await);
        let state = AppState {
            tree: TreeService::new(db.clone(), Arc::new(MemoryBlobStore::new())),
            identity: Arc::new(LocalIdentityProvider::new(db, "test-secret", 900, 3600)),
            enforce_token_owner,
        };
        routes(state, 1024 * 1024)
    }

    async fn app() -> Router {
        app_with(false).await
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        (status, body)
    }

    fn json_req(method: Method, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn with_token(mut req: Request<Body>, token: &str) -> Request<Body> {
        req.headers_mut().insert(
            header::AUTHORIZATION,
            format!("Bearer {}", token).parse().unwrap(),
        );
        req
    }

    /// multipart/form-data with text fields and an optional file part.
    fn upload_req(fields: &[(&str, &str)], file: Option<(&str, &[u8])>) -> Request<Body> {
        let mut body = Vec::new();
        for (name, value) in fields {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
                )
                .as_bytes(),
            );
        }
        if let Some((filename, data)) = file {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method(Method::POST)
            .uri("/files/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn register_and_login(app: &Router, email: &str) -> (String, String) {
        let credentials = json!({ "email": email, "password": "password123" });
        let (status, _) = send(app, json_req(Method::POST, "/auth/register", credentials.clone())).await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = send(app, json_req(Method::POST, "/auth/login", credentials)).await;
        assert_eq!(status, StatusCode::OK);
        (
            body["id"].as_str().unwrap().to_string(),
            body["access_token"].as_str().unwrap().to_string(),
        )
    }

    #[tokio::test]
    async fn health_endpoints_report_ok() {
        let app = app().await;
        let (status, body) = send(&app, get_req("/healthz")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let (status, body) = send(&app, get_req("/readyz")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["checks"]["sqlite"]["ok"], true);
        assert_eq!(body["checks"]["storage"]["ok"], true);
    }

    #[tokio::test]
    async fn register_and_login_flow() {
        let app = app().await;
        let credentials = json!({ "email": "ada@example.com", "password": "password123" });

        let (status, body) =
            send(&app, json_req(Method::POST, "/auth/register", credentials.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["email"], "ada@example.com");
        assert_eq!(body["message"], "User registered successfully");

        let (status, body) = send(&app, json_req(Method::POST, "/auth/login", credentials)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert!(body["access_token"].as_str().is_some());
        assert!(body["refresh_token"].as_str().is_some());
    }

    #[tokio::test]
    async fn auth_failures_are_structured() {
        let app = app().await;

        let (status, body) = send(
            &app,
            json_req(Method::POST, "/auth/login", json!({ "email": "a@b.co" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "VALIDATION_ERROR");

        let (status, body) = send(
            &app,
            json_req(
                Method::POST,
                "/auth/login",
                json!({ "email": "nobody@example.com", "password": "password123" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "AUTHENTICATION_FAILED");

        let (status, _) = send(
            &app,
            json_req(Method::POST, "/auth/register", json!({ "password": "x" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn folder_lifecycle_over_http() {
        let app = app().await;

        let (status, folder) = send(
            &app,
            json_req(
                Method::POST,
                "/files/folder",
                json!({ "name": "Docs", "parentId": "", "ownerId": "u1" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(folder["parent_id"], Value::Null);
        let folder_id = folder["id"].as_str().unwrap().to_string();

        let (status, listing) = send(&app, get_req("/files/items?ownerId=u1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listing["folders"].as_array().unwrap().len(), 1);
        assert_eq!(listing["files"], json!([]));

        let (status, renamed) = send(
            &app,
            json_req(
                Method::PUT,
                "/files/folder/rename",
                json!({ "folderId": folder_id, "newName": "Papers", "ownerId": "u1" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(renamed["name"], "Papers");

        let (status, _) = send(
            &app,
            json_req(
                Method::PUT,
                "/files/folder/rename",
                json!({ "folderId": folder_id, "newName": "Stolen", "ownerId": "u2" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(
            &app,
            json_req(
                Method::DELETE,
                "/files/folder",
                json!({ "folderId": folder_id, "ownerId": "u1" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Folder deleted successfully");

        let (_, listing) = send(&app, get_req("/files/items?ownerId=u1")).await;
        assert_eq!(listing["folders"], json!([]));
    }

    #[tokio::test]
    async fn invalid_requests_are_bad_requests() {
        let app = app().await;

        let (status, body) = send(
            &app,
            json_req(Method::POST, "/files/folder", json!({ "ownerId": "u1" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "name and ownerId are required");

        let malformed = Request::builder()
            .method(Method::POST)
            .uri("/files/folder")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, body) = send(&app, malformed).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "VALIDATION_ERROR");

        let (status, _) = send(&app, get_req("/files/items")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn upload_save_list_download_delete() {
        let app = app().await;

        let (status, uploaded) =
            send(&app, upload_req(&[("ownerId", "u1")], Some(("notes.txt", &b"hello"[..])))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(uploaded["name"], "notes.txt");
        assert_eq!(uploaded["ownerId"], "u1");
        assert_eq!(uploaded["folderId"], Value::Null);
        let src = uploaded["src"].as_str().unwrap().to_string();

        let (status, file) = send(
            &app,
            json_req(
                Method::POST,
                "/files/file",
                json!({ "name": "notes.txt", "ownerId": "u1", "src": src }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let file_id = file["id"].as_str().unwrap().to_string();

        let (_, listing) = send(&app, get_req("/files/items?ownerId=u1")).await;
        assert_eq!(listing["files"][0]["src"], src.as_str());

        let (status, body) =
            send(&app, get_req(&format!("/files/blob/{}?ownerId=u1", src))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, Value::String("hello".into()));

        let (status, _) = send(&app, get_req(&format!("/files/blob/{}?ownerId=u2", src))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(
            &app,
            json_req(
                Method::DELETE,
                "/files/file",
                json!({ "fileId": file_id, "ownerId": "u1", "src": src }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "File deleted successfully");

        let (status, _) = send(&app, get_req(&format!("/files/blob/{}?ownerId=u1", src))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn upload_without_file_part_is_rejected() {
        let app = app().await;
        let (status, body) = send(&app, upload_req(&[("ownerId", "u1")], None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "No file uploaded");
    }

    #[tokio::test]
    async fn upload_names_are_client_errors_not_server_errors() {
        let app = app().await;
        let (status, body) = send(
            &app,
            upload_req(&[("ownerId", "u1")], Some(("notes..v2.txt", &b"v2"[..]))),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "notes..v2.txt");

        let long_name = format!("{}.txt", "n".repeat(300));
        let (status, body) = send(
            &app,
            upload_req(&[("ownerId", "u1")], Some((long_name.as_str(), &b"x"[..]))),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn saving_someone_elses_upload_is_rejected() {
        let app = app().await;
        let (_, uploaded) =
            send(&app, upload_req(&[("ownerId", "u1")], Some(("mine.txt", &b"m"[..])))).await;

        let (status, body) = send(
            &app,
            json_req(
                Method::POST,
                "/files/file",
                json!({ "name": "mine.txt", "ownerId": "u2", "src": uploaded["src"] }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn enforced_routes_require_a_matching_token() {
        let app = app_with(true).await;
        let (user_id, token) = register_and_login(&app, "owner@example.com").await;

        let (status, body) = send(&app, get_req("/files/items")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["message"], "No token provided");

        let (status, body) = send(&app, with_token(get_req("/files/items"), "garbage")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["message"], "Invalid token");

        let spoofed = with_token(
            json_req(
                Method::POST,
                "/files/folder",
                json!({ "name": "Mine", "ownerId": "someone-else" }),
            ),
            &token,
        );
        let (status, _) = send(&app, spoofed).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, folder) = send(
            &app,
            with_token(
                json_req(Method::POST, "/files/folder", json!({ "name": "Mine" })),
                &token,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(folder["owner_id"], user_id.as_str());

        let (status, listing) = send(&app, with_token(get_req("/files/items"), &token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listing["folders"].as_array().unwrap().len(), 1);

        // Health probes stay open.
        let (status, _) = send(&app, get_req("/healthz")).await;
        assert_eq!(status, StatusCode::OK);
    }

    /// A provider that defers sessions and never returns users on sign-in.
    struct PendingProvider;

    #[async_trait]
    impl IdentityProvider for PendingProvider {
        async fn sign_up(&self, email: &str, _password: &str) -> IdentityResult<AuthOutcome> {
            Ok(AuthOutcome {
                user: Some(Identity {
                    id: "pending-1".into(),
                    email: email.into(),
                }),
                session: None,
            })
        }

        async fn sign_in(&self, _email: &str, _password: &str) -> IdentityResult<AuthOutcome> {
            Ok(AuthOutcome {
                user: None,
                session: None,
            })
        }

        async fn verify_token(&self, _token: &str) -> IdentityResult<String> {
            Ok("pending-1".into())
        }
    }

    #[tokio::test]
    async fn provider_without_session_or_user() {
        let db = Arc::new(memory_pool().await);
        let app = routes(
            AppState {
                tree: TreeService::new(db, Arc::new(MemoryBlobStore::new())),
                identity: Arc::new(PendingProvider),
                enforce_token_owner: false,
            },
            1024,
        );
        let credentials = json!({ "email": "new@example.com", "password": "password123" });

        let (status, body) =
            send(&app, json_req(Method::POST, "/auth/register", credentials.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body["message"],
            "Confirmation email sent. Please check your inbox."
        );

        let (status, body) = send(&app, json_req(Method::POST, "/auth/login", credentials)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "USER_NOT_FOUND");
    }
}
