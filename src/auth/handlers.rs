use axum::{
    extract::{FromRef, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::{info, instrument};

use crate::{
    auth::{
        dto::{LoginRequest, LoginResponse, MessageResponse, PublicUser, SignupRequest},
        extractors::{AuthUser, JsonBody},
        jwt::JwtKeys,
        password::{hash_password, verify_password},
        repo_types::NewUser,
    },
    error::{AppError, AppResult},
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/signup", post(signup))
        .route("/login", post(login))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/me", get(get_me))
}

#[instrument(skip(state, payload))]
pub async fn signup(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<SignupRequest>,
) -> AppResult<(StatusCode, Json<MessageResponse>)> {
    let fields = payload
        .into_fields()
        .ok_or_else(|| AppError::bad_request("All fields are required"))?;

    let password_hash = hash_password(fields.password).await?;

    let new_user = NewUser {
        first_name: fields.first_name,
        last_name: fields.last_name,
        email: fields.email,
        password_hash,
    };
    let id = state
        .users
        .create(&new_user)
        .await
        .map_err(AppError::Database)?;

    info!(user_id = id, email = %new_user.email, "user registered");
    Ok((
        StatusCode::CREATED,
        Json(MessageResponse {
            message: "User created successfully".into(),
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<LoginRequest>,
) -> AppResult<Json<LoginResponse>> {
    let (email, password) = payload
        .into_credentials()
        .ok_or_else(|| AppError::bad_request("Email and password are required"))?;

    let user = state
        .users
        .find_by_email(&email)
        .await
        .map_err(AppError::Database)?
        .ok_or_else(|| AppError::unauthorized("User not found"))?;

    if !verify_password(password, user.password_hash.clone()).await? {
        return Err(AppError::unauthorized("Invalid credentials"));
    }

    let token = JwtKeys::from_ref(&state).sign(user.id, &user.email)?;

    info!(user_id = user.id, email = %user.email, "user logged in");
    Ok(Json(LoginResponse {
        message: "Login successful".into(),
        token,
    }))
}

#[instrument(skip(state, claims))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
) -> AppResult<Json<PublicUser>> {
    let user = state
        .users
        .find_by_id(claims.id)
        .await
        .map_err(AppError::Database)?
        .ok_or_else(|| AppError::unauthorized("User not found"))?;

    Ok(Json(PublicUser::from(user)))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{header, Request};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::app::build_app;
    use crate::auth::repo::{InMemoryUserStore, UserStore};

    struct TestApp {
        store: Arc<InMemoryUserStore>,
        router: Router,
    }

    impl TestApp {
        fn new() -> Self {
            Self::with_store(InMemoryUserStore::default())
        }

        fn with_store(store: InMemoryUserStore) -> Self {
            let store = Arc::new(store);
            let router = build_app(AppState::fake(store.clone())).expect("app");
            Self { store, router }
        }

        async fn send(&self, req: Request<Body>) -> (StatusCode, Value) {
            let res = self.router.clone().oneshot(req).await.unwrap();
            let status = res.status();
            let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
                .await
                .unwrap();
            let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
            (status, body)
        }

        async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
            let req = Request::post(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap();
            self.send(req).await
        }

        async fn me(&self, bearer: Option<&str>) -> (StatusCode, Value) {
            let mut req = Request::get("/api/me");
            if let Some(token) = bearer {
                req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
            }
            self.send(req.body(Body::empty()).unwrap()).await
        }
    }

    fn scenario_signup() -> Value {
        json!({"firstName": "A", "lastName": "B", "email": "a@b.com", "password": "secret"})
    }

    #[tokio::test]
    async fn signup_then_login_issues_token_for_the_user() {
        let app = TestApp::new();

        let (status, body) = app.post("/api/signup", scenario_signup()).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body, json!({"message": "User created successfully"}));

        let rows = app.store.rows();
        assert_eq!(rows.len(), 1);
        assert_ne!(rows[0].password_hash, "secret");
        assert!(bcrypt::verify("secret", &rows[0].password_hash).unwrap());

        let (status, body) = app
            .post("/api/login", json!({"email": "a@b.com", "password": "secret"}))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Login successful");

        let token = body["token"].as_str().expect("token");
        let claims = JwtKeys::new(b"test-secret").verify(token).expect("valid token");
        assert_eq!(claims.id, rows[0].id);
        assert_eq!(claims.email, "a@b.com");
        assert_eq!(claims.exp - claims.iat, 3600);

        let (status, body) = app.me(Some(token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({"id": rows[0].id, "firstName": "A", "lastName": "B", "email": "a@b.com"})
        );
    }

    #[tokio::test]
    async fn signup_missing_any_field_is_rejected_without_insert() {
        let app = TestApp::new();
        for field in ["firstName", "lastName", "email", "password"] {
            let mut body = scenario_signup();
            body.as_object_mut().unwrap().remove(field);
            let (status, res) = app.post("/api/signup", body).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{field}");
            assert_eq!(res, json!({"error": "All fields are required"}));
        }
        assert!(app.store.rows().is_empty());
    }

    #[tokio::test]
    async fn malformed_body_gets_json_error() {
        let app = TestApp::new();
        let req = Request::post("/api/signup")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, body) = app.send(req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn signup_without_json_content_type_is_rejected() {
        let app = TestApp::new();
        let req = Request::post("/api/signup")
            .body(Body::from(scenario_signup().to_string()))
            .unwrap();
        let (status, body) = app.send(req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let msg = body["error"].as_str().expect("error message");
        assert!(msg.contains("Content-Type"), "{msg}");
        assert!(app.store.rows().is_empty());
    }

    #[tokio::test]
    async fn login_against_plaintext_password_row_is_a_server_error() {
        let store = InMemoryUserStore::default();
        store
            .create(&NewUser {
                first_name: "Legacy".into(),
                last_name: "Row".into(),
                email: "old@b.com".into(),
                password_hash: "plaintext".into(),
            })
            .await
            .unwrap();
        let app = TestApp::with_store(store);

        let (status, body) = app
            .post("/api/login", json!({"email": "old@b.com", "password": "plaintext"}))
            .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({"error": "Server error"}));
    }

    #[tokio::test]
    async fn signup_store_failure_is_a_database_error() {
        let app = TestApp::with_store(InMemoryUserStore::broken());
        let (status, body) = app.post("/api/signup", scenario_signup()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({"error": "Database error"}));
    }

    #[tokio::test]
    async fn duplicate_email_signup_fails_in_the_store() {
        let app = TestApp::new();
        let (status, _) = app.post("/api/signup", scenario_signup()).await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, body) = app.post("/api/signup", scenario_signup()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({"error": "Database error"}));
        assert_eq!(app.store.rows().len(), 1);
    }

    #[tokio::test]
    async fn login_requires_email_and_password() {
        let app = TestApp::new();
        for body in [
            json!({"email": "a@b.com"}),
            json!({"password": "secret"}),
            json!({"email": "", "password": "secret"}),
        ] {
            let (status, res) = app.post("/api/login", body).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(res, json!({"error": "Email and password are required"}));
        }
    }

    #[tokio::test]
    async fn login_unknown_email_is_unauthorized() {
        let app = TestApp::new();
        let (status, body) = app
            .post("/api/login", json!({"email": "nobody@b.com", "password": "secret"}))
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, json!({"error": "User not found"}));
    }

    #[tokio::test]
    async fn login_wrong_password_is_unauthorized() {
        let app = TestApp::new();
        app.post("/api/signup", scenario_signup()).await;
        let (status, body) = app
            .post("/api/login", json!({"email": "a@b.com", "password": "wrong"}))
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, json!({"error": "Invalid credentials"}));
    }

    #[tokio::test]
    async fn login_store_failure_is_a_database_error() {
        let app = TestApp::with_store(InMemoryUserStore::broken());
        let (status, body) = app
            .post("/api/login", json!({"email": "a@b.com", "password": "secret"}))
            .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({"error": "Database error"}));
    }

    #[tokio::test]
    async fn login_is_post_only() {
        let app = TestApp::new();
        let req = Request::get("/api/login?email=a@b.com&password=secret")
            .body(Body::empty())
            .unwrap();
        let (status, _) = app.send(req).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn me_requires_a_valid_bearer_token() {
        let app = TestApp::new();

        let (status, body) = app.me(None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, json!({"error": "Missing Authorization header"}));

        let (status, body) = app.me(Some("garbage")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, json!({"error": "Invalid or expired token"}));

        let stale = JwtKeys::new(b"test-secret").sign(99, "gone@b.com").unwrap();
        let (status, body) = app.me(Some(&stale)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, json!({"error": "User not found"}));
    }
}
