//! API client for communicating with the eduhub REST API.
//!
//! This module provides the `ApiClient` struct for making authenticated
//! and anonymous requests for accounts, materials, favorites, ratings and
//! comments.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::{
    Comment, FavoriteEntry, FieldErrors, LoginResponse, Material, MaterialQuery, NewMaterial,
    Rating, RegisterOutcome, RegisterRequest, RegisteredUser, UserProfile,
};

use super::error::server_message;
use super::{ApiError, Backend};

// ============================================================================
// Constants
// ============================================================================

/// Base URL used when no configuration overrides it
pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8000/api";

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

#[derive(Debug, Serialize)]
struct LoginBody<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
struct FavoriteBody {
    material: i64,
}

#[derive(Debug, Serialize)]
struct RatingBody {
    material: i64,
    puntaje: u8,
}

#[derive(Debug, Serialize)]
struct CommentBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    material: Option<i64>,
    texto: &'a str,
}

#[derive(Debug, Deserialize)]
struct PagedResponse<T> {
    results: Vec<T>,
}

/// API client for the eduhub REST API.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    /// Create a new API client rooted at `base_url` (e.g. `https://host/api`)
    pub fn new(base_url: impl Into<String>) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Send a request, retrying with exponential backoff while rate limited.
    async fn send<B>(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
        query: &[(&'static str, String)],
        body: Option<&B>,
    ) -> Result<Response, ApiError>
    where
        B: Serialize + ?Sized + Sync,
    {
        let url = self.url(path);
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let mut request = self.client.request(method.clone(), &url);
            if let Some(token) = token {
                request = request.bearer_auth(token);
            }
            if !query.is_empty() {
                request = request.query(query);
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = request.send().await?;
            if response.status() != StatusCode::TOO_MANY_REQUESTS {
                debug!(%method, url = %url, status = %response.status(), "API response");
                return Ok(response);
            }

            retries += 1;
            if retries > MAX_RATE_LIMIT_RETRIES {
                return Err(ApiError::RateLimited);
            }
            warn!(url = %url, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
            tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            backoff_ms *= 2;
        }
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: Response) -> Result<Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn parse_json<T: DeserializeOwned>(response: Response, path: &str) -> Result<T, ApiError> {
        let text = Self::check_response(response).await?.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse {}: {}", path, e)))
    }

    /// List endpoints answer with a plain array, or with a paginated
    /// `{"results": [...]}` wrapper when pagination is enabled server-side.
    async fn parse_list<T: DeserializeOwned>(response: Response, path: &str) -> Result<Vec<T>, ApiError> {
        let text = Self::check_response(response).await?.text().await?;

        if let Ok(items) = serde_json::from_str::<Vec<T>>(&text) {
            return Ok(items);
        }
        serde_json::from_str::<PagedResponse<T>>(&text)
            .map(|page| page.results)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse {}: {}", path, e)))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, token: Option<&str>) -> Result<T, ApiError> {
        let response = self.send::<()>(Method::GET, path, token, &[], None).await?;
        Self::parse_json(response, path).await
    }

    async fn get_list<T: DeserializeOwned>(
        &self,
        path: &str,
        token: Option<&str>,
        query: &[(&'static str, String)],
    ) -> Result<Vec<T>, ApiError> {
        let response = self.send::<()>(Method::GET, path, token, query, None).await?;
        Self::parse_list(response, path).await
    }

    async fn write_json<T, B>(&self, method: Method, path: &str, token: Option<&str>, body: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized + Sync,
    {
        let response = self.send(method, path, token, &[], Some(body)).await?;
        Self::parse_json(response, path).await
    }

    async fn delete(&self, path: &str, token: &str) -> Result<(), ApiError> {
        let response = self.send::<()>(Method::DELETE, path, Some(token), &[], None).await?;
        Self::check_response(response).await?;
        Ok(())
    }

    // ===== Account =====

    /// Ask the server to email a password-reset link. The server answers the
    /// same way whether or not the address exists.
    pub async fn request_password_reset(&self, email: &str) -> Result<(), ApiError> {
        let body = serde_json::json!({ "email": email });
        let response = self
            .send(Method::POST, "password-reset/", None, &[], Some(&body))
            .await?;
        Self::check_response(response).await?;
        Ok(())
    }

    /// Set a new password using the uid/token pair from the reset email.
    pub async fn confirm_password_reset(&self, uid: &str, token: &str, password: &str) -> Result<(), ApiError> {
        let path = format!("reset-password/{}/{}/", uid, token);
        let body = serde_json::json!({ "password": password });
        let response = self.send(Method::POST, &path, None, &[], Some(&body)).await?;
        Self::check_response(response).await?;
        Ok(())
    }

    /// Confirm an email address from the verification link.
    pub async fn verify_email(&self, uid: &str, token: &str) -> Result<(), ApiError> {
        let path = format!("verify-email/{}/{}/", uid, token);
        let response = self.send::<()>(Method::GET, &path, None, &[], None).await?;
        Self::check_response(response).await?;
        Ok(())
    }

    // ===== Materials =====

    pub async fn list_materials(&self, query: &MaterialQuery, token: Option<&str>) -> Result<Vec<Material>, ApiError> {
        self.get_list("materiales/", token, &query.to_params()).await
    }

    pub async fn upload_material(&self, token: &str, material: &NewMaterial) -> Result<Material, ApiError> {
        let payload = material.to_payload();
        self.write_json(Method::POST, "materiales/", Some(token), &payload).await
    }

    pub async fn delete_material(&self, token: &str, material_id: i64) -> Result<(), ApiError> {
        self.delete(&format!("materiales/{}/", material_id), token).await
    }

    // ===== Comments =====

    pub async fn list_comments(&self, token: Option<&str>, material_id: i64) -> Result<Vec<Comment>, ApiError> {
        self.get_list("comentarios/", token, &[("material", material_id.to_string())])
            .await
    }

    pub async fn add_comment(&self, token: &str, material_id: i64, text: &str) -> Result<Comment, ApiError> {
        let body = CommentBody { material: Some(material_id), texto: text };
        self.write_json(Method::POST, "comentarios/", Some(token), &body).await
    }

    pub async fn update_comment(&self, token: &str, comment_id: i64, text: &str) -> Result<Comment, ApiError> {
        let body = CommentBody { material: None, texto: text };
        let path = format!("comentarios/{}/", comment_id);
        self.write_json(Method::PUT, &path, Some(token), &body).await
    }

    pub async fn delete_comment(&self, token: &str, comment_id: i64) -> Result<(), ApiError> {
        self.delete(&format!("comentarios/{}/", comment_id), token).await
    }
}

/// Normalize a 400 body from the registration endpoint into field errors.
fn parse_field_errors(body: &str) -> FieldErrors {
    let mut errors = FieldErrors::new();
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(serde_json::Value::Object(map)) => {
            for (field, value) in map {
                let messages = match value {
                    serde_json::Value::String(s) => vec![s],
                    serde_json::Value::Array(items) => items
                        .into_iter()
                        .map(|i| match i {
                            serde_json::Value::String(s) => s,
                            other => other.to_string(),
                        })
                        .collect(),
                    other => vec![other.to_string()],
                };
                errors.insert(field, messages);
            }
        }
        _ => {
            let message = server_message(body).unwrap_or_else(|| "Registration failed".to_string());
            errors.insert("non_field_errors".to_string(), vec![message]);
        }
    }
    errors
}

#[async_trait]
impl Backend for ApiClient {
    async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, ApiError> {
        let body = LoginBody { email, password };
        let response = self.send(Method::POST, "login/", None, &[], Some(&body)).await?;
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            return serde_json::from_str(&text)
                .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse login response: {}", e)));
        }
        if status.is_client_error() {
            // Rejected credentials or an unverified account: not a transport failure
            debug!(%status, "Login rejected");
            return Ok(LoginResponse {
                error: Some(server_message(&text).unwrap_or_else(|| "Login failed".to_string())),
                ..Default::default()
            });
        }
        Err(ApiError::from_status(status, &text))
    }

    async fn register(&self, request: &RegisterRequest) -> Result<RegisterOutcome, ApiError> {
        let response = self.send(Method::POST, "register/", None, &[], Some(request)).await?;
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            let user: RegisteredUser = serde_json::from_str(&text)
                .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse register response: {}", e)))?;
            return Ok(RegisterOutcome::Created(user));
        }
        if status == StatusCode::BAD_REQUEST {
            return Ok(RegisterOutcome::Rejected(parse_field_errors(&text)));
        }
        Err(ApiError::from_status(status, &text))
    }

    async fn fetch_profile(&self, token: &str) -> Result<UserProfile, ApiError> {
        self.get_json("profile/", Some(token)).await
    }

    async fn list_favorites(&self, token: &str) -> Result<Vec<FavoriteEntry>, ApiError> {
        self.get_list("favoritos/", Some(token), &[]).await
    }

    async fn add_favorite(&self, token: &str, material_id: i64) -> Result<FavoriteEntry, ApiError> {
        let body = FavoriteBody { material: material_id };
        self.write_json(Method::POST, "favoritos/", Some(token), &body).await
    }

    async fn delete_favorite(&self, token: &str, favorite_id: i64) -> Result<(), ApiError> {
        self.delete(&format!("favoritos/{}/", favorite_id), token).await
    }

    async fn fetch_material(&self, token: Option<&str>, material_id: i64) -> Result<Material, ApiError> {
        self.get_json(&format!("materiales/{}/", material_id), token).await
    }

    async fn list_ratings(&self, token: Option<&str>, material_id: i64) -> Result<Vec<Rating>, ApiError> {
        self.get_list("calificaciones/", token, &[("material", material_id.to_string())])
            .await
    }

    async fn add_rating(&self, token: &str, material_id: i64, score: u8) -> Result<Rating, ApiError> {
        let body = RatingBody { material: material_id, puntaje: score };
        self.write_json(Method::POST, "calificaciones/", Some(token), &body).await
    }

    async fn update_rating(
        &self,
        token: &str,
        rating_id: i64,
        material_id: i64,
        score: u8,
    ) -> Result<Rating, ApiError> {
        // The server validates the material on update as well
        let body = RatingBody { material: material_id, puntaje: score };
        let path = format!("calificaciones/{}/", rating_id);
        self.write_json(Method::PUT, &path, Some(token), &body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    const PROFILE_JSON: &str = r#"{"id": 1, "email": "ana@example.com", "first_name": "Ana", "last_name": "Pérez",
        "date_joined": "2024-01-05T12:00:00Z",
        "statistics": {"materialsUploaded": 0, "favorites": 1, "comments": 0, "ratings": 0},
        "recent_activity": {"materials": [], "comments": [], "ratings": []}}"#;

    #[test]
    fn test_url_joins_without_double_slash() {
        let client = ApiClient::new("http://localhost:8000/api/").unwrap();
        assert_eq!(client.base_url(), "http://localhost:8000/api");
        assert_eq!(client.url("/profile/"), "http://localhost:8000/api/profile/");
        assert_eq!(client.url("favoritos/3/"), "http://localhost:8000/api/favoritos/3/");
    }

    #[test]
    fn test_parse_field_errors_shapes() {
        let errors = parse_field_errors(r#"{"email": ["Ya existe."], "recaptcha_token": "Captcha inválido."}"#);
        assert_eq!(errors["email"], vec!["Ya existe.".to_string()]);
        assert_eq!(errors["recaptcha_token"], vec!["Captcha inválido.".to_string()]);

        let errors = parse_field_errors("not json");
        assert_eq!(errors["non_field_errors"], vec!["Registration failed".to_string()]);
    }

    #[tokio::test]
    async fn test_login_success_and_rejection() {
        let mut server = Server::new_async().await;
        let ok = server
            .mock("POST", "/login/")
            .match_body(Matcher::Json(serde_json::json!({"email": "ana@example.com", "password": "secret1"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access": "a1", "refresh": "r1", "user": {"id": 1, "email": "ana@example.com", "first_name": "Ana", "last_name": "Pérez", "date_joined": "2024-01-05T12:00:00Z"}}"#)
            .create_async()
            .await;
        let rejected = server
            .mock("POST", "/login/")
            .match_body(Matcher::PartialJson(serde_json::json!({"password": "wrong"})))
            .with_status(400)
            .with_body(r#"{"error": "Credenciales inválidas"}"#)
            .create_async()
            .await;

        let client = ApiClient::new(server.url()).unwrap();
        let response = client.login("ana@example.com", "secret1").await.unwrap();
        assert_eq!(response.access.as_deref(), Some("a1"));
        assert_eq!(response.user.unwrap().first_name, "Ana");

        let response = client.login("ana@example.com", "wrong").await.unwrap();
        assert!(response.access.is_none());
        assert_eq!(response.failure_message(), "Credenciales inválidas");

        ok.assert_async().await;
        rejected.assert_async().await;
    }

    #[tokio::test]
    async fn test_profile_sends_bearer_token() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/profile/")
            .match_header("authorization", "Bearer tok")
            .with_status(200)
            .with_body(PROFILE_JSON)
            .create_async()
            .await;

        let client = ApiClient::new(server.url()).unwrap();
        let profile = client.fetch_profile("tok").await.unwrap();
        assert_eq!(profile.email, "ana@example.com");
        assert_eq!(profile.statistics.unwrap().favorites, 1);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_profile_unauthorized() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/profile/")
            .with_status(401)
            .with_body(r#"{"detail": "Given token not valid for any token type"}"#)
            .create_async()
            .await;

        let client = ApiClient::new(server.url()).unwrap();
        let err = client.fetch_profile("expired").await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized));
    }

    #[tokio::test]
    async fn test_favorites_accepts_plain_and_paginated_lists() {
        let entry = r#"{"id": 5, "usuario": "ana@example.com", "material": 9, "fecha_agregado": "2024-03-01T10:00:00Z"}"#;
        let mut server = Server::new_async().await;
        let plain = server
            .mock("GET", "/favoritos/")
            .match_header("authorization", "Bearer plain")
            .with_body(format!("[{}]", entry))
            .create_async()
            .await;
        let paged = server
            .mock("GET", "/favoritos/")
            .match_header("authorization", "Bearer paged")
            .with_body(format!(r#"{{"count": 1, "next": null, "previous": null, "results": [{}]}}"#, entry))
            .create_async()
            .await;

        let client = ApiClient::new(server.url()).unwrap();
        let a = client.list_favorites("plain").await.unwrap();
        let b = client.list_favorites("paged").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].material, 9);
        plain.assert_async().await;
        paged.assert_async().await;
    }

    #[tokio::test]
    async fn test_add_favorite_duplicate_is_rejection() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/favoritos/")
            .match_body(Matcher::Json(serde_json::json!({"material": 9})))
            .with_status(400)
            .with_body(r#"{"non_field_errors": ["Este material ya está en tus favoritos."]}"#)
            .create_async()
            .await;

        let client = ApiClient::new(server.url()).unwrap();
        let err = client.add_favorite("tok", 9).await.unwrap_err();
        assert!(err.is_rejection());
        assert!(err.to_string().contains("ya está en tus favoritos"));
    }

    #[tokio::test]
    async fn test_delete_favorite_accepts_no_content() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("DELETE", "/favoritos/5/")
            .match_header("authorization", "Bearer tok")
            .with_status(204)
            .create_async()
            .await;

        let client = ApiClient::new(server.url()).unwrap();
        client.delete_favorite("tok", 5).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_list_materials_sends_query() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/materiales/")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("tipo".into(), "video".into()),
                Matcher::UrlEncoded("ordering".into(), "rating".into()),
            ]))
            .with_body(r#"[{"id": 1, "titulo": "Suma", "tipo": "video", "video_url": "https://youtu.be/dQw4w9WgXcQ"}]"#)
            .create_async()
            .await;

        let client = ApiClient::new(server.url()).unwrap();
        let query = MaterialQuery {
            kind: Some(crate::models::MaterialType::Video),
            ordering: crate::models::SortOrder::Rating,
            ..Default::default()
        };
        let materials = client.list_materials(&query, None).await.unwrap();
        assert_eq!(materials.len(), 1);
        assert_eq!(materials[0].title, "Suma");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_register_outcomes() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/register/")
            .match_body(Matcher::PartialJson(serde_json::json!({"email": "new@example.com"})))
            .with_status(201)
            .with_body(r#"{"id": 12, "email": "new@example.com", "first_name": "Nuevo", "last_name": "Usuario"}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/register/")
            .match_body(Matcher::PartialJson(serde_json::json!({"email": "taken@example.com"})))
            .with_status(400)
            .with_body(r#"{"email": ["custom user with this email already exists."]}"#)
            .create_async()
            .await;

        let client = ApiClient::new(server.url()).unwrap();
        let request = |email: &str| RegisterRequest {
            email: email.to_string(),
            first_name: "Nuevo".into(),
            last_name: "Usuario".into(),
            password: "secret1".into(),
            recaptcha_token: "captcha".into(),
        };

        match client.register(&request("new@example.com")).await.unwrap() {
            RegisterOutcome::Created(user) => assert_eq!(user.id, 12),
            other => panic!("expected Created, got {:?}", other),
        }
        match client.register(&request("taken@example.com")).await.unwrap() {
            RegisterOutcome::Rejected(errors) => assert!(errors["email"][0].contains("already exists")),
            other => panic!("expected Rejected, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_password_reset_confirm_surfaces_server_error() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/reset-password/MQ/abc-123/")
            .with_status(400)
            .with_body(r#"{"error": "Token inválido o expirado."}"#)
            .create_async()
            .await;

        let client = ApiClient::new(server.url()).unwrap();
        let err = client.confirm_password_reset("MQ", "abc-123", "newpass").await.unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(ref m) if m == "Token inválido o expirado."));
    }

    #[tokio::test]
    async fn test_comment_update_sends_text_only() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("PUT", "/comentarios/4/")
            .match_body(Matcher::Json(serde_json::json!({"texto": "Editado"})))
            .with_body(r#"{"id": 4, "material": 2, "texto": "Editado", "usuario_email": "ana@example.com", "nombre_usuario": "Ana Pérez", "fecha": "2024-04-01T10:00:00Z"}"#)
            .create_async()
            .await;

        let client = ApiClient::new(server.url()).unwrap();
        let comment = client.update_comment("tok", 4, "Editado").await.unwrap();
        assert!(comment.is_authored_by("ana@example.com"));
        mock.assert_async().await;
    }
}
