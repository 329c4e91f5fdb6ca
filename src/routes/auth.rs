use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_email::Email;
use uuid::Uuid;

use crate::db::auth::AuthRepository;
use crate::error::ServiceError;

use super::utils;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    sub: Uuid, // user_id
    exp: i64,  // expiration timestamp
    iat: i64,  // issued at timestamp
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    email: String,
    #[serde(default)]
    name: String,
}

impl LoginRequest {
    /// Both fields must be present; the email must also be well formed.
    fn validate(&self) -> Result<(Email, &str), ServiceError> {
        let email = self.email.trim();
        let name = self.name.trim();
        if email.is_empty() || name.is_empty() {
            return Err(ServiceError::bad_request("Email and Name are required fields"));
        }
        let email = Email::from_str(email).map_err(|err| {
            tracing::warn!("Rejected login email {email}: {err}");
            ServiceError::bad_request("Invalid email")
        })?;
        Ok((email, name))
    }
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    token: String,
}

/// Issues and verifies HS256 access tokens.
pub struct TokenIssuer {
    jwt_secret: String,
    ttl: Duration,
}

impl TokenIssuer {
    pub fn new(jwt_secret: String, ttl: Duration) -> Self {
        Self { jwt_secret, ttl }
    }

    pub fn issue(&self, user_id: Uuid) -> Result<String, jsonwebtoken::errors::Error> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id,
            exp: (now + self.ttl).timestamp(),
            iat: now.timestamp(),
        };

        jsonwebtoken::encode(
            &jsonwebtoken::Header::default(),
            &claims,
            &jsonwebtoken::EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )
    }

    pub fn verify(&self, token: &str) -> Result<Uuid, jsonwebtoken::errors::Error> {
        let mut validation = jsonwebtoken::Validation::default();

        validation.leeway = 10;
        validation.validate_exp = true;
        validation.algorithms = vec![jsonwebtoken::Algorithm::HS256];

        let token_data = jsonwebtoken::decode::<Claims>(
            token,
            &jsonwebtoken::DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &validation,
        )?;

        Ok(token_data.claims.sub)
    }
}

// Authentication service
pub struct AuthService {
    repo: AuthRepository,
    tokens: TokenIssuer,
}

impl AuthService {
    pub fn new(repo: AuthRepository, tokens: TokenIssuer) -> Self {
        Self { repo, tokens }
    }

    pub async fn login(&self, req: LoginRequest) -> Result<LoginResponse, ServiceError> {
        let (email, name) = req.validate()?;
        tracing::info!("Attempting to log in user with email: {}", email);

        let user = self
            .repo
            .find_or_create_user(email.as_str(), name)
            .await
            .map_err(|err| {
                tracing::error!("Failed to find or create user {}: {err}", email);
                ServiceError::internal("Failed to find user")
            })?;

        let token = self.tokens.issue(user.id).map_err(|err| {
            tracing::error!("Failed to issue token for user {}: {err}", user.id);
            ServiceError::internal("Failed to create token")
        })?;
        tracing::info!("Generated token for user: {}", user.email);

        Ok(LoginResponse { token })
    }

    pub fn verify_token(&self, token: &str) -> Result<Uuid, jsonwebtoken::errors::Error> {
        self.tokens.verify(token).inspect_err(|err| {
            tracing::error!("Error decoding token: {:?}", err);
        })
    }
}

// Route for handling login by email
pub async fn login_handler(
    State(service): State<Arc<AuthService>>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ServiceError> {
    let req = utils::json_body(payload)?;
    let response = service.login(req).await?;
    Ok((StatusCode::OK, Json(response)))
}

pub fn auth_routes(service: Arc<AuthService>) -> Router {
    Router::new()
        .route("/login", post(login_handler))
        .with_state(service)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn login(email: &str, name: &str) -> LoginRequest {
        LoginRequest {
            email: email.to_string(),
            name: name.to_string(),
        }
    }

    #[test]
    fn login_requires_email_and_name() {
        let required = ServiceError::bad_request("Email and Name are required fields");
        assert_eq!(login("", "Ann").validate().unwrap_err(), required);
        assert_eq!(login("ann@example.com", "  ").validate().unwrap_err(), required);
        assert_eq!(
            login("not-an-email", "Ann").validate().unwrap_err(),
            ServiceError::bad_request("Invalid email")
        );

        let req = login(" ann@example.com ", " Ann ");
        let (email, name) = req.validate().unwrap();
        assert_eq!(email.as_str(), "ann@example.com");
        assert_eq!(name, "Ann");
    }

    #[test]
    fn missing_fields_deserialize_as_empty() {
        let req: LoginRequest = serde_json::from_str("{}").unwrap();
        assert!(req.validate().is_err());
    }

    #[test]
    fn issued_tokens_verify_to_subject() {
        let issuer = TokenIssuer::new("secret".to_string(), Duration::from_secs(60));
        let user = Uuid::new_v4();

        let token = issuer.issue(user).unwrap();
        assert_eq!(issuer.verify(&token).unwrap(), user);
    }

    #[test]
    fn rejects_foreign_and_expired_tokens() {
        let issuer = TokenIssuer::new("secret".to_string(), Duration::from_secs(60));
        let other = TokenIssuer::new("other-secret".to_string(), Duration::from_secs(60));
        let token = other.issue(Uuid::new_v4()).unwrap();
        assert!(issuer.verify(&token).is_err());

        // expired an hour ago, far beyond the leeway
        let claims = Claims {
            sub: Uuid::new_v4(),
            exp: Utc::now().timestamp() - 3_600,
            iat: Utc::now().timestamp() - 7_200,
        };
        let expired = jsonwebtoken::encode(
            &jsonwebtoken::Header::default(),
            &claims,
            &jsonwebtoken::EncodingKey::from_secret(b"secret"),
        )
        .unwrap();
        assert!(issuer.verify(&expired).is_err());
        assert!(issuer.verify("not-a-jwt").is_err());
    }
}
