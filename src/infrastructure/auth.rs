use std::sync::Arc;

use axum::{
    async_trait, extract::FromRequestParts, http::request::Parts, response::IntoResponse, Json,
};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::{
    domain::{
        models::{Role, User},
        policy,
    },
    infrastructure::state::AppState,
    services::errors::ServiceError,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub role: Role,
    pub exp: usize,
}

#[derive(Clone)]
pub struct JwtKeys {
    pub encoding: EncodingKey,
    pub decoding: DecodingKey,
}

impl JwtKeys {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }
}

pub fn issue_token(state: &AppState, user: &User) -> Result<String, ServiceError> {
    let expiration = chrono::Utc::now()
        + chrono::Duration::from_std(state.config.jwt_ttl())
            .map_err(|_| ServiceError::Internal("failed to calculate expiration".into()))?;
    let claims = Claims {
        sub: user.id,
        role: user.role,
        exp: expiration.timestamp() as usize,
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &state.jwt_keys.encoding,
    )
    .map_err(|err| ServiceError::Internal(err.to_string()))
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing authorization header")]
    Missing,
    #[error("invalid authorization token")]
    Invalid,
    #[error("missing application state")]
    MissingState,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> axum::response::Response {
        let status = axum::http::StatusCode::UNAUTHORIZED;
        let message = match self {
            AuthError::Missing => "missing authorization header",
            AuthError::Invalid => "invalid authorization token",
            AuthError::MissingState => "application state unavailable",
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

/// Per-request caller context. Role and project scope are re-read from the
/// directory on every request so a stale token never outlives a permission
/// change.
#[derive(Clone, Debug)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub role: Role,
    pub project_ids: Vec<Uuid>,
    pub can_view_all_projects: bool,
}

impl AuthenticatedUser {
    pub fn can_access_project(&self, project_id: Uuid) -> bool {
        match self.role {
            Role::Admin | Role::Accountant => true,
            _ => policy::project_visible(self.can_view_all_projects, &self.project_ids, project_id),
        }
    }
}

#[async_trait]
impl FromRequestParts<()> for AuthenticatedUser {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &()) -> Result<Self, Self::Rejection> {
        let Some(state) = parts.extensions.get::<Arc<AppState>>() else {
            return Err(AuthError::MissingState);
        };

        let Some(header_value) = parts.headers.get(axum::http::header::AUTHORIZATION) else {
            return Err(AuthError::Missing);
        };
        let header_str = header_value.to_str().map_err(|_| AuthError::Invalid)?;
        let token = header_str
            .strip_prefix("Bearer ")
            .ok_or(AuthError::Invalid)?;
        let validation = Validation::new(Algorithm::HS256);
        let data = match decode::<Claims>(token, &state.jwt_keys.decoding, &validation) {
            Ok(data) => data,
            Err(err) => {
                warn!(error = ?err, "failed to decode jwt");
                return Err(AuthError::Invalid);
            }
        };

        let record = sqlx::query_as::<_, DirectoryRow>(
            "SELECT role, can_view_all_projects FROM users WHERE id = $1",
        )
        .bind(data.claims.sub)
        .fetch_optional(&state.pool)
        .await
        .map_err(|err| {
            warn!(error = ?err, "failed to load token subject");
            AuthError::Invalid
        })?;
        let Some(record) = record else {
            warn!(user_id = %data.claims.sub, "token subject not in directory");
            return Err(AuthError::Invalid);
        };

        let project_ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT project_id FROM project_assignments WHERE user_id = $1",
        )
        .bind(data.claims.sub)
        .fetch_all(&state.pool)
        .await
        .map_err(|err| {
            warn!(error = ?err, "failed to load project assignments");
            AuthError::Invalid
        })?;

        Ok(AuthenticatedUser {
            user_id: data.claims.sub,
            role: record.role,
            project_ids,
            can_view_all_projects: record.can_view_all_projects,
        })
    }
}

#[derive(sqlx::FromRow)]
struct DirectoryRow {
    role: Role,
    can_view_all_projects: bool,
}
