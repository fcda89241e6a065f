//! Authentication extractors (spec §6): `X-Agent-Key` for agent-identified
//! paths, a bearer scheme for operator paths. Operator token *verification*
//! is external to this service — this extractor only enforces that a
//! well-formed token is present on the wire.

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::error::ErrorBody;

pub struct AgentKey(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for AgentKey
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let key = parts.headers.get("X-Agent-Key").and_then(|v| v.to_str().ok()).map(str::to_string);
        match key {
            Some(key) if !key.is_empty() => Ok(AgentKey(key)),
            _ => Err(unauthorized("missing_agent_key")),
        }
    }
}

pub struct OperatorToken(#[allow(dead_code)] pub String);

#[async_trait]
impl<S> FromRequestParts<S> for OperatorToken
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let bearer = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        match bearer {
            Some(token) if !token.is_empty() => Ok(OperatorToken(token.to_string())),
            _ => Err(unauthorized("missing_operator_token")),
        }
    }
}

fn unauthorized(code: &'static str) -> Response {
    (StatusCode::UNAUTHORIZED, Json(ErrorBody { code, message: "missing or invalid credentials".into() })).into_response()
}
