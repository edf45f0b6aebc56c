//! Request extractors: gateway identity, client key and JSON bodies.

use std::net::SocketAddr;

use async_trait::async_trait;
use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, FromRequest, FromRequestParts, Request},
    http::{request::Parts, Extensions, HeaderMap},
    Json,
};
use serde::de::DeserializeOwned;
use vetline_core::{Caller, Error, Result, Role};

use crate::error::ApiError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Build the caller from gateway headers, looked up through `header`.
pub fn caller_from_headers<'a, F>(header: F) -> Result<Caller>
where
    F: Fn(&str) -> Option<&'a str>,
{
    let user_id = header(USER_ID_HEADER)
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| Error::Unauthorized("Authentication required".to_string()))?;
    let role: Role = header(USER_ROLE_HEADER)
        .ok_or_else(|| Error::Unauthorized("Caller role missing".to_string()))?
        .trim()
        .parse()?;

    Ok(Caller {
        user_id: user_id.to_string(),
        role,
    })
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// Rate-limit key: first `x-forwarded-for` hop, else the peer address.
pub fn client_key(headers: &HeaderMap, extensions: &Extensions) -> String {
    let forwarded = header_str(headers, FORWARDED_FOR_HEADER)
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|hop| !hop.is_empty());
    if let Some(hop) = forwarded {
        return hop.to_string();
    }
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Authenticated caller
pub struct AuthCaller(pub Caller);

#[async_trait]
impl<S> FromRequestParts<S> for AuthCaller
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        let headers = &parts.headers;
        caller_from_headers(|name| header_str(headers, name))
            .map(AuthCaller)
            .map_err(ApiError)
    }
}

/// JSON body whose rejections render like every other API error
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> std::result::Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(rejection) => Err(ApiError(Error::InvalidInput(rejection.body_text()))),
        }
    }
}
