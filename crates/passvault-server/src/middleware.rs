//! Admin guard middleware for `PassVault`.
//!
//! Every guarded request is first run through the `api` throttle for its
//! client address, then the `X-Passvault-Token` header is compared against
//! the configured admin token in constant time. A bad token is recorded as a
//! track so repeated guessing slows down.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use subtle::ConstantTimeEq;
use tracing::warn;

use passvault_core::track::parse_remote_addr;

use crate::error::AppError;
use crate::state::AppState;

/// Header carrying the admin token.
pub const TOKEN_HEADER: &str = "X-Passvault-Token";

/// Throttle source for the admin API.
pub const API_SOURCE: &str = "api";

/// Client address injected into request extensions by [`admin_guard`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientAddr(pub Option<IpAddr>);

/// Resolve the client address of a request.
///
/// With `trust_proxy` the first `X-Forwarded-For` entry wins; otherwise, or
/// when that header is absent or unparsable, the peer address is used.
pub fn client_address(req: &Request, trust_proxy: bool) -> Option<IpAddr> {
    if trust_proxy {
        let forwarded = req
            .headers()
            .get("X-Forwarded-For")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|first| parse_remote_addr(first.trim()));
        if forwarded.is_some() {
            return forwarded;
        }
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_canonical())
}

/// Middleware guarding every admin route.
pub async fn admin_guard(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let address = client_address(&req, state.trust_proxy);
    let request = state.tracks.request(API_SOURCE, address);

    if let Err(e) = state.tracks.check_tracking(&request).await {
        return AppError::from(e).into_response();
    }

    let Some(expected) = state.admin_token.as_deref() else {
        return AppError::Unauthorized("admin token not configured".to_owned()).into_response();
    };

    let presented = req
        .headers()
        .get(TOKEN_HEADER)
        .and_then(|v| v.to_str().ok());

    let valid = presented
        .is_some_and(|token| bool::from(token.as_bytes().ct_eq(expected.as_bytes())));
    if !valid {
        warn!(address = ?address, "rejected admin request");
        if let Err(e) = state.tracks.add(&request).await {
            return AppError::from(e).into_response();
        }
        let message = if presented.is_some() {
            "invalid admin token"
        } else {
            "missing X-Passvault-Token header"
        };
        return AppError::Unauthorized(message.to_owned()).into_response();
    }

    req.extensions_mut().insert(ClientAddr(address));
    next.run(req).await
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::net::Ipv4Addr;

    use axum::body::Body;

    use super::*;

    fn request(forwarded: Option<&str>, peer: Option<SocketAddr>) -> Request {
        let mut builder = axum::http::Request::builder().uri("/");
        if let Some(value) = forwarded {
            builder = builder.header("X-Forwarded-For", value);
        }
        let mut req = builder.body(Body::empty()).unwrap();
        if let Some(peer) = peer {
            req.extensions_mut().insert(ConnectInfo(peer));
        }
        req
    }

    #[test]
    fn peer_address_without_proxy_trust() {
        let peer = SocketAddr::from(([10, 1, 2, 3], 5555));
        let req = request(Some("203.0.113.9"), Some(peer));
        assert_eq!(
            client_address(&req, false),
            Some(IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3)))
        );
    }

    #[test]
    fn first_forwarded_entry_with_proxy_trust() {
        let peer = SocketAddr::from(([10, 1, 2, 3], 5555));
        let req = request(Some("203.0.113.9, 10.0.0.1"), Some(peer));
        assert_eq!(
            client_address(&req, true),
            Some(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 9)))
        );
    }

    #[test]
    fn garbage_forwarded_falls_back_to_peer() {
        let peer = SocketAddr::from(([10, 1, 2, 3], 5555));
        let req = request(Some("not-an-ip"), Some(peer));
        assert_eq!(client_address(&req, true), Some(peer.ip()));
    }

    #[test]
    fn no_address_at_all() {
        assert_eq!(client_address(&request(None, None), true), None);
    }
}
