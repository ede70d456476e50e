//! Client identification for throttling decisions.

use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts},
    http::{request::Parts, HeaderMap},
};
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};

/// Identifier used when nothing in the request identifies the client.
pub const UNKNOWN_CLIENT: &str = "unknown";

const FORWARDED_FOR: &str = "x-forwarded-for";
const REAL_IP: &str = "x-real-ip";

/// Resolve a stable identifier for the client behind a request.
///
/// The first public address in `X-Forwarded-For` wins, then `X-Real-IP`, then
/// the transport peer, then [`UNKNOWN_CLIENT`].
pub fn resolve(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    if let Some(ip) = first_public_forwarded(headers) {
        return ip.to_string();
    }

    if let Some(real_ip) = header_str(headers, REAL_IP) {
        let real_ip = real_ip.trim();
        if !real_ip.is_empty() {
            return real_ip.to_string();
        }
    }

    match peer {
        Some(addr) => addr.ip().to_string(),
        None => UNKNOWN_CLIENT.to_string(),
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn first_public_forwarded(headers: &HeaderMap) -> Option<IpAddr> {
    header_str(headers, FORWARDED_FOR)?
        .split(',')
        .filter_map(|part| part.trim().parse::<IpAddr>().ok())
        .find(|ip| !is_private(ip))
}

/// 10.0.0.0/8, 172.16.0.0/12 and 192.168.0.0/16, also in IPv4-mapped IPv6 form.
fn is_private(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private(),
        IpAddr::V6(v6) => v6.to_ipv4_mapped().is_some_and(|v4| v4.is_private()),
    }
}

/// Extractor yielding the resolved client identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientId(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for ClientId
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Ok(ClientId(resolve(&parts.headers, peer)))
    }
}
