//! Trusted-subnet check on the caller's `X-Real-IP`

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use ipnet::IpNet;
use std::net::IpAddr;
use tally_core::REAL_IP_HEADER;
use tracing::warn;

/// Whether `real_ip` parses and falls inside `net`
pub fn is_trusted(net: &IpNet, real_ip: Option<&str>) -> bool {
    match real_ip.map(|raw| raw.trim().parse::<IpAddr>()) {
        Some(Ok(ip)) => net.contains(&ip),
        Some(Err(_)) => {
            warn!("Unparsable {}: {:?}", REAL_IP_HEADER, real_ip);
            false
        }
        None => {
            warn!("Missing {}", REAL_IP_HEADER);
            false
        }
    }
}

pub async fn check_origin(State(net): State<IpNet>, request: Request, next: Next) -> Response {
    let real_ip = request
        .headers()
        .get(REAL_IP_HEADER)
        .and_then(|v| v.to_str().ok());

    if !is_trusted(&net, real_ip) {
        warn!("Rejected origin {:?}, trusted subnet is {}", real_ip, net);
        return (StatusCode::FORBIDDEN, "Forbidden").into_response();
    }

    next.run(request).await
}
