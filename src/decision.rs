//! Per-request maintenance decision and the responses it renders

use crate::allowlist::is_allowed;
use crate::status::{ReverseProxy, StatusSnapshot};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::Bytes;
use hyper::header::{HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE, LOCATION, TRANSFER_ENCODING};
use hyper::{Response, StatusCode};
use std::net::IpAddr;
use tracing::warn;

/// What to do with one request
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Hand the request to the wrapped application untouched
    PassThrough,
    /// Send the client to the external maintenance page
    Redirect { location: String },
    /// Serve the canned maintenance response ourselves
    ReverseProxy(ReverseProxy),
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::PassThrough => "pass_through",
            Decision::Redirect { .. } => "redirect",
            Decision::ReverseProxy(_) => "reverse_proxy",
        }
    }

    /// Response to send instead of calling the application; `None` for pass-through
    pub fn into_response(self) -> Option<Response<BoxBody<Bytes, hyper::Error>>> {
        match self {
            Decision::PassThrough => None,
            Decision::Redirect { location } => Some(redirect_response(&location)),
            Decision::ReverseProxy(rp) => Some(reverse_proxy_response(rp)),
        }
    }
}

/// Decide from the applied snapshot and the client's candidate addresses
pub fn decide(snapshot: &StatusSnapshot, force_open: bool, client_ips: &[IpAddr]) -> Decision {
    if !snapshot.switched {
        return Decision::PassThrough;
    }

    let should_activate = !force_open && !is_allowed(client_ips, &snapshot.ip_allow_list);
    if !should_activate {
        return Decision::PassThrough;
    }

    match snapshot.active_reverse_proxy() {
        Some(rp) => Decision::ReverseProxy(rp.clone()),
        None => Decision::Redirect {
            location: snapshot.switch_url.clone(),
        },
    }
}

/// 302 to the maintenance page with an empty HTML body
pub fn redirect_response(location: &str) -> Response<BoxBody<Bytes, hyper::Error>> {
    let mut response = Response::builder()
        .status(StatusCode::FOUND)
        .header(CONTENT_TYPE, "text/html")
        .header(CONTENT_LENGTH, "0");

    match HeaderValue::from_str(location) {
        Ok(value) if !location.is_empty() => {
            response = response.header(LOCATION, value);
        }
        Ok(_) => warn!("Redirecting without a switch URL"),
        Err(e) => warn!(location, error = %e, "Switch URL is not a valid Location header"),
    }

    response
        .body(Empty::<Bytes>::new().map_err(|never| match never {}).boxed())
        .expect("valid response builder")
}

/// The canned response exactly as the control plane described it
pub fn reverse_proxy_response(rp: ReverseProxy) -> Response<BoxBody<Bytes, hyper::Error>> {
    let status = StatusCode::from_u16(rp.http_status).unwrap_or_else(|_| {
        warn!(http_status = rp.http_status, "Invalid reverse-proxy status, using 503");
        StatusCode::SERVICE_UNAVAILABLE
    });

    let mut response = Response::builder().status(status);
    for (name, value) in &rp.response_headers {
        let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) else {
            warn!(header = %name, "Skipping invalid reverse-proxy header");
            continue;
        };
        // Framing headers are derived from the body
        if name == CONTENT_LENGTH || name == TRANSFER_ENCODING {
            continue;
        }
        response = response.header(name, value);
    }

    response
        .body(
            Full::new(rp.response_body)
                .map_err(|never| match never {})
                .boxed(),
        )
        .expect("valid response builder")
}
