//! Request authorization for the task API.
//!
//! TLS is terminated by a local reverse proxy which verifies the client
//! certificate and forwards its CN in the [`VERIFIED_CN_HEADER`] header.
//! Every request therefore has to come from the loopback interface (or the
//! local Unix socket); anything else bypassed the proxy and is refused
//! before the CN is even looked at.

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use relay_hub_types::RelayId;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::warn;

/// Header carrying the CN of the verified client certificate.
pub const VERIFIED_CN_HEADER: &str = "verified-cn";

/// Where a request came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOrigin {
    Ip(IpAddr),
    /// Accepted on the local Unix-domain socket.
    LocalSocket,
    Unknown,
}

impl RequestOrigin {
    pub fn is_local(&self) -> bool {
        match self {
            RequestOrigin::Ip(ip) => ip.to_canonical().is_loopback(),
            RequestOrigin::LocalSocket => true,
            RequestOrigin::Unknown => false,
        }
    }
}

impl fmt::Display for RequestOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestOrigin::Ip(ip) => write!(f, "{ip}"),
            RequestOrigin::LocalSocket => f.write_str("unix socket"),
            RequestOrigin::Unknown => f.write_str("unknown"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Request must originate from localhost, got {origin}")]
    NotLocalhost { origin: String },

    #[error("Client certificate CN ({presented:?}) does not match local site CN ({expected:?})")]
    SiteCnMismatch { presented: String, expected: String },

    #[error("Client certificate CN ({presented:?}) is not authorized for relay {relay_id}")]
    RelayCnMismatch { presented: String, relay_id: RelayId },
}

/// Checks origin and client identity of API requests.
#[derive(Debug, Clone)]
pub struct AuthorizationGate {
    site_cn: Arc<str>,
}

impl AuthorizationGate {
    pub fn new(site_cn: impl Into<Arc<str>>) -> Self {
        Self {
            site_cn: site_cn.into(),
        }
    }

    pub fn site_cn(&self) -> &str {
        &self.site_cn
    }

    pub fn check_origin(&self, origin: RequestOrigin) -> Result<(), AuthError> {
        if origin.is_local() {
            return Ok(());
        }
        warn!(origin = %origin, "Rejected request from non-local origin");
        Err(AuthError::NotLocalhost {
            origin: origin.to_string(),
        })
    }

    /// Requests made by the site itself (task creation, registration).
    pub fn authorize_site(&self, origin: RequestOrigin, cn: Option<&str>) -> Result<(), AuthError> {
        self.check_origin(origin)?;
        let presented = cn.unwrap_or_default();
        if cn_matches(presented, &self.site_cn) {
            return Ok(());
        }
        warn!(presented, expected = %self.site_cn, "Rejected request with foreign site CN");
        Err(AuthError::SiteCnMismatch {
            presented: presented.to_string(),
            expected: self.site_cn.to_string(),
        })
    }

    /// Requests concerning one relay's queue: allowed for that relay and for the site.
    pub fn authorize_relay(
        &self,
        origin: RequestOrigin,
        cn: Option<&str>,
        relay_id: &RelayId,
    ) -> Result<(), AuthError> {
        self.check_origin(origin)?;
        let presented = cn.unwrap_or_default();
        if cn_matches(presented, relay_id.as_str()) || cn_matches(presented, &self.site_cn) {
            return Ok(());
        }
        warn!(presented, relay_id = %relay_id, "Rejected request with foreign relay CN");
        Err(AuthError::RelayCnMismatch {
            presented: presented.to_string(),
            relay_id: relay_id.clone(),
        })
    }
}

fn cn_matches(presented: &str, expected: &str) -> bool {
    !presented.is_empty() && bool::from(presented.as_bytes().ct_eq(expected.as_bytes()))
}
