use std::convert::Infallible;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;

use crate::auth::{RequestOrigin, VERIFIED_CN_HEADER};
use crate::transport::LocalSocket;

/// Who is calling: the connection's origin and the verified client CN, if any.
#[derive(Debug, Clone)]
pub struct Caller {
    pub origin: RequestOrigin,
    pub cn: Option<String>,
}

impl Caller {
    pub fn cn(&self) -> Option<&str> {
        self.cn.as_deref()
    }
}

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let origin = if parts.extensions.get::<LocalSocket>().is_some() {
            RequestOrigin::LocalSocket
        } else if let Some(ConnectInfo(addr)) = parts.extensions.get::<ConnectInfo<SocketAddr>>() {
            RequestOrigin::Ip(addr.ip())
        } else {
            RequestOrigin::Unknown
        };
        let cn = parts
            .headers
            .get(VERIFIED_CN_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        Ok(Caller { origin, cn })
    }
}
