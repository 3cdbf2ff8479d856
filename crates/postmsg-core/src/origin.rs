//! Origin filters used to authorize inbound messages.
//!
//! Two matching rules exist on the two sides of the channel:
//!
//! - clients match the sender's origin **exactly** (`scheme://host[:port]`)
//! - request handlers match **protocol and host**, then require the
//!   candidate's path to start with the filter's path, so several guest paths
//!   under one origin can share a handler
//!
//! A candidate that does not parse as a URL never matches.

use std::fmt;

use url::Url;

use crate::errors::OriginError;

/// Serialized origin of `url` (`scheme://host[:port]`), or `None` if the URL
/// does not parse or its origin is opaque.
pub fn origin_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let origin = parsed.origin();
    origin.is_tuple().then(|| origin.ascii_serialization())
}

/// Host with the port appended when it is not the scheme default.
fn host_with_port(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_owned(),
    })
}

/// Immutable predicate over message origins.
#[derive(Clone, PartialEq, Eq)]
pub enum OriginFilter {
    /// Serialized-origin equality.
    Exact {
        /// Serialized origin.
        origin: String,
    },
    /// Scheme and host equality plus path prefix.
    Prefix {
        /// Serialized origin of the filter URL.
        origin: String,
        /// URL scheme.
        scheme: String,
        /// Host including a non-default port.
        host: String,
        /// Required path prefix.
        path: String,
    },
}

impl OriginFilter {
    /// Filter requiring an exact origin match.
    pub fn exact(url: &str) -> Result<Self, OriginError> {
        let parsed = parse(url)?;
        Ok(Self::Exact {
            origin: tuple_origin(url, &parsed)?,
        })
    }

    /// Filter requiring equal protocol and host and a path prefix match.
    pub fn prefix(url: &str) -> Result<Self, OriginError> {
        let parsed = parse(url)?;
        let origin = tuple_origin(url, &parsed)?;
        let host = host_with_port(&parsed).ok_or_else(|| OriginError::Opaque {
            url: url.to_owned(),
        })?;
        Ok(Self::Prefix {
            origin,
            scheme: parsed.scheme().to_owned(),
            host,
            path: parsed.path().to_owned(),
        })
    }

    /// Serialized origin, used as the target origin when posting.
    pub fn origin(&self) -> &str {
        match self {
            Self::Exact { origin } | Self::Prefix { origin, .. } => origin,
        }
    }

    /// Whether `candidate` (an origin or a full URL) satisfies the filter.
    pub fn matches(&self, candidate: &str) -> bool {
        let Ok(parsed) = Url::parse(candidate) else {
            return false;
        };
        match self {
            Self::Exact { origin } => {
                let candidate_origin = parsed.origin();
                candidate_origin.is_tuple() && candidate_origin.ascii_serialization() == *origin
            }
            Self::Prefix {
                scheme, host, path, ..
            } => {
                parsed.scheme() == scheme
                    && host_with_port(&parsed).as_deref() == Some(host.as_str())
                    && parsed.path().starts_with(path.as_str())
            }
        }
    }
}

impl fmt::Debug for OriginFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact { origin } => write!(f, "Exact({origin})"),
            Self::Prefix {
                scheme, host, path, ..
            } => write!(f, "Prefix({scheme}://{host}{path})"),
        }
    }
}

fn parse(url: &str) -> Result<Url, OriginError> {
    Url::parse(url).map_err(|source| OriginError::InvalidUrl {
        url: url.to_owned(),
        source,
    })
}

fn tuple_origin(url: &str, parsed: &Url) -> Result<String, OriginError> {
    let origin = parsed.origin();
    if origin.is_tuple() {
        Ok(origin.ascii_serialization())
    } else {
        Err(OriginError::Opaque {
            url: url.to_owned(),
        })
    }
}
