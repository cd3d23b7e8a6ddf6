//! Credential extraction from inbound requests.

use axum::http::{header, HeaderMap, HeaderName};

/// Provider-specific API key header.
pub const GOOG_API_KEY_HEADER: &str = "x-goog-api-key";

/// Generic API key header accepted by some clients.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Query parameter carrying the API key.
pub const KEY_QUERY_PARAM: &str = "key";

/// One place a client may put its credential.
#[derive(Debug, Clone)]
pub enum CredentialSource {
    /// `Authorization: Bearer <token>`
    Bearer,
    /// A header whose whole value is the key
    Header(HeaderName),
    /// A query parameter
    Query(&'static str),
}

impl CredentialSource {
    /// Try to read a non-empty credential from this source.
    pub fn extract(&self, headers: &HeaderMap, query: &[(String, String)]) -> Option<String> {
        let value = match self {
            CredentialSource::Bearer => {
                let raw = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
                let (scheme, token) = raw.trim().split_once(' ')?;
                if !scheme.eq_ignore_ascii_case("bearer") {
                    return None;
                }
                token
            }
            CredentialSource::Header(name) => headers.get(name)?.to_str().ok()?,
            CredentialSource::Query(param) => query
                .iter()
                .find(|(k, _)| k == param)
                .map(|(_, v)| v.as_str())?,
        };

        let value = value.trim();
        if value.is_empty() {
            None
        } else {
            Some(value.to_string())
        }
    }

    /// Short label for logs.
    pub fn label(&self) -> &str {
        match self {
            CredentialSource::Bearer => "authorization",
            CredentialSource::Header(name) => name.as_str(),
            CredentialSource::Query(param) => *param,
        }
    }
}

/// Ordered list of credential sources; the first non-empty one wins.
#[derive(Debug, Clone)]
pub struct CredentialChain {
    sources: Vec<CredentialSource>,
}

impl Default for CredentialChain {
    fn default() -> Self {
        Self::new(vec![
            CredentialSource::Bearer,
            CredentialSource::Header(HeaderName::from_static(GOOG_API_KEY_HEADER)),
            CredentialSource::Header(HeaderName::from_static(API_KEY_HEADER)),
            CredentialSource::Query(KEY_QUERY_PARAM),
        ])
    }
}

impl CredentialChain {
    pub fn new(sources: Vec<CredentialSource>) -> Self {
        Self { sources }
    }

    /// Resolve the client's credential.
    pub fn resolve(&self, headers: &HeaderMap, query: &[(String, String)]) -> Option<String> {
        self.sources.iter().find_map(|source| {
            let value = source.extract(headers, query)?;
            tracing::debug!(source = %source.label(), "Resolved client credential");
            Some(value)
        })
    }

    pub fn sources(&self) -> &[CredentialSource] {
        &self.sources
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                HeaderName::from_static(*name),
                HeaderValue::from_static(*value),
            );
        }
        map
    }

    fn query(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_bearer_takes_precedence() {
        let chain = CredentialChain::default();
        let h = headers(&[
            ("authorization", "Bearer from-bearer"),
            ("x-goog-api-key", "from-goog"),
            ("x-api-key", "from-generic"),
        ]);
        let q = query(&[("key", "from-query")]);

        assert_eq!(chain.resolve(&h, &q).as_deref(), Some("from-bearer"));
    }

    #[test]
    fn test_falls_through_in_order() {
        let chain = CredentialChain::default();
        let q = query(&[("key", "from-query")]);

        let h = headers(&[("x-goog-api-key", "from-goog"), ("x-api-key", "from-generic")]);
        assert_eq!(chain.resolve(&h, &q).as_deref(), Some("from-goog"));

        let h = headers(&[("x-api-key", "from-generic")]);
        assert_eq!(chain.resolve(&h, &q).as_deref(), Some("from-generic"));

        assert_eq!(
            chain.resolve(&HeaderMap::new(), &q).as_deref(),
            Some("from-query")
        );
    }

    #[test]
    fn test_missing_credential() {
        let chain = CredentialChain::default();
        assert!(chain.resolve(&HeaderMap::new(), &[]).is_none());
    }

    #[test]
    fn test_empty_values_are_skipped() {
        let chain = CredentialChain::default();
        let h = headers(&[("authorization", "Bearer   "), ("x-goog-api-key", "real")]);
        assert_eq!(chain.resolve(&h, &[]).as_deref(), Some("real"));
    }

    #[test]
    fn test_non_bearer_scheme_ignored() {
        let h = headers(&[("authorization", "Basic dXNlcjpwYXNz")]);
        assert!(CredentialSource::Bearer.extract(&h, &[]).is_none());

        let h = headers(&[("authorization", "bearer lower-case-ok")]);
        assert_eq!(
            CredentialSource::Bearer.extract(&h, &[]).as_deref(),
            Some("lower-case-ok")
        );
    }

    #[test]
    fn test_custom_chain_order() {
        let chain = CredentialChain::new(vec![
            CredentialSource::Query(KEY_QUERY_PARAM),
            CredentialSource::Bearer,
        ]);
        let h = headers(&[("authorization", "Bearer header")]);
        let q = query(&[("key", "query")]);
        assert_eq!(chain.resolve(&h, &q).as_deref(), Some("query"));
    }
}
