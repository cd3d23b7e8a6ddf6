//! Route classification for generation requests.

use std::sync::LazyLock;

use axum::http::Method;
use regex::Regex;

use crate::error::{Error, Result};

/// Path marker of the streaming operation.
pub const STREAM_MARKER: &str = ":streamGenerateContent";

/// Path marker of the unary operation.
pub const UNARY_MARKER: &str = ":generateContent";

/// Which generation call a request maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Generate,
    StreamGenerate,
}

impl Operation {
    pub fn is_streaming(self) -> bool {
        matches!(self, Operation::StreamGenerate)
    }

    /// Operation name as it appears after the `:` in the path.
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Generate => "generateContent",
            Operation::StreamGenerate => "streamGenerateContent",
        }
    }
}

/// A classified generation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRoute {
    /// API version segment, e.g. `v1beta`
    pub version: String,
    pub model: String,
    pub operation: Operation,
}

impl GenerationRoute {
    /// Path of the same call on the upstream.
    pub fn upstream_path(&self) -> String {
        format!(
            "/{}/models/{}:{}",
            self.version,
            self.model,
            self.operation.as_str()
        )
    }
}

static PATH_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/(v1[A-Za-z0-9]*)/models/([^/:]+):(generateContent|streamGenerateContent)$")
        .expect("static route pattern is valid")
});

/// Classify a request by method and path.
///
/// Only POSTs whose path carries a generation marker are routable; anything
/// else is `NotFound`. A marker on a path of the wrong shape is
/// `InvalidArgument`.
pub fn classify(method: &Method, path: &str) -> Result<GenerationRoute> {
    let operation = if path.contains(STREAM_MARKER) {
        Operation::StreamGenerate
    } else if path.contains(UNARY_MARKER) {
        Operation::Generate
    } else {
        return Err(Error::NotFound(format!("No route for {} {}", method, path)));
    };

    if *method != Method::POST {
        return Err(Error::NotFound(format!(
            "Method {} is not supported for {}",
            method,
            operation.as_str()
        )));
    }

    let captures = PATH_PATTERN.captures(path).ok_or_else(|| {
        Error::InvalidArgument(format!(
            "Malformed path '{}': expected /v1*/models/{{model}}:{}",
            path,
            operation.as_str()
        ))
    })?;

    Ok(GenerationRoute {
        version: captures[1].to_string(),
        model: captures[2].to_string(),
        operation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unary_route() {
        let route = classify(&Method::POST, "/v1beta/models/foo-bar:generateContent").unwrap();
        assert_eq!(route.model, "foo-bar");
        assert_eq!(route.version, "v1beta");
        assert_eq!(route.operation, Operation::Generate);
    }

    #[test]
    fn test_streaming_route() {
        let route =
            classify(&Method::POST, "/v1/models/gemini-1.5-flash:streamGenerateContent").unwrap();
        assert_eq!(route.model, "gemini-1.5-flash");
        assert_eq!(route.version, "v1");
        assert!(route.operation.is_streaming());
    }

    #[test]
    fn test_model_with_dots_and_digits() {
        let route =
            classify(&Method::POST, "/v1alpha/models/gemini-2.0-flash-exp:generateContent").unwrap();
        assert_eq!(route.model, "gemini-2.0-flash-exp");
    }

    #[test]
    fn test_unmatched_paths_not_found() {
        for path in [
            "/",
            "/v1beta/models",
            "/v1beta/models/gemini-pro:countTokens",
            "/v1beta/models/gemini-pro",
            "/chat/completions",
        ] {
            let err = classify(&Method::POST, path).unwrap_err();
            assert!(matches!(err, Error::NotFound(_)), "{} -> {:?}", path, err);
        }
    }

    #[test]
    fn test_non_post_not_found() {
        for method in [Method::GET, Method::PUT, Method::DELETE] {
            let err = classify(&method, "/v1beta/models/x:generateContent").unwrap_err();
            assert!(matches!(err, Error::NotFound(_)));
        }
    }

    #[test]
    fn test_malformed_shape_invalid_argument() {
        for path in [
            "/v1beta/models/:generateContent",
            "/v2/models/x:generateContent",
            "/models/x:generateContent",
            "/v1beta/models/a/b:generateContent",
            "/v1beta/models/x:generateContent/extra",
        ] {
            let err = classify(&Method::POST, path).unwrap_err();
            assert!(
                matches!(err, Error::InvalidArgument(_)),
                "{} -> {:?}",
                path,
                err
            );
        }
    }

    #[test]
    fn test_upstream_path() {
        let route = classify(&Method::POST, "/v1beta/models/m:streamGenerateContent").unwrap();
        assert_eq!(route.upstream_path(), "/v1beta/models/m:streamGenerateContent");
    }
}
