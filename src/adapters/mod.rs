//! HTTP adapters for the external systems.
//!
//! Each adapter owns a `reqwest::Client` with the configured per-request
//! timeout. Client construction failures are setup errors; everything that
//! goes wrong while talking to a service is a `CaseError`.

pub mod case_system;
pub mod postal;
pub mod registry;

pub use case_system::HttpCaseSystem;
pub use postal::DigitalPostGateway;
pub use registry::HttpRegistry;

use std::time::Duration;

use reqwest::{Client, ClientBuilder, Response, StatusCode, Url};

use crate::error::{CaseError, SetupError};

/// Longest response body quoted in an error message.
const MAX_ERROR_BODY: usize = 300;

pub(crate) fn build_client(
    service: &str,
    builder: ClientBuilder,
    timeout: Duration,
) -> Result<Client, SetupError> {
    builder
        .timeout(timeout)
        .build()
        .map_err(|e| SetupError::HttpClient {
            service: service.to_string(),
            reason: e.to_string(),
        })
}

/// Parse a configured service root. It must be able to take path segments.
pub(crate) fn parse_base_url(service: &str, raw: &str) -> Result<Url, SetupError> {
    let invalid = |reason: String| SetupError::BaseUrl {
        service: service.to_string(),
        reason,
    };
    let url = Url::parse(raw.trim()).map_err(|e| invalid(e.to_string()))?;
    if url.cannot_be_a_base() {
        return Err(invalid(format!("{raw} cannot take a path")));
    }
    Ok(url)
}

/// `base` with each of `segments` appended as one escaped path segment.
pub(crate) fn segment_url<I>(base: &Url, segments: I) -> Url
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    let mut url = base.clone();
    // Only fails for bases `parse_base_url` rejects.
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url
}

/// Pass successful responses through; turn the rest into a case error.
///
/// Requests the service rejects as malformed or unknown are data errors.
/// Everything else is retried on the next run.
pub(crate) async fn ensure_success(
    service: &str,
    response: Response,
) -> Result<Response, CaseError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(status_error(service, status, &body))
}

fn status_error(service: &str, status: StatusCode, body: &str) -> CaseError {
    let body: String = body.trim().chars().take(MAX_ERROR_BODY).collect();
    match status {
        StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND | StatusCode::UNPROCESSABLE_ENTITY => {
            CaseError::Data(format!("{service} rejected request ({status}): {body}"))
        }
        _ => CaseError::transient(service, format!("HTTP {status}: {body}")),
    }
}

pub(crate) fn transport_error(service: &str, error: reqwest::Error) -> CaseError {
    if error.is_timeout() {
        CaseError::transient(service, "request timed out")
    } else {
        CaseError::transient(service, error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segments_append_below_the_base_path() {
        for raw in ["http://host/api/", "http://host/api"] {
            let base = parse_base_url("test", raw).unwrap();
            assert_eq!(
                segment_url(&base, ["cases", "F-1"]).as_str(),
                "http://host/api/cases/F-1"
            );
        }
    }

    #[test]
    fn segments_are_escaped_whole() {
        let base = parse_base_url("test", "http://host/api").unwrap();
        let url = segment_url(&base, ["cases", "2024/7?x#y%"]);
        assert_eq!(url.as_str(), "http://host/api/cases/2024%2F7%3Fx%23y%25");
        assert_eq!(url.query(), None);
        assert_eq!(url.fragment(), None);
    }

    #[test]
    fn unusable_base_urls_fail_setup() {
        assert!(matches!(
            parse_base_url("registry", "not a url"),
            Err(SetupError::BaseUrl { .. })
        ));
        assert!(matches!(
            parse_base_url("registry", "mailto:robot@example.com"),
            Err(SetupError::BaseUrl { .. })
        ));
    }

    #[test]
    fn rejected_requests_are_data_errors() {
        let err = status_error("registry", StatusCode::NOT_FOUND, "no such case");
        assert!(matches!(err, CaseError::Data(ref m) if m.contains("no such case")));
    }

    #[test]
    fn server_errors_are_transient() {
        let err = status_error("postal gateway", StatusCode::BAD_GATEWAY, "");
        assert_eq!(err.kind(), "transient_external");
    }

    #[test]
    fn long_bodies_are_truncated() {
        let body = "x".repeat(1000);
        let CaseError::TransientExternal { reason, .. } =
            status_error("registry", StatusCode::INTERNAL_SERVER_ERROR, &body)
        else {
            panic!("Expected transient error");
        };
        assert!(reason.len() < 400);
    }

    #[test]
    fn client_builds_with_timeout() {
        let client = build_client("test", Client::builder(), Duration::from_secs(5));
        assert!(client.is_ok());
    }
}
