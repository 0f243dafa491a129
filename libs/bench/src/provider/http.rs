//! HTTP plumbing shared by the REST backends.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::{Client, RequestBuilder, Response};
use url::Url;

/// Per-request timeout; long enough for a loaded cluster to answer.
pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub(crate) fn build_client() -> Result<Client> {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .context("Failed to build HTTP client")
}

/// Parse a base URL, making sure joined path segments append to it.
pub(crate) fn parse_base_url(base: &str) -> Result<Url> {
    let mut url: Url = base
        .parse()
        .with_context(|| format!("Invalid endpoint URL: {}", base))?;
    if url.cannot_be_a_base() {
        return Err(anyhow!("Endpoint URL cannot carry a path: {}", base));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// Append path segments to `base`.
pub(crate) fn endpoint<I, S>(base: &Url, segments: I) -> Url
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut url = base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url
}

/// Send a request, turning non-2xx responses into errors carrying the body.
pub(crate) async fn send_checked(request: RequestBuilder) -> Result<Response> {
    let response = request.send().await.context("Request failed")?;
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(body_to_error(response).await)
    }
}

pub(crate) async fn body_to_error(response: Response) -> anyhow::Error {
    let status = response.status();
    let url = response.url().clone();
    match response.text().await {
        Ok(text) => anyhow!("{} {} failed: {}", status, url, text),
        Err(e) => anyhow!("{} {} failed, body unreadable: {}", status, url, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_joins_segments() {
        let base = parse_base_url("http://localhost:6333").unwrap();
        assert_eq!(
            endpoint(&base, ["collections", "content"]).as_str(),
            "http://localhost:6333/collections/content"
        );
        let nested = parse_base_url("http://proxy:80/qdrant").unwrap();
        assert_eq!(
            endpoint(&nested, ["collections"]).as_str(),
            "http://proxy:80/qdrant/collections"
        );
    }

    #[test]
    fn test_trailing_empty_segment_kept() {
        let base = parse_base_url("http://localhost:8080/").unwrap();
        assert_eq!(
            endpoint(&base, ["search", ""]).as_str(),
            "http://localhost:8080/search/"
        );
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(parse_base_url("not a url").is_err());
        assert!(parse_base_url("mailto:me@example.com").is_err());
    }
}
