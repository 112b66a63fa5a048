//! Endpoint URL construction for the subscription and watch sockets.

use thiserror::Error;
use url::Url;

/// Error type for base URL conversion failures.
#[derive(Debug, Error)]
pub enum UrlError {
    /// The base URL failed to parse.
    #[error(transparent)]
    Parse(#[from] url::ParseError),
    /// The base URL carries a scheme with no websocket equivalent.
    #[error("Unsupported scheme: {0}")]
    UnsupportedScheme(String),
}

/// Maps an API base URL to its websocket equivalent.
///
/// `http` becomes `ws`, `https` becomes `wss`, and `ws`/`wss` pass through
/// unchanged. Any trailing slash is stripped so the result can be joined with
/// the endpoint path helpers below.
///
/// # Errors
///
/// * Returns [`UrlError::Parse`] if the base URL fails to parse
/// * Returns [`UrlError::UnsupportedScheme`] for schemes other than
///   `http(s)`/`ws(s)`
pub fn ws_base_url(base: &str) -> Result<String, UrlError> {
    let mut url = Url::parse(base)?;

    let scheme = match url.scheme() {
        "http" => "ws",
        "https" => "wss",
        "ws" | "wss" => {
            return Ok(url.as_str().trim_end_matches('/').to_string());
        }
        other => return Err(UrlError::UnsupportedScheme(other.to_string())),
    };

    url.set_scheme(scheme)
        .map_err(|()| UrlError::UnsupportedScheme(scheme.to_string()))?;

    Ok(url.as_str().trim_end_matches('/').to_string())
}

/// URL of the generic multiplexed subscription endpoint.
#[must_use]
pub fn subscription_url(ws_base: &str) -> String {
    format!("{ws_base}/ws/v1/subscription/resource")
}

/// URL of the live pod view for a whole cluster.
#[must_use]
pub fn cluster_pods_url(ws_base: &str, cluster_name: &str) -> String {
    format!("{ws_base}/ws/v1/clusters/{cluster_name}/pods")
}

/// URL of the live pod view for a single deployment.
#[must_use]
pub fn deployment_pods_url(ws_base: &str, cluster_name: &str, deployment_name: &str) -> String {
    format!("{ws_base}/ws/v1/clusters/{cluster_name}/deployments/{deployment_name}/pods")
}

/// URL of the live helm chart release resource view for a cluster.
#[must_use]
pub fn helm_chart_release_resources_url(ws_base: &str, cluster_name: &str) -> String {
    format!("{ws_base}/ws/v1/clusters/{cluster_name}/helm_chart_release_resources")
}
