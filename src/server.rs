//! Relay server implementation
//! Dispatches each request to the health check, proxy mode, format mode or
//! the default info page

use crate::base58;
use crate::format::{self, SourceRegistry};
use crate::rewrite::rewrite;
use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONTENT_TYPE, HOST, USER_AGENT};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};
use url::form_urlencoded;

const USER_AGENT_VALUE: &str = "Mozilla/5.0 ApiRelay/1.0";

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";
const TEXT_CONTENT_TYPE: &str = "text/plain;charset=UTF-8";
const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";

/// Proxy targets must be absolute http(s) URLs
static TARGET_URL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^https?://").unwrap());

/// Relay server configuration
#[derive(Clone)]
pub struct RelayConfig {
    pub port: u16,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self { port: 3000 }
    }
}

/// JSON body shape shared by every error response
#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

/// Query parameters the dispatcher cares about, first occurrence wins
#[derive(Debug, Default)]
struct QueryParams {
    url: Option<String>,
    format: Option<String>,
    source: Option<String>,
    prefix: Option<String>,
}

impl QueryParams {
    fn parse(query: Option<&str>) -> Self {
        let mut params = Self::default();
        let Some(query) = query else {
            return params;
        };
        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            let slot = match key.as_ref() {
                "url" => &mut params.url,
                "format" => &mut params.format,
                "source" => &mut params.source,
                "prefix" => &mut params.prefix,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value.into_owned());
            }
        }
        params
    }
}

/// Relay server
pub struct RelayServer {
    config: RelayConfig,
    sources: SourceRegistry,
    client: reqwest::Client,
}

impl RelayServer {
    /// Create a new relay server
    pub fn new(config: RelayConfig, sources: SourceRegistry) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            config,
            sources,
            client,
        })
    }

    /// Start the relay server
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let addr: SocketAddr = format!("0.0.0.0:{}", self.config.port).parse()?;
        let listener = TcpListener::bind(addr).await?;
        info!("Relay server listening on {}", addr);

        loop {
            let (stream, remote_addr) = listener.accept().await?;
            let server = self.clone();

            tokio::spawn(async move {
                if let Err(e) = server.handle_connection(stream, remote_addr).await {
                    debug!("Connection error from {}: {}", remote_addr, e);
                }
            });
        }
    }

    /// Handle a single HTTP connection
    async fn handle_connection(
        self: Arc<Self>,
        stream: TcpStream,
        remote_addr: SocketAddr,
    ) -> Result<()> {
        let io = TokioIo::new(stream);

        http1::Builder::new()
            .serve_connection(
                io,
                service_fn(move |req| {
                    let server = self.clone();
                    async move { server.handle_request(req, remote_addr).await }
                }),
            )
            .await
            .map_err(|e| anyhow!("HTTP service error: {}", e))
    }

    /// Handle incoming request, converting any uncaught error into a 500
    async fn handle_request(
        &self,
        req: Request<Incoming>,
        remote_addr: SocketAddr,
    ) -> Result<Response<BoxBody<Bytes, hyper::Error>>, Infallible> {
        match self.process_request(req, remote_addr).await {
            Ok(response) => Ok(response),
            Err(e) => {
                error!("Request error: {:#}", e);
                Ok(Self::json_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody {
                        error: "Internal Server Error",
                        details: None,
                        message: Some(format!("{:#}", e)),
                    },
                ))
            }
        }
    }

    /// Dispatch a request, first match wins:
    /// OPTIONS preflight, health check, proxy mode, format mode, info page
    async fn process_request(
        &self,
        req: Request<Incoming>,
        remote_addr: SocketAddr,
    ) -> Result<Response<BoxBody<Bytes, hyper::Error>>> {
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        debug!("{} {} from {}", method, path, remote_addr);

        if method == Method::OPTIONS {
            return Ok(Self::cors_response(
                StatusCode::NO_CONTENT,
                JSON_CONTENT_TYPE,
                Bytes::new(),
            ));
        }

        let origin = Self::request_origin(&req);
        let params = QueryParams::parse(req.uri().query());

        if path == "/health" {
            return Ok(Self::cors_response(
                StatusCode::OK,
                JSON_CONTENT_TYPE,
                Bytes::from_static(b"OK"),
            ));
        }

        // Proxy mode; an empty url parameter is treated as absent
        if let Some(target) = params.url.as_deref().filter(|u| !u.is_empty()) {
            return self.proxy_request(&method, target).await;
        }

        // Format mode; an empty format parameter is an invalid code
        if let Some(format_code) = params.format.as_deref() {
            return self
                .format_request(
                    format_code,
                    params.source.as_deref(),
                    params.prefix.as_deref(),
                    &origin,
                )
                .await;
        }

        Ok(Self::info_page(&origin))
    }

    /// Relay a request to the caller-specified target URL.
    /// Upstream status and body are passed through; upstream headers are
    /// dropped and only CORS headers are sent back.
    async fn proxy_request(
        &self,
        method: &Method,
        target: &str,
    ) -> Result<Response<BoxBody<Bytes, hyper::Error>>> {
        if !TARGET_URL_RE.is_match(target) {
            return Ok(Self::json_error(
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    error: "Invalid URL",
                    details: None,
                    message: None,
                },
            ));
        }

        debug!("Proxying {} {}", method, target);

        let upstream = self
            .client
            .request(method.clone(), target)
            .header(USER_AGENT, USER_AGENT_VALUE)
            .send()
            .await;

        let upstream = match upstream {
            Ok(r) => r,
            Err(e) => return Ok(Self::proxy_failed(target, &e)),
        };

        let status = upstream.status();
        let body = match upstream.bytes().await {
            Ok(b) => b,
            Err(e) => return Ok(Self::proxy_failed(target, &e)),
        };

        Ok(Self::cors_response(status, JSON_CONTENT_TYPE, body))
    }

    fn proxy_failed(target: &str, e: &reqwest::Error) -> Response<BoxBody<Bytes, hyper::Error>> {
        warn!("Proxy request to {} failed: {}", target, e);
        Self::json_error(
            StatusCode::BAD_GATEWAY,
            ErrorBody {
                error: "Proxy Failed",
                details: Some(e.to_string()),
                message: None,
            },
        )
    }

    /// Fetch the resolved config source and apply the format policy
    async fn format_request(
        &self,
        format_code: &str,
        source_code: Option<&str>,
        prefix: Option<&str>,
        origin: &str,
    ) -> Result<Response<BoxBody<Bytes, hyper::Error>>> {
        let resolved = match format::resolve(&self.sources, format_code, source_code) {
            Ok(r) => r,
            Err(e) => {
                warn!("{}", e);
                return Ok(Self::json_error(
                    StatusCode::BAD_REQUEST,
                    ErrorBody {
                        error: "Invalid format",
                        details: None,
                        message: None,
                    },
                ));
            }
        };

        debug!("Fetching config source {}", resolved.source_url);

        let document: Value = self
            .client
            .get(resolved.source_url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch config source {}", resolved.source_url))?
            .json()
            .await
            .with_context(|| format!("Config source {} is not valid JSON", resolved.source_url))?;

        // An empty prefix parameter falls back to the computed origin
        let effective_prefix = match prefix.filter(|p| !p.is_empty()) {
            Some(p) => p.to_string(),
            None => format!("{}/?url=", origin),
        };

        let document = if resolved.policy.proxy_rewrite {
            rewrite(&document, &effective_prefix)
        } else {
            document
        };

        if resolved.policy.base58 {
            let encoded = base58::encode_value(&document).context("Failed to serialize config")?;
            Ok(Self::cors_response(
                StatusCode::OK,
                TEXT_CONTENT_TYPE,
                Bytes::from(encoded),
            ))
        } else {
            let body = serde_json::to_string(&document).context("Failed to serialize config")?;
            Ok(Self::cors_response(
                StatusCode::OK,
                JSON_CONTENT_TYPE,
                Bytes::from(body),
            ))
        }
    }

    /// Origin of the inbound request as seen by clients, honoring
    /// X-Forwarded-Proto when the relay sits behind a TLS terminator
    fn request_origin<T>(req: &Request<T>) -> String {
        let proto = req
            .headers()
            .get("x-forwarded-proto")
            .and_then(|h| h.to_str().ok())
            .unwrap_or("http");
        let host = req
            .headers()
            .get(HOST)
            .and_then(|h| h.to_str().ok())
            .unwrap_or("");
        format!("{}://{}", proto, host)
    }

    /// Static informational page served when no query parameter matches
    fn info_page(origin: &str) -> Response<BoxBody<Bytes, hyper::Error>> {
        let html = format!(
            r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8"><meta name="viewport" content="width=device-width, initial-scale=1.0">
  <title>API Relay</title>
  <style>body{{font-family:sans-serif;padding:20px;max-width:800px;margin:0 auto;line-height:1.6}}code{{background:#f4f4f4;padding:2px 5px;border-radius:3px}}</style>
</head>
<body>
  <h1>&#9989; API Relay is running</h1>
  <p>Service address: <code>{origin}</code></p>
  <h3>Usage:</h3>
  <ul>
    <li><b>Proxy endpoint:</b> {origin}/?url=https://cj.lziapi.com/api.php...</li>
    <li><b>Config feed:</b> {origin}/?format=1&amp;source=full</li>
  </ul>
</body>
</html>"#
        );

        Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, HTML_CONTENT_TYPE)
            .body(Self::full_body(Bytes::from(html)))
            .unwrap()
    }

    /// Create a response carrying the CORS header set
    fn cors_response(
        status: StatusCode,
        content_type: &str,
        body: Bytes,
    ) -> Response<BoxBody<Bytes, hyper::Error>> {
        Response::builder()
            .status(status)
            .header("Access-Control-Allow-Origin", HeaderValue::from_static("*"))
            .header(
                "Access-Control-Allow-Methods",
                HeaderValue::from_static("GET, POST, OPTIONS"),
            )
            .header(
                "Access-Control-Allow-Headers",
                HeaderValue::from_static("Content-Type"),
            )
            .header(CONTENT_TYPE, content_type)
            .body(Self::full_body(body))
            .unwrap()
    }

    /// Create a JSON error response
    fn json_error(status: StatusCode, body: ErrorBody<'_>) -> Response<BoxBody<Bytes, hyper::Error>> {
        let json = serde_json::to_string(&body).unwrap_or_else(|_| String::from("{}"));
        Self::cors_response(status, JSON_CONTENT_TYPE, Bytes::from(json))
    }

    /// Create full body
    fn full_body(bytes: Bytes) -> BoxBody<Bytes, hyper::Error> {
        Full::new(bytes).map_err(|never| match never {}).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_url_validation() {
        assert!(TARGET_URL_RE.is_match("http://example.com"));
        assert!(TARGET_URL_RE.is_match("https://example.com/api.php?ac=list"));
        assert!(TARGET_URL_RE.is_match("HTTPS://EXAMPLE.COM"));
        assert!(!TARGET_URL_RE.is_match("not-a-url"));
        assert!(!TARGET_URL_RE.is_match("ftp://example.com"));
        assert!(!TARGET_URL_RE.is_match("//example.com"));
        assert!(!TARGET_URL_RE.is_match(" http://example.com"));
    }

    #[test]
    fn test_query_params_first_occurrence_wins() {
        let params = QueryParams::parse(Some("format=1&format=2&source=jin18"));
        assert_eq!(params.format.as_deref(), Some("1"));
        assert_eq!(params.source.as_deref(), Some("jin18"));
        assert_eq!(params.url, None);
        assert_eq!(params.prefix, None);
    }

    #[test]
    fn test_query_params_decodes_percent_encoding() {
        let params = QueryParams::parse(Some("url=https%3A%2F%2Fexample.com%2Fapi"));
        assert_eq!(params.url.as_deref(), Some("https://example.com/api"));
    }

    #[test]
    fn test_query_params_empty_values_are_present() {
        let params = QueryParams::parse(Some("format=&url="));
        assert_eq!(params.format.as_deref(), Some(""));
        assert_eq!(params.url.as_deref(), Some(""));
    }

    #[test]
    fn test_request_origin_defaults_to_http() {
        let req = Request::builder()
            .uri("/")
            .header(HOST, "relay.example:3000")
            .body(())
            .unwrap();
        assert_eq!(RelayServer::request_origin(&req), "http://relay.example:3000");
    }

    #[test]
    fn test_request_origin_honors_forwarded_proto() {
        let req = Request::builder()
            .uri("/")
            .header(HOST, "relay.example")
            .header("x-forwarded-proto", "https")
            .body(())
            .unwrap();
        assert_eq!(RelayServer::request_origin(&req), "https://relay.example");
    }
}
