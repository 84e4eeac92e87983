//! HTTP interceptor: a loopback HTTPS-terminating forward proxy instead of
//! a runtime client patch. The wrapper points the host CLI at this server
//! (via `ANTHROPIC_BASE_URL`) and this server forwards every request to
//! the real AI-provider base URL (`AI_BASE_URL`, default
//! `api.anthropic.com`), capturing an API span per request along the way.
//!
//! Built on `actix-web` for the server side and `reqwest` for the
//! upstream client.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use actix_web::http::header::{HeaderName, HeaderValue};
use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
use bytes::Bytes;
use cc_trace_core::tracer::OpenSpan;
use cc_trace_core::{Correlator, SpanStatus, Tracer};
use cc_trace_llm::{
    estimate_tokens, is_event_stream_content_type, parse_json_response, parse_sse_response,
    truncate_for_span, InputTokenSource, ParsedResponse,
};
use futures::Stream;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("failed to bind proxy listener: {0}")]
    Bind(std::io::Error),
}

/// The Anthropic Messages API paths this proxy recognizes as AI-provider
/// traffic. Anything else is forwarded unchanged, with no span (kept as an
/// explicit check even though, under the env-var redirect, essentially all
/// traffic reaching this server is provider traffic by construction).
const RECOGNIZED_PATH_PREFIXES: &[&str] = &["/v1/messages", "/v1/complete"];

fn matches_provider_traffic(path: &str) -> bool {
    RECOGNIZED_PATH_PREFIXES.iter().any(|p| path.starts_with(p))
}

struct ProxyState {
    tracer: Tracer,
    correlator: Arc<Correlator>,
    upstream_base: String,
    client: reqwest::Client,
}

/// Starts the loopback proxy and returns its bound address. The server runs
/// for the lifetime of the returned `ServerHandle`'s owning task; dropping
/// the handle without calling `stop` leaves it running until the process
/// exits, which is fine here since the wrapper process IS the proxy's
/// lifetime.
pub struct ProxyHandle {
    pub addr: std::net::SocketAddr,
    server: actix_web::dev::ServerHandle,
    join: tokio::task::JoinHandle<()>,
}

impl ProxyHandle {
    pub async fn stop(self) {
        self.server.stop(true).await;
        let _ = self.join.await;
    }
}

pub async fn start(tracer: Tracer, correlator: Arc<Correlator>, upstream_base: String) -> Result<ProxyHandle, ProxyError> {
    let state = web::Data::new(ProxyState {
        tracer,
        correlator,
        upstream_base,
        client: reqwest::Client::new(),
    });

    let server = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .app_data(web::PayloadConfig::new(64 * 1024 * 1024))
            .default_service(web::route().to(forward))
    })
    .bind(("127.0.0.1", 0))
    .map_err(ProxyError::Bind)?;

    let addr = server
        .addrs()
        .into_iter()
        .next()
        .expect("HttpServer::bind always yields at least one address");

    let running = server.run();
    let handle = running.handle();
    let join = tokio::spawn(async move {
        let _ = running.await;
    });

    Ok(ProxyHandle {
        addr,
        server: handle,
        join,
    })
}

async fn forward(req: HttpRequest, body: web::Bytes, state: web::Data<ProxyState>) -> HttpResponse {
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|p| p.as_str())
        .unwrap_or(req.uri().path())
        .to_string();

    if !matches_provider_traffic(req.path()) {
        return forward_unmatched(&req, body, &state).await;
    }

    let target_url = format!("{}{}", state.upstream_base.trim_end_matches('/'), path_and_query);
    let method = reqwest_method(req.method());

    let mut span = state.tracer.start_api_span(req.method().as_str(), &target_url);

    let request_json: Option<Value> = serde_json::from_slice(&body).ok();

    let mut upstream_req = state.client.request(method, &target_url).body(body.to_vec());
    for (name, value) in req.headers() {
        if is_hop_by_hop(name.as_str()) {
            continue;
        }
        upstream_req = upstream_req.header(name.as_str(), value.as_bytes());
    }

    let upstream_resp = match upstream_req.send().await {
        Ok(resp) => resp,
        Err(err) => {
            span.record_exception(&err);
            span.set_status(SpanStatus::Error, Some(err.to_string()));
            span.end();
            return HttpResponse::BadGateway().body(format!("upstream request failed: {err}"));
        }
    };

    let status = upstream_resp.status().as_u16();
    let content_type = upstream_resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let mut builder = HttpResponse::build(
        actix_web::http::StatusCode::from_u16(status).unwrap_or(actix_web::http::StatusCode::BAD_GATEWAY),
    );
    for (name, value) in upstream_resp.headers() {
        if is_hop_by_hop(name.as_str()) || name.as_str().eq_ignore_ascii_case("content-length") {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::try_from(name.as_str()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            builder.insert_header((name, value));
        }
    }

    let correlator = state.correlator.clone();
    let stream = CapturingStream {
        inner: Box::pin(upstream_resp.bytes_stream()),
        buffer: Vec::new(),
        finish: Some(Box::new(move |buf, stream_err| {
            finalize(span, correlator, request_json, content_type, status, buf, stream_err);
        })),
    };

    builder.streaming(stream)
}

/// Forwards traffic that doesn't match a recognized AI-provider path
/// untouched and unspanned.
async fn forward_unmatched(req: &HttpRequest, body: web::Bytes, state: &ProxyState) -> HttpResponse {
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|p| p.as_str())
        .unwrap_or(req.uri().path());
    let target_url = format!("{}{}", state.upstream_base.trim_end_matches('/'), path_and_query);
    let mut upstream_req = state
        .client
        .request(reqwest_method(req.method()), &target_url)
        .body(body.to_vec());
    for (name, value) in req.headers() {
        if is_hop_by_hop(name.as_str()) {
            continue;
        }
        upstream_req = upstream_req.header(name.as_str(), value.as_bytes());
    }
    match upstream_req.send().await {
        Ok(resp) => {
            let status = resp.status().as_u16();
            let body = resp.bytes().await.unwrap_or_default();
            HttpResponse::build(
                actix_web::http::StatusCode::from_u16(status)
                    .unwrap_or(actix_web::http::StatusCode::BAD_GATEWAY),
            )
            .body(body)
        }
        Err(err) => HttpResponse::BadGateway().body(format!("upstream request failed: {err}")),
    }
}

fn reqwest_method(method: &actix_web::http::Method) -> reqwest::Method {
    reqwest::Method::from_bytes(method.as_str().as_bytes()).unwrap_or(reqwest::Method::GET)
}

fn is_hop_by_hop(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "connection" | "keep-alive" | "proxy-authenticate" | "proxy-authorization" | "te" | "trailers" | "transfer-encoding" | "upgrade" | "host"
    )
}

/// Completes the API span once the (possibly streamed) response body has
/// been fully observed. Runs exactly once per
/// request, whether the stream ended cleanly or with an error.
fn finalize(
    mut span: OpenSpan,
    correlator: Arc<Correlator>,
    request_json: Option<Value>,
    content_type: String,
    status: u16,
    body: Vec<u8>,
    stream_error: Option<String>,
) {
    let parsed: ParsedResponse = if is_event_stream_content_type(&content_type) {
        let text = String::from_utf8_lossy(&body);
        parse_sse_response(&text)
    } else {
        match parse_json_response(&body) {
            Ok(parsed) => parsed,
            Err(err) => {
                span.record_exception(err);
                ParsedResponse::default()
            }
        }
    };

    let model = parsed
        .model
        .clone()
        .or_else(|| {
            request_json
                .as_ref()
                .and_then(|v| v.get("model"))
                .and_then(|v| v.as_str())
                .map(String::from)
        })
        .unwrap_or_else(|| "unknown".to_string());

    let (input_tokens, input_source) = match parsed.usage.input_tokens {
        Some(tokens) => (tokens, InputTokenSource::Api),
        None => {
            let request_text = request_json
                .as_ref()
                .map(|v| v.to_string())
                .unwrap_or_default();
            (estimate_tokens(&request_text), InputTokenSource::Estimated)
        }
    };

    let usage = cc_trace_core::pricing::TokenUsage {
        input: input_tokens,
        output: parsed.usage.output_tokens.unwrap_or(0),
        cache_read: parsed.usage.cache_read_input_tokens.unwrap_or(0),
        cache_write: parsed.usage.cache_creation_input_tokens.unwrap_or(0),
    };
    let cost = cc_trace_core::pricing::calculate_cost(&model, &usage);

    span.set_attr("ai.model", model);
    span.set_attr("ai.tokens.input", usage.input as i64);
    span.set_attr("ai.tokens.output", usage.output as i64);
    span.set_attr("ai.cache.read", usage.cache_read as i64);
    span.set_attr("ai.cache.write", usage.cache_write as i64);
    span.set_attr("ai.cost.usd", cost.cost_usd);
    span.set_attr("ai.cost.known", cost.known);
    span.set_attr("http.status_code", status as i64);
    span.set_attr("ai.token_source", input_source.as_str());

    if let Some(req) = &request_json {
        span.set_attr("ai.prompt", truncate_for_span(&req.to_string()));
    }
    if !parsed.text.is_empty() {
        span.set_attr("ai.response", truncate_for_span(&parsed.text));
    }

    for tool_use in &parsed.tool_uses {
        correlator.record_intention(tool_use.id.clone(), tool_use.name.clone(), tool_use.input.clone());
    }

    if let Some(err) = stream_error {
        span.record_exception(&err);
        span.set_status(SpanStatus::Error, Some(err));
    } else if (200..300).contains(&status) {
        span.set_status(SpanStatus::Ok, None);
    } else {
        span.set_status(SpanStatus::Error, Some(format!("http status {status}")));
    }

    span.end();
}

/// Tees a response byte stream to both the client (forwarded live, chunk by
/// chunk, exactly as received) and an in-memory buffer, invoking `finish`
/// exactly once when the upstream stream is exhausted. This is what keeps
/// the proxy from buffering a full streaming response before the host sees
/// any of it.
struct CapturingStream {
    inner: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>,
    buffer: Vec<u8>,
    finish: Option<Box<dyn FnOnce(Vec<u8>, Option<String>) + Send>>,
}

impl Stream for CapturingStream {
    type Item = Result<Bytes, std::io::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                self.buffer.extend_from_slice(&chunk);
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(err))) => {
                let message = err.to_string();
                if let Some(finish) = self.finish.take() {
                    let buf = std::mem::take(&mut self.buffer);
                    finish(buf, Some(message.clone()));
                }
                Poll::Ready(Some(Err(std::io::Error::new(std::io::ErrorKind::Other, message))))
            }
            Poll::Ready(None) => {
                if let Some(finish) = self.finish.take() {
                    let buf = std::mem::take(&mut self.buffer);
                    finish(buf, None);
                }
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_messages_endpoint() {
        assert!(matches_provider_traffic("/v1/messages"));
        assert!(!matches_provider_traffic("/v1/models"));
    }

    #[test]
    fn hop_by_hop_headers_are_filtered() {
        assert!(is_hop_by_hop("Connection"));
        assert!(is_hop_by_hop("Transfer-Encoding"));
        assert!(!is_hop_by_hop("content-type"));
    }
}
