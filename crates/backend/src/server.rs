//! HTTP front end for the prediction service
//!
//! ## Endpoints
//!
//! - `POST /predict`: multipart form in, prediction JSON out
//! - `GET /health`: liveness plus the device and class count
//! - `GET /metrics`: JSON snapshot of the request counters
//! - `OPTIONS *`: CORS preflight, when CORS is enabled
//!
//! Every failure on `/predict` is answered with status 400 and a body of the
//! form `{"error": "<message>"}`; the server keeps serving.

use crate::form::parse_predict_form;
use crate::service::{PredictionResult, PredictionService};
use crate::BackendConfig;
use http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    CACHE_CONTROL, CONTENT_TYPE,
};
use http::{HeaderValue, Method, StatusCode};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server};
use serde::Serialize;
use skinlens_inference::{Classifier, HybridClassifier};
use skinlens_shared::{MetricsCollector, Result, SkinlensError};
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};

/// Shared, read-only state handed to every request
#[derive(Debug)]
pub struct ServerContext<C = HybridClassifier> {
    /// Loaded prediction pipeline
    pub service: Arc<PredictionService<C>>,
    /// Request counters
    pub metrics: Arc<MetricsCollector>,
    /// Cap on `/predict` body size
    pub max_upload_bytes: usize,
    /// Whether to emit CORS headers
    pub enable_cors: bool,
}

impl<C: Classifier> ServerContext<C> {
    /// Context for `service` using the limits in `config`
    pub fn new(service: Arc<PredictionService<C>>, config: &BackendConfig) -> Self {
        Self {
            service,
            metrics: Arc::new(MetricsCollector::new()),
            max_upload_bytes: config.max_upload_bytes,
            enable_cors: config.enable_cors,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

#[derive(Serialize)]
struct HealthBody<'a> {
    status: &'static str,
    device: &'a str,
    classes: usize,
}

/// HTTP server bound to a single listen address
#[derive(Debug)]
pub struct PredictionServer<C = HybridClassifier> {
    context: Arc<ServerContext<C>>,
    listen_addr: SocketAddr,
}

impl<C: Classifier + 'static> PredictionServer<C> {
    /// Creates a server for `service`; nothing is bound until [`serve`](Self::serve)
    pub fn new(service: Arc<PredictionService<C>>, config: &BackendConfig) -> Self {
        Self {
            context: Arc::new(ServerContext::new(service, config)),
            listen_addr: config.listen_addr,
        }
    }

    /// Shared request context, including the metrics collector
    pub fn context(&self) -> Arc<ServerContext<C>> {
        Arc::clone(&self.context)
    }

    /// Configured listen address
    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    /// Serves until `shutdown` resolves, then drains in-flight requests
    #[instrument(skip_all, fields(listen_addr = %self.listen_addr))]
    pub async fn serve<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let context = Arc::clone(&self.context);
        let make_svc = make_service_fn(move |_conn| {
            let context = Arc::clone(&context);
            async move {
                Ok::<_, Infallible>(service_fn(move |req| {
                    handle_request(req, Arc::clone(&context))
                }))
            }
        });

        let server = match Server::try_bind(&self.listen_addr) {
            Ok(builder) => builder.serve(make_svc).with_graceful_shutdown(shutdown),
            Err(e) => {
                error!(error = %e, "Failed to bind to address");
                return Err(SkinlensError::network(
                    self.listen_addr.to_string(),
                    "Failed to bind to address",
                    Some(Box::new(e)),
                ));
            }
        };

        info!(
            local_addr = %display_url(&self.listen_addr),
            "Prediction server listening"
        );

        if let Err(e) = server.await {
            error!(error = %e, "HTTP server error");
            return Err(SkinlensError::network(
                self.listen_addr.to_string(),
                "HTTP server error",
                Some(Box::new(e)),
            ));
        }

        info!("Prediction server shut down");
        Ok(())
    }
}

fn display_url(addr: &SocketAddr) -> String {
    if addr.ip().is_unspecified() {
        format!("http://localhost:{}", addr.port())
    } else {
        format!("http://{}", addr)
    }
}

/// Routes one request; never fails at the HTTP level
#[instrument(skip_all, fields(method = %req.method(), path = req.uri().path()))]
pub async fn handle_request<C: Classifier + 'static>(
    req: Request<Body>,
    context: Arc<ServerContext<C>>,
) -> std::result::Result<Response<Body>, Infallible> {
    let started = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let mut response = match (&method, path.as_str()) {
        (&Method::POST, "/predict") => handle_predict(req, &context).await,
        (&Method::GET, "/health") => json_response(
            StatusCode::OK,
            &HealthBody {
                status: "ok",
                device: context.service.device_name(),
                classes: context.service.labels().len(),
            },
        ),
        (&Method::GET, "/metrics") => json_response(StatusCode::OK, &context.metrics.snapshot()),
        (&Method::OPTIONS, _) if context.enable_cors => preflight_response(),
        _ => {
            warn!(method = %method, path = %path, "Request to unknown endpoint");
            json_response(StatusCode::NOT_FOUND, &ErrorBody { error: "not found" })
        }
    };

    if context.enable_cors {
        response
            .headers_mut()
            .insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    }

    debug!(
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms = started.elapsed().as_secs_f64() * 1000.0,
        "Request completed"
    );

    Ok(response)
}

async fn handle_predict<C: Classifier + 'static>(
    req: Request<Body>,
    context: &ServerContext<C>,
) -> Response<Body> {
    context.metrics.record_request();

    match run_prediction(req, context).await {
        Ok((result, elapsed)) => {
            context
                .metrics
                .record_prediction(elapsed, result.is_uncertain());
            info!(
                predicted_class = %result.predicted_class,
                inference_ms = elapsed.as_secs_f64() * 1000.0,
                "Prediction served"
            );
            json_response(StatusCode::OK, &result)
        }
        Err(e) => {
            context.metrics.record_error();
            warn!(error = %e, "Prediction request failed");
            let status =
                StatusCode::from_u16(e.to_http_status()).unwrap_or(StatusCode::BAD_REQUEST);
            json_response(status, &ErrorBody { error: &e.to_string() })
        }
    }
}

async fn run_prediction<C: Classifier + 'static>(
    req: Request<Body>,
    context: &ServerContext<C>,
) -> Result<(PredictionResult, Duration)> {
    let content_type = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let request =
        parse_predict_form(content_type.as_deref(), req.into_body(), context.max_upload_bytes)
            .await?;

    let service = Arc::clone(&context.service);
    let started = Instant::now();
    let result = tokio::task::spawn_blocking(move || service.predict(&request))
        .await
        .map_err(|e| {
            SkinlensError::internal(format!("Prediction task failed: {}", e), Some(Box::new(e)))
        })??;

    Ok((result, started.elapsed()))
}

fn preflight_response() -> Response<Body> {
    Response::builder()
        .status(StatusCode::NO_CONTENT)
        .header(ACCESS_CONTROL_ALLOW_METHODS, "GET, POST, OPTIONS")
        .header(ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type")
        .body(Body::empty())
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

fn json_response<T: Serialize + ?Sized>(status: StatusCode, body: &T) -> Response<Body> {
    match serde_json::to_vec(body) {
        Ok(json) => Response::builder()
            .status(status)
            .header(CONTENT_TYPE, "application/json")
            .header(CACHE_CONTROL, "no-store")
            .body(Body::from(json))
            .unwrap_or_else(|e| {
                error!(error = %e, "Failed to build JSON response");
                Response::new(Body::empty())
            }),
        Err(e) => {
            error!(error = %e, "Failed to serialize response body");
            let mut response = Response::new(Body::from(r#"{"error":"internal error"}"#));
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            response
        }
    }
}
