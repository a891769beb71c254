use std::convert::Infallible;
use std::fmt::Debug;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use http_body_util::Full;
use hyper::body::{Body, Bytes};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use opentelemetry::trace::TraceContextExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::pin;
use tracing::{debug, error, info, instrument, Span};
use tracing_opentelemetry::OpenTelemetrySpanExt;

use crate::broker::server::request_ext::read_json;
use crate::broker::server::router::{self, Route};
use crate::broker::server::ServerContext;
use crate::broker::{AcquisitionOptions, Error, Properties, ResourceRequest};
use crate::metrics_provider::{IN_FLIGHT_REQUESTS, METRICS_PROVIDER};

pub type ResponseBody = Full<Bytes>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Deserialize)]
struct AcquireBody {
    resources: Vec<ResourceRequest>,
    #[serde(default)]
    options: Option<AcquisitionOptions>,
}

#[derive(Debug, Deserialize)]
struct UnlockBody {
    token: String,
}

#[derive(Debug, Deserialize)]
struct UnlockSetBody {
    unlock_set: String,
}

#[derive(Debug, Deserialize)]
struct CreateResourceBody {
    resource_set: String,
    #[serde(default)]
    properties: Properties,
}

#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    ok: bool,
    data: &'a T,
}

fn update_in_flight_gauge() {
    METRICS_PROVIDER.metric_http_request_in_flight.set(
        i64::try_from(IN_FLIGHT_REQUESTS.load(Ordering::Relaxed)).unwrap_or(i64::MAX),
    );
}

pub async fn serve_request<S>(stream: TokioIo<S>, context: Arc<ServerContext>, timeouts: [Duration; 2])
where
    S: Unpin + AsyncWrite + AsyncRead + Send + Debug + 'static,
{
    let conn = http1::Builder::new().serve_connection(
        stream,
        service_fn(move |request| handle_request(Arc::clone(&context), request)),
    );
    pin!(conn);

    IN_FLIGHT_REQUESTS.fetch_add(1, Ordering::Relaxed);
    update_in_flight_gauge();

    for (iter, sleep_duration) in timeouts.iter().enumerate() {
        debug!("iter = {iter} sleep_duration = {sleep_duration:?}");
        tokio::select! {
            res = conn.as_mut() => {
                match res {
                    Ok(()) => debug!("after polling conn, no error"),
                    Err(error) => debug!("error serving connection: {error}"),
                }
                break;
            }
            () = tokio::time::sleep(*sleep_duration) => {
                debug!("iter = {iter} got timeout_interval, calling conn.graceful_shutdown");
                conn.as_mut().graceful_shutdown();
            }
        }
    }

    IN_FLIGHT_REQUESTS.fetch_sub(1, Ordering::Relaxed);
    update_in_flight_gauge();
}

#[instrument(skip(context, request))]
pub async fn handle_request<B>(
    context: Arc<ServerContext>,
    request: Request<B>,
) -> Result<Response<ResponseBody>, Infallible>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let start_time = Instant::now();
    let method = request.method().to_owned();
    let path = request.uri().path().to_owned();
    let route_action = router::parse(request.method(), request.uri()).action_name();

    let trace_id = {
        let context = Span::current().context();
        let span = context.span();
        let span_context = span.span_context();
        if span_context.is_valid() {
            Some(span_context.trace_id().to_string())
        } else {
            None
        }
    };

    let response = match router(&context, request).await {
        Ok(response) => response,
        Err(error) => error_to_response(&error, trace_id.as_ref()),
    };

    #[allow(clippy::cast_precision_loss)]
    let elapsed = start_time.elapsed().as_millis() as f64;
    let status = response.status();

    METRICS_PROVIDER
        .metric_http_request_total
        .with_label_values(&[method.as_str(), route_action, status.as_str()])
        .inc();
    METRICS_PROVIDER
        .metric_http_request_duration
        .with_label_values(&[method.as_str(), route_action])
        .observe(elapsed);

    let log = if let Some(trace_id) = trace_id {
        format!("{trace_id} {elapsed:?} - {status} {method} {path}")
    } else {
        format!("{elapsed:?} - {status} {method} {path}")
    };

    if status.is_server_error() {
        error!("{log}");
    } else {
        info!("{log}");
    }

    Ok(response)
}

async fn router<B>(context: &ServerContext, request: Request<B>) -> Result<Response<ResponseBody>, Error>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let (parts, body) = request.into_parts();
    let route = router::parse(&parts.method, &parts.uri);

    match route {
        Route::Healthz => handle_healthz(),
        Route::Metrics => handle_metrics(),
        Route::ApiVersion => success_response(&context.broker.version()),
        Route::Acquire => handle_acquire(context, body).await,
        Route::Unlock => handle_unlock(context, body).await,
        Route::UnlockSet => handle_unlock_set(context, body).await,
        Route::CreateResource => handle_create_resource(context, body).await,
        Route::DestroyResource { id } => {
            context.broker.remove(&id).await?;
            success_response(&())
        }
        Route::DisableResource { id } => {
            context.broker.disable(&id).await?;
            success_response(&())
        }
        Route::EnableResource { id } => {
            context.broker.enable(&id).await?;
            success_response(&())
        }
        Route::ListResources { resource_set } => {
            let resources = context.broker.list(resource_set.as_deref()).await?;
            success_response(&json!({ "resources": resources }))
        }
        Route::Unsupported => Err(Error::Unsupported),
        Route::Unknown => Err(Error::NotFound),
    }
}

async fn handle_acquire<B>(context: &ServerContext, body: B) -> Result<Response<ResponseBody>, Error>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let body: AcquireBody = read_json(body).await?;
    let token = context
        .broker
        .acquire(body.resources, body.options.unwrap_or_default())
        .await?;
    success_response(&token)
}

async fn handle_unlock<B>(context: &ServerContext, body: B) -> Result<Response<ResponseBody>, Error>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let body: UnlockBody = read_json(body).await?;
    context.broker.release_by_token(&body.token).await?;
    success_response(&())
}

async fn handle_unlock_set<B>(
    context: &ServerContext,
    body: B,
) -> Result<Response<ResponseBody>, Error>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let body: UnlockSetBody = read_json(body).await?;
    let count = context.broker.release_by_set(&body.unlock_set).await?;
    success_response(&json!({ "count": count }))
}

async fn handle_create_resource<B>(
    context: &ServerContext,
    body: B,
) -> Result<Response<ResponseBody>, Error>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    let body: CreateResourceBody = read_json(body).await?;
    let resource = context
        .broker
        .register(body.resource_set, body.properties)
        .await?;
    success_response(&json!({ "id": resource.id }))
}

fn handle_healthz() -> Result<Response<ResponseBody>, Error> {
    let response = Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(r#"{"status":"ok"}"#)))?;

    Ok(response)
}

fn handle_metrics() -> Result<Response<ResponseBody>, Error> {
    let (content_type, metrics) = METRICS_PROVIDER.gather()?;
    let response = Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, content_type)
        .body(Full::new(Bytes::from(metrics)))?;

    Ok(response)
}

fn success_response<T: Serialize>(data: &T) -> Result<Response<ResponseBody>, Error> {
    let body = serde_json::to_vec(&Envelope { ok: true, data })?;
    let response = Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body)))?;

    Ok(response)
}

pub fn error_to_response(error: &Error, request_id: Option<&String>) -> Response<ResponseBody> {
    let body = error.as_json(request_id).to_string();

    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = error.status_code();
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}
