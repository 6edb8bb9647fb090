//! Maps the §6 REST verbs onto the §4.x pipeline contracts. Schema
//! validation, scope/authz checks, and OAuth token acquisition are
//! explicitly not performed here; the `AuthContext` attached to every
//! call is a stand-in for whatever an upstream gateway would have
//! already validated.

use std::convert::Infallible;
use std::sync::Arc;

use hyper::body::to_bytes;
use hyper::{Body, Method, Request, Response, StatusCode};
use reducer_core::options::AuthContext;
use reducer_core::Pipeline;
use reducer_errors::ReduceError;
use reducer_types::{k, t};
use serde_json::Value;

pub async fn route(pipeline: Arc<Pipeline>, req: Request<Body>) -> Result<Response<Body>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(str::to_string);

    Ok(match dispatch(&pipeline, &method, &path, query.as_deref(), req).await {
        Ok(response) => response,
        Err(err) => error_response(&err),
    })
}

async fn dispatch(
    pipeline: &Arc<Pipeline>,
    method: &Method,
    path: &str,
    query: Option<&str>,
    req: Request<Body>,
) -> Result<Response<Body>, ReduceError> {
    let segments: Vec<&str> = path.trim_matches('/').split('/').filter(|s| !s.is_empty()).collect();

    match (method, segments.as_slice()) {
        (&Method::POST, ["input"]) => handle_post_input(pipeline, req).await,
        (&Method::GET, ["input", key, time]) => handle_get_input(pipeline, key, time).await,
        (&Method::GET, ["output", key, time]) => handle_get_output(pipeline, key, time).await,
        (&Method::GET, ["errors"]) => handle_get_errors(pipeline, query).await,
        (&Method::DELETE, ["errors", key, time]) => handle_delete_error(pipeline, key, time).await,
        _ => Ok(not_found()),
    }
}

async fn handle_post_input(pipeline: &Arc<Pipeline>, req: Request<Body>) -> Result<Response<Body>, ReduceError> {
    let bytes = to_bytes(req.into_body()).await.map_err(|e| ReduceError::Transport(e.to_string()))?;
    let payload: Value = serde_json::from_slice(&bytes).map_err(|e| ReduceError::Config(format!("invalid JSON body: {e}")))?;
    let payload = payload
        .as_object()
        .cloned()
        .ok_or_else(|| ReduceError::Config("request body must be a JSON object".to_string()))?;

    let idoc = pipeline.play(payload, AuthContext::default()).await?;
    let (key, time) = match (k(&idoc.id), t(&idoc.id)) {
        (Some(key), Some(time)) => (key.to_string(), time),
        _ => (String::new(), 0),
    };

    Response::builder()
        .status(StatusCode::CREATED)
        .header("Location", format!("/input/{key}/{time}"))
        .header("Content-Type", "application/json")
        .body(Body::from(serde_json::to_vec(&idoc).unwrap_or_default()))
        .map_err(|e| ReduceError::Config(e.to_string()))
}

async fn handle_get_input(pipeline: &Arc<Pipeline>, key: &str, time: &str) -> Result<Response<Body>, ReduceError> {
    let time = parse_time(time)?;
    let doc = pipeline.get_input(key, time).await?;
    json_response(StatusCode::OK, &doc)
}

async fn handle_get_output(pipeline: &Arc<Pipeline>, key: &str, time: &str) -> Result<Response<Body>, ReduceError> {
    let time = parse_time(time)?;
    let doc = pipeline.get_output(key, time).await?;
    json_response(StatusCode::OK, &doc)
}

async fn handle_get_errors(pipeline: &Arc<Pipeline>, query: Option<&str>) -> Result<Response<Body>, ReduceError> {
    let params: std::collections::HashMap<String, String> = query
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default();
    let tstart = params
        .get("tstart")
        .and_then(|v| v.parse::<i64>().ok())
        .ok_or_else(|| ReduceError::Config("missing tstart".to_string()))?;
    let tend = params
        .get("tend")
        .and_then(|v| v.parse::<i64>().ok())
        .ok_or_else(|| ReduceError::Config("missing tend".to_string()))?;
    let errors = pipeline.get_errors(tstart, tend).await?;
    json_response(StatusCode::OK, &errors)
}

async fn handle_delete_error(pipeline: &Arc<Pipeline>, key: &str, time: &str) -> Result<Response<Body>, ReduceError> {
    let time = parse_time(time)?;
    pipeline.delete_error(key, time).await?;
    Response::builder()
        .status(StatusCode::OK)
        .body(Body::empty())
        .map_err(|e| ReduceError::Config(e.to_string()))
}

fn parse_time(raw: &str) -> Result<i64, ReduceError> {
    raw.parse::<i64>().map_err(|_| ReduceError::Config(format!("invalid time path segment {raw}")))
}

fn json_response<T: serde::Serialize>(status: StatusCode, value: &T) -> Result<Response<Body>, ReduceError> {
    let body = serde_json::to_vec(value).map_err(|e| ReduceError::Config(e.to_string()))?;
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Body::from(body))
        .map_err(|e| ReduceError::Config(e.to_string()))
}

fn not_found() -> Response<Body> {
    Response::builder().status(StatusCode::NOT_FOUND).body(Body::empty()).unwrap()
}

fn error_response(err: &ReduceError) -> Response<Body> {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = serde_json::to_vec(&err.to_body()).unwrap_or_default();
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Body::from(body))
        .unwrap_or_else(|_| Response::builder().status(StatusCode::INTERNAL_SERVER_ERROR).body(Body::empty()).unwrap())
}
