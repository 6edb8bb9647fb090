//! Standalone binary wiring: load configuration, build a pipeline out of
//! the default callbacks in [`defaults`], and serve the REST surface.

mod defaults;
mod http;

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::service::{make_service_fn, service_fn};
use hyper::Server;
use tower::ServiceBuilder;
use tower::ServiceExt;
use tracing::info;

use reducer_core::clock::SystemClock;
use reducer_core::options::{ErrorOptions, InputOptions, OutputOptions, PipelineOptions, SinkOptions};
use reducer_core::sink::SinkPoster;
use reducer_core::store::InMemoryStore;
use reducer_core::Pipeline;
use reducer_types::config::Config;

const SINK_POST_PATH: &str = "/outputs";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;
    let pipeline = Arc::new(build_pipeline(&config));

    let addr: SocketAddr = std::env::var("LISTEN_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        .parse()?;

    let make_service = make_service_fn(move |_conn| {
        let pipeline = pipeline.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let svc = ServiceBuilder::new().concurrency_limit(64).service(tower::service_fn({
                    let pipeline = pipeline.clone();
                    move |req| {
                        let pipeline = pipeline.clone();
                        async move { http::route(pipeline, req).await }
                    }
                }));
                svc.oneshot(req)
            }))
        }
    });

    info!(%addr, "reducer-server listening");
    Server::bind(&addr).serve(make_service).await?;
    Ok(())
}

fn build_pipeline(config: &Config) -> Pipeline {
    let input_store = Arc::new(InMemoryStore::new());
    let output_store = config.output_db.as_ref().map(|_| Arc::new(InMemoryStore::new()) as Arc<dyn reducer_core::store::Store>);
    let error_store = config.error_db.as_ref().map(|_| Arc::new(InMemoryStore::new()) as Arc<dyn reducer_core::store::Store>);

    let sink_poster = if config.sink_host.is_empty() {
        None
    } else {
        Some(SinkPoster::new(
            config.sink_host.clone(),
            SINK_POST_PATH.to_string(),
            config.sink_apps,
            config.sink_retries,
            config.dedupe,
        ))
    };

    let options = PipelineOptions {
        input: InputOptions {
            type_name: "input".to_string(),
            dbname: Some("input".to_string()),
            key: Arc::new(defaults::FieldKey),
            groups: Arc::new(defaults::KeyIsGroup),
            time: Arc::new(defaults::FieldTime),
            dedupe: config.dedupe,
        },
        output: OutputOptions {
            dbname: config.output_db.clone(),
            keys: Arc::new(defaults::SameAsInputKey),
            times: Arc::new(defaults::SameAsInputTime),
        },
        sink: SinkOptions {
            host: config.sink_host.clone(),
            apps: config.sink_apps,
            posts: SINK_POST_PATH.to_string(),
            authentication: None,
        },
        error: ErrorOptions { dbname: config.error_db.clone() },
        reducer: Arc::new(defaults::PassthroughReducer),
    };

    Pipeline::new(
        options,
        input_store,
        output_store,
        error_store,
        sink_poster,
        config.page_size,
        Arc::new(SystemClock),
    )
}
