//! Sink router (§4.G) and sink poster (§4.H).

use reducer_errors::{ReduceError, ReduceResult};
use reducer_types::{k, t};
use reqwest::header::AUTHORIZATION;
use serde_json::{json, Value};
use url::Url;

use crate::middleware::retry;
use crate::partition::bucket;
use reducer_types::OutputDoc;

/// Computes the sink URL for an output id given a base host and a
/// partition count, per §4.G.
///
/// Routing is a pure function of the output id's key (hashed into
/// `[0, apps)`) so the same id always lands on the same sink host — this
/// is what makes retries and replay safe to re-post against.
pub struct SinkRouter {
    apps: u32,
}

impl SinkRouter {
    pub fn new(apps: u32) -> Self {
        SinkRouter { apps }
    }

    pub fn route(&self, host: &str, output_id: &str) -> ReduceResult<String> {
        if self.apps <= 1 {
            return Ok(host.to_string());
        }
        let key = k(output_id).ok_or_else(|| ReduceError::Config(format!("malformed output id {output_id}")))?;
        let p = bucket(key, self.apps);

        let mut url = Url::parse(host).map_err(|e| ReduceError::Config(format!("invalid sink host {host}: {e}")))?;
        if let Some(port) = url.port() {
            url.set_port(Some(port + p as u16))
                .map_err(|_| ReduceError::Config(format!("cannot rewrite port on {host}")))?;
        } else {
            let host_str = url
                .host_str()
                .ok_or_else(|| ReduceError::Config(format!("sink host {host} has no hostname")))?
                .to_string();
            let mut labels = host_str.splitn(2, '.');
            let first = labels.next().unwrap_or_default();
            let rest = labels.next();
            let rewritten_first = format!("{first}-{p}");
            let new_host = match rest {
                Some(rest) => format!("{rewritten_first}.{rest}"),
                None => rewritten_first,
            };
            url.set_host(Some(&new_host))
                .map_err(|_| ReduceError::Config(format!("cannot rewrite hostname on {host}")))?;
        }
        Ok(url.to_string())
    }
}

/// Posts finalized output documents to the sink and classifies its
/// responses, per §4.H.
pub struct SinkPoster {
    client: reqwest::Client,
    router: SinkRouter,
    host: String,
    path: String,
    retries: u32,
    dedupe_enabled: bool,
}

impl SinkPoster {
    pub fn new(host: String, path: String, apps: u32, retries: u32, dedupe_enabled: bool) -> Self {
        SinkPoster {
            client: reqwest::Client::new(),
            router: SinkRouter::new(apps),
            host,
            path,
            retries,
            dedupe_enabled,
        }
    }

    /// Posts every non-error output in `outputs` in parallel (§4.H: "POSTs
    /// for one call's multiple outputs run in parallel"). Outputs already
    /// marked with a reducer `{error}` are skipped, matching §4.F step 5.
    pub async fn post_all(&self, outputs: &[OutputDoc], back_ref_field: &str, authorization: Option<&str>) -> ReduceResult<()> {
        let posts = outputs
            .iter()
            .filter(|o| !o.is_error())
            .map(|output| self.post_one(output, back_ref_field, authorization));
        let results = futures::future::join_all(posts).await;

        let mut reasons = Vec::new();
        for result in results {
            match result {
                Ok(()) => {}
                Err(ReduceError::Sink { reasons: rs }) => reasons.extend(rs),
                Err(other) => reasons.push(json!({ "error": other.to_string() })),
            }
        }
        if reasons.is_empty() {
            Ok(())
        } else {
            Err(ReduceError::Sink { reasons })
        }
    }

    async fn post_one(&self, output: &OutputDoc, back_ref_field: &str, authorization: Option<&str>) -> ReduceResult<()> {
        let target = self.router.route(&self.host, &output.id)?;
        let url = format!("{target}{}", self.path);
        let body = output.without_rev(back_ref_field);

        retry(self.retries, || async {
            let mut request = self.client.post(&url).json(&body);
            if let Some(auth) = authorization {
                request = request.header(AUTHORIZATION, auth);
            }
            let response = request.send().await?;
            self.classify(response).await
        })
        .await
    }

    /// Classifies a sink response per §4.H:
    /// - 201 → success.
    /// - 409 with `body.error == "slack"` → failure.
    /// - 409 without a duplicate filter configured → failure.
    /// - 409 otherwise → success (benign duplicate).
    /// - anything else → failure.
    async fn classify(&self, response: reqwest::Response) -> ReduceResult<()> {
        let status = response.status().as_u16();
        if status == 201 {
            return Ok(());
        }
        let body: Value = response.json().await.unwrap_or(Value::Null);
        if status == 409 {
            let is_slack = body.get("error").and_then(Value::as_str) == Some("slack");
            if is_slack || !self.dedupe_enabled {
                return Err(ReduceError::Sink { reasons: vec![body] });
            }
            return Ok(());
        }
        Err(ReduceError::Sink {
            reasons: vec![json!({ "status": status, "body": body })],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_is_unchanged_when_single_app() {
        let router = SinkRouter::new(1);
        let target = router.route("http://sink.example.com", "k/o1/t/0000000000000001").unwrap();
        assert_eq!(target, "http://sink.example.com");
    }

    #[test]
    fn route_rewrites_port_when_host_has_one() {
        let router = SinkRouter::new(4);
        let target = router
            .route("http://sink.example.com:9080", "k/o1/t/0000000000000001")
            .unwrap();
        assert!(target.starts_with("http://sink.example.com:908"));
    }

    #[test]
    fn route_rewrites_leftmost_label_without_explicit_port() {
        let router = SinkRouter::new(4);
        let target = router.route("http://sink.example.com", "k/o1/t/0000000000000001").unwrap();
        assert!(target.starts_with("http://sink-"));
        assert!(target.contains(".example.com"));
    }

    #[test]
    fn routing_is_deterministic_per_id() {
        let router = SinkRouter::new(4);
        let a = router.route("http://sink.example.com", "k/o1/t/0000000000000001").unwrap();
        let b = router.route("http://sink.example.com", "k/o1/t/0000000000000001").unwrap();
        assert_eq!(a, b);
    }
}
