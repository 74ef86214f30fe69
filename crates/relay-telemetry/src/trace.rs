use relay_core::TraceId;
use serde_json::json;

/// Build a Grafana explore link that opens `trace_id` in the Jaeger trace view.
pub fn trace_url(grafana_base: &str, trace_id: &TraceId) -> String {
    let panes = json!({
        "traceView": {
            "datasource": "1",
            "queries": [{
                "refId": "A",
                "datasource": {"type": "jaeger", "uid": "1"},
                "query": trace_id.as_str(),
            }],
            "range": {"from": "now-7d", "to": "now"},
        }
    });
    format!(
        "{}/explore?schemaVersion=1&orgId=1&panes={}",
        grafana_base.trim_end_matches('/'),
        urlencoding::encode(&panes.to_string())
    )
}

/// Turns trace ids into user-facing links. Without a configured base the bare
/// id is returned so messages still carry a reference.
#[derive(Clone, Debug, Default)]
pub struct TraceLinker {
    grafana_base: Option<String>,
}

impl TraceLinker {
    pub fn new(grafana_base: Option<String>) -> Self {
        Self {
            grafana_base: grafana_base.filter(|b| !b.is_empty()),
        }
    }

    pub fn link(&self, trace_id: &TraceId) -> String {
        match &self.grafana_base {
            Some(base) => trace_url(base, trace_id),
            None => trace_id.to_string(),
        }
    }

    /// Markdown link suitable for appending to a reply.
    pub fn markdown(&self, trace_id: &TraceId) -> String {
        format!("[Jaeger Trace]({})", self.link(trace_id))
    }
}
