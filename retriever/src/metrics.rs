use prometheus::{Encoder, Histogram, HistogramOpts, IntCounterVec, Opts, Registry, TextEncoder};

/// Query counters and latency, registered on a registry owned by the server.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    queries_total: IntCounterVec,
    query_duration: Histogram,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let queries_total = IntCounterVec::new(
            Opts::new("retriever_queries_total", "Query tool calls by outcome"),
            &["outcome"],
        )?;
        let query_duration = Histogram::with_opts(
            HistogramOpts::new(
                "retriever_query_duration_seconds",
                "End-to-end query latency, embedding plus search",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
        )?;

        registry.register(Box::new(queries_total.clone()))?;
        registry.register(Box::new(query_duration.clone()))?;

        Ok(Self {
            registry,
            queries_total,
            query_duration,
        })
    }

    /// `outcome` is "ok" or an error kind.
    pub fn observe(&self, outcome: &str, seconds: f64) {
        self.queries_total.with_label_values(&[outcome]).inc();
        self.query_duration.observe(seconds);
    }

    pub fn render(&self) -> prometheus::Result<(Vec<u8>, String)> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = vec![];
        encoder.encode(&metric_families, &mut buffer)?;
        Ok((buffer, encoder.format_type().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_observed_outcomes() {
        let metrics = Metrics::new().unwrap();
        metrics.observe("ok", 0.2);
        metrics.observe("collection_not_found", 0.01);

        let (body, content_type) = metrics.render().unwrap();
        let text = String::from_utf8(body).unwrap();
        assert!(content_type.starts_with("text/plain"));
        assert!(text.contains(r#"retriever_queries_total{outcome="ok"} 1"#));
        assert!(text.contains(r#"retriever_queries_total{outcome="collection_not_found"} 1"#));
        assert!(text.contains("retriever_query_duration_seconds_count 2"));
    }
}
