//! S3 API metrics for Prometheus
//!
//! Tracks request counts, latencies, byte volumes, per-tenant storage
//! gauges, replication backlog, and health-probe latencies.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// S3 operation types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum S3Operation {
    ListBuckets,
    CreateBucket,
    DeleteBucket,
    HeadBucket,
    ListObjects,
    ListObjectVersions,
    GetObject,
    PutObject,
    DeleteObject,
    HeadObject,
    CopyObject,
    InitiateMultipartUpload,
    UploadPart,
    CompleteMultipartUpload,
    AbortMultipartUpload,
    ListParts,
    DeleteObjects,
    BucketConfig,
    Presigned,
    Forwarded,
    Console,
}

impl S3Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            S3Operation::ListBuckets => "ListBuckets",
            S3Operation::CreateBucket => "CreateBucket",
            S3Operation::DeleteBucket => "DeleteBucket",
            S3Operation::HeadBucket => "HeadBucket",
            S3Operation::ListObjects => "ListObjects",
            S3Operation::ListObjectVersions => "ListObjectVersions",
            S3Operation::GetObject => "GetObject",
            S3Operation::PutObject => "PutObject",
            S3Operation::DeleteObject => "DeleteObject",
            S3Operation::HeadObject => "HeadObject",
            S3Operation::CopyObject => "CopyObject",
            S3Operation::InitiateMultipartUpload => "InitiateMultipartUpload",
            S3Operation::UploadPart => "UploadPart",
            S3Operation::CompleteMultipartUpload => "CompleteMultipartUpload",
            S3Operation::AbortMultipartUpload => "AbortMultipartUpload",
            S3Operation::ListParts => "ListParts",
            S3Operation::DeleteObjects => "DeleteObjects",
            S3Operation::BucketConfig => "BucketConfig",
            S3Operation::Presigned => "Presigned",
            S3Operation::Forwarded => "Forwarded",
            S3Operation::Console => "Console",
        }
    }
}

/// Per-operation metrics
#[derive(Debug, Default)]
struct OperationMetrics {
    requests_total: AtomicU64,
    requests_success: AtomicU64,
    requests_client_error: AtomicU64,
    requests_server_error: AtomicU64,
    request_bytes_total: AtomicU64,
    response_bytes_total: AtomicU64,
    latency_sum_us: AtomicU64,
    /// Latency histogram buckets (cumulative counts)
    /// Buckets: 1ms, 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 5s, 10s
    latency_buckets: [AtomicU64; 11],
}

const LATENCY_BUCKET_BOUNDARIES_MS: [u64; 11] =
    [1, 5, 10, 25, 50, 100, 250, 500, 1000, 5000, 10000];

impl OperationMetrics {
    fn record(&self, status_code: u16, request_bytes: u64, response_bytes: u64, latency_us: u64) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);

        if (200..300).contains(&status_code) {
            self.requests_success.fetch_add(1, Ordering::Relaxed);
        } else if (400..500).contains(&status_code) {
            self.requests_client_error.fetch_add(1, Ordering::Relaxed);
        } else if status_code >= 500 {
            self.requests_server_error.fetch_add(1, Ordering::Relaxed);
        }

        self.request_bytes_total
            .fetch_add(request_bytes, Ordering::Relaxed);
        self.response_bytes_total
            .fetch_add(response_bytes, Ordering::Relaxed);
        self.latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);

        let latency_ms = latency_us / 1000;
        for (i, &boundary) in LATENCY_BUCKET_BOUNDARIES_MS.iter().enumerate() {
            if latency_ms <= boundary {
                self.latency_buckets[i].fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// S3 metrics collector
#[derive(Debug)]
pub struct S3Metrics {
    operations: RwLock<HashMap<S3Operation, OperationMetrics>>,
    active_connections: AtomicU64,
    total_connections: AtomicU64,
    /// tenant name -> storage bytes
    tenant_storage: RwLock<HashMap<String, u64>>,
    replication_backlog: AtomicU64,
    events_dropped: AtomicU64,
    /// node name -> last probe latency in microseconds
    health_probe_us: RwLock<HashMap<String, u64>>,
    start_time: Instant,
}

impl S3Metrics {
    pub fn new() -> Self {
        Self {
            operations: RwLock::new(HashMap::new()),
            active_connections: AtomicU64::new(0),
            total_connections: AtomicU64::new(0),
            tenant_storage: RwLock::new(HashMap::new()),
            replication_backlog: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            health_probe_us: RwLock::new(HashMap::new()),
            start_time: Instant::now(),
        }
    }

    /// Record an S3 operation
    pub fn record_operation(
        &self,
        op: S3Operation,
        status_code: u16,
        request_bytes: u64,
        response_bytes: u64,
        latency_us: u64,
    ) {
        let mut ops = self.operations.write();
        let metrics = ops.entry(op).or_default();
        metrics.record(status_code, request_bytes, response_bytes, latency_us);
    }

    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn set_tenant_storage(&self, tenant: &str, bytes: u64) {
        self.tenant_storage.write().insert(tenant.to_string(), bytes);
    }

    pub fn set_replication_backlog(&self, depth: u64) {
        self.replication_backlog.store(depth, Ordering::Relaxed);
    }

    pub fn set_events_dropped(&self, count: u64) {
        self.events_dropped.store(count, Ordering::Relaxed);
    }

    pub fn record_health_probe(&self, node: &str, latency_us: u64) {
        self.health_probe_us
            .write()
            .insert(node.to_string(), latency_us);
    }

    /// Export metrics in Prometheus text exposition format
    pub fn export_prometheus(&self) -> String {
        let mut output = String::with_capacity(8 * 1024);

        let uptime_secs = self.start_time.elapsed().as_secs();
        writeln!(output, "# HELP maxiofs_uptime_seconds Server uptime in seconds").unwrap();
        writeln!(output, "# TYPE maxiofs_uptime_seconds counter").unwrap();
        writeln!(output, "maxiofs_uptime_seconds {uptime_secs}").unwrap();

        writeln!(output, "# HELP maxiofs_active_connections Current active connections").unwrap();
        writeln!(output, "# TYPE maxiofs_active_connections gauge").unwrap();
        writeln!(
            output,
            "maxiofs_active_connections {}",
            self.active_connections.load(Ordering::Relaxed)
        )
        .unwrap();

        writeln!(output, "# HELP maxiofs_connections_total Total connections since start").unwrap();
        writeln!(output, "# TYPE maxiofs_connections_total counter").unwrap();
        writeln!(
            output,
            "maxiofs_connections_total {}",
            self.total_connections.load(Ordering::Relaxed)
        )
        .unwrap();

        let tenants = self.tenant_storage.read();
        if !tenants.is_empty() {
            writeln!(output, "# HELP maxiofs_tenant_storage_bytes Storage used per tenant").unwrap();
            writeln!(output, "# TYPE maxiofs_tenant_storage_bytes gauge").unwrap();
            for (tenant, bytes) in tenants.iter() {
                writeln!(
                    output,
                    "maxiofs_tenant_storage_bytes{{tenant=\"{tenant}\"}} {bytes}"
                )
                .unwrap();
            }
        }

        writeln!(output, "# HELP maxiofs_replication_backlog Queued replication tasks").unwrap();
        writeln!(output, "# TYPE maxiofs_replication_backlog gauge").unwrap();
        writeln!(
            output,
            "maxiofs_replication_backlog {}",
            self.replication_backlog.load(Ordering::Relaxed)
        )
        .unwrap();

        writeln!(output, "# HELP maxiofs_events_dropped_total Webhook events dropped after retries").unwrap();
        writeln!(output, "# TYPE maxiofs_events_dropped_total counter").unwrap();
        writeln!(
            output,
            "maxiofs_events_dropped_total {}",
            self.events_dropped.load(Ordering::Relaxed)
        )
        .unwrap();

        let probes = self.health_probe_us.read();
        if !probes.is_empty() {
            writeln!(output, "# HELP maxiofs_health_probe_seconds Last health probe latency per node").unwrap();
            writeln!(output, "# TYPE maxiofs_health_probe_seconds gauge").unwrap();
            for (node, us) in probes.iter() {
                writeln!(
                    output,
                    "maxiofs_health_probe_seconds{{node=\"{node}\"}} {}",
                    *us as f64 / 1_000_000.0
                )
                .unwrap();
            }
        }

        let ops = self.operations.read();

        writeln!(output, "# HELP maxiofs_s3_requests_total Total S3 requests by operation and status").unwrap();
        writeln!(output, "# TYPE maxiofs_s3_requests_total counter").unwrap();
        for (op, metrics) in ops.iter() {
            let success = metrics.requests_success.load(Ordering::Relaxed);
            let client_err = metrics.requests_client_error.load(Ordering::Relaxed);
            let server_err = metrics.requests_server_error.load(Ordering::Relaxed);
            writeln!(output, "maxiofs_s3_requests_total{{operation=\"{}\",status=\"success\"}} {success}", op.as_str()).unwrap();
            writeln!(output, "maxiofs_s3_requests_total{{operation=\"{}\",status=\"client_error\"}} {client_err}", op.as_str()).unwrap();
            writeln!(output, "maxiofs_s3_requests_total{{operation=\"{}\",status=\"server_error\"}} {server_err}", op.as_str()).unwrap();
        }

        writeln!(output, "# HELP maxiofs_s3_request_bytes_total Total request body bytes").unwrap();
        writeln!(output, "# TYPE maxiofs_s3_request_bytes_total counter").unwrap();
        for (op, metrics) in ops.iter() {
            writeln!(
                output,
                "maxiofs_s3_request_bytes_total{{operation=\"{}\"}} {}",
                op.as_str(),
                metrics.request_bytes_total.load(Ordering::Relaxed)
            )
            .unwrap();
        }

        writeln!(output, "# HELP maxiofs_s3_response_bytes_total Total response body bytes").unwrap();
        writeln!(output, "# TYPE maxiofs_s3_response_bytes_total counter").unwrap();
        for (op, metrics) in ops.iter() {
            writeln!(
                output,
                "maxiofs_s3_response_bytes_total{{operation=\"{}\"}} {}",
                op.as_str(),
                metrics.response_bytes_total.load(Ordering::Relaxed)
            )
            .unwrap();
        }

        writeln!(output, "# HELP maxiofs_s3_request_duration_seconds S3 request duration histogram").unwrap();
        writeln!(output, "# TYPE maxiofs_s3_request_duration_seconds histogram").unwrap();
        for (op, metrics) in ops.iter() {
            let op_name = op.as_str();
            let total = metrics.requests_total.load(Ordering::Relaxed);
            let sum_us = metrics.latency_sum_us.load(Ordering::Relaxed);

            for (i, &boundary_ms) in LATENCY_BUCKET_BOUNDARIES_MS.iter().enumerate() {
                let count = metrics.latency_buckets[i].load(Ordering::Relaxed);
                writeln!(
                    output,
                    "maxiofs_s3_request_duration_seconds_bucket{{operation=\"{op_name}\",le=\"{}\"}} {count}",
                    boundary_ms as f64 / 1000.0
                )
                .unwrap();
            }
            writeln!(output, "maxiofs_s3_request_duration_seconds_bucket{{operation=\"{op_name}\",le=\"+Inf\"}} {total}").unwrap();
            writeln!(
                output,
                "maxiofs_s3_request_duration_seconds_sum{{operation=\"{op_name}\"}} {}",
                sum_us as f64 / 1_000_000.0
            )
            .unwrap();
            writeln!(output, "maxiofs_s3_request_duration_seconds_count{{operation=\"{op_name}\"}} {total}").unwrap();
        }

        output
    }
}

impl Default for S3Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Global S3 metrics instance
static S3_METRICS: std::sync::OnceLock<S3Metrics> = std::sync::OnceLock::new();

/// Get the global S3 metrics instance
pub fn s3_metrics() -> &'static S3Metrics {
    S3_METRICS.get_or_init(S3Metrics::new)
}

/// RAII-style timer for one operation
pub struct OperationTimer {
    op: S3Operation,
    start: Instant,
    request_bytes: u64,
}

impl OperationTimer {
    pub fn new(op: S3Operation) -> Self {
        Self {
            op,
            start: Instant::now(),
            request_bytes: 0,
        }
    }

    pub fn with_request_bytes(mut self, bytes: u64) -> Self {
        self.request_bytes = bytes;
        self
    }

    /// Complete the operation with a response
    pub fn complete(self, status_code: u16, response_bytes: u64) {
        let latency_us = self.start.elapsed().as_micros() as u64;
        s3_metrics().record_operation(
            self.op,
            status_code,
            self.request_bytes,
            response_bytes,
            latency_us,
        );
    }

    /// Complete with just a status code
    pub fn complete_simple(self, status_code: u16) {
        self.complete(status_code, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_operation() {
        let metrics = S3Metrics::new();
        metrics.record_operation(S3Operation::GetObject, 200, 0, 1024, 5000);
        metrics.record_operation(S3Operation::GetObject, 404, 0, 0, 1000);
        metrics.record_operation(S3Operation::PutObject, 200, 2048, 0, 10000);

        let output = metrics.export_prometheus();
        assert!(output.contains("maxiofs_s3_requests_total"));
        assert!(output.contains("GetObject"));
        assert!(output.contains("PutObject"));
    }

    #[test]
    fn test_latency_histogram_buckets() {
        let metrics = S3Metrics::new();
        metrics.record_operation(S3Operation::GetObject, 200, 0, 100, 500); // 0.5ms
        metrics.record_operation(S3Operation::GetObject, 200, 0, 100, 50_000); // 50ms

        let output = metrics.export_prometheus();
        assert!(output.contains("le=\"0.001\""));
        assert!(output.contains("le=\"0.05\""));
        assert!(output.contains("le=\"+Inf\""));
    }

    #[test]
    fn test_tenant_and_worker_gauges() {
        let metrics = S3Metrics::new();
        metrics.set_tenant_storage("acme", 12345);
        metrics.set_replication_backlog(7);
        metrics.record_health_probe("node-b", 2500);

        let output = metrics.export_prometheus();
        assert!(output.contains("maxiofs_tenant_storage_bytes{tenant=\"acme\"} 12345"));
        assert!(output.contains("maxiofs_replication_backlog 7"));
        assert!(output.contains("maxiofs_health_probe_seconds{node=\"node-b\"}"));
    }
}
