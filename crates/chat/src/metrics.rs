use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicI64, AtomicU64, Ordering},
        Arc, Mutex, OnceLock,
    },
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EndpointMetricKey {
    endpoint: String,
    method: String,
}

pub struct ChatMetrics {
    request_duration_count: Mutex<HashMap<EndpointMetricKey, u64>>,
    request_duration_sum_ms: Mutex<HashMap<EndpointMetricKey, u64>>,
    request_errors_total: Mutex<HashMap<EndpointMetricKey, u64>>,
    request_rate_total: Mutex<HashMap<EndpointMetricKey, u64>>,
    ws_duration_count: Mutex<HashMap<String, u64>>,
    ws_duration_sum_ms: Mutex<HashMap<String, u64>>,
    ws_errors_total: Mutex<HashMap<String, u64>>,
    ws_rate_total: Mutex<HashMap<String, u64>>,
    connected_clients: AtomicI64,
    active_rooms: AtomicI64,
    broadcast_fanout_total: AtomicU64,
    messages_persisted_total: AtomicU64,
    heartbeat_evictions_total: AtomicU64,
}

static GLOBAL_METRICS: OnceLock<Arc<ChatMetrics>> = OnceLock::new();

impl Default for ChatMetrics {
    fn default() -> Self {
        Self {
            request_duration_count: Mutex::new(HashMap::new()),
            request_duration_sum_ms: Mutex::new(HashMap::new()),
            request_errors_total: Mutex::new(HashMap::new()),
            request_rate_total: Mutex::new(HashMap::new()),
            ws_duration_count: Mutex::new(HashMap::new()),
            ws_duration_sum_ms: Mutex::new(HashMap::new()),
            ws_errors_total: Mutex::new(HashMap::new()),
            ws_rate_total: Mutex::new(HashMap::new()),
            connected_clients: AtomicI64::new(0),
            active_rooms: AtomicI64::new(0),
            broadcast_fanout_total: AtomicU64::new(0),
            messages_persisted_total: AtomicU64::new(0),
            heartbeat_evictions_total: AtomicU64::new(0),
        }
    }
}

pub fn set_global_metrics(metrics: Arc<ChatMetrics>) {
    let _ = GLOBAL_METRICS.set(metrics);
}

fn global_metrics() -> Option<&'static Arc<ChatMetrics>> {
    GLOBAL_METRICS.get()
}

pub fn record_http_request(method: &str, path: &str, status_code: u16, latency_ms: u64) {
    if let Some(metrics) = global_metrics() {
        metrics.record_http_request(method, path, status_code, latency_ms);
    }
}

pub fn render_global_prometheus() -> String {
    global_metrics().map(|metrics| metrics.render_prometheus()).unwrap_or_default()
}

pub fn record_ws_request(frame: &str, is_error: bool, latency_ms: u64) {
    if let Some(metrics) = global_metrics() {
        metrics.record_ws_request(frame, is_error, latency_ms);
    }
}

pub fn set_connected_clients(count: i64) {
    if let Some(metrics) = global_metrics() {
        metrics.set_connected_clients(count);
    }
}

pub fn set_active_rooms(count: i64) {
    if let Some(metrics) = global_metrics() {
        metrics.set_active_rooms(count);
    }
}

pub fn add_broadcast_fanout(delivered: u64) {
    if let Some(metrics) = global_metrics() {
        metrics.add_broadcast_fanout(delivered);
    }
}

pub fn increment_messages_persisted() {
    if let Some(metrics) = global_metrics() {
        metrics.increment_messages_persisted();
    }
}

pub fn increment_heartbeat_evictions(count: u64) {
    if let Some(metrics) = global_metrics() {
        metrics.increment_heartbeat_evictions(count);
    }
}

impl ChatMetrics {
    pub fn record_http_request(&self, method: &str, path: &str, status_code: u16, latency_ms: u64) {
        let key = EndpointMetricKey {
            endpoint: normalize_endpoint(path),
            method: method.to_ascii_uppercase(),
        };

        increment_counter(&self.request_rate_total, &key, 1);
        increment_counter(&self.request_duration_sum_ms, &key, latency_ms);
        increment_counter(&self.request_duration_count, &key, 1);
        if status_code >= 400 {
            increment_counter(&self.request_errors_total, &key, 1);
        }
    }

    pub fn record_ws_request(&self, frame: &str, is_error: bool, latency_ms: u64) {
        let label = normalize_frame_label(frame);
        increment_label_counter(&self.ws_rate_total, &label, 1);
        increment_label_counter(&self.ws_duration_sum_ms, &label, latency_ms);
        increment_label_counter(&self.ws_duration_count, &label, 1);
        if is_error {
            increment_label_counter(&self.ws_errors_total, &label, 1);
        }
    }

    pub fn set_connected_clients(&self, count: i64) {
        self.connected_clients.store(count.max(0), Ordering::SeqCst);
    }

    pub fn set_active_rooms(&self, count: i64) {
        self.active_rooms.store(count.max(0), Ordering::SeqCst);
    }

    pub fn add_broadcast_fanout(&self, delivered: u64) {
        self.broadcast_fanout_total.fetch_add(delivered, Ordering::SeqCst);
    }

    pub fn increment_messages_persisted(&self) {
        self.messages_persisted_total.fetch_add(1, Ordering::SeqCst);
    }

    pub fn increment_heartbeat_evictions(&self, count: u64) {
        self.heartbeat_evictions_total.fetch_add(count, Ordering::SeqCst);
    }

    pub fn render_prometheus(&self) -> String {
        let mut output = String::new();

        output.push_str("# HELP chat_request_rate_total Total HTTP requests by endpoint.\n");
        output.push_str("# TYPE chat_request_rate_total counter\n");
        append_counter_lines(&mut output, "chat_request_rate_total", &self.request_rate_total);

        output
            .push_str("# HELP chat_request_errors_total Total HTTP error responses by endpoint.\n");
        output.push_str("# TYPE chat_request_errors_total counter\n");
        append_counter_lines(&mut output, "chat_request_errors_total", &self.request_errors_total);

        output.push_str("# HELP chat_request_duration_ms_sum Sum of HTTP request latency in milliseconds by endpoint.\n");
        output.push_str("# TYPE chat_request_duration_ms_sum counter\n");
        append_counter_lines(
            &mut output,
            "chat_request_duration_ms_sum",
            &self.request_duration_sum_ms,
        );

        output.push_str("# HELP chat_request_duration_ms_count Count of HTTP request latency samples by endpoint.\n");
        output.push_str("# TYPE chat_request_duration_ms_count counter\n");
        append_counter_lines(
            &mut output,
            "chat_request_duration_ms_count",
            &self.request_duration_count,
        );

        output.push_str("# HELP chat_ws_rate_total Total websocket frames by frame type.\n");
        output.push_str("# TYPE chat_ws_rate_total counter\n");
        append_label_counter_lines(&mut output, "chat_ws_rate_total", &self.ws_rate_total);

        output.push_str("# HELP chat_ws_errors_total Total websocket frame errors by frame type.\n");
        output.push_str("# TYPE chat_ws_errors_total counter\n");
        append_label_counter_lines(&mut output, "chat_ws_errors_total", &self.ws_errors_total);

        output.push_str("# HELP chat_ws_duration_ms_sum Sum of websocket frame latency in milliseconds by frame type.\n");
        output.push_str("# TYPE chat_ws_duration_ms_sum counter\n");
        append_label_counter_lines(
            &mut output,
            "chat_ws_duration_ms_sum",
            &self.ws_duration_sum_ms,
        );

        output.push_str(
            "# HELP chat_ws_duration_ms_count Count of websocket latency samples by frame type.\n",
        );
        output.push_str("# TYPE chat_ws_duration_ms_count counter\n");
        append_label_counter_lines(
            &mut output,
            "chat_ws_duration_ms_count",
            &self.ws_duration_count,
        );

        output.push_str("# HELP chat_connected_clients Currently connected websocket clients.\n");
        output.push_str("# TYPE chat_connected_clients gauge\n");
        output.push_str(&format!(
            "chat_connected_clients {}\n",
            self.connected_clients.load(Ordering::SeqCst)
        ));

        output.push_str("# HELP chat_active_rooms Rooms with at least one member.\n");
        output.push_str("# TYPE chat_active_rooms gauge\n");
        output
            .push_str(&format!("chat_active_rooms {}\n", self.active_rooms.load(Ordering::SeqCst)));

        output.push_str(
            "# HELP chat_broadcast_fanout_total Total frames delivered by the room broadcaster.\n",
        );
        output.push_str("# TYPE chat_broadcast_fanout_total counter\n");
        output.push_str(&format!(
            "chat_broadcast_fanout_total {}\n",
            self.broadcast_fanout_total.load(Ordering::SeqCst)
        ));

        output.push_str("# HELP chat_messages_persisted_total Total chat messages persisted.\n");
        output.push_str("# TYPE chat_messages_persisted_total counter\n");
        output.push_str(&format!(
            "chat_messages_persisted_total {}\n",
            self.messages_persisted_total.load(Ordering::SeqCst)
        ));

        output.push_str(
            "# HELP chat_heartbeat_evictions_total Connections evicted for missing heartbeats.\n",
        );
        output.push_str("# TYPE chat_heartbeat_evictions_total counter\n");
        output.push_str(&format!(
            "chat_heartbeat_evictions_total {}\n",
            self.heartbeat_evictions_total.load(Ordering::SeqCst)
        ));

        output
    }
}

fn normalize_endpoint(path: &str) -> String {
    if path.is_empty() {
        return "/".to_string();
    }

    let mut normalized_segments = Vec::new();
    for segment in path.split('/').filter(|segment| !segment.is_empty()) {
        if uuid::Uuid::parse_str(segment).is_ok() {
            normalized_segments.push("{uuid}".to_string());
            continue;
        }

        if segment.chars().all(|character| character.is_ascii_digit()) {
            normalized_segments.push("{number}".to_string());
            continue;
        }

        normalized_segments.push(segment.to_string());
    }

    if normalized_segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", normalized_segments.join("/"))
    }
}

fn normalize_frame_label(frame: &str) -> String {
    let normalized = frame.trim().to_ascii_lowercase();
    if normalized.is_empty() {
        "unknown".to_string()
    } else {
        normalized
    }
}

fn increment_counter(
    map: &Mutex<HashMap<EndpointMetricKey, u64>>,
    key: &EndpointMetricKey,
    delta: u64,
) {
    let mut guard = map.lock().expect("metrics map lock poisoned");
    let value = guard.entry(key.clone()).or_insert(0);
    *value = value.saturating_add(delta);
}

fn increment_label_counter(map: &Mutex<HashMap<String, u64>>, label: &str, delta: u64) {
    let mut guard = map.lock().expect("metrics map lock poisoned");
    let value = guard.entry(label.to_string()).or_insert(0);
    *value = value.saturating_add(delta);
}

fn append_counter_lines(
    output: &mut String,
    metric_name: &str,
    map: &Mutex<HashMap<EndpointMetricKey, u64>>,
) {
    let guard = map.lock().expect("metrics map lock poisoned");
    let mut entries: Vec<_> = guard.iter().collect();
    entries.sort_by(|(left_key, _), (right_key, _)| {
        left_key
            .method
            .cmp(&right_key.method)
            .then_with(|| left_key.endpoint.cmp(&right_key.endpoint))
    });

    for (key, value) in entries {
        output.push_str(&format!(
            "{metric_name}{{method=\"{}\",endpoint=\"{}\"}} {value}\n",
            escape_label_value(&key.method),
            escape_label_value(&key.endpoint),
        ));
    }
}

fn append_label_counter_lines(
    output: &mut String,
    metric_name: &str,
    map: &Mutex<HashMap<String, u64>>,
) {
    let guard = map.lock().expect("metrics map lock poisoned");
    if guard.is_empty() {
        return;
    }

    let mut entries: Vec<_> = guard.iter().collect();
    entries.sort_by(|(left, _), (right, _)| left.cmp(right));

    for (label, value) in entries {
        output.push_str(&format!(
            "{metric_name}{{frame=\"{}\"}} {value}\n",
            escape_label_value(label),
        ));
    }
}

fn escape_label_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\n', "\\n").replace('"', "\\\"")
}
