use serde::Serialize;

/// 平均延迟的平滑系数
pub const LATENCY_SMOOTHING: f64 = 0.1;

/// 流水线计数器快照
///
/// `queue_size`, `is_processing`, `is_connected` 是取快照时的实时状态, 不参与 `reset`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InputMetrics {
    pub events_processed: u64,
    pub events_dropped: u64,
    /// 毫秒, 指数滑动平均, 从 0 开始
    pub average_latency: f64,
    pub max_latency: f64,
    pub validation_errors: u64,
    pub rate_limit_hits: u64,
    pub queue_size: usize,
    pub is_processing: bool,
    pub is_connected: bool,
}

impl InputMetrics {
    /// 一次成功投递的延迟 (毫秒)
    pub fn record_latency(&mut self, latency: f64) {
        self.average_latency = self.average_latency * (1.0 - LATENCY_SMOOTHING) + latency * LATENCY_SMOOTHING;
        self.max_latency = self.max_latency.max(latency);
        self.events_processed += 1;
    }

    pub fn reset(&mut self) {
        *self = Self {
            queue_size: self.queue_size,
            is_processing: self.is_processing,
            is_connected: self.is_connected,
            ..Self::default()
        };
    }
}
