use thiserror::Error;

use crate::event_model::EventKind;

/// 结构校验失败的原因
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("timestamp {0} is not a finite non-negative number")]
    Timestamp(f64),

    #[error("coordinates ({x}, {y}) are not finite")]
    Coordinates { x: f64, y: f64 },

    #[error("unknown mouse button {0}")]
    Button(i16),

    #[error("scroll event without finite deltas")]
    ScrollDelta,

    #[error("drag event without a drag start")]
    DragStart,

    #[error("keyboard event without key or key code")]
    KeyIdentity,

    #[error("touch point {id} has malformed coordinates")]
    TouchPoint { id: u32 },

    #[error("malformed gesture: {0}")]
    Gesture(&'static str),
}

/// 传输层发送失败
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport is not connected")]
    NotConnected,

    #[error("transport io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("remote rejected event: {0}")]
    Rejected(String),
}

/// 输入流水线的错误分类
///
/// 除了 `Destroyed` 之外都只会被计数, 不会让进程退出
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("rate limit exceeded for {kind}")]
    RateLimited { kind: EventKind },

    #[error("queue full, dropped {evicted} oldest event(s)")]
    QueueOverflow { evicted: usize },

    #[error("send failed: {0}")]
    TransportSend(#[from] TransportError),

    #[error("processing failed: {0}")]
    Processing(String),

    #[error("orchestrator has been destroyed")]
    Destroyed,
}

impl<T> From<std::sync::PoisonError<T>> for PipelineError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        PipelineError::Processing(err.to_string())
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
