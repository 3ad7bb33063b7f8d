/// 输入事件的出口: 校验, 排队, 限速投递
pub mod orchestrator;

/// 丢最旧策略的有界队列
pub mod queue;

/// 流水线指标
pub mod metrics;

/// 远端会话的传输层抽象和实现
pub mod transport;

pub use metrics::InputMetrics;
pub use orchestrator::{InputOrchestrator, OrchestratorEvent};
pub use transport::{MemoryTransport, RemoteInputTransport, TcpTransport, TransportEvent};
