/// 焦点仲裁: 焦点会话, 边界检测, Tab 导航, 焦点快捷键
pub mod focus;

/// 事件校验与限流
pub mod validator;

pub use focus::{FocusArbiter, FocusConfig};
pub use validator::EventValidator;
