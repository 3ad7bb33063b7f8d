/// 抽象输入事件 (鼠标, 键盘, 触摸, 焦点)
pub mod event;

/// 几何工具: 矩形, 点, 距离
pub mod geometry;

/// 原始输入通知, 由 `RawInputSource` 产生
pub mod raw;

/// 事件订阅通道
pub mod channel;

pub use event::*;
pub use geometry::{Point, Rect};
