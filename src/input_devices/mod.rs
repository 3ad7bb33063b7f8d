use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::event_model::raw::RawInput;
use crate::event_model::{Rect, SurfaceId};
use crate::screen_overlay::surface_info::FocusableInfo;

/// 鼠标捕获: 坐标映射, 边界夹取, 移动合并, 拖拽识别
pub mod mouse;

/// 键盘捕获: 修饰键状态, 自动重复, 快捷键
pub mod keyboard;

/// 触摸捕获: 多点手势状态机
pub mod touch;

/// 快捷键表, 键盘捕获和焦点仲裁共用
pub mod shortcut;

/// 内存中的输入表面, 用于测试和脚本回放
pub mod virtual_surface;

pub use keyboard::{KeyboardCaptureHandler, KeyboardConfig};
pub use mouse::{MouseCaptureHandler, MouseConfig};
pub use touch::{TouchCaptureHandler, TouchConfig};
pub use virtual_surface::VirtualSurface;

pub type ListenerId = u64;

/// 原始通知回调, 由 `RawInputSource` 在分发时同步调用
pub type RawListener = Arc<dyn Fn(&RawInput) + Send + Sync>;

/// 能产生原始指针/键盘/触摸通知的表面
///
/// 捕获处理器通过 `attach` 注册监听, `detach` 注销; 表面本身的生命周期由外部管理
pub trait RawInputSource: Send + Sync {
    fn surface_id(&self) -> SurfaceId;

    /// 视口坐标下的外接矩形
    fn bounding_rect(&self) -> Rect;

    fn attach(&self, listener: RawListener) -> ListenerId;

    /// 返回监听是否真的存在过
    fn detach(&self, listener: ListenerId) -> bool;

    /// 表面内可以用 Tab 切换焦点的元素
    fn focusable_elements(&self) -> Vec<FocusableInfo> {
        Vec::new()
    }

    fn set_focused(&self, _focused: bool) {}

    fn is_focused(&self) -> bool {
        false
    }
}

/// 一次 attach 的登记, 处理器独占它
pub(crate) struct Attachment {
    pub source: Arc<dyn RawInputSource>,
    pub listener: ListenerId,
}

impl Attachment {
    pub fn new(source: Arc<dyn RawInputSource>, listener: RawListener) -> Self {
        let id = source.attach(listener);
        Self {
            source,
            listener: id,
        }
    }

    pub fn release(self) {
        self.source.detach(self.listener);
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
