use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::trace;

use super::{ListenerId, RawInputSource, RawListener, lock};
use crate::event_model::raw::{RawInput, RawKeyEvent, RawKeyKind};
use crate::event_model::{Modifiers, Rect, SurfaceId};
use crate::screen_overlay::surface_info::FocusableInfo;

static NEXT_SURFACE_ID: AtomicU64 = AtomicU64::new(1);

/// 纯内存的 `RawInputSource`
///
/// 没有真实窗口, 原始通知由调用者通过 [`VirtualSurface::emit`] 注入
pub struct VirtualSurface {
    id: SurfaceId,
    rect: Mutex<Rect>,
    listeners: Mutex<Vec<(ListenerId, RawListener)>>,
    next_listener: AtomicU64,
    focusables: Mutex<Vec<FocusableInfo>>,
    focused: AtomicBool,
    /// 事件冒泡的上级 (例如整个窗口)
    parent: Option<Arc<VirtualSurface>>,
}

impl std::fmt::Debug for VirtualSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualSurface")
            .field("id", &self.id)
            .field("rect", &*lock(&self.rect))
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl VirtualSurface {
    pub fn new(rect: Rect) -> Arc<Self> {
        Self::build(rect, None)
    }

    /// 子表面上的通知分发完后冒泡到 `parent`
    pub fn child_of(parent: &Arc<VirtualSurface>, rect: Rect) -> Arc<Self> {
        Self::build(rect, Some(Arc::clone(parent)))
    }

    fn build(rect: Rect, parent: Option<Arc<VirtualSurface>>) -> Arc<Self> {
        Arc::new(Self {
            id: SurfaceId(NEXT_SURFACE_ID.fetch_add(1, Ordering::Relaxed)),
            rect: Mutex::new(rect),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
            focusables: Mutex::new(Vec::new()),
            focused: AtomicBool::new(false),
            parent,
        })
    }

    pub fn set_rect(&self, rect: Rect) {
        *lock(&self.rect) = rect;
    }

    pub fn add_focusable(&self, info: FocusableInfo) {
        lock(&self.focusables).push(info);
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).len()
    }

    /// 同步分发给全部监听者; 分发期间不持有监听表的锁
    pub fn emit(&self, raw: RawInput) {
        let listeners: Vec<RawListener> = lock(&self.listeners)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        trace!(surface = %self.id, listeners = listeners.len(), ?raw, "emit raw input");
        for listener in listeners {
            listener(&raw);
        }
        if let Some(parent) = &self.parent {
            parent.emit(raw);
        }
    }

    /// 屏幕键盘上选中一个键: 和物理键一样产生 keydown + keyup
    pub fn press_virtual_key(&self, key_code: u32, key: &str, modifiers: Modifiers) {
        let down = RawKeyEvent::new(RawKeyKind::Down, key_code, key).with_modifiers(modifiers);
        let up = RawKeyEvent::new(RawKeyKind::Up, key_code, key).with_modifiers(modifiers);
        self.emit(RawInput::Key(down));
        self.emit(RawInput::Key(up));
    }
}

impl RawInputSource for VirtualSurface {
    fn surface_id(&self) -> SurfaceId {
        self.id
    }

    fn bounding_rect(&self) -> Rect {
        *lock(&self.rect)
    }

    fn attach(&self, listener: RawListener) -> ListenerId {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        lock(&self.listeners).push((id, listener));
        id
    }

    fn detach(&self, listener: ListenerId) -> bool {
        let mut listeners = lock(&self.listeners);
        let before = listeners.len();
        listeners.retain(|(id, _)| *id != listener);
        listeners.len() != before
    }

    fn focusable_elements(&self) -> Vec<FocusableInfo> {
        lock(&self.focusables).clone()
    }

    fn set_focused(&self, focused: bool) {
        self.focused.store(focused, Ordering::Release);
    }

    fn is_focused(&self) -> bool {
        self.focused.load(Ordering::Acquire)
    }
}
