use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::event_model::{Rect, SurfaceId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IndicatorStyle {
    pub border_px: f64,
    pub color: String,
}

impl Default for IndicatorStyle {
    fn default() -> Self {
        Self {
            border_px: 2.0,
            color: "#3b82f6".to_owned(),
        }
    }
}

/// 要画出来的一帧焦点框
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorFrame {
    pub surface: SurfaceId,
    pub rect: Rect,
    pub style: IndicatorStyle,
}

/// 真正负责绘制的叠加层; `None` 表示移除焦点框
pub trait OverlayBackend: Send + Sync {
    fn present(&self, frame: Option<&IndicatorFrame>);
}

/// 只写日志的后端
#[derive(Debug, Default)]
pub struct TracingBackend;

impl OverlayBackend for TracingBackend {
    fn present(&self, frame: Option<&IndicatorFrame>) {
        match frame {
            Some(frame) => debug!(
                surface = %frame.surface,
                x = frame.rect.x,
                y = frame.rect.y,
                width = frame.rect.width,
                height = frame.rect.height,
                color = %frame.style.color,
                "focus indicator shown"
            ),
            None => debug!("focus indicator removed"),
        }
    }
}

/// 焦点框, 焦点会话期间由焦点仲裁独占
pub struct FocusIndicator {
    style: IndicatorStyle,
    frame: Option<IndicatorFrame>,
    backend: Arc<dyn OverlayBackend>,
}

impl std::fmt::Debug for FocusIndicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FocusIndicator")
            .field("style", &self.style)
            .field("frame", &self.frame)
            .finish()
    }
}

impl FocusIndicator {
    pub fn new(style: IndicatorStyle, backend: Arc<dyn OverlayBackend>) -> Self {
        Self {
            style,
            frame: None,
            backend,
        }
    }

    /// 框住 `rect` 外沿, 向外扩出边框宽度
    pub fn install(&mut self, surface: SurfaceId, rect: Rect) {
        let border = self.style.border_px;
        let frame = IndicatorFrame {
            surface,
            rect: Rect::new(
                rect.x - border,
                rect.y - border,
                rect.width + border * 2.0,
                rect.height + border * 2.0,
            ),
            style: self.style.clone(),
        };
        self.backend.present(Some(&frame));
        self.frame = Some(frame);
    }

    pub fn remove(&mut self) {
        if self.frame.take().is_some() {
            self.backend.present(None);
        }
    }

    pub fn set_style(&mut self, style: IndicatorStyle) {
        self.style = style;
        if let Some(frame) = self.frame.as_mut() {
            frame.style = self.style.clone();
            self.backend.present(Some(&*frame));
        }
    }

    pub fn is_visible(&self) -> bool {
        self.frame.is_some()
    }

    pub fn frame(&self) -> Option<&IndicatorFrame> {
        self.frame.as_ref()
    }
}
