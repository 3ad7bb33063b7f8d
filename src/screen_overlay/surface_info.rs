use serde::{Deserialize, Serialize};

use crate::event_model::Rect;

/// 表面内一个可聚焦元素的信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FocusableInfo {
    pub id: u32,
    pub rect: Rect,
    #[serde(default)]
    pub name: Option<String>,
    /// 元素本身是否可聚焦 (按钮, 输入框...)
    #[serde(default = "default_focusable")]
    pub focusable: bool,
}

fn default_focusable() -> bool {
    true
}

impl FocusableInfo {
    pub fn new(id: u32, rect: Rect) -> Self {
        Self {
            id,
            rect,
            name: None,
            focusable: true,
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_owned());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.focusable = false;
        self
    }
}
