use serde::{Deserialize, Serialize};

use crate::event_model::Modifiers;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShortcutAction {
    /// Tab 在边界内切换焦点, Shift 反向
    CycleFocus,
    Submit,
    Escape,
    Refresh,
    ToggleFullscreen,
    SendCtrlAltDel,
    ReleaseFocus,
    Custom(String),
}

/// 一条快捷键: `modifiers` 为 `None` 时忽略修饰键
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shortcut {
    pub key: String,
    #[serde(default)]
    pub modifiers: Option<Modifiers>,
    pub action: ShortcutAction,
    #[serde(default = "default_prevent")]
    pub prevent_default: bool,
}

fn default_prevent() -> bool {
    true
}

impl Shortcut {
    pub fn new(key: &str, modifiers: Option<Modifiers>, action: ShortcutAction, prevent_default: bool) -> Self {
        Self {
            key: key.to_owned(),
            modifiers,
            action,
            prevent_default,
        }
    }

    pub fn matches(&self, key: &str, modifiers: Modifiers) -> bool {
        self.key.eq_ignore_ascii_case(key) && self.modifiers.is_none_or(|m| m == modifiers)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ShortcutOrigin {
    Keyboard,
    Focus,
}

/// 快捷键命中通知
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShortcutEvent {
    pub action: ShortcutAction,
    pub key: String,
    pub modifiers: Modifiers,
    pub origin: ShortcutOrigin,
    pub timestamp: f64,
}

/// 调用者的快捷键先于内置表匹配
#[derive(Debug, Clone, Default)]
pub struct ShortcutTable {
    custom: Vec<Shortcut>,
    defaults: Vec<Shortcut>,
}

impl ShortcutTable {
    pub fn with_defaults(defaults: Vec<Shortcut>) -> Self {
        Self {
            custom: Vec::new(),
            defaults,
        }
    }

    pub fn set_custom(&mut self, shortcuts: Vec<Shortcut>) {
        self.custom = shortcuts;
    }

    pub fn custom(&self) -> &[Shortcut] {
        &self.custom
    }

    pub fn find(&self, key: &str, modifiers: Modifiers) -> Option<&Shortcut> {
        self.custom
            .iter()
            .chain(self.defaults.iter())
            .find(|shortcut| shortcut.matches(key, modifiers))
    }
}

/// 键盘捕获的内置快捷键
pub fn keyboard_defaults() -> Vec<Shortcut> {
    let ctrl_alt = Modifiers::ctrl().with_alt();
    vec![
        Shortcut::new("Delete", Some(ctrl_alt), ShortcutAction::SendCtrlAltDel, true),
        Shortcut::new("Enter", Some(ctrl_alt), ShortcutAction::ToggleFullscreen, true),
        Shortcut::new("Escape", Some(ctrl_alt.with_shift()), ShortcutAction::ReleaseFocus, true),
    ]
}

/// 焦点仲裁的内置快捷键 (Tab/Enter/Escape/F5/F11)
pub fn focus_defaults() -> Vec<Shortcut> {
    vec![
        Shortcut::new("Tab", None, ShortcutAction::CycleFocus, true),
        Shortcut::new("Enter", Some(Modifiers::NONE), ShortcutAction::Submit, false),
        Shortcut::new("Escape", Some(Modifiers::NONE), ShortcutAction::Escape, false),
        Shortcut::new("F5", None, ShortcutAction::Refresh, true),
        Shortcut::new("F11", None, ShortcutAction::ToggleFullscreen, true),
    ]
}
