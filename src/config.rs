use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::event_router::FocusConfig;
use crate::input_devices::{KeyboardConfig, MouseConfig, TouchConfig};

/// 默认的远端地址
pub const DEFAULT_ADDRESS: &str = "127.0.0.1:5959";

/// 编排器的流水线参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OrchestratorConfig {
    pub enable_mouse: bool,
    pub enable_keyboard: bool,
    pub enable_touch: bool,
    /// 出队间隔, 同时也是校验器里每种事件的限流窗口; 0 表示不限
    pub rate_limit_ms: u64,
    pub max_queue_size: usize,
    pub latency_threshold_ms: u64,
    /// 逐事件的 debug 日志
    pub enable_logging: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            enable_mouse: true,
            enable_keyboard: true,
            enable_touch: true,
            rate_limit_ms: 16,
            max_queue_size: 1000,
            latency_threshold_ms: 500,
            enable_logging: false,
        }
    }
}

/// `update_config` 的增量, `None` 表示保持原值
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OrchestratorConfigPatch {
    pub enable_mouse: Option<bool>,
    pub enable_keyboard: Option<bool>,
    pub enable_touch: Option<bool>,
    pub rate_limit_ms: Option<u64>,
    pub max_queue_size: Option<usize>,
    pub latency_threshold_ms: Option<u64>,
    pub enable_logging: Option<bool>,
}

impl OrchestratorConfig {
    pub fn apply(&mut self, patch: &OrchestratorConfigPatch) {
        macro_rules! merge {
            ($($field:ident),*) => {
                $(if let Some(value) = patch.$field {
                    self.$field = value;
                })*
            };
        }
        merge!(
            enable_mouse,
            enable_keyboard,
            enable_touch,
            rate_limit_ms,
            max_queue_size,
            latency_threshold_ms,
            enable_logging
        );
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransportConfig {
    pub address: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_owned(),
        }
    }
}

/// `inputd.toml` 的全部内容, 缺省的节和字段都取默认值
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InputdConfig {
    pub orchestrator: OrchestratorConfig,
    pub mouse: MouseConfig,
    pub keyboard: KeyboardConfig,
    pub touch: TouchConfig,
    pub focus: FocusConfig,
    pub transport: TransportConfig,
}

impl InputdConfig {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn to_toml(&self) -> anyhow::Result<String> {
        toml::to_string_pretty(self).context("failed to render config")
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = InputdConfig::parse("").unwrap();
        assert_eq!(config, InputdConfig::default());
        assert_eq!(config.orchestrator.rate_limit_ms, 16);
        assert_eq!(config.orchestrator.max_queue_size, 1000);
        assert_eq!(config.touch.double_tap_threshold_ms, 300);
        assert_eq!(config.focus.indicator.color, "#3b82f6");
        assert_eq!(config.transport.address, DEFAULT_ADDRESS);
    }

    #[test]
    fn loads_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[orchestrator]
rate_limit_ms = 8
enable_touch = false

[mouse]
sensitivity = 2.0

[[keyboard.shortcuts]]
key = "q"
modifiers = {{ ctrl = true }}
action = {{ custom = "quit" }}
"#
        )
        .unwrap();

        let config = InputdConfig::load(file.path()).unwrap();
        assert_eq!(config.orchestrator.rate_limit_ms, 8);
        assert!(!config.orchestrator.enable_touch);
        assert!(config.orchestrator.enable_mouse);
        assert_eq!(config.mouse.sensitivity, 2.0);
        assert_eq!(config.mouse.throttle_ms, 16);
        assert_eq!(config.keyboard.shortcuts.len(), 1);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = InputdConfig::parse("[orchestrator]\nrate_limit = 3\n").unwrap_err();
        assert!(format!("{err:#}").contains("rate_limit"));
        assert!(InputdConfig::load("/nonexistent/inputd.toml").is_err());
    }

    #[test]
    fn rendered_config_parses_back() {
        let mut config = InputdConfig::default();
        config.orchestrator.enable_logging = true;
        let text = config.to_toml().unwrap();
        assert_eq!(InputdConfig::parse(&text).unwrap(), config);
    }

    #[test]
    fn patch_only_touches_given_fields() {
        let mut config = OrchestratorConfig::default();
        config.apply(&OrchestratorConfigPatch {
            max_queue_size: Some(10),
            enable_logging: Some(true),
            ..Default::default()
        });
        assert_eq!(config.max_queue_size, 10);
        assert!(config.enable_logging);
        assert_eq!(config.rate_limit_ms, 16);
    }
}
