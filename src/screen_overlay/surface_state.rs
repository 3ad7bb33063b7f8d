use std::collections::HashMap;

use super::surface_info::FocusableInfo;
use crate::event_model::Rect;

/// Tab 导航状态, 由焦点仲裁在焦点会话内维护
#[derive(Debug, Default)]
pub struct SurfaceState {
    surfaces: HashMap<u32, FocusableInfo>,
    current_surface_id: Option<u32>,
    available_surfaces: Vec<u32>, // 边界内可聚焦元素, 按文档顺序
}

impl SurfaceState {
    /// 初始化状态
    pub fn new() -> Self {
        Self::default()
    }

    /// 只保留自身可聚焦并且完全落在边界内的元素
    pub fn refresh(&mut self, elements: Vec<FocusableInfo>, boundary: Rect) {
        self.surfaces.clear();
        self.available_surfaces.clear();
        for element in elements {
            if element.focusable && boundary.contains_rect(&element.rect) {
                self.add_surface(element);
            }
        }
        if let Some(id) = self.current_surface_id {
            if !self.surfaces.contains_key(&id) {
                self.current_surface_id = None;
            }
        }
    }

    /// 添加新的可聚焦元素
    pub fn add_surface(&mut self, info: FocusableInfo) {
        if self.surfaces.insert(info.id, info.clone()).is_none() {
            self.available_surfaces.push(info.id);
        }
    }

    /// 按方向移动焦点, 两端回绕
    pub fn step(&mut self, forward: bool) -> Option<&FocusableInfo> {
        let len = self.available_surfaces.len();
        if len == 0 {
            return None;
        }
        let position = self
            .current_surface_id
            .and_then(|id| self.available_surfaces.iter().position(|candidate| *candidate == id));
        let next = match (position, forward) {
            (None, true) => 0,
            (None, false) => len - 1,
            (Some(i), true) => (i + 1) % len,
            (Some(i), false) => (i + len - 1) % len,
        };
        let id = self.available_surfaces[next];
        self.current_surface_id = Some(id);
        self.surfaces.get(&id)
    }

    pub fn current(&self) -> Option<&FocusableInfo> {
        self.current_surface_id.and_then(|id| self.surfaces.get(&id))
    }

    pub fn clear(&mut self) {
        self.surfaces.clear();
        self.available_surfaces.clear();
        self.current_surface_id = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(id: u32, x: f64) -> FocusableInfo {
        FocusableInfo::new(id, Rect::new(x, 10.0, 20.0, 20.0))
    }

    #[test]
    fn step_wraps_in_both_directions() {
        let mut state = SurfaceState::new();
        state.refresh(
            vec![element(1, 0.0), element(2, 40.0), element(3, 80.0)],
            Rect::new(0.0, 0.0, 200.0, 100.0),
        );
        let forward: Vec<u32> = (0..4).filter_map(|_| state.step(true).map(|e| e.id)).collect();
        assert_eq!(forward, vec![1, 2, 3, 1]);
        assert_eq!(state.step(false).map(|e| e.id), Some(3));
    }

    #[test]
    fn refresh_skips_outside_and_unfocusable_elements() {
        let mut state = SurfaceState::new();
        state.refresh(
            vec![element(1, 0.0), element(2, 190.0), element(3, 40.0).disabled()],
            Rect::new(0.0, 0.0, 200.0, 100.0),
        );
        assert_eq!(state.step(true).map(|e| e.id), Some(1));
        assert_eq!(state.step(true).map(|e| e.id), Some(1));
    }
}
