// window/state.rs
// 顶层窗口状态快照：窗口管理器想要的、已发送给客户端的、正在显示的状态都用同一个值类型表示。
// 该类型按值复制，从不共享，三个缓冲区之间只通过整体赋值交换数据。

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use smithay::utils::{Logical, Rectangle, Size};

bitflags! {
    /// 贴靠到屏幕边缘的窗口边
    ///
    /// 位布局与调整大小边缘（ResizeEdge）一致。
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct TiledEdges: u32 {
        const TOP    = 0b0001;
        const BOTTOM = 0b0010;
        const LEFT   = 0b0100;
        const RIGHT  = 0b1000;

        const ALL = Self::TOP.bits() | Self::BOTTOM.bits() | Self::LEFT.bits() | Self::RIGHT.bits();
    }
}

/// 装饰内边距：完整几何减去它得到客户端的可绘制内容区
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Margins {
    pub left: i32,
    pub right: i32,
    pub top: i32,
    pub bottom: i32,
}

impl Margins {
    pub const fn new(left: i32, right: i32, top: i32, bottom: i32) -> Self {
        Self {
            left,
            right,
            top,
            bottom,
        }
    }

    /// 水平方向总内边距
    pub fn horizontal(&self) -> i32 {
        self.left.saturating_add(self.right)
    }

    /// 垂直方向总内边距
    pub fn vertical(&self) -> i32 {
        self.top.saturating_add(self.bottom)
    }
}

/// 某一时刻窗口的期望/可见属性
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ToplevelState {
    /// 完整几何（包含内边距）
    pub geometry: Rectangle<i32, Logical>,
    /// 窗口是否应当可见
    pub mapped: bool,
    pub tiled_edges: TiledEdges,
    pub fullscreen: bool,
    pub margins: Margins,
}

impl ToplevelState {
    /// 完整几何尺寸
    pub fn size(&self) -> Size<i32, Logical> {
        self.geometry.size
    }

    /// 所有边都贴靠时视为最大化
    pub fn is_maximized(&self) -> bool {
        self.tiled_edges == TiledEdges::ALL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_state_is_empty() {
        let state = ToplevelState::default();
        assert!(!state.mapped);
        assert!(!state.fullscreen);
        assert!(state.tiled_edges.is_empty());
        assert_eq!(state.size(), Size::from((0, 0)));
    }

    #[test]
    fn maximized_requires_all_edges() {
        let mut state = ToplevelState {
            tiled_edges: TiledEdges::LEFT | TiledEdges::RIGHT | TiledEdges::TOP,
            ..Default::default()
        };
        assert!(!state.is_maximized());

        state.tiled_edges |= TiledEdges::BOTTOM;
        assert!(state.is_maximized());
    }

    #[test]
    fn margin_sums() {
        let m = Margins::new(1, 2, 3, 4);
        assert_eq!(m.horizontal(), 3);
        assert_eq!(m.vertical(), 7);
    }
}
