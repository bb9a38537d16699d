//! 实用工具模块。
//!
//! 本模块提供事务核心所需的几何辅助函数：
//! - 完整几何与内容区尺寸之间的转换（加/减装饰内边距）
//! - 客户端自行改变尺寸时的“重力”修正
//! - 发给客户端的配置尺寸钳制
//!
//! 这些函数都是纯函数，不持有任何状态。

use smithay::utils::{Logical, Size};

use crate::window::state::{Margins, TiledEdges, ToplevelState};

pub mod id;
pub mod signal;

/// 从完整尺寸中去掉内边距，得到内容区尺寸（下限为0）
pub fn shrink_by_margins(size: Size<i32, Logical>, margins: Margins) -> Size<i32, Logical> {
    Size::from((
        size.w.saturating_sub(margins.horizontal()).max(0),
        size.h.saturating_sub(margins.vertical()).max(0),
    ))
}

/// 把客户端报告的内容区尺寸加上内边距，还原为完整尺寸
///
/// 尺寸来自客户端，可能任意大，结果饱和到 `i32::MAX`。
pub fn expand_by_margins(size: Size<i32, Logical>, margins: Margins) -> Size<i32, Logical> {
    Size::from((
        size.w.saturating_add(margins.horizontal()),
        size.h.saturating_add(margins.vertical()),
    ))
}

/// 发给客户端的尺寸至少为 1×1
pub fn clamp_configure_size(size: Size<i32, Logical>) -> Size<i32, Logical> {
    Size::from((size.w.max(1), size.h.max(1)))
}

/// 按贴靠边修正几何，使窗口尺寸变为 `full_size`（已包含内边距）。
///
/// 每个轴单独处理：
/// - 起始边（左/上）贴靠：起点不动，尺寸增减都落在对边
/// - 仅末尾边（右/下）贴靠：起点平移 `旧尺寸 - 新尺寸`，末尾边保持不动
/// - 都不贴靠：默认保持左上角不动
pub fn adjust_for_gravity(state: &mut ToplevelState, full_size: Size<i32, Logical>) {
    let edges = state.tiled_edges;
    let geometry = &mut state.geometry;

    if edges.contains(TiledEdges::RIGHT) && !edges.contains(TiledEdges::LEFT) {
        let shift = geometry.size.w.saturating_sub(full_size.w);
        geometry.loc.x = geometry.loc.x.saturating_add(shift);
    }
    if edges.contains(TiledEdges::BOTTOM) && !edges.contains(TiledEdges::TOP) {
        let shift = geometry.size.h.saturating_sub(full_size.h);
        geometry.loc.y = geometry.loc.y.saturating_add(shift);
    }

    geometry.size = full_size;
}
