// window/client.rs
// 事务对象与外部协作者之间的接缝：
// - ToplevelClient: 客户端协议对象（xdg_toplevel）的服务端句柄
// - MainSurface: 窗口主表面在场景图中的可渲染节点，以及损坏（damage）追踪

use smithay::utils::{Logical, Rectangle, Serial, Size};

use super::content::SurfaceContent;
use super::state::TiledEdges;

/// 客户端协议对象的服务端视图。
///
/// 每个 `send_*` 方法发出（或合并进）一次 configure，并返回它的序列号。
pub trait ToplevelClient {
    /// 初始 configure 握手是否已经完成
    fn is_initialized(&self) -> bool;

    /// 当前这次提交是否是客户端的第一次提交（尚未交换过 configure）
    fn is_initial_commit(&self) -> bool;

    /// 协议版本
    fn version(&self) -> u32;

    fn send_size(&self, size: Size<i32, Logical>) -> Serial;

    /// 设置贴靠状态；序列号由随后的 `send_maximized` 决定
    fn send_tiled(&self, edges: TiledEdges);

    fn send_maximized(&self, maximized: bool) -> Serial;

    fn send_fullscreen(&self, fullscreen: bool) -> Serial;

    /// 请求客户端协议栈在合适的时候发出 configure
    fn schedule_configure(&self);

    /// 客户端最近一次提交所确认的 configure 序列号
    fn acked_serial(&self) -> Option<Serial>;

    /// 客户端报告的内容几何（xdg 窗口几何，表面局部坐标）
    fn geometry(&self) -> Rectangle<i32, Logical>;

    /// 取出自上次调用以来客户端提交的内容
    fn take_content(&self) -> SurfaceContent;

    fn min_size(&self) -> Size<i32, Logical>;

    fn max_size(&self) -> Size<i32, Logical>;
}

/// 窗口主表面在场景图中的节点
pub trait MainSurface {
    /// 父节点（窗口整体）的包围盒；节点尚未挂入场景图时为 `None`
    fn parent_bounding_box(&self) -> Option<Rectangle<i32, Logical>>;

    /// 主表面自身的包围盒
    fn bounding_box(&self) -> Rectangle<i32, Logical>;

    /// 把区域标记为需要重绘
    fn damage(&self, area: Rectangle<i32, Logical>);

    /// 把缓冲的客户端内容应用到可渲染节点
    fn apply_content(&self, content: SurfaceContent);

    /// 发送 frame done。
    ///
    /// `immediate` 为 true 时不等待正常的帧节奏，立即让客户端重绘。
    fn send_frame_done(&self, immediate: bool);
}
