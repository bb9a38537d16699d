//! 作用：无头测试后端实现
//! 说明：在进程内模拟一个 xdg_toplevel 客户端和它的场景节点，不涉及真实的 Wayland 连接
//! 特性：
//!   - 记录合成器发出的每一个 configure 及其序列号
//!   - 由测试/回放脚本显式驱动客户端的确认、重绘、销毁
//!   - 记录场景节点收到的内容、损坏区域和 frame done
//! 限制：不执行真实渲染（仅流程验证）

use std::cell::{Cell, RefCell};
use std::mem;
use std::rc::Rc;

use smithay::utils::{Logical, Point, Rectangle, Serial, Size};

use crate::window::client::{MainSurface, ToplevelClient};
use crate::window::content::{BufferInfo, SurfaceContent};
use crate::window::state::TiledEdges;
use crate::window::toplevel::TILED_STATES_SINCE;
use crate::window::ToplevelSignals;

/// 合成器发给客户端的一条请求
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigureRequest {
    Size(Size<i32, Logical>),
    Tiled(TiledEdges),
    Maximized(bool),
    Fullscreen(bool),
}

/// 记录下来的请求；贴靠请求本身不带序列号
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentConfigure {
    pub serial: Option<Serial>,
    pub request: ConfigureRequest,
}

#[derive(Debug)]
struct ClientState {
    version: u32,
    alive: bool,
    has_committed: bool,
    in_initial_commit: bool,
    initialized: bool,
    next_serial: u32,
    sent: Vec<SentConfigure>,
    scheduled_configures: usize,
    /// 最近一次请求的尺寸（0 表示由客户端决定）
    requested_size: Option<Size<i32, Logical>>,
    /// 下一次提交时确认的序列号
    ack_pending: Option<Serial>,
    /// 最近一次提交确认的序列号
    acked: Option<Serial>,
    geometry: Rectangle<i32, Logical>,
    commits: u64,
    content: SurfaceContent,
    min_size: Size<i32, Logical>,
    max_size: Size<i32, Logical>,
}

/// 脚本化的 toplevel 客户端
///
/// 克隆体共享同一个客户端状态。
#[derive(Debug, Clone)]
pub struct HeadlessToplevel {
    state: Rc<RefCell<ClientState>>,
    signals: ToplevelSignals,
}

/// 交给事务对象的客户端句柄
#[derive(Debug)]
pub struct HeadlessClient(Rc<RefCell<ClientState>>);

/// 记录型场景节点
#[derive(Debug, Default)]
pub struct HeadlessSurface {
    parent_bbox: Cell<Option<Rectangle<i32, Logical>>>,
    bbox: Cell<Rectangle<i32, Logical>>,
    damage: RefCell<Vec<Rectangle<i32, Logical>>>,
    applied: RefCell<Vec<SurfaceContent>>,
    frame_done: Cell<usize>,
}

impl HeadlessToplevel {
    /// 新客户端；`size` 是客户端自己偏好的内容尺寸
    pub fn new(version: u32, size: Size<i32, Logical>) -> Self {
        Self::with_serial_start(version, size, 1)
    }

    /// 从给定序列号开始分配，用于测试序列号回绕
    pub fn with_serial_start(version: u32, size: Size<i32, Logical>, serial: u32) -> Self {
        Self {
            state: Rc::new(RefCell::new(ClientState {
                version,
                alive: true,
                has_committed: false,
                in_initial_commit: false,
                initialized: false,
                next_serial: serial,
                sent: Vec::new(),
                scheduled_configures: 0,
                requested_size: None,
                ack_pending: None,
                acked: None,
                geometry: Rectangle::new(Point::from((0, 0)), size),
                commits: 0,
                content: SurfaceContent::default(),
                min_size: Size::from((0, 0)),
                max_size: Size::from((0, 0)),
            })),
            signals: ToplevelSignals::new(),
        }
    }

    pub fn client(&self) -> Box<dyn ToplevelClient> {
        Box::new(HeadlessClient(self.state.clone()))
    }

    pub fn signals(&self) -> &ToplevelSignals {
        &self.signals
    }

    pub fn is_alive(&self) -> bool {
        self.state.borrow().alive
    }

    /// 模拟 wl_surface.commit
    ///
    /// 第一次提交是初始提交：不带缓冲区，随后客户端进入已初始化状态。
    pub fn commit(&self) {
        {
            let mut state = self.state.borrow_mut();
            if !state.alive {
                return;
            }

            state.in_initial_commit = !state.has_committed;
            state.has_committed = true;
            state.commits += 1;

            if let Some(serial) = state.ack_pending.take() {
                state.acked = Some(serial);
            }

            if !state.in_initial_commit {
                let buffer = BufferInfo {
                    size: state.geometry.size,
                    commit: state.commits,
                };
                let damage = Rectangle::new(Point::from((0, 0)), state.geometry.size);
                state.content.merge(SurfaceContent {
                    buffer: Some(buffer),
                    damage: vec![damage],
                });
            }
        }

        // 释放借用后再通知，事务对象会回调客户端
        self.signals.commit.emit(&());

        let mut state = self.state.borrow_mut();
        if state.in_initial_commit {
            state.in_initial_commit = false;
            state.initialized = true;
        }
    }

    /// 在下一次提交中确认给定序列号
    pub fn ack_configure(&self, serial: Serial) {
        self.state.borrow_mut().ack_pending = Some(serial);
    }

    /// 确认最近一次发出的 configure；返回被确认的序列号
    pub fn ack_latest(&self) -> Option<Serial> {
        let mut state = self.state.borrow_mut();
        let serial = state.sent.iter().rev().find_map(|c| c.serial);
        if serial.is_some() {
            state.ack_pending = serial;
        }
        serial
    }

    /// 客户端自行改变内容尺寸
    pub fn resize(&self, size: Size<i32, Logical>) {
        self.state.borrow_mut().geometry.size = size;
    }

    /// 客户端改变内容原点（例如客户端装饰阴影变化）
    pub fn set_geometry_origin(&self, origin: Point<i32, Logical>) {
        self.state.borrow_mut().geometry.loc = origin;
    }

    pub fn set_size_limits(&self, min: Size<i32, Logical>, max: Size<i32, Logical>) {
        let mut state = self.state.borrow_mut();
        state.min_size = min;
        state.max_size = max;
    }

    /// 像一个配合的客户端那样响应：确认最新的 configure，采用请求的尺寸并提交
    pub fn respond(&self) {
        self.ack_latest();
        {
            let mut state = self.state.borrow_mut();
            if let Some(size) = state.requested_size {
                if size.w > 0 && size.h > 0 {
                    state.geometry.size = size;
                }
            }
        }
        self.commit();
    }

    /// 客户端销毁 xdg_toplevel
    pub fn destroy(&self) {
        {
            let mut state = self.state.borrow_mut();
            if !state.alive {
                return;
            }
            state.alive = false;
        }
        self.signals.destroyed.emit(&());
    }

    pub fn sent_configures(&self) -> Vec<SentConfigure> {
        self.state.borrow().sent.clone()
    }

    pub fn last_serial(&self) -> Option<Serial> {
        self.state.borrow().sent.iter().rev().find_map(|c| c.serial)
    }

    pub fn scheduled_configures(&self) -> usize {
        self.state.borrow().scheduled_configures
    }

    pub fn geometry(&self) -> Rectangle<i32, Logical> {
        self.state.borrow().geometry
    }
}

impl ClientState {
    fn send(&mut self, request: ConfigureRequest) -> Serial {
        let serial = Serial::from(self.next_serial);
        self.next_serial = self.next_serial.wrapping_add(1);
        self.sent.push(SentConfigure {
            serial: Some(serial),
            request,
        });
        serial
    }
}

impl ToplevelClient for HeadlessClient {
    fn is_initialized(&self) -> bool {
        self.0.borrow().initialized
    }

    fn is_initial_commit(&self) -> bool {
        self.0.borrow().in_initial_commit
    }

    fn version(&self) -> u32 {
        self.0.borrow().version
    }

    fn send_size(&self, size: Size<i32, Logical>) -> Serial {
        let mut state = self.0.borrow_mut();
        state.requested_size = Some(size);
        state.send(ConfigureRequest::Size(size))
    }

    fn send_tiled(&self, edges: TiledEdges) {
        let mut state = self.0.borrow_mut();
        if state.version >= TILED_STATES_SINCE {
            state.sent.push(SentConfigure {
                serial: None,
                request: ConfigureRequest::Tiled(edges),
            });
        }
    }

    fn send_maximized(&self, maximized: bool) -> Serial {
        self.0
            .borrow_mut()
            .send(ConfigureRequest::Maximized(maximized))
    }

    fn send_fullscreen(&self, fullscreen: bool) -> Serial {
        self.0
            .borrow_mut()
            .send(ConfigureRequest::Fullscreen(fullscreen))
    }

    fn schedule_configure(&self) {
        let mut state = self.0.borrow_mut();
        state.scheduled_configures += 1;
        // 初始 configure 总是带序列号，即使没有任何状态变化
        if state.sent.iter().all(|c| c.serial.is_none()) {
            let size = state.requested_size.unwrap_or_default();
            state.send(ConfigureRequest::Size(size));
        }
    }

    fn acked_serial(&self) -> Option<Serial> {
        self.0.borrow().acked
    }

    fn geometry(&self) -> Rectangle<i32, Logical> {
        self.0.borrow().geometry
    }

    fn take_content(&self) -> SurfaceContent {
        mem::take(&mut self.0.borrow_mut().content)
    }

    fn min_size(&self) -> Size<i32, Logical> {
        self.0.borrow().min_size
    }

    fn max_size(&self) -> Size<i32, Logical> {
        self.0.borrow().max_size
    }
}

impl HeadlessSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// 上层视图在窗口移动/改变尺寸后更新父节点包围盒
    pub fn set_parent_bounding_box(&self, bbox: Option<Rectangle<i32, Logical>>) {
        self.parent_bbox.set(bbox);
    }

    pub fn take_damage(&self) -> Vec<Rectangle<i32, Logical>> {
        mem::take(&mut *self.damage.borrow_mut())
    }

    pub fn applied_contents(&self) -> Vec<SurfaceContent> {
        self.applied.borrow().clone()
    }

    /// 最近一次应用到节点上的缓冲区
    pub fn current_buffer(&self) -> Option<BufferInfo> {
        self.applied.borrow().iter().rev().find_map(|c| c.buffer)
    }

    pub fn frame_done_count(&self) -> usize {
        self.frame_done.get()
    }
}

impl MainSurface for HeadlessSurface {
    fn parent_bounding_box(&self) -> Option<Rectangle<i32, Logical>> {
        self.parent_bbox.get()
    }

    fn bounding_box(&self) -> Rectangle<i32, Logical> {
        self.bbox.get()
    }

    fn damage(&self, area: Rectangle<i32, Logical>) {
        self.damage.borrow_mut().push(area);
    }

    fn apply_content(&self, content: SurfaceContent) {
        if let Some(buffer) = content.buffer {
            let mut bbox = self.bbox.get();
            bbox.size = buffer.size;
            self.bbox.set(bbox);
        }
        self.applied.borrow_mut().push(content);
    }

    fn send_frame_done(&self, _immediate: bool) {
        self.frame_done.set(self.frame_done.get() + 1);
    }
}
