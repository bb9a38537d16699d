// window/toplevel.rs
// 顶层窗口事务对象：驱动 configure/ack 握手，并在事务应用时原子地切换可见状态。
//
// 三个状态缓冲区：
//   pending   - 窗口管理逻辑当前想要的状态，随时可改
//   committed - 已经发给客户端的状态（客户端不存在时直接复制）
//   current   - 正在显示的状态
//
// 状态流转：
//   Idle --commit()--> AwaitingConfigureAck --客户端确认--> Ready --apply()--> Idle
//   Idle --commit()（无需等待）--> Ready
//   客户端销毁时任何等待都直接变为 Ready，不会因为永远等不到的确认而死锁。

use std::cell::RefCell;
use std::mem;
use std::rc::{Rc, Weak};

use smithay::utils::{Logical, Point, Rectangle, Serial, Size};

use super::bridge::{ToplevelListeners, ToplevelSignals};
use super::client::{MainSurface, ToplevelClient};
use super::content::SurfaceContent;
use super::state::ToplevelState;
use crate::transaction::{ObjectId, ObjectRef, TransactionManager, TransactionObject};
use crate::utils::signal::Signal;
use crate::utils::{adjust_for_gravity, clamp_configure_size, expand_by_margins, shrink_by_margins};

/// 支持 tiled_* 状态的最低 xdg_toplevel 版本
pub const TILED_STATES_SINCE: u32 = 2;

/// 事务对象在握手中所处的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// 没有未完成的 configure
    Idle,
    /// commit() 正在进行，尚未决定是否需要等待
    Committed,
    /// 等待客户端确认不早于 `target` 的 configure
    AwaitingConfigureAck { target: Serial },
    /// 已通知就绪，等待事务管理器调用 apply()
    Ready,
}

/// 状态应用通知，携带应用前后的 current 状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToplevelApplied {
    pub old_state: ToplevelState,
    pub new_state: ToplevelState,
    pub wm_offset: Point<i32, Logical>,
}

/// 顶层窗口事务对象
///
/// 由窗口的上层视图对象持有（`Rc<RefCell<_>>`），事务管理器只持有临时的非独占引用。
/// 客户端断开后对象仍然存活，直到最后一次 apply() 让上层完成收尾（例如取消映射）。
pub struct ToplevelTxn {
    id: ObjectId,
    this: Weak<RefCell<ToplevelTxn>>,
    manager: TransactionManager,

    /// 客户端协议对象；断开后永久为 `None`
    client: Option<Box<dyn ToplevelClient>>,
    main_surface: Rc<dyn MainSurface>,
    listeners: Option<ToplevelListeners>,

    pending: ToplevelState,
    committed: ToplevelState,
    current: ToplevelState,
    phase: Phase,

    /// 客户端内容原点与窗口管理器几何原点之间的偏移
    wm_offset: Point<i32, Logical>,
    /// 尚未交给场景节点的客户端内容
    pending_content: SurfaceContent,

    applied: Signal<ToplevelApplied>,
}

impl ToplevelTxn {
    /// 创建事务对象并订阅客户端的提交与销毁通知
    pub fn new(
        client: Box<dyn ToplevelClient>,
        signals: &ToplevelSignals,
        main_surface: Rc<dyn MainSurface>,
        manager: TransactionManager,
    ) -> Rc<RefCell<Self>> {
        Rc::new_cyclic(|weak: &Weak<RefCell<Self>>| {
            let listeners = ToplevelListeners::connect(weak.clone(), signals, manager.clone());

            RefCell::new(Self {
                id: ObjectId::next(),
                this: weak.clone(),
                manager,
                client: Some(client),
                main_surface,
                listeners: Some(listeners),
                pending: ToplevelState::default(),
                committed: ToplevelState::default(),
                current: ToplevelState::default(),
                phase: Phase::Idle,
                wm_offset: Point::from((0, 0)),
                pending_content: SurfaceContent::default(),
                applied: Signal::new(),
            })
        })
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// 供事务使用的引用；对象正在析构时返回 `None`
    pub fn object_ref(&self) -> Option<ObjectRef> {
        let this = self.this.upgrade()?;
        Some(ObjectRef::new(self.id, this))
    }

    pub fn pending(&self) -> &ToplevelState {
        &self.pending
    }

    /// 窗口管理逻辑修改期望状态；直到下一次 commit() 前没有任何副作用
    pub fn pending_mut(&mut self) -> &mut ToplevelState {
        &mut self.pending
    }

    pub fn committed(&self) -> &ToplevelState {
        &self.committed
    }

    pub fn current(&self) -> &ToplevelState {
        &self.current
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn target_configure(&self) -> Option<Serial> {
        match self.phase {
            Phase::AwaitingConfigureAck { target } => Some(target),
            _ => None,
        }
    }

    pub fn wm_offset(&self) -> Point<i32, Logical> {
        self.wm_offset
    }

    pub fn is_client_alive(&self) -> bool {
        self.client.is_some()
    }

    /// 状态应用通知。
    ///
    /// 回调在对象被可变借用期间触发，回调里不能再借用这个对象。
    pub fn applied_signal(&self) -> &Signal<ToplevelApplied> {
        &self.applied
    }

    /// 让客户端自己选择尺寸，会触发一次由客户端发起的事务
    pub fn request_native_size(&self) {
        if let Some(client) = self.client.as_deref() {
            if client.is_initialized() {
                client.send_size(Size::from((0, 0)));
            }
        }
    }

    pub fn min_size(&self) -> Size<i32, Logical> {
        self.client
            .as_deref()
            .map_or_else(|| Size::from((0, 0)), |c| c.min_size())
    }

    pub fn max_size(&self) -> Size<i32, Logical> {
        self.client
            .as_deref()
            .map_or_else(|| Size::from((0, 0)), |c| c.max_size())
    }

    /// 客户端表面在屏幕上的矩形
    pub fn calculate_base_geometry(&self) -> Rectangle<i32, Logical> {
        let mut geometry = self.current.geometry;
        // 偏移来自客户端，使用饱和运算
        geometry.loc.x = geometry
            .loc
            .x
            .saturating_sub(self.wm_offset.x)
            .saturating_add(self.current.margins.left);
        geometry.loc.y = geometry
            .loc
            .y
            .saturating_sub(self.wm_offset.y)
            .saturating_add(self.current.margins.top);
        geometry.size = self.main_surface.bounding_box().size;
        geometry
    }

    /// 客户端提交了新的表面状态
    pub fn handle_surface_commit(&mut self) {
        let _span = trace_span!("ToplevelTxn::handle_surface_commit", id = ?self.id).entered();

        let Some(client) = self.client.as_deref() else {
            return;
        };
        self.pending_content.merge(client.take_content());

        if client.is_initial_commit() {
            // 第一次提交：按 committed 发出初始 configure，什么都不应用
            configure_with_state(client, &self.committed, &ToplevelState::default());
            client.schedule_configure();
            return;
        }

        if self.manager.is_object_committed(self.id) {
            if let Phase::AwaitingConfigureAck { target } = self.phase {
                let acked = client.acked_serial();
                if !acked.is_some_and(|serial| serial.is_no_older_than(&target)) {
                    // 还没到达目标状态：先让客户端尽快重绘
                    trace!(?acked, ?target, "configure not acked yet");
                    self.main_surface.send_frame_done(true);
                    return;
                }
            }

            let real_size = expand_by_margins(client.geometry().size, self.committed.margins);
            adjust_for_gravity(&mut self.committed, real_size);
            self.emit_ready();
            return;
        }

        if self.manager.is_object_pending(self.id) {
            return;
        }

        let geometry = client.geometry();
        let toplevel_size = expand_by_margins(geometry.size, self.current.margins);
        if toplevel_size == self.current.geometry.size || !self.current.mapped {
            if geometry.loc != self.wm_offset {
                // 尺寸没变但内容原点移动了（例如装饰内边距变化），让视图重新定位
                self.wm_offset = geometry.loc;
                self.applied.emit(&ToplevelApplied {
                    old_state: self.current,
                    new_state: self.current,
                    wm_offset: self.wm_offset,
                });
            }

            // 没有事务在进行，尺寸也没变：直接应用新内容
            self.apply_pending_content();
            return;
        }

        adjust_for_gravity(&mut self.pending, toplevel_size);
        debug!(geometry = ?self.pending.geometry, "client-initiated resize");

        let Some(this) = self.object_ref() else {
            return;
        };
        let mut tx = self.manager.create_transaction();
        tx.add_object(this);
        self.manager.schedule(tx);
    }

    /// 客户端协议对象被销毁
    pub fn handle_client_destroyed(&mut self) {
        debug!(id = ?self.id, phase = ?self.phase, "client toplevel destroyed");

        self.client = None;
        self.listeners = None;

        // 不会再有确认了，立即就绪
        self.emit_ready();
    }

    fn emit_ready(&mut self) {
        match self.phase {
            Phase::Committed | Phase::AwaitingConfigureAck { .. } => {
                self.phase = Phase::Ready;
                self.manager.object_ready(self.id);
            }
            Phase::Idle | Phase::Ready => (),
        }
    }

    fn apply_pending_content(&mut self) {
        if let Some(client) = self.client.as_deref() {
            self.pending_content.merge(client.take_content());
        }

        let content = mem::take(&mut self.pending_content);
        self.main_surface.apply_content(content);

        if let Some(client) = self.client.as_deref() {
            self.wm_offset = client.geometry().loc;
        }
    }

    fn damage_parent(&self) {
        if let Some(bbox) = self.main_surface.parent_bounding_box() {
            self.main_surface.damage(bbox);
        }
    }
}

impl TransactionObject for ToplevelTxn {
    fn commit(&mut self) {
        let _span = trace_span!("ToplevelTxn::commit", id = ?self.id).entered();

        self.phase = Phase::Committed;
        self.committed = self.pending;

        let state = &self.pending;
        debug!(
            mapped = state.mapped,
            geometry = ?state.geometry,
            tiled = ?state.tiled_edges,
            fullscreen = state.fullscreen,
            margins = ?state.margins,
            "committing toplevel state"
        );

        let unmapping = self.current.mapped && !self.pending.mapped;
        let serial = match self.client.as_deref() {
            // 客户端不存在、正在取消映射或尚未初始化：不需要 configure
            Some(client) if !unmapping && client.is_initialized() => {
                configure_with_state(client, &self.committed, &self.current)
            }
            _ => None,
        };

        match serial {
            Some(target) => {
                trace!(?target, "waiting for configure ack");
                self.phase = Phase::AwaitingConfigureAck { target };

                // 让客户端尽快更新状态
                if self.manager.config().send_frame_done_on_configure {
                    self.main_surface.send_frame_done(true);
                }
            }
            None => self.emit_ready(),
        }
    }

    fn apply(&mut self) {
        let _span = trace_span!("ToplevelTxn::apply", id = ?self.id).entered();

        let old_state = self.current;

        // 先损坏旧位置
        self.damage_parent();

        if self.client.is_none() {
            // 客户端已经不在了，尺寸不可能再变
            self.committed.geometry.size = self.current.geometry.size;
            if !self.current.mapped {
                // 避免已销毁的窗口被重新映射
                self.committed.mapped = false;
            }
        }

        self.current = self.committed;
        if !self.manager.is_object_pending(self.id) {
            // 把重力修正带回 pending
            self.pending = self.committed;
        }

        self.apply_pending_content();
        self.phase = Phase::Idle;

        self.applied.emit(&ToplevelApplied {
            old_state,
            new_state: self.current,
            wm_offset: self.wm_offset,
        });

        // 再损坏新位置
        self.damage_parent();
    }
}

impl std::fmt::Debug for ToplevelTxn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToplevelTxn")
            .field("id", &self.id)
            .field("phase", &self.phase)
            .field("client_alive", &self.client.is_some())
            .field("pending", &self.pending)
            .field("committed", &self.committed)
            .field("current", &self.current)
            .field("wm_offset", &self.wm_offset)
            .finish()
    }
}

/// 对比 `desired` 与 `base`，按需向客户端发送 configure，返回最后一个序列号。
///
/// 贴靠与全屏同时变化时会发出多个 configure，只有最后一个序列号被当作等待目标。
fn configure_with_state(
    client: &dyn ToplevelClient,
    desired: &ToplevelState,
    base: &ToplevelState,
) -> Option<Serial> {
    let mut current_size = shrink_by_margins(base.geometry.size, base.margins);
    if desired.mapped && !base.mapped {
        // 正在映射：如果客户端自己的尺寸已经符合要求，就只映射不调整大小
        current_size = client.geometry().size;
    }

    let desired_size = shrink_by_margins(desired.geometry.size, desired.margins);
    let mut serial = None;

    if current_size != desired_size && desired.geometry.size.w > 0 && desired.geometry.size.h > 0
    {
        serial = Some(client.send_size(clamp_configure_size(desired_size)));
    }

    if base.tiled_edges != desired.tiled_edges {
        client.send_tiled(desired.tiled_edges);
        let maximized = if client.version() >= TILED_STATES_SINCE {
            desired.is_maximized()
        } else {
            !desired.tiled_edges.is_empty()
        };
        serial = Some(client.send_maximized(maximized));
    }

    if base.fullscreen != desired.fullscreen {
        serial = Some(client.send_fullscreen(desired.fullscreen));
    }

    serial
}
