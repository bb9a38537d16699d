// 文件: handlers/xdg_shell.rs
// 作用: 把 smithay 的 xdg_toplevel 接到事务对象上
// Wayland概念: configure/ack_configure 握手；客户端确认后在下一次 wl_surface.commit 中生效
//
// 这里只做翻译：
//   - XdgToplevelClient 把 ToplevelClient 的请求翻译成 xdg_toplevel 的待发送状态和 configure
//   - 提交后钩子把 wl_surface.commit 转发成 ToplevelSignals::commit
// 合成器状态类型实现 ToplevelHost，告诉钩子每个表面对应哪组通知源。

use std::cell::Cell;

use smithay::reexports::wayland_protocols::xdg::shell::server::xdg_toplevel;
use smithay::reexports::wayland_server::protocol::wl_surface::WlSurface;
use smithay::reexports::wayland_server::Resource as _;
use smithay::utils::{Logical, Point, Rectangle, Serial, Size};
use smithay::wayland::compositor::{
    add_post_commit_hook, remove_post_commit_hook, with_states, BufferAssignment, Damage, HookId,
    SurfaceAttributes,
};
use smithay::wayland::shell::xdg::{
    SurfaceCachedState, ToplevelSurface, XdgToplevelSurfaceData, XdgToplevelSurfaceRoleAttributes,
};

use crate::window::client::ToplevelClient;
use crate::window::content::{BufferInfo, SurfaceContent};
use crate::window::state::TiledEdges;
use crate::window::toplevel::TILED_STATES_SINCE;
use crate::window::ToplevelSignals;

/// 合成器状态：按表面查找 toplevel 的通知源
pub trait ToplevelHost: 'static {
    fn toplevel_signals(&self, surface: &WlSurface) -> Option<ToplevelSignals>;
}

/// xdg_toplevel 的 ToplevelClient 实现
#[derive(Debug)]
pub struct XdgToplevelClient {
    toplevel: ToplevelSurface,
    /// 最近一次被取走内容的提交序号
    taken: Cell<u64>,
}

/// 提交后钩子维护的提交计数，存放在表面的 data_map 里
#[derive(Debug, Default)]
struct CommitCount(Cell<u64>);

/// 事务对象关心的 xdg 角色状态
///
/// 初始提交处理完（初始 configure 已发出）就算初始化完成，不需要等客户端确认。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct RoleSnapshot {
    initial_configure_sent: bool,
    current_serial: Option<Serial>,
}

/// 提交后钩子的所有权句柄，丢弃时移除钩子
#[derive(Debug)]
pub struct CommitHook {
    surface: WlSurface,
    hook: HookId,
}

impl XdgToplevelClient {
    pub fn new(toplevel: ToplevelSurface) -> Self {
        Self {
            toplevel,
            taken: Cell::new(0),
        }
    }

    pub fn toplevel(&self) -> &ToplevelSurface {
        &self.toplevel
    }

    fn with_role<T>(&self, f: impl FnOnce(&mut XdgToplevelSurfaceRoleAttributes) -> T) -> T {
        with_states(self.toplevel.wl_surface(), |states| {
            let data = states
                .data_map
                .get::<XdgToplevelSurfaceData>()
                .expect("xdg_toplevel surfaces always carry role data");
            let mut role = data.lock().unwrap_or_else(|err| err.into_inner());
            f(&mut role)
        })
    }

    fn role(&self) -> RoleSnapshot {
        self.with_role(|role| RoleSnapshot::from_role(role))
    }
}

impl RoleSnapshot {
    fn from_role(role: &XdgToplevelSurfaceRoleAttributes) -> Self {
        Self {
            initial_configure_sent: role.initial_configure_sent,
            current_serial: role.current_serial,
        }
    }

    fn is_initialized(&self) -> bool {
        self.initial_configure_sent
    }

    fn is_initial_commit(&self) -> bool {
        !self.initial_configure_sent
    }
}

/// 本次提交附加的缓冲区；没有附加时为 `None`
///
/// 只启用 wayland_frontend 时拿不到缓冲区的像素尺寸，用 xdg 窗口几何的尺寸代替。
fn committed_buffer(
    assignment: Option<&BufferAssignment>,
    size: Size<i32, Logical>,
    commit: u64,
) -> Option<BufferInfo> {
    match assignment? {
        BufferAssignment::NewBuffer(_) => Some(BufferInfo { size, commit }),
        BufferAssignment::Removed => Some(BufferInfo {
            size: Size::from((0, 0)),
            commit,
        }),
    }
}

impl ToplevelClient for XdgToplevelClient {
    fn is_initialized(&self) -> bool {
        self.role().is_initialized()
    }

    fn is_initial_commit(&self) -> bool {
        self.role().is_initial_commit()
    }

    fn version(&self) -> u32 {
        self.toplevel.xdg_toplevel().version()
    }

    fn send_size(&self, size: Size<i32, Logical>) -> Serial {
        self.toplevel.with_pending_state(|state| {
            state.size = Some(size);
        });
        self.toplevel.send_configure()
    }

    fn send_tiled(&self, edges: TiledEdges) {
        if self.version() < TILED_STATES_SINCE {
            return;
        }

        self.toplevel.with_pending_state(|state| {
            let pairs = [
                (TiledEdges::LEFT, xdg_toplevel::State::TiledLeft),
                (TiledEdges::RIGHT, xdg_toplevel::State::TiledRight),
                (TiledEdges::TOP, xdg_toplevel::State::TiledTop),
                (TiledEdges::BOTTOM, xdg_toplevel::State::TiledBottom),
            ];
            for (edge, xdg_state) in pairs {
                if edges.contains(edge) {
                    state.states.set(xdg_state);
                } else {
                    state.states.unset(xdg_state);
                }
            }
        });
    }

    fn send_maximized(&self, maximized: bool) -> Serial {
        self.toplevel.with_pending_state(|state| {
            if maximized {
                state.states.set(xdg_toplevel::State::Maximized);
            } else {
                state.states.unset(xdg_toplevel::State::Maximized);
            }
        });
        self.toplevel.send_configure()
    }

    fn send_fullscreen(&self, fullscreen: bool) -> Serial {
        self.toplevel.with_pending_state(|state| {
            if fullscreen {
                state.states.set(xdg_toplevel::State::Fullscreen);
            } else {
                state.states.unset(xdg_toplevel::State::Fullscreen);
            }
        });
        self.toplevel.send_configure()
    }

    fn schedule_configure(&self) {
        if self.role().is_initial_commit() {
            self.toplevel.send_configure();
        } else {
            let _ = self.toplevel.send_pending_configure();
        }
    }

    fn acked_serial(&self) -> Option<Serial> {
        self.role().current_serial
    }

    fn geometry(&self) -> Rectangle<i32, Logical> {
        with_states(self.toplevel.wl_surface(), |states| {
            let mut guard = states.cached_state.get::<SurfaceCachedState>();
            guard.current().geometry
        })
        .unwrap_or_default()
    }

    fn take_content(&self) -> SurfaceContent {
        let size = self.geometry().size;
        let taken = self.taken.get();

        with_states(self.toplevel.wl_surface(), |states| {
            let commit = states
                .data_map
                .get::<CommitCount>()
                .map_or(0, |count| count.0.get());
            if commit == taken {
                // 这次提交的内容已经取走过了
                return SurfaceContent::default();
            }
            self.taken.set(commit);

            let mut guard = states.cached_state.get::<SurfaceAttributes>();
            let attrs = guard.current();
            let damage = attrs
                .damage
                .iter()
                .map(|damage| match damage {
                    Damage::Surface(rect) => *rect,
                    // 缓冲区坐标的损坏需要缩放/变换信息，整体损坏即可
                    Damage::Buffer(_) => Rectangle::new(Point::from((0, 0)), size),
                })
                .collect();

            SurfaceContent {
                buffer: committed_buffer(attrs.buffer.as_ref(), size, commit),
                damage,
            }
        })
    }

    fn min_size(&self) -> Size<i32, Logical> {
        with_states(self.toplevel.wl_surface(), |states| {
            let mut guard = states.cached_state.get::<SurfaceCachedState>();
            guard.current().min_size
        })
    }

    fn max_size(&self) -> Size<i32, Logical> {
        with_states(self.toplevel.wl_surface(), |states| {
            let mut guard = states.cached_state.get::<SurfaceCachedState>();
            guard.current().max_size
        })
    }
}

impl CommitHook {
    /// 在表面上安装提交后钩子
    ///
    /// 钩子运行时客户端的新状态已经生效（包括确认的 configure 序列号）。
    pub fn install<D: ToplevelHost>(surface: &WlSurface) -> Self {
        let hook = add_post_commit_hook::<D, _>(surface, |state, _dh, surface| {
            let _span = tracy_client::span!("toplevel post-commit");

            with_states(surface, |states| {
                states.data_map.insert_if_missing(CommitCount::default);
                if let Some(count) = states.data_map.get::<CommitCount>() {
                    count.0.set(count.0.get() + 1);
                }
            });

            let Some(signals) = state.toplevel_signals(surface) else {
                trace!("commit on a surface without a toplevel transaction object");
                return;
            };
            signals.commit.emit(&());
        });

        Self {
            surface: surface.clone(),
            hook,
        }
    }
}

impl Drop for CommitHook {
    fn drop(&mut self) {
        remove_post_commit_hook(&self.surface, self.hook.clone());
    }
}

/// XdgShellHandler::toplevel_destroyed 里调用
pub fn notify_toplevel_destroyed<D: ToplevelHost>(state: &D, toplevel: &ToplevelSurface) {
    if let Some(signals) = state.toplevel_signals(toplevel.wl_surface()) {
        signals.destroyed.emit(&());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initialized_once_initial_configure_is_sent() {
        // 初始提交之前
        let role = RoleSnapshot::default();
        assert!(role.is_initial_commit());
        assert!(!role.is_initialized());

        // 初始 configure 已发出，客户端还没确认
        let role = RoleSnapshot {
            initial_configure_sent: true,
            current_serial: None,
        };
        assert!(!role.is_initial_commit());
        assert!(role.is_initialized());
    }

    #[test]
    fn buffer_reported_only_when_attached() {
        let size = Size::from((400, 300));
        assert_eq!(committed_buffer(None, size, 3), None);
        assert_eq!(
            committed_buffer(Some(&BufferAssignment::Removed), size, 3),
            Some(BufferInfo {
                size: Size::from((0, 0)),
                commit: 3,
            })
        );
    }
}
