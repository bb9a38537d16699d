//! 场景回放：用无头客户端按脚本跑一遍事务流程
//!
//! 场景文件是 JSON：
//!
//! ```json
//! {
//!   "config": { "transaction-timeout-ms": 100 },
//!   "windows": [{ "name": "a", "version": 6, "size": [400, 300] }],
//!   "steps": [
//!     { "commit": { "window": "a" } },
//!     { "set-pending": { "window": "a", "mapped": true, "geometry": [0, 0, 800, 600] } },
//!     { "schedule": ["a"] },
//!     { "respond": "a" }
//!   ]
//! }
//! ```
//!
//! 每一步之后都会像合成器的事件循环那样调用一次 `refresh()`。

use std::cell::RefCell;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use std::rc::Rc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context as _};
use serde::{Deserialize, Serialize};
use smithay::utils::{Logical, Point, Rectangle, Serial, Size};

use crate::backend::headless::{HeadlessSurface, HeadlessToplevel};
use crate::config::Config;
use crate::transaction::TransactionManager;
use crate::utils::signal::Subscription;
use crate::window::{Margins, Phase, TiledEdges, ToplevelTxn};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Scenario {
    #[serde(default)]
    pub config: Config,
    pub windows: Vec<WindowDecl>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct WindowDecl {
    pub name: String,
    /// xdg_toplevel 协议版本
    #[serde(default = "default_version")]
    pub version: u32,
    /// 客户端偏好的内容尺寸
    pub size: [i32; 2],
    /// 第一个 configure 的序列号
    #[serde(default)]
    pub serial_start: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Step {
    /// 修改窗口的 pending 状态
    SetPending(SetPending),
    /// 把若干窗口放进同一个事务
    Schedule(Vec<String>),
    /// 客户端提交，可以同时确认一个 configure
    Commit(ClientCommit),
    /// 客户端确认最新的 configure、采用请求的尺寸并提交
    Respond(String),
    /// 客户端自行改变尺寸（随后需要一次 commit）
    Resize { window: String, size: [i32; 2] },
    /// 客户端移动内容原点（随后需要一次 commit）
    Offset { window: String, origin: [i32; 2] },
    RequestNativeSize(String),
    Destroy(String),
    Refresh,
    /// 等待若干毫秒后刷新，用于触发事务超时
    Wait(u64),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SetPending {
    pub window: String,
    pub mapped: Option<bool>,
    /// x, y, w, h
    pub geometry: Option<[i32; 4]>,
    pub tiled: Option<TiledEdges>,
    pub fullscreen: Option<bool>,
    pub margins: Option<Margins>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClientCommit {
    pub window: String,
    /// 确认指定序列号
    #[serde(default)]
    pub ack: Option<u32>,
    /// 确认最近一次收到的 configure
    #[serde(default)]
    pub ack_latest: bool,
}

/// 回放结束时每个窗口的状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct WindowReport {
    pub name: String,
    pub phase: String,
    pub mapped: bool,
    /// x, y, w, h
    pub geometry: [i32; 4],
    pub tiled: String,
    pub fullscreen: bool,
    pub client_alive: bool,
    pub configures: usize,
}

struct ReplayWindow {
    name: String,
    client: HeadlessToplevel,
    surface: Rc<HeadlessSurface>,
    txn: Rc<RefCell<ToplevelTxn>>,
    _applied: Subscription,
}

struct Replay {
    manager: TransactionManager,
    windows: Vec<ReplayWindow>,
}

fn default_version() -> u32 {
    6
}

impl Scenario {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("error reading scenario file {path:?}"))?;
        Self::parse(&contents).with_context(|| format!("error parsing scenario file {path:?}"))
    }

    pub fn parse(contents: &str) -> anyhow::Result<Self> {
        let scenario = serde_json::from_str(contents)?;
        Ok(scenario)
    }
}

impl Replay {
    fn new(scenario: &Scenario) -> anyhow::Result<Self> {
        let manager = TransactionManager::new(scenario.config.clone());
        let mut windows: Vec<ReplayWindow> = Vec::new();

        for decl in &scenario.windows {
            if windows.iter().any(|w| w.name == decl.name) {
                bail!("duplicate window name {:?}", decl.name);
            }

            let size = checked_size(&decl.name, decl.size)?;
            let client = match decl.serial_start {
                Some(start) => HeadlessToplevel::with_serial_start(decl.version, size, start),
                None => HeadlessToplevel::new(decl.version, size),
            };
            let surface = Rc::new(HeadlessSurface::new());
            let txn = ToplevelTxn::new(
                client.client(),
                client.signals(),
                surface.clone(),
                manager.clone(),
            );

            // 视图跟随新的几何移动父节点
            let node = surface.clone();
            let applied = txn.borrow().applied_signal().connect(move |applied| {
                node.set_parent_bounding_box(Some(applied.new_state.geometry));
            });

            windows.push(ReplayWindow {
                name: decl.name.clone(),
                client,
                surface,
                txn,
                _applied: applied,
            });
        }

        Ok(Self { manager, windows })
    }

    fn window(&self, name: &str) -> anyhow::Result<&ReplayWindow> {
        self.windows
            .iter()
            .find(|w| w.name == name)
            .with_context(|| format!("unknown window {name:?}"))
    }

    fn step(&self, step: &Step) -> anyhow::Result<()> {
        match step {
            Step::SetPending(set) => {
                let window = self.window(&set.window)?;
                let mut txn = window.txn.borrow_mut();
                let pending = txn.pending_mut();
                if let Some(mapped) = set.mapped {
                    pending.mapped = mapped;
                }
                if let Some([x, y, w, h]) = set.geometry {
                    let size = checked_size(&set.window, [w, h])?;
                    pending.geometry = Rectangle::new(Point::from((x, y)), size);
                }
                if let Some(tiled) = set.tiled {
                    pending.tiled_edges = tiled;
                }
                if let Some(fullscreen) = set.fullscreen {
                    pending.fullscreen = fullscreen;
                }
                if let Some(margins) = set.margins {
                    let Margins {
                        left,
                        right,
                        top,
                        bottom,
                    } = margins;
                    if left < 0 || right < 0 || top < 0 || bottom < 0 {
                        bail!("window {:?}: negative margins {margins:?}", set.window);
                    }
                    pending.margins = margins;
                }
            }
            Step::Schedule(names) => {
                let mut tx = self.manager.create_transaction();
                for name in names {
                    let window = self.window(name)?;
                    let object = window
                        .txn
                        .borrow()
                        .object_ref()
                        .with_context(|| format!("window {name:?} is gone"))?;
                    tx.add_object(object);
                }
                self.manager.schedule(tx);
            }
            Step::Commit(commit) => {
                let window = self.window(&commit.window)?;
                if let Some(serial) = commit.ack {
                    window.client.ack_configure(Serial::from(serial));
                } else if commit.ack_latest && window.client.ack_latest().is_none() {
                    warn!(window = %commit.window, "nothing to ack");
                }
                window.client.commit();
            }
            Step::Respond(name) => self.window(name)?.client.respond(),
            Step::Resize { window, size } => {
                let size = checked_size(window, *size)?;
                self.window(window)?.client.resize(size);
            }
            Step::Offset { window, origin } => {
                let origin = Point::from((origin[0], origin[1]));
                self.window(window)?.client.set_geometry_origin(origin);
            }
            Step::RequestNativeSize(name) => {
                self.window(name)?.txn.borrow().request_native_size();
            }
            Step::Destroy(name) => self.window(name)?.client.destroy(),
            Step::Refresh => (),
            Step::Wait(ms) => thread::sleep(Duration::from_millis(*ms)),
        }

        let applied = self.manager.refresh();
        if applied > 0 {
            debug!(applied, "applied transactions");
        }

        Ok(())
    }

    fn report(&self) -> Vec<WindowReport> {
        self.windows.iter().map(ReplayWindow::report).collect()
    }
}

impl ReplayWindow {
    fn report(&self) -> WindowReport {
        let txn = self.txn.borrow();
        let current = txn.current();
        let geometry = current.geometry;

        WindowReport {
            name: self.name.clone(),
            phase: phase_label(txn.phase()),
            mapped: current.mapped,
            geometry: [
                geometry.loc.x,
                geometry.loc.y,
                geometry.size.w,
                geometry.size.h,
            ],
            tiled: edges_label(current.tiled_edges),
            fullscreen: current.fullscreen,
            client_alive: txn.is_client_alive(),
            configures: self
                .client
                .sent_configures()
                .iter()
                .filter(|c| c.serial.is_some())
                .count(),
        }
    }
}

fn checked_size(window: &str, [w, h]: [i32; 2]) -> anyhow::Result<Size<i32, Logical>> {
    if w < 0 || h < 0 {
        bail!("window {window:?}: negative size {w}x{h}");
    }
    Ok(Size::from((w, h)))
}

fn phase_label(phase: Phase) -> String {
    match phase {
        Phase::Idle => String::from("idle"),
        Phase::Committed => String::from("committed"),
        Phase::AwaitingConfigureAck { target } => format!("awaiting-ack({})", u32::from(target)),
        Phase::Ready => String::from("ready"),
    }
}

fn edges_label(edges: TiledEdges) -> String {
    if edges.is_empty() {
        return String::from("-");
    }

    let names: Vec<_> = edges.iter_names().map(|(name, _)| name.to_lowercase()).collect();
    names.join("|")
}

/// 运行场景并返回每个窗口的最终状态
pub fn run(scenario: &Scenario) -> anyhow::Result<Vec<WindowReport>> {
    let _span = tracy_client::span!("replay::run");

    let replay = Replay::new(scenario)?;
    for (i, step) in scenario.steps.iter().enumerate() {
        trace!(index = i, ?step, "replay step");
        replay
            .step(step)
            .with_context(|| format!("error in step {i}"))?;

        for window in &replay.windows {
            let txn = window.txn.borrow();
            debug!(
                step = i,
                window = %window.name,
                phase = ?txn.phase(),
                current = ?txn.current().geometry,
                frame_done = window.surface.frame_done_count(),
                "step done"
            );
        }
    }

    Ok(replay.report())
}

/// 人类可读的报告，每个窗口一行
pub fn format_report(report: &[WindowReport]) -> String {
    let mut out = String::new();
    for w in report {
        let [x, y, width, height] = w.geometry;
        let client = if w.client_alive { "alive" } else { "gone" };
        let _ = writeln!(
            out,
            "{}: {} mapped={} geometry={x},{y} {width}x{height} tiled={} fullscreen={} \
             client={client} configures={}",
            w.name, w.phase, w.mapped, w.tiled, w.fullscreen, w.configures,
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use insta::assert_snapshot;

    use super::*;

    fn replay(json: &str) -> String {
        let scenario = Scenario::parse(json).unwrap();
        format_report(&run(&scenario).unwrap())
    }

    #[test]
    fn map_and_resize() {
        let out = replay(
            r#"{
                "windows": [{ "name": "a", "size": [400, 300] }],
                "steps": [
                    { "commit": { "window": "a" } },
                    { "set-pending": { "window": "a", "mapped": true, "geometry": [0, 0, 800, 600] } },
                    { "schedule": ["a"] },
                    { "respond": "a" }
                ]
            }"#,
        );
        assert_snapshot!(out, @"a: idle mapped=true geometry=0,0 800x600 tiled=- fullscreen=false client=alive configures=2");
    }

    #[test]
    fn waiting_for_ack() {
        let out = replay(
            r#"{
                "windows": [{ "name": "a", "size": [400, 300] }],
                "steps": [
                    { "commit": { "window": "a" } },
                    { "set-pending": { "window": "a", "mapped": true, "geometry": [0, 0, 800, 600] } },
                    { "schedule": ["a"] }
                ]
            }"#,
        );
        assert_snapshot!(out, @"a: awaiting-ack(2) mapped=false geometry=0,0 0x0 tiled=- fullscreen=false client=alive configures=2");
    }

    #[test]
    fn tiled_and_destroyed() {
        let out = replay(
            r#"{
                "config": { "send-frame-done-on-configure": false },
                "windows": [{ "name": "a", "size": [400, 300] }],
                "steps": [
                    { "commit": { "window": "a" } },
                    { "set-pending": { "window": "a", "mapped": true, "geometry": [0, 0, 400, 300] } },
                    { "schedule": ["a"] },
                    { "set-pending": { "window": "a", "tiled": "LEFT | RIGHT" } },
                    { "schedule": ["a"] },
                    { "destroy": "a" }
                ]
            }"#,
        );
        assert_snapshot!(out, @"a: idle mapped=true geometry=0,0 400x300 tiled=left|right fullscreen=false client=gone configures=2");
    }

    #[test]
    fn unknown_window_is_an_error() {
        let scenario = Scenario::parse(
            r#"{ "windows": [], "steps": [{ "destroy": "nope" }] }"#,
        )
        .unwrap();
        let err = run(&scenario).unwrap_err();
        assert_snapshot!(format!("{err:#}"), @r#"error in step 0: unknown window "nope""#);
    }

    #[test]
    fn negative_sizes_are_errors() {
        let scenario = Scenario::parse(
            r#"{
                "windows": [{ "name": "a", "size": [400, 300] }],
                "steps": [
                    { "commit": { "window": "a" } },
                    { "set-pending": { "window": "a", "geometry": [0, 0, -5, 10] } }
                ]
            }"#,
        )
        .unwrap();
        let err = run(&scenario).unwrap_err();
        assert_snapshot!(format!("{err:#}"), @r#"error in step 1: window "a": negative size -5x10"#);

        let scenario = Scenario::parse(
            r#"{ "windows": [{ "name": "b", "size": [-1, 300] }] }"#,
        )
        .unwrap();
        let err = run(&scenario).unwrap_err();
        assert_snapshot!(format!("{err:#}"), @r#"window "b": negative size -1x300"#);

        let scenario = Scenario::parse(
            r#"{
                "windows": [{ "name": "c", "size": [400, 300] }],
                "steps": [{ "resize": { "window": "c", "size": [10, -10] } }]
            }"#,
        )
        .unwrap();
        let err = run(&scenario).unwrap_err();
        assert_snapshot!(format!("{err:#}"), @r#"error in step 0: window "c": negative size 10x-10"#);
    }

    #[test]
    fn negative_margins_are_errors() {
        let scenario = Scenario::parse(
            r#"{
                "windows": [{ "name": "a", "size": [400, 300] }],
                "steps": [
                    { "set-pending": { "window": "a", "margins": { "left": -1, "right": 0, "top": 0, "bottom": 0 } } }
                ]
            }"#,
        )
        .unwrap();
        let err = run(&scenario).unwrap_err();
        assert_snapshot!(
            format!("{err:#}"),
            @r#"error in step 0: window "a": negative margins Margins { left: -1, right: 0, top: 0, bottom: 0 }"#
        );
    }
}
