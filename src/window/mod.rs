// window/mod.rs
// 顶层窗口的事务核心：状态快照、客户端/场景接缝、事务对象本身，以及表面提交监听桥。

pub mod bridge;
pub mod client;
pub mod content;
pub mod state;
pub mod toplevel;

pub use bridge::{ToplevelListeners, ToplevelSignals};
pub use client::{MainSurface, ToplevelClient};
pub use content::{BufferInfo, SurfaceContent};
pub use state::{Margins, TiledEdges, ToplevelState};
pub use toplevel::{Phase, ToplevelApplied, ToplevelTxn};
