//! 作用：客户端与场景节点的后端实现
//! 说明：事务对象只通过 `ToplevelClient` / `MainSurface` 接口与外界交互，
//!       这里提供不依赖 Wayland 连接的无头实现，供测试与回放工具驱动

pub mod headless;
