// window/content.rs
// 客户端最近一次重绘的表面内容描述。
// 事务对象把多次提交的内容惰性合并，只在 apply() 时（或确定不需要事务时）才交给场景节点。

use smithay::utils::{Logical, Rectangle, Size};

/// 客户端附加的缓冲区
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferInfo {
    pub size: Size<i32, Logical>,
    /// 客户端第几次提交附加了这个缓冲区
    pub commit: u64,
}

/// 尚未应用到场景节点的表面内容
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SurfaceContent {
    /// `None` 表示这段时间内缓冲区没有变化
    pub buffer: Option<BufferInfo>,
    /// 累积的表面损坏区域（表面局部坐标）
    pub damage: Vec<Rectangle<i32, Logical>>,
}

impl SurfaceContent {
    pub fn is_empty(&self) -> bool {
        self.buffer.is_none() && self.damage.is_empty()
    }

    /// 合并更新的内容：缓冲区取最新的，损坏区域累加
    pub fn merge(&mut self, newer: SurfaceContent) {
        if newer.buffer.is_some() {
            self.buffer = newer.buffer;
        }
        self.damage.extend(newer.damage);
    }
}
