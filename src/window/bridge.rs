// window/bridge.rs
// 表面提交监听桥：把客户端协议层的“表面已提交”“toplevel 已销毁”通知转发给事务对象。
//
// 监听在构造时注册，由 ToplevelListeners 持有订阅句柄；
// 句柄随事务对象销毁（或客户端销毁时主动丢弃）而注销，不需要手动维护链表。

use std::cell::RefCell;
use std::rc::Weak;

use super::toplevel::ToplevelTxn;
use crate::transaction::TransactionManager;
use crate::utils::signal::{Signal, Subscription};

/// 客户端协议层为每个 toplevel 提供的通知源
#[derive(Debug, Clone, Default)]
pub struct ToplevelSignals {
    /// 客户端提交了新的表面状态
    pub commit: Signal<()>,
    /// 客户端协议对象被销毁；只会触发一次
    pub destroyed: Signal<()>,
}

/// 事务对象持有的订阅句柄
#[derive(Debug)]
pub struct ToplevelListeners {
    _on_commit: Subscription,
    _on_destroy: Subscription,
}

impl ToplevelSignals {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ToplevelListeners {
    pub fn connect(
        toplevel: Weak<RefCell<ToplevelTxn>>,
        signals: &ToplevelSignals,
        manager: TransactionManager,
    ) -> Self {
        let weak = toplevel.clone();
        let on_commit = signals.commit.connect(move |_| {
            let Some(toplevel) = weak.upgrade() else {
                return;
            };

            // 只有在事务对象被外部借用时才会失败，例如在 applied 回调里触发了客户端提交
            match toplevel.try_borrow_mut() {
                Ok(mut toplevel) => toplevel.handle_surface_commit(),
                Err(_) => warn!("surface commit while the toplevel is borrowed, ignoring"),
            };
        });

        let on_destroy = signals
            .destroyed
            .connect(move |_| handle_destroyed(toplevel.clone(), &manager));

        Self {
            _on_commit: on_commit,
            _on_destroy: on_destroy,
        }
    }
}

/// 销毁通知不能丢：对象正被借用时推迟到下一次 refresh，否则它会一直等待确认
fn handle_destroyed(toplevel: Weak<RefCell<ToplevelTxn>>, manager: &TransactionManager) {
    let Some(strong) = toplevel.upgrade() else {
        return;
    };

    let Ok(mut txn) = strong.try_borrow_mut() else {
        debug!("toplevel destroyed while borrowed, deferring");
        let retry = manager.clone();
        manager.defer(move || handle_destroyed(toplevel, &retry));
        return;
    };
    txn.handle_client_destroyed();
}
