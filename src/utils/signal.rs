//! 单线程信号与订阅句柄。
//!
//! 在合成器中的作用：
//! 1. 把“客户端提交了新缓冲区”“客户端对象被销毁”这类底层通知转发给事务对象
//! 2. 把“状态已应用”通知转发给拥有窗口的上层视图
//!
//! 核心设计：
//! - 监听者列表通过 `Rc<RefCell<..>>` 在信号的所有克隆之间共享
//! - `connect()` 返回拥有所有权的 [`Subscription`]，句柄被丢弃时自动注销
//! - 发射时先复制监听者快照，回调中注销（包括注销自己）是安全的

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::utils::id::typed_id;

typed_id!(
    /// 监听者的唯一ID
    ListenerId,
    LISTENER_ID_COUNTER
);

type Callback<E> = Rc<dyn Fn(&E)>;
type Listeners<E> = RefCell<Vec<(ListenerId, Callback<E>)>>;

/// 可克隆的信号，克隆体共享同一监听者列表。
pub struct Signal<E> {
    listeners: Rc<Listeners<E>>,
}

/// 拥有所有权的订阅句柄。
///
/// 句柄存活期间回调保持注册；句柄被丢弃（或调用 [`Subscription::disconnect`]）时回调被移除。
/// 信号先于句柄销毁也没有问题：此时注销是空操作。
#[must_use = "dropping a Subscription disconnects the listener immediately"]
pub struct Subscription {
    id: ListenerId,
    remove: Option<Box<dyn FnOnce(ListenerId)>>,
}

impl<E: 'static> Signal<E> {
    pub fn new() -> Self {
        Self {
            listeners: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// 注册回调，返回订阅句柄
    pub fn connect(&self, callback: impl Fn(&E) + 'static) -> Subscription {
        let id = ListenerId::next();
        let callback: Callback<E> = Rc::new(callback);
        self.listeners.borrow_mut().push((id, callback));

        let weak: Weak<Listeners<E>> = Rc::downgrade(&self.listeners);
        Subscription {
            id,
            remove: Some(Box::new(move |id| {
                if let Some(listeners) = weak.upgrade() {
                    listeners.borrow_mut().retain(|(x, _)| *x != id);
                }
            })),
        }
    }

    /// 依次调用所有监听者
    pub fn emit(&self, event: &E) {
        // 复制快照：回调可能注销监听者或注册新的监听者
        let snapshot: Vec<_> = self
            .listeners
            .borrow()
            .iter()
            .map(|(id, cb)| (*id, cb.clone()))
            .collect();

        for (id, callback) in snapshot {
            // 已被前面的回调注销的监听者不再调用
            let still_connected = self.listeners.borrow().iter().any(|(x, _)| *x == id);
            if still_connected {
                callback(event);
            }
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.borrow().len()
    }
}

impl<E: 'static> Default for Signal<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clone for Signal<E> {
    fn clone(&self) -> Self {
        Self {
            listeners: self.listeners.clone(),
        }
    }
}

impl<E> fmt::Debug for Signal<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("listeners", &self.listeners.borrow().len())
            .finish()
    }
}

impl Subscription {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// 显式注销
    pub fn disconnect(mut self) {
        self.remove_now();
    }

    fn remove_now(&mut self) {
        if let Some(remove) = self.remove.take() {
            remove(self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.remove_now();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("connected", &self.remove.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    #[test]
    fn emits_to_connected_listeners() {
        let signal = Signal::<u32>::new();
        let sum = Rc::new(Cell::new(0));

        let sum2 = sum.clone();
        let _a = signal.connect(move |x| sum2.set(sum2.get() + x));
        let sum3 = sum.clone();
        let _b = signal.connect(move |x| sum3.set(sum3.get() + x * 10));

        signal.emit(&2);
        assert_eq!(sum.get(), 22);
    }

    #[test]
    fn drop_unregisters() {
        let signal = Signal::<()>::new();
        let count = Rc::new(Cell::new(0));

        let count2 = count.clone();
        let sub = signal.connect(move |_| count2.set(count2.get() + 1));
        signal.emit(&());
        drop(sub);
        signal.emit(&());

        assert_eq!(count.get(), 1);
        assert_eq!(signal.listener_count(), 0);
    }

    #[test]
    fn listener_may_disconnect_itself_during_emit() {
        let signal = Signal::<()>::new();
        let count = Rc::new(Cell::new(0));
        let slot: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));

        let count2 = count.clone();
        let slot2 = slot.clone();
        let sub = signal.connect(move |_| {
            count2.set(count2.get() + 1);
            // 只触发一次
            slot2.borrow_mut().take();
        });
        *slot.borrow_mut() = Some(sub);

        signal.emit(&());
        signal.emit(&());
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn earlier_listener_can_disconnect_later_one() {
        let signal = Signal::<()>::new();
        let fired = Rc::new(Cell::new(false));
        let slot: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));

        let slot2 = slot.clone();
        let _first = signal.connect(move |_| {
            slot2.borrow_mut().take();
        });
        let fired2 = fired.clone();
        *slot.borrow_mut() = Some(signal.connect(move |_| fired2.set(true)));

        signal.emit(&());
        assert!(!fired.get());
    }

    #[test]
    fn subscription_outlives_signal() {
        let signal = Signal::<()>::new();
        let sub = signal.connect(|_| ());
        drop(signal);
        sub.disconnect();
    }
}
