//! 事务处理模块：把多个窗口的状态变化合并成一次原子可见的更新
//!
//! 在合成器中的作用：
//! 1. 确保一组相关操作（如多个窗口同时调整大小）在同一帧内生效
//! 2. 防止中间状态暴露给用户
//! 3. 提供超时机制防止客户端无响应
//!
//! 核心设计：
//! - 管理器是廉价可克隆的 `Rc` 句柄，事务对象持有一份用于查询和通知就绪
//! - 事务对象只通过 [`TransactionObject`] 接口被调用：`commit()` 开始、`apply()` 结束
//! - 就绪通知先进入队列，由 [`TransactionManager::refresh`] 统一处理，
//!   因此对象在自己的回调里通知就绪不会重入管理器
//! - 超时定时器挂在 calloop 事件循环上，确保事务最终完成

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::mem;
use std::rc::{Rc, Weak};
use std::time::Instant;

use anyhow::{anyhow, Context as _};
use calloop::ping::{make_ping, Ping};
use calloop::timer::{TimeoutAction, Timer};
use calloop::{LoopHandle, RegistrationToken};

use crate::config::Config;
use crate::utils::id::typed_id;

typed_id!(
    /// 参与事务的对象ID
    ObjectId,
    OBJECT_ID_COUNTER
);

typed_id!(
    /// 事务ID
    TransactionId,
    TRANSACTION_ID_COUNTER
);

/// 可以参与事务的对象
pub trait TransactionObject {
    /// 事务开始：对象把 pending 状态提交出去，准备好后调用
    /// [`TransactionManager::object_ready`]
    fn commit(&mut self);

    /// 事务中所有对象都已就绪（或事务被强制完成）：让已提交状态可见
    fn apply(&mut self);
}

/// 事务对对象的非独占引用
#[derive(Clone)]
pub struct ObjectRef {
    id: ObjectId,
    object: Rc<RefCell<dyn TransactionObject>>,
}

/// 一组需要同时生效的对象
pub struct Transaction {
    id: TransactionId,
    objects: Vec<ObjectRef>,
}

/// 事务管理器句柄
#[derive(Clone)]
pub struct TransactionManager {
    inner: Rc<RefCell<Inner>>,
}

struct Inner {
    config: Config,
    /// 已调度、尚未开始的事务
    pending: Vec<Transaction>,
    /// 已开始、等待对象就绪的事务
    committed: Vec<Committed>,
    /// 尚未处理的就绪通知
    ready_queue: Vec<ObjectId>,
    /// 推迟到下一次 refresh 开头执行的回调
    deferred: Vec<Box<dyn FnOnce()>>,
    /// 防止 refresh 重入
    refreshing: bool,
    timers: Option<DeadlineTimers>,
}

/// 已提交事务的运行状态
struct Committed {
    tx: Transaction,
    ready: HashSet<ObjectId>,
    deadline: Instant,
    timer: Deadline,
}

/// 超时定时器状态
enum Deadline {
    /// 没有事件循环，靠下一次 refresh 轮询
    NotRegistered,
    /// 定时器已注册
    Registered(RegistrationToken),
}

/// 挂在事件循环上的超时定时器
struct DeadlineTimers {
    insert: Box<dyn Fn(Instant) -> anyhow::Result<RegistrationToken>>,
    /// 等待移除的定时器；通过 ping 推迟到下一次事件分发时移除，
    /// 因为定时器回调本身可能正在触发这次完成
    to_remove: Rc<RefCell<Vec<RegistrationToken>>>,
    remove: Ping,
}

impl ObjectRef {
    pub fn new(id: ObjectId, object: Rc<RefCell<dyn TransactionObject>>) -> Self {
        Self { id, object }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ObjectRef").field(&self.id).finish()
    }
}

impl Transaction {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            id: TransactionId::next(),
            objects: Vec::new(),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// 添加对象；同一对象重复添加会被忽略
    pub fn add_object(&mut self, object: ObjectRef) {
        if self.contains(object.id) {
            return;
        }
        self.objects.push(object);
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.objects.iter().any(|o| o.id == id)
    }

    pub fn object_ids(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.objects.iter().map(|o| o.id)
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    fn shares_objects_with(&self, other: &Transaction) -> bool {
        other.objects.iter().any(|o| self.contains(o.id))
    }

    fn merge(&mut self, other: Transaction) {
        for object in other.objects {
            self.add_object(object);
        }
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("objects", &self.objects)
            .finish()
    }
}

impl TransactionManager {
    pub fn new(config: Config) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                config,
                pending: Vec::new(),
                committed: Vec::new(),
                ready_queue: Vec::new(),
                deferred: Vec::new(),
                refreshing: false,
                timers: None,
            })),
        }
    }

    pub fn config(&self) -> Config {
        self.inner.borrow().config.clone()
    }

    pub fn set_config(&self, config: Config) {
        self.inner.borrow_mut().config = config;
    }

    pub fn create_transaction(&self) -> Transaction {
        Transaction::new()
    }

    /// 把超时定时器注册到事件循环
    ///
    /// 之后每个开始的事务都会在截止时间触发一次 refresh，强制完成未就绪的事务。
    pub fn register_deadline_timers<T: 'static>(
        &self,
        event_loop: &LoopHandle<'static, T>,
    ) -> anyhow::Result<()> {
        let to_remove: Rc<RefCell<Vec<RegistrationToken>>> = Rc::default();

        let (ping, source) = make_ping().context("error creating timer removal ping")?;
        let loop_handle = event_loop.clone();
        let queue = to_remove.clone();
        event_loop
            .insert_source(source, move |_, _, _| {
                for token in queue.borrow_mut().drain(..) {
                    loop_handle.remove(token);
                }
            })
            .map_err(|err| anyhow!("error inserting timer removal ping: {}", err.error))?;

        let weak: Weak<RefCell<Inner>> = Rc::downgrade(&self.inner);
        let loop_handle = event_loop.clone();
        let insert = move |deadline: Instant| {
            let weak = weak.clone();
            loop_handle
                .insert_source(Timer::from_deadline(deadline), move |_, _, _| {
                    let _span = trace_span!("transaction deadline").entered();

                    if let Some(inner) = weak.upgrade() {
                        TransactionManager { inner }.refresh();
                    }

                    TimeoutAction::Drop
                })
                .map_err(|err| anyhow!("error inserting deadline timer: {}", err.error))
        };

        self.inner.borrow_mut().timers = Some(DeadlineTimers {
            insert: Box::new(insert),
            to_remove,
            remove: ping,
        });

        Ok(())
    }

    /// 调度事务；事务会在下一次 refresh 时开始
    ///
    /// 与已调度事务共享对象时两者合并，保证一个对象不会同时处于两个待开始的事务。
    pub fn schedule(&self, mut tx: Transaction) {
        if tx.is_empty() {
            trace!("ignoring empty transaction");
            return;
        }

        let mut inner = self.inner.borrow_mut();

        let mut i = 0;
        while i < inner.pending.len() {
            if inner.pending[i].shares_objects_with(&tx) {
                let other = inner.pending.remove(i);
                trace!(into = ?tx.id, from = ?other.id, "merging pending transactions");
                tx.merge(other);
            } else {
                i += 1;
            }
        }

        debug!(transaction = ?tx.id, objects = tx.objects.len(), "scheduling transaction");
        inner.pending.push(tx);
    }

    /// 对象是否处于已调度但尚未开始的事务中
    pub fn is_object_pending(&self, id: ObjectId) -> bool {
        self.inner.borrow().pending.iter().any(|tx| tx.contains(id))
    }

    /// 对象是否处于已开始、尚未应用的事务中
    pub fn is_object_committed(&self, id: ObjectId) -> bool {
        self.inner
            .borrow()
            .committed
            .iter()
            .any(|c| c.tx.contains(id))
    }

    /// 对象通知自己已就绪
    pub fn object_ready(&self, id: ObjectId) {
        trace!(object = ?id, "object ready");
        self.inner.borrow_mut().ready_queue.push(id);
    }

    /// 推迟执行回调，在下一次 refresh 开始时调用
    ///
    /// 用于对象正被借用、不能立即处理的通知。
    pub fn defer(&self, f: impl FnOnce() + 'static) {
        self.inner.borrow_mut().deferred.push(Box::new(f));
    }

    /// 是否还有未完成的事务
    pub fn has_work(&self) -> bool {
        let inner = self.inner.borrow();
        !inner.pending.is_empty() || !inner.committed.is_empty()
    }

    /// 最早的截止时间
    pub fn next_deadline(&self) -> Option<Instant> {
        self.inner.borrow().committed.iter().map(|c| c.deadline).min()
    }

    /// 推进所有事务直到状态稳定，返回本次应用的事务数
    ///
    /// 同一事务中所有对象的 `apply()` 在同一次同步调用中依次完成，
    /// 中间不会返回事件循环，渲染不会看到一半新一半旧的状态。
    pub fn refresh(&self) -> usize {
        let _span = tracy_client::span!("TransactionManager::refresh");

        {
            let mut inner = self.inner.borrow_mut();
            if inner.refreshing {
                return 0;
            }
            inner.refreshing = true;
        }

        // 回调里可能再次推迟，留到下一次 refresh
        let deferred = mem::take(&mut self.inner.borrow_mut().deferred);
        for f in deferred {
            f();
        }

        let mut applied = 0;
        loop {
            let done = self.take_finished();
            let progressed_apply = !done.is_empty();
            for tx in done {
                apply_transaction(tx);
                applied += 1;
            }

            let started = self.start_pending();
            let progressed_commit = !started.is_empty();
            for tx_objects in started {
                for object in tx_objects {
                    object.object.borrow_mut().commit();
                }
            }

            if !progressed_apply && !progressed_commit {
                break;
            }
        }

        self.inner.borrow_mut().refreshing = false;
        applied
    }

    /// 处理就绪队列，取出可以应用的事务
    fn take_finished(&self) -> Vec<Transaction> {
        let mut inner = self.inner.borrow_mut();
        let inner = &mut *inner;

        for id in inner.ready_queue.drain(..) {
            for committed in &mut inner.committed {
                if committed.tx.contains(id) {
                    committed.ready.insert(id);
                }
            }
        }

        let now = Instant::now();
        let disabled = inner.config.disable_transactions;

        let mut done = Vec::new();
        let mut i = 0;
        while i < inner.committed.len() {
            let c = &inner.committed[i];
            let all_ready = c.tx.object_ids().all(|id| c.ready.contains(&id));
            let timed_out = now >= c.deadline;

            if all_ready || timed_out || disabled {
                let c = inner.committed.remove(i);
                if !all_ready && timed_out {
                    let waiting: Vec<_> = c
                        .tx
                        .object_ids()
                        .filter(|id| !c.ready.contains(id))
                        .collect();
                    warn!(
                        transaction = ?c.tx.id,
                        ?waiting,
                        "transaction timed out, applying anyway"
                    );
                }

                if let Deadline::Registered(token) = c.timer {
                    if let Some(timers) = &inner.timers {
                        timers.to_remove.borrow_mut().push(token);
                        timers.remove.ping();
                    }
                }

                done.push(c.tx);
            } else {
                i += 1;
            }
        }

        done
    }

    /// 开始所有与已提交事务不冲突的待开始事务，返回需要调用 `commit()` 的对象
    fn start_pending(&self) -> Vec<Vec<ObjectRef>> {
        let mut inner = self.inner.borrow_mut();
        let inner = &mut *inner;

        let timeout = inner.config.transaction_timeout();
        let mut started = Vec::new();

        let mut i = 0;
        while i < inner.pending.len() {
            let blocked = inner
                .committed
                .iter()
                .any(|c| c.tx.shares_objects_with(&inner.pending[i]));
            if blocked {
                i += 1;
                continue;
            }

            let tx = inner.pending.remove(i);
            let deadline = Instant::now() + timeout;

            let timer = match &inner.timers {
                Some(timers) => match (timers.insert)(deadline) {
                    Ok(token) => Deadline::Registered(token),
                    Err(err) => {
                        warn!("{err:?}");
                        Deadline::NotRegistered
                    }
                },
                None => Deadline::NotRegistered,
            };

            debug!(transaction = ?tx.id, objects = tx.objects.len(), "committing transaction");
            started.push(tx.objects.clone());
            inner.committed.push(Committed {
                tx,
                ready: HashSet::new(),
                deadline,
                timer,
            });
        }

        started
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("TransactionManager")
            .field("pending", &inner.pending)
            .field("committed", &inner.committed.len())
            .finish()
    }
}

fn apply_transaction(tx: Transaction) {
    let _span = trace_span!("apply transaction", transaction = ?tx.id).entered();
    for object in &tx.objects {
        object.object.borrow_mut().apply();
    }
}
