//! 用无头客户端驱动完整 configure/ack 流程的场景测试

use std::cell::RefCell;
use std::rc::Rc;

use smithay::utils::{Logical, Point, Rectangle, Size};

use crate::backend::headless::{HeadlessSurface, HeadlessToplevel};
use crate::config::Config;
use crate::transaction::TransactionManager;
use crate::utils::signal::Subscription;
use crate::window::{Phase, ToplevelApplied, ToplevelState, ToplevelTxn};


struct Fixture {
    manager: TransactionManager,
}

struct TestWindow {
    client: HeadlessToplevel,
    surface: Rc<HeadlessSurface>,
    txn: Rc<RefCell<ToplevelTxn>>,
    applied: Rc<RefCell<Vec<ToplevelApplied>>>,
    _subscription: Subscription,
}

fn rect(x: i32, y: i32, w: i32, h: i32) -> Rectangle<i32, Logical> {
    Rectangle::new(Point::from((x, y)), Size::from((w, h)))
}

fn size(w: i32, h: i32) -> Size<i32, Logical> {
    Size::from((w, h))
}

impl Fixture {
    fn new() -> Self {
        Self::with_config(Config::default())
    }

    fn with_config(config: Config) -> Self {
        Self {
            manager: TransactionManager::new(config),
        }
    }

    fn window(&self, version: u32, w: i32, h: i32) -> TestWindow {
        self.window_with_serial(version, w, h, 1)
    }

    fn window_with_serial(&self, version: u32, w: i32, h: i32, serial: u32) -> TestWindow {
        let client = HeadlessToplevel::with_serial_start(version, size(w, h), serial);
        let surface = Rc::new(HeadlessSurface::new());
        let txn = ToplevelTxn::new(
            client.client(),
            client.signals(),
            surface.clone(),
            self.manager.clone(),
        );

        let applied = Rc::new(RefCell::new(Vec::new()));
        let subscription = {
            let applied = applied.clone();
            let surface = surface.clone();
            txn.borrow().applied_signal().connect(move |event| {
                applied.borrow_mut().push(*event);
                surface.set_parent_bounding_box(Some(event.new_state.geometry));
            })
        };

        TestWindow {
            client,
            surface,
            txn,
            applied,
            _subscription: subscription,
        }
    }

    fn schedule(&self, windows: &[&TestWindow]) {
        let mut tx = self.manager.create_transaction();
        for window in windows {
            tx.add_object(window.txn.borrow().object_ref().unwrap());
        }
        self.manager.schedule(tx);
    }

    fn refresh(&self) -> usize {
        self.manager.refresh()
    }

    /// 初始化窗口并以客户端自己的尺寸映射到 `loc`
    fn map_native(&self, window: &TestWindow, x: i32, y: i32) {
        window.init();
        let size = window.client.geometry().size;
        window.set_pending(|state| {
            state.mapped = true;
            state.geometry = Rectangle::new(Point::from((x, y)), size);
        });
        self.schedule(&[window]);
        assert_eq!(self.refresh(), 1);
    }
}

impl TestWindow {
    /// 初始提交；确认初始 configure 后提交第一个缓冲区
    fn init(&self) {
        self.client.commit();
        self.client.ack_latest();
        self.client.commit();
    }

    fn set_pending(&self, f: impl FnOnce(&mut ToplevelState)) {
        f(self.txn.borrow_mut().pending_mut());
    }

    fn resize_pending(&self, w: i32, h: i32) {
        self.set_pending(|state| state.geometry.size = size(w, h));
    }

    fn current(&self) -> ToplevelState {
        *self.txn.borrow().current()
    }

    fn pending(&self) -> ToplevelState {
        *self.txn.borrow().pending()
    }

    fn committed(&self) -> ToplevelState {
        *self.txn.borrow().committed()
    }

    fn phase(&self) -> Phase {
        self.txn.borrow().phase()
    }

    fn applied(&self) -> Vec<ToplevelApplied> {
        self.applied.borrow().clone()
    }
}
