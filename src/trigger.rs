use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use crate::kernel::{self, with_kernel, EdgeKind, WaitOn, Waiter};
use crate::signal::SimObject;
use crate::{TbError, TbResult};

#[derive(Clone)]
pub enum TrigKind {
    Edge(usize, EdgeKind),
    Timer(u64),
    ReadWrite,
    ReadOnly,
    // a time that could not be converted to steps; fails the test when awaited
    Invalid(TbError),
}

/// A one-shot suspension point. Completes only once the kernel fired it.
pub struct Trigger {
    kind: TrigKind,
    fired: Option<Rc<Cell<bool>>>,
}

impl Trigger {
    fn new(kind: TrigKind) -> Self {
        Trigger { kind, fired: None }
    }

    pub fn timer(time: u64, unit: &str) -> Self {
        match kernel::get_sim_steps(time as f64, unit) {
            Ok(steps) => Trigger::new(TrigKind::Timer(steps)),
            Err(e) => Trigger::new(TrigKind::Invalid(e)),
        }
    }
    pub fn timer_steps(steps: u64) -> Self {
        Trigger::new(TrigKind::Timer(steps))
    }
    pub async fn timer_ro(time: u64, unit: &str) -> TbResult {
        Trigger::timer(time, unit).await;
        Trigger::read_only().await;
        Ok(())
    }
    pub async fn timer_rw(time: u64, unit: &str) -> TbResult {
        Trigger::timer(time, unit).await;
        Trigger::read_write().await;
        Ok(())
    }
    pub fn edge(signal: SimObject) -> Self {
        Trigger::new(TrigKind::Edge(signal.handle(), EdgeKind::Any))
    }
    pub fn rising_edge(signal: SimObject) -> Self {
        Trigger::new(TrigKind::Edge(signal.handle(), EdgeKind::Rising))
    }
    pub fn falling_edge(signal: SimObject) -> Self {
        Trigger::new(TrigKind::Edge(signal.handle(), EdgeKind::Falling))
    }
    pub fn read_write() -> Self {
        Trigger::new(TrigKind::ReadWrite)
    }
    pub fn read_only() -> Self {
        Trigger::new(TrigKind::ReadOnly)
    }

    pub fn kind(&self) -> &TrigKind {
        &self.kind
    }
}

impl Future for Trigger {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(fired) = &self.fired {
            // spurious polls must not complete the trigger
            return if fired.get() {
                Poll::Ready(())
            } else {
                Poll::Pending
            };
        }
        let fired = Rc::new(Cell::new(false));
        let (on, edge_kind) = match &self.kind {
            TrigKind::Edge(handle, kind) => (WaitOn::Edge(*handle), *kind),
            TrigKind::Timer(steps) => (WaitOn::Timer(*steps), EdgeKind::Any),
            TrigKind::ReadWrite => (WaitOn::ReadWrite, EdgeKind::Any),
            TrigKind::ReadOnly => (WaitOn::ReadOnly, EdgeKind::Any),
            TrigKind::Invalid(e) => {
                crate::fail_test(e.clone());
                self.fired = Some(fired);
                return Poll::Pending;
            }
        };
        let waiter = Waiter::new(cx.waker().clone(), fired.clone(), edge_kind);
        with_kernel(|k| k.register(on, waiter));
        self.fired = Some(fired);
        Poll::Pending
    }
}

struct EventInner<T> {
    data: Option<T>,
    waiters: Vec<(Waker, Rc<RefCell<Option<T>>>)>,
}

/// A published event. `set` wakes every task currently waiting with a copy of
/// the value; later waiters wait for the next `set`.
pub struct Event<T: Clone> {
    inner: Rc<RefCell<EventInner<T>>>,
}

impl<T: Clone> Clone for Event<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone> Default for Event<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Event<T> {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(EventInner {
                data: None,
                waiters: Vec::new(),
            })),
        }
    }

    pub fn set(&self, value: T) {
        let waiters = {
            let mut inner = self.inner.borrow_mut();
            inner.data = Some(value.clone());
            std::mem::take(&mut inner.waiters)
        };
        for (waker, slot) in waiters {
            slot.borrow_mut().replace(value.clone());
            waker.wake();
        }
    }

    pub fn clear(&self) {
        self.inner.borrow_mut().data = None;
    }

    pub fn is_set(&self) -> bool {
        self.inner.borrow().data.is_some()
    }

    /// Value of the last `set`, if not cleared since.
    pub fn data(&self) -> Option<T> {
        self.inner.borrow().data.clone()
    }

    pub fn wait(&self) -> EventWait<T> {
        EventWait {
            event: self.clone(),
            slot: None,
        }
    }
}

pub struct EventWait<T: Clone> {
    event: Event<T>,
    slot: Option<Rc<RefCell<Option<T>>>>,
}

impl<T: Clone> Future for EventWait<T> {
    type Output = T;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        if let Some(slot) = &self.slot {
            return match slot.borrow_mut().take() {
                Some(v) => Poll::Ready(v),
                None => Poll::Pending,
            };
        }
        let slot = Rc::new(RefCell::new(None));
        self.event
            .inner
            .borrow_mut()
            .waiters
            .push((cx.waker().clone(), slot.clone()));
        self.slot = Some(slot);
        Poll::Pending
    }
}

// a waiter dropped before the event fired, e.g. by a cancelled task, leaves the list
impl<T: Clone> Drop for EventWait<T> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            if let Ok(mut inner) = self.event.inner.try_borrow_mut() {
                inner.waiters.retain(|(_, s)| !Rc::ptr_eq(s, &slot));
            }
        }
    }
}
