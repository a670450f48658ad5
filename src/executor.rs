use futures::future::{FutureExt, LocalBoxFuture};
use futures::task::{waker, ArcWake, Context, Poll};
use futures_channel::oneshot;
use intmap::IntMap;
use queues::{IsQueue, Queue};
use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::{TbError, TbResult};

thread_local! {
    static EXECUTOR: RefCell<Executor> = RefCell::new(Executor::new());
}

struct Executor {
    tasks: IntMap<Task>,
    ready: Queue<u64>,
    next_id: u64,
}

impl Executor {
    fn new() -> Self {
        Self {
            tasks: IntMap::new(),
            ready: Queue::new(),
            next_id: 0,
        }
    }
}

pub(crate) fn schedule_task(id: u64) {
    EXECUTOR.with(|e| {
        let mut e = e.borrow_mut();
        let queue = match e.tasks.get_mut(id) {
            // a task is queued at most once per wake
            Some(task) if !task.queued => {
                task.queued = true;
                true
            }
            _ => false,
        };
        if queue {
            let _ = e.ready.add(id);
        }
    });
}

fn next_task() -> Option<u64> {
    EXECUTOR.with(|e| e.borrow_mut().ready.remove().ok())
}

/// Polls woken tasks until every task is suspended.
#[inline]
pub(crate) fn run_once() {
    while let Some(id) = next_task() {
        process_task(id);
    }
}

#[inline]
fn process_task(id: u64) {
    let fut = EXECUTOR.with(|e| {
        let mut e = e.borrow_mut();
        e.tasks.get_mut(id).and_then(|task| {
            task.queued = false;
            task.future.take()
        })
    });
    // completed or cancelled
    let Some(mut fut) = fut else { return };

    let waker = waker(Arc::new(TaskWaker { id }));
    let mut cx = Context::from_waker(&waker);
    match fut.as_mut().poll(&mut cx) {
        Poll::Pending => {
            // the slot is gone if the task cancelled itself while running
            let orphan = EXECUTOR.with(|e| match e.borrow_mut().tasks.get_mut(id) {
                Some(task) => {
                    task.future = Some(fut);
                    None
                }
                None => Some(fut),
            });
            drop(orphan);
        }
        Poll::Ready(result) => {
            let task = EXECUTOR.with(|e| e.borrow_mut().tasks.remove(id));
            if let Err(e) = &result {
                log::debug!(
                    "task '{}' failed: {}",
                    task.as_ref().map(|t| t.name.as_str()).unwrap_or("?"),
                    e
                );
                crate::fail_test(e.clone());
            }
            if let Some(tx) = task.and_then(|mut t| t.join_tx.take()) {
                let _ = tx.send(result);
            }
        }
    }
}

/// Drops every task and pending wake.
pub(crate) fn clear() {
    let old = EXECUTOR.with(|e| std::mem::replace(&mut *e.borrow_mut(), Executor::new()));
    // futures may own JoinHandles or shared objects, drop them outside the borrow
    drop(old);
}

pub fn task_count() -> usize {
    EXECUTOR.with(|e| e.borrow().tasks.len())
}

fn cancel_task(id: u64) {
    let task = EXECUTOR.with(|e| e.borrow_mut().tasks.remove(id));
    drop(task);
}

struct TaskWaker {
    id: u64,
}

impl ArcWake for TaskWaker {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        schedule_task(arc_self.id);
    }
}

pub struct Task {
    future: Option<LocalBoxFuture<'static, TbResult>>,
    name: String,
    queued: bool,
    join_tx: Option<oneshot::Sender<TbResult>>,
}

impl Task {
    pub fn fork(future: impl Future<Output = TbResult> + 'static) -> JoinHandle {
        Task::spawn_from_future(future, "forked")
    }

    pub fn spawn_from_future(
        future: impl Future<Output = TbResult> + 'static,
        name: &str,
    ) -> JoinHandle {
        let (tx, rx) = oneshot::channel::<TbResult>();
        let task = Task {
            future: Some(future.boxed_local()),
            name: name.to_string(),
            queued: false,
            join_tx: Some(tx),
        };
        let id = EXECUTOR.with(|e| {
            let mut e = e.borrow_mut();
            let id = e.next_id;
            e.next_id += 1;
            e.tasks.insert(id, task);
            id
        });
        schedule_task(id);
        JoinHandle {
            id,
            name: name.to_string(),
            join_rx: rx,
        }
    }
}

pub struct JoinHandle {
    id: u64,
    name: String,
    join_rx: oneshot::Receiver<TbResult>,
}

impl JoinHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cancel(self) {
        cancel_task(self.id);
    }
}

impl Future for JoinHandle {
    type Output = TbResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.join_rx.poll_unpin(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(TbError::TaskCancelled(self.name.clone()))),
            Poll::Pending => Poll::Pending,
        }
    }
}
