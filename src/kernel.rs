//! Deterministic discrete-event scheduler.
//!
//! One kernel is installed per running test on the current thread. It owns the
//! [`SimIf`] and the waiter tables of all triggers. Writes to signals are
//! buffered and applied between delta cycles, so every task woken by the same
//! edge observes the pre-edge values no matter in which order tasks run.
//!
//! A time step runs as follows:
//! 1. all ready tasks run until suspended,
//! 2. delta loop: apply buffered writes, wake matching edge waiters, run tasks;
//!    when no writes are left, read-write waiters are woken once,
//! 3. read-only waiters are woken with settled values,
//! 4. time advances to the earliest timer.

use intmap::IntMap;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::rc::Rc;
use std::task::Waker;

use crate::config::TbConfig;
use crate::executor;
use crate::sim_if::{self, Change, SimIf};
use crate::{TbError, TbResult};

thread_local! {
    static KERNEL: RefCell<Option<Kernel>> = RefCell::new(None);
}

#[derive(PartialEq, Clone, Copy, Debug)]
pub enum EdgeKind {
    Any,
    Rising,
    Falling,
}

impl EdgeKind {
    fn of(change: &Change) -> Self {
        match (change.old, change.new) {
            (0, n) if n != 0 => EdgeKind::Rising,
            (o, 0) if o != 0 => EdgeKind::Falling,
            _ => EdgeKind::Any,
        }
    }
}

pub(crate) struct Waiter {
    waker: Waker,
    fired: Rc<Cell<bool>>,
    // only meaningful for edge waiters
    edge_kind: EdgeKind,
}

impl Waiter {
    pub(crate) fn new(waker: Waker, fired: Rc<Cell<bool>>, edge_kind: EdgeKind) -> Self {
        Self {
            waker,
            fired,
            edge_kind,
        }
    }

    fn fire(self) {
        self.fired.set(true);
        self.waker.wake();
    }
}

pub(crate) enum WaitOn {
    Edge(usize),
    Timer(u64),
    ReadWrite,
    ReadOnly,
}

pub struct Kernel {
    sim: Box<dyn SimIf>,
    precision: i8,
    time: u64,
    max_time: u64,
    max_delta_cycles: u32,
    writes: Vec<(usize, u64)>,
    edge_map: IntMap<VecDeque<Waiter>>,
    timer_map: BTreeMap<u64, VecDeque<Waiter>>,
    read_write: VecDeque<Waiter>,
    read_only: VecDeque<Waiter>,
    result: Option<Result<String, TbError>>,
}

impl Kernel {
    pub fn new(sim: Box<dyn SimIf>, config: &TbConfig) -> TbResult<Self> {
        let max_time = sim_if::get_sim_steps(config.max_sim_time_ns as f64, "ns", config.precision)?;
        Ok(Self {
            sim,
            precision: config.precision,
            time: 0,
            max_time,
            max_delta_cycles: config.max_delta_cycles,
            writes: Vec::new(),
            edge_map: IntMap::new(),
            timer_map: BTreeMap::new(),
            read_write: VecDeque::new(),
            read_only: VecDeque::new(),
            result: None,
        })
    }

    pub fn sim(&self) -> &dyn SimIf {
        self.sim.as_ref()
    }

    pub(crate) fn write(&mut self, handle: usize, value: u64) {
        self.writes.push((handle, value));
    }

    pub(crate) fn register(&mut self, on: WaitOn, waiter: Waiter) {
        match on {
            WaitOn::Edge(handle) => match self.edge_map.get_mut(handle as u64) {
                Some(waiters) => waiters.push_back(waiter),
                None => {
                    let mut waiters = VecDeque::new();
                    waiters.push_back(waiter);
                    self.edge_map.insert(handle as u64, waiters);
                }
            },
            WaitOn::Timer(steps) => {
                // key is absolute time
                self.timer_map
                    .entry(self.time + steps)
                    .or_default()
                    .push_back(waiter);
            }
            WaitOn::ReadWrite => self.read_write.push_back(waiter),
            WaitOn::ReadOnly => self.read_only.push_back(waiter),
        }
    }

    /// Applies buffered writes, last write to a handle wins. Returns the edge
    /// waiters to wake.
    fn apply_writes(&mut self) -> Vec<Waiter> {
        if self.writes.is_empty() {
            return Vec::new();
        }
        let mut last: Vec<(usize, u64)> = Vec::with_capacity(self.writes.len());
        let mut index: HashMap<usize, usize> = HashMap::new();
        for (handle, value) in self.writes.drain(..) {
            match index.get(&handle) {
                Some(&i) => last[i].1 = value,
                None => {
                    index.insert(handle, last.len());
                    last.push((handle, value));
                }
            }
        }

        let mut changes = Vec::new();
        for (handle, value) in last {
            let old = self.sim.get_value(handle);
            self.sim.set_value(handle, value);
            let new = self.sim.get_value(handle);
            if old != new {
                changes.push(Change { handle, old, new });
            }
        }
        changes.extend(self.sim.eval());

        let mut woken = Vec::new();
        for change in changes.iter() {
            let kind = EdgeKind::of(change);
            if let Some(waiters) = self.edge_map.remove(change.handle as u64) {
                let mut keep = VecDeque::new();
                for w in waiters {
                    if w.edge_kind == EdgeKind::Any || w.edge_kind == kind {
                        woken.push(w);
                    } else {
                        keep.push_back(w);
                    }
                }
                if !keep.is_empty() {
                    self.edge_map.insert(change.handle as u64, keep);
                }
            }
        }
        woken
    }

    fn clear_waiters(&mut self) {
        self.writes.clear();
        self.edge_map.clear();
        self.timer_map.clear();
        self.read_write.clear();
        self.read_only.clear();
    }
}

pub(crate) fn with_kernel<R>(f: impl FnOnce(&mut Kernel) -> R) -> R {
    KERNEL.with(|k| {
        let mut k = k.borrow_mut();
        let kernel = k
            .as_mut()
            .expect("no simulation kernel installed on this thread");
        f(kernel)
    })
}

pub(crate) fn install(kernel: Kernel) {
    let old = KERNEL.with(|k| k.borrow_mut().replace(kernel));
    drop(old);
}

pub(crate) fn uninstall() -> Option<Kernel> {
    KERNEL.with(|k| k.borrow_mut().take()).map(|mut k| {
        k.clear_waiters();
        k
    })
}

/// Records the test result. The first result wins.
pub(crate) fn set_result(result: Result<String, TbError>) {
    KERNEL.with(|k| match k.borrow_mut().as_mut() {
        Some(kernel) if kernel.result.is_none() => {
            match &result {
                Ok(msg) => log::info!("test passed at {} ns: {}", ns(kernel), msg),
                Err(e) => log::error!("test failed at {} ns: {}", ns(kernel), e),
            }
            kernel.result = Some(result);
        }
        Some(_) => {}
        None => log::warn!("result outside of a running test: {:?}", result),
    });
}

pub fn has_result() -> bool {
    KERNEL.with(|k| k.borrow().as_ref().map(|k| k.result.is_some()).unwrap_or(false))
}

pub(crate) fn take_result() -> Option<Result<String, TbError>> {
    KERNEL.with(|k| k.borrow_mut().as_mut().and_then(|k| k.result.take()))
}

fn ns(kernel: &Kernel) -> u64 {
    sim_if::steps_to_time(kernel.time, "ns", kernel.precision) as u64
}

pub fn sim_time_steps() -> u64 {
    with_kernel(|k| k.time)
}

pub fn sim_time_in(unit: &str) -> f64 {
    with_kernel(|k| sim_if::steps_to_time(k.time, unit, k.precision))
}

pub fn sim_time_ns() -> u64 {
    with_kernel(|k| ns(k))
}

pub fn get_sim_steps(time: f64, unit: &str) -> TbResult<u64> {
    let precision = with_kernel(|k| k.precision);
    sim_if::get_sim_steps(time, unit, precision)
}

fn fire(waiters: impl IntoIterator<Item = Waiter>) {
    for w in waiters {
        w.fire();
    }
}

fn settle() -> TbResult<()> {
    let mut deltas = 0;
    loop {
        let woken = with_kernel(|k| k.apply_writes());
        if woken.is_empty() {
            let rw = with_kernel(|k| std::mem::take(&mut k.read_write));
            if rw.is_empty() {
                return Ok(());
            }
            fire(rw);
        } else {
            fire(woken);
        }
        executor::run_once();
        if has_result() {
            return Ok(());
        }
        deltas += 1;
        let (max_deltas, time_ns) = with_kernel(|k| (k.max_delta_cycles, ns(k)));
        if deltas > max_deltas {
            return Err(TbError::DeltaCycleLimit {
                time_ns,
                max_deltas,
            });
        }
    }
}

/// Runs the simulation until the test has a result.
pub(crate) fn run() {
    loop {
        executor::run_once();
        if has_result() {
            break;
        }
        if let Err(e) = settle() {
            crate::fail_test(e);
        }
        if has_result() {
            break;
        }

        let ro = with_kernel(|k| std::mem::take(&mut k.read_only));
        if !ro.is_empty() {
            fire(ro);
            executor::run_once();
            if has_result() {
                break;
            }
        }
        // writes issued from read-only are applied as further deltas at the same time
        if with_kernel(|k| !k.writes.is_empty()) {
            continue;
        }

        let next = with_kernel(|k| k.timer_map.keys().next().copied());
        match next {
            None => {
                let time_ns = sim_time_ns();
                crate::fail_test(TbError::Stalled { time_ns });
                break;
            }
            Some(t) if t > with_kernel(|k| k.max_time) => {
                let limit_ns = with_kernel(|k| sim_if::steps_to_time(k.max_time, "ns", k.precision) as u64);
                crate::fail_test(TbError::SimTimeLimit { limit_ns });
                break;
            }
            Some(t) => {
                let waiters = with_kernel(|k| {
                    k.time = t;
                    k.timer_map.remove(&t).unwrap_or_default()
                });
                fire(waiters);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regfile::RegisterFile;

    fn kernel_with(signals: &[(&str, u32)]) -> Kernel {
        let mut rf = RegisterFile::new();
        for (name, width) in signals {
            rf.add_signal(name, *width).unwrap();
        }
        Kernel::new(Box::new(rf), &TbConfig::default()).unwrap()
    }

    fn noop_waiter(kind: EdgeKind) -> (Waiter, Rc<Cell<bool>>) {
        let fired = Rc::new(Cell::new(false));
        let waker = futures::task::noop_waker();
        (Waiter::new(waker, fired.clone(), kind), fired)
    }

    #[test]
    fn last_write_wins_and_no_glitch_edge() {
        let mut k = kernel_with(&[("clk", 1)]);
        let (w, fired) = noop_waiter(EdgeKind::Rising);
        k.register(WaitOn::Edge(0), w);
        k.write(0, 1);
        k.write(0, 0);
        let woken = k.apply_writes();
        assert!(woken.is_empty());
        assert!(!fired.get());
        assert_eq!(k.sim().get_value(0), 0);
    }

    #[test]
    fn edge_kinds_are_filtered() {
        let mut k = kernel_with(&[("clk", 1)]);
        let (rise, _) = noop_waiter(EdgeKind::Rising);
        let (fall, _) = noop_waiter(EdgeKind::Falling);
        let (any, _) = noop_waiter(EdgeKind::Any);
        k.register(WaitOn::Edge(0), rise);
        k.register(WaitOn::Edge(0), fall);
        k.register(WaitOn::Edge(0), any);
        k.write(0, 1);
        let woken = k.apply_writes();
        let kinds: Vec<EdgeKind> = woken.iter().map(|w| w.edge_kind).collect();
        assert_eq!(kinds, vec![EdgeKind::Rising, EdgeKind::Any]);
        // falling waiter stays registered
        assert_eq!(k.edge_map.get(0).map(|w| w.len()), Some(1));
    }

    #[test]
    fn timers_are_keyed_by_absolute_time() {
        let mut k = kernel_with(&[]);
        k.time = 100;
        let (w, _) = noop_waiter(EdgeKind::Any);
        k.register(WaitOn::Timer(50), w);
        assert_eq!(k.timer_map.keys().copied().collect::<Vec<_>>(), vec![150]);
    }

    #[test]
    fn multi_bit_change_is_any_edge() {
        let c = Change {
            handle: 0,
            old: 3,
            new: 5,
        };
        assert_eq!(EdgeKind::of(&c), EdgeKind::Any);
        let c = Change {
            handle: 0,
            old: 0,
            new: 5,
        };
        assert_eq!(EdgeKind::of(&c), EdgeKind::Rising);
    }
}
