//! Test lifecycle: `Null -> Sim -> WaitTasksEnd -> (grace timer) ->
//! CheckScoreboards -> Done`, driven over a tree of infrastructure nodes.
//!
//! The manager never waits on events. It re-evaluates the whole tree every
//! `poll_period`, which keeps the termination condition correct whatever
//! shape the tree has.

use std::cell::RefCell;
use std::rc::Rc;

use crate::kernel;
use crate::trigger::Trigger;
use crate::{TbError, TbResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    Null = 0,
    Sim = 100,
    WaitTasksEnd = 200,
    CheckScoreboards = 300,
    Done = 400,
}

pub type InfraRef = Rc<RefCell<dyn Infrastructure>>;

/// Wraps a node for [`PhaseManager::add_child`] and friends.
pub fn infra<T: Infrastructure + 'static>(node: T) -> Rc<RefCell<T>> {
    Rc::new(RefCell::new(node))
}

pub trait Infrastructure {
    fn name(&self) -> &str;

    fn start_phase(&mut self, _phase: Phase) -> TbResult {
        Ok(())
    }

    fn end_phase(&mut self, _phase: Phase) -> TbResult {
        Ok(())
    }

    /// Leaf sufficiency predicate evaluated during `Sim`.
    fn has_enough_sim(&self) -> bool {
        true
    }

    /// No pending work left, evaluated during `WaitTasksEnd`.
    fn is_drained(&self) -> bool {
        true
    }

    fn can_phase_progress(&self, phase: Phase) -> bool {
        match phase {
            Phase::Sim => self.has_enough_sim(),
            Phase::WaitTasksEnd => self.is_drained(),
            _ => true,
        }
    }

    fn children(&self) -> Vec<InfraRef> {
        Vec::new()
    }
}

pub fn child_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", parent, name)
    }
}

fn start_tree(node: &InfraRef, phase: Phase) -> TbResult {
    let children = {
        let mut n = node.borrow_mut();
        n.start_phase(phase)?;
        n.children()
    };
    for child in children.iter() {
        start_tree(child, phase)?;
    }
    Ok(())
}

fn end_tree(node: &InfraRef, phase: Phase) -> TbResult {
    let children = node.borrow().children();
    for child in children.iter() {
        end_tree(child, phase)?;
    }
    node.borrow_mut().end_phase(phase)
}

/// Collects the paths of every node in the subtree not ready to leave `phase`.
fn blocking_paths(node: &InfraRef, phase: Phase, parent: &str, out: &mut Vec<String>) {
    let (ready, path, children) = {
        let n = node.borrow();
        (n.can_phase_progress(phase), child_path(parent, n.name()), n.children())
    };
    if !ready {
        out.push(path.clone());
    }
    for child in children.iter() {
        blocking_paths(child, phase, &path, out);
    }
}

pub struct PhaseManager {
    phase: Phase,
    children: Vec<InfraRef>,
    poll_period_ns: u64,
    wait_tasks_end_ns: u64,
    phase_timeout_ns: Option<u64>,
}

impl Default for PhaseManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseManager {
    pub fn new() -> Self {
        Self {
            phase: Phase::Null,
            children: Vec::new(),
            poll_period_ns: 10,
            wait_tasks_end_ns: 1000,
            phase_timeout_ns: Some(10_000_000),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn add_child<T: Infrastructure + 'static>(&mut self, child: Rc<RefCell<T>>) {
        self.children.push(child);
    }

    pub fn set_poll_period(&mut self, ns: u64) {
        self.poll_period_ns = ns.max(1);
    }

    pub fn set_wait_tasks_end_time(&mut self, ns: u64) {
        self.wait_tasks_end_ns = ns;
    }

    pub fn set_phase_timeout(&mut self, ns: Option<u64>) {
        self.phase_timeout_ns = ns;
    }

    fn blocking(&self) -> Vec<String> {
        let mut out = Vec::new();
        for child in self.children.iter() {
            blocking_paths(child, self.phase, "", &mut out);
        }
        out
    }

    pub fn can_phase_progress(&self) -> bool {
        self.blocking().is_empty()
    }

    fn switch_phase(&mut self, phase: Phase) -> TbResult {
        for child in self.children.iter() {
            end_tree(child, self.phase)?;
        }
        log::info!("phase {:?} -> {:?} at {} ns", self.phase, phase, kernel::sim_time_ns());
        self.phase = phase;
        for child in self.children.iter() {
            start_tree(child, phase)?;
        }
        Ok(())
    }

    async fn wait_children(&self) -> TbResult {
        let start = kernel::sim_time_ns();
        loop {
            let blocking = self.blocking();
            if blocking.is_empty() {
                return Ok(());
            }
            let now = kernel::sim_time_ns();
            if let Some(timeout) = self.phase_timeout_ns {
                if now - start > timeout {
                    return Err(TbError::Timeout {
                        phase: self.phase,
                        time_ns: now,
                        blocking: blocking.join(", "),
                    });
                }
            }
            Trigger::timer(self.poll_period_ns, "ns").await;
        }
    }

    /// Runs the whole lifecycle. A `WaitTasksEnd` timeout still goes through
    /// `CheckScoreboards`: a scoreboard holding a lost transaction fails there
    /// with its leak, anything else blocking fails with the timeout.
    pub async fn run(&mut self) -> TbResult {
        self.switch_phase(Phase::Sim)?;
        self.wait_children().await?;
        self.switch_phase(Phase::WaitTasksEnd)?;
        let drained = self.wait_children().await;
        if drained.is_ok() {
            Trigger::timer(self.wait_tasks_end_ns, "ns").await;
        } else {
            log::warn!("{}: checking scoreboards anyway", self.blocking().join(", "));
        }
        self.switch_phase(Phase::CheckScoreboards)?;
        self.switch_phase(Phase::Done)?;
        drained
    }
}
