use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::executor::JoinHandle;
use crate::phase::{child_path, InfraRef, Infrastructure, Phase};
use crate::randomizer::Randomizer;
use crate::scoreboard::ScoreboardInOrder;
use crate::stream::{Stream, StreamDriverMaster, StreamDriverSlave, StreamMonitor};
use crate::transaction::Transaction;
use crate::utils::ClockDomain;
use crate::TbResult;

/// Pushes generated transactions into a FIFO-like DUT and checks that they
/// pop out unchanged and in order.
pub struct StreamFifoTester {
    name: String,
    target: u64,
    closed: Rc<Cell<bool>>,
    generated: Rc<Cell<u64>>,
    popped: Rc<Cell<u64>>,
    scoreboard: Rc<RefCell<ScoreboardInOrder>>,
    tasks: Vec<JoinHandle>,
}

impl StreamFifoTester {
    /// Starts the push driver, the pop ready driver and both monitors. Push
    /// valid and pop ready are both randomized.
    pub fn start<G>(
        name: &str,
        push: &Stream,
        pop: &Stream,
        generator: G,
        target: u64,
        cd: ClockDomain,
    ) -> Rc<RefCell<Self>>
    where
        G: FnMut() -> Transaction + 'static,
    {
        Self::start_with(name, push, pop, generator, target, cd, Randomizer::new())
    }

    /// `valid` gates the push side: an idle push driver only asserts valid
    /// on cycles where it draws true.
    pub fn start_with<G>(
        name: &str,
        push: &Stream,
        pop: &Stream,
        mut generator: G,
        target: u64,
        cd: ClockDomain,
        valid: Randomizer,
    ) -> Rc<RefCell<Self>>
    where
        G: FnMut() -> Transaction + 'static,
    {
        let closed = Rc::new(Cell::new(false));
        let generated = Rc::new(Cell::new(0u64));
        let popped = Rc::new(Cell::new(0u64));
        let scoreboard = Rc::new(RefCell::new(ScoreboardInOrder::new(&child_path(
            name,
            "scoreboard",
        ))));

        let mut tasks = Vec::new();
        {
            let (closed, generated) = (closed.clone(), generated.clone());
            tasks.push(StreamDriverMaster::start_randomized(push, cd, valid, move || {
                if closed.get() {
                    return None;
                }
                generated.set(generated.get() + 1);
                Some(generator())
            }));
        }
        tasks.push(StreamDriverSlave::start(pop, cd));
        {
            let sb = scoreboard.clone();
            tasks.push(StreamMonitor::start(push, cd, move |t| {
                sb.borrow_mut().ref_push(t)
            }));
        }
        {
            let (sb, popped) = (scoreboard.clone(), popped.clone());
            tasks.push(StreamMonitor::start(pop, cd, move |t| {
                popped.set(popped.get() + 1);
                sb.borrow_mut().uut_push(t)
            }));
        }

        Rc::new(RefCell::new(Self {
            name: name.to_string(),
            target,
            closed,
            generated,
            popped,
            scoreboard,
            tasks,
        }))
    }

    pub fn popped(&self) -> u64 {
        self.popped.get()
    }

    pub fn scoreboard(&self) -> Rc<RefCell<ScoreboardInOrder>> {
        self.scoreboard.clone()
    }

    fn pushed(&self) -> u64 {
        self.scoreboard.borrow().ref_count()
    }
}

impl Infrastructure for StreamFifoTester {
    fn name(&self) -> &str {
        &self.name
    }

    fn start_phase(&mut self, phase: Phase) -> TbResult {
        match phase {
            Phase::WaitTasksEnd => self.closed.set(true),
            Phase::Done => {
                for task in self.tasks.drain(..) {
                    task.cancel();
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn has_enough_sim(&self) -> bool {
        self.popped.get() >= self.target
    }

    fn is_drained(&self) -> bool {
        self.generated.get() == self.pushed()
    }

    fn children(&self) -> Vec<InfraRef> {
        let scoreboard: InfraRef = self.scoreboard.clone();
        vec![scoreboard]
    }
}
