use std::cell::{Cell, RefCell};
use std::rc::Rc;

use super::{read_rsp_reference, write_data_beats, write_rsp_reference, AddressPlan, Axi4, Axi4Shared, DECERR};
use crate::executor::JoinHandle;
use crate::phase::{child_path, InfraRef, Infrastructure, Phase};
use crate::scoreboard::{ScoreboardInOrder, ScoreboardOutOfOrder};
use crate::stream::StreamMonitor;
use crate::transaction::Transaction;
use crate::utils::ClockDomain;
use crate::TbResult;

type OooBoard = Rc<RefCell<ScoreboardOutOfOrder>>;

fn on_read_cmd(sb: &OooBoard, plan: &AddressPlan, cmd: &Transaction) -> TbResult {
    let id = cmd.get("id")?;
    for rsp in read_rsp_reference(cmd, plan)? {
        sb.borrow_mut().ref_push(rsp, id)?;
    }
    Ok(())
}

fn on_read_rsp(sb: &OooBoard, counter: &Cell<u64>, mut rsp: Transaction) -> TbResult {
    // data of a decode error is don't care
    if rsp.get("resp")? == DECERR {
        rsp.set("data", 0);
    }
    let last = rsp.get("last")? == 1;
    let id = rsp.get("id")?;
    sb.borrow_mut().uut_push(rsp, id)?;
    if last {
        counter.set(counter.get() + 1);
    }
    Ok(())
}

fn on_write_cmd(sb: &OooBoard, plan: &AddressPlan, cmd: &Transaction) -> TbResult {
    let rsp = write_rsp_reference(cmd, plan)?;
    sb.borrow_mut().ref_push(rsp, cmd.get("id")?)
}

fn on_write_rsp(sb: &OooBoard, counter: &Cell<u64>, rsp: Transaction) -> TbResult {
    let id = rsp.get("id")?;
    sb.borrow_mut().uut_push(rsp, id)?;
    counter.set(counter.get() + 1);
    Ok(())
}

fn cancel_on_done(phase: Phase, tasks: &mut Vec<JoinHandle>) {
    if phase == Phase::Done {
        for task in tasks.drain(..) {
            task.cancel();
        }
    }
}

/// Master-side read checker: every R beat against the address-derived
/// reference of its AR command, per id.
pub struct ReadMasterMonitor {
    name: String,
    target: u64,
    rsp_counter: Rc<Cell<u64>>,
    scoreboard: OooBoard,
    tasks: Vec<JoinHandle>,
}

impl ReadMasterMonitor {
    pub fn start(name: &str, axi: &Axi4, plan: AddressPlan, cd: ClockDomain) -> TbResult<Rc<RefCell<Self>>> {
        let (ar, r) = (axi.ar()?, axi.r()?);
        let scoreboard = Rc::new(RefCell::new(ScoreboardOutOfOrder::new(&child_path(
            name,
            "readRspScoreboard",
        ))));
        let rsp_counter = Rc::new(Cell::new(0));
        let sb = scoreboard.clone();
        let cmd_task = StreamMonitor::start(&ar, cd, move |cmd| on_read_cmd(&sb, &plan, &cmd));
        let (sb, counter) = (scoreboard.clone(), rsp_counter.clone());
        let rsp_task = StreamMonitor::start(&r, cd, move |rsp| on_read_rsp(&sb, &counter, rsp));
        Ok(Rc::new(RefCell::new(Self {
            name: name.to_string(),
            target: 50,
            rsp_counter,
            scoreboard,
            tasks: vec![cmd_task, rsp_task],
        })))
    }

    pub fn set_target(&mut self, target: u64) {
        self.target = target;
    }

    /// Completed read bursts.
    pub fn responses(&self) -> u64 {
        self.rsp_counter.get()
    }
}

impl Infrastructure for ReadMasterMonitor {
    fn name(&self) -> &str {
        &self.name
    }
    fn start_phase(&mut self, phase: Phase) -> TbResult {
        cancel_on_done(phase, &mut self.tasks);
        Ok(())
    }
    fn has_enough_sim(&self) -> bool {
        self.rsp_counter.get() >= self.target
    }
    fn children(&self) -> Vec<InfraRef> {
        let sb: InfraRef = self.scoreboard.clone();
        vec![sb]
    }
}

pub struct WriteMasterMonitor {
    name: String,
    target: u64,
    rsp_counter: Rc<Cell<u64>>,
    scoreboard: OooBoard,
    tasks: Vec<JoinHandle>,
}

impl WriteMasterMonitor {
    pub fn start(name: &str, axi: &Axi4, plan: AddressPlan, cd: ClockDomain) -> TbResult<Rc<RefCell<Self>>> {
        let (aw, b) = (axi.aw()?, axi.b()?);
        let scoreboard = Rc::new(RefCell::new(ScoreboardOutOfOrder::new(&child_path(
            name,
            "writeRspScoreboard",
        ))));
        let rsp_counter = Rc::new(Cell::new(0));
        let sb = scoreboard.clone();
        let cmd_task = StreamMonitor::start(&aw, cd, move |cmd| on_write_cmd(&sb, &plan, &cmd));
        let (sb, counter) = (scoreboard.clone(), rsp_counter.clone());
        let rsp_task = StreamMonitor::start(&b, cd, move |rsp| on_write_rsp(&sb, &counter, rsp));
        Ok(Rc::new(RefCell::new(Self {
            name: name.to_string(),
            target: 50,
            rsp_counter,
            scoreboard,
            tasks: vec![cmd_task, rsp_task],
        })))
    }

    pub fn set_target(&mut self, target: u64) {
        self.target = target;
    }

    pub fn responses(&self) -> u64 {
        self.rsp_counter.get()
    }
}

impl Infrastructure for WriteMasterMonitor {
    fn name(&self) -> &str {
        &self.name
    }
    fn start_phase(&mut self, phase: Phase) -> TbResult {
        cancel_on_done(phase, &mut self.tasks);
        Ok(())
    }
    fn has_enough_sim(&self) -> bool {
        self.rsp_counter.get() >= self.target
    }
    fn children(&self) -> Vec<InfraRef> {
        let sb: InfraRef = self.scoreboard.clone();
        vec![sb]
    }
}

/// Read and write response checking on an `Axi4Shared` master port.
pub struct SharedMasterMonitor {
    name: String,
    target: u64,
    read_counter: Rc<Cell<u64>>,
    write_counter: Rc<Cell<u64>>,
    read_scoreboard: OooBoard,
    write_scoreboard: OooBoard,
    tasks: Vec<JoinHandle>,
}

impl SharedMasterMonitor {
    pub fn start(name: &str, axi: &Axi4Shared, plan: AddressPlan, cd: ClockDomain) -> Rc<RefCell<Self>> {
        let read_scoreboard = Rc::new(RefCell::new(ScoreboardOutOfOrder::new(&child_path(
            name,
            "readRspScoreboard",
        ))));
        let write_scoreboard = Rc::new(RefCell::new(ScoreboardOutOfOrder::new(&child_path(
            name,
            "writeRspScoreboard",
        ))));
        let read_counter = Rc::new(Cell::new(0));
        let write_counter = Rc::new(Cell::new(0));

        let (rsb, wsb) = (read_scoreboard.clone(), write_scoreboard.clone());
        let cmd_task = StreamMonitor::start(&axi.arw, cd, move |cmd| {
            if cmd.get("write")? == 1 {
                on_write_cmd(&wsb, &plan, &cmd)
            } else {
                on_read_cmd(&rsb, &plan, &cmd)
            }
        });
        let (sb, counter) = (write_scoreboard.clone(), write_counter.clone());
        let b_task = StreamMonitor::start(&axi.b, cd, move |rsp| on_write_rsp(&sb, &counter, rsp));
        let (sb, counter) = (read_scoreboard.clone(), read_counter.clone());
        let r_task = StreamMonitor::start(&axi.r, cd, move |rsp| on_read_rsp(&sb, &counter, rsp));

        Rc::new(RefCell::new(Self {
            name: name.to_string(),
            target: 50,
            read_counter,
            write_counter,
            read_scoreboard,
            write_scoreboard,
            tasks: vec![cmd_task, b_task, r_task],
        }))
    }

    pub fn set_target(&mut self, target: u64) {
        self.target = target;
    }
}

impl Infrastructure for SharedMasterMonitor {
    fn name(&self) -> &str {
        &self.name
    }
    fn start_phase(&mut self, phase: Phase) -> TbResult {
        cancel_on_done(phase, &mut self.tasks);
        Ok(())
    }
    fn has_enough_sim(&self) -> bool {
        self.read_counter.get() >= self.target && self.write_counter.get() >= self.target
    }
    fn children(&self) -> Vec<InfraRef> {
        let r: InfraRef = self.read_scoreboard.clone();
        let w: InfraRef = self.write_scoreboard.clone();
        vec![r, w]
    }
}

fn push_write_beats(sb: &Rc<RefCell<ScoreboardInOrder>>, cmd: &Transaction) -> TbResult {
    for beat in write_data_beats(cmd)? {
        sb.borrow_mut().ref_push(beat)?;
    }
    Ok(())
}

fn data_scoreboard(name: &str) -> Rc<RefCell<ScoreboardInOrder>> {
    let mut sb = ScoreboardInOrder::new(&child_path(name, "scoreboard"));
    // W beats may legally reach a slave before their AW command
    sb.tolerate_early_uut();
    Rc::new(RefCell::new(sb))
}

/// Slave-side check of W beats against the commands routed to the slave.
pub struct WriteDataMonitor {
    name: String,
    scoreboard: Rc<RefCell<ScoreboardInOrder>>,
    tasks: Vec<JoinHandle>,
}

impl WriteDataMonitor {
    pub fn start(name: &str, axi: &Axi4, cd: ClockDomain) -> TbResult<Rc<RefCell<Self>>> {
        let (aw, w) = (axi.aw()?, axi.w()?);
        let scoreboard = data_scoreboard(name);
        let sb = scoreboard.clone();
        let cmd_task = StreamMonitor::start(&aw, cd, move |cmd| push_write_beats(&sb, &cmd));
        let sb = scoreboard.clone();
        let data_task = StreamMonitor::start(&w, cd, move |beat| sb.borrow_mut().uut_push(beat));
        Ok(Rc::new(RefCell::new(Self {
            name: name.to_string(),
            scoreboard,
            tasks: vec![cmd_task, data_task],
        })))
    }
}

impl Infrastructure for WriteDataMonitor {
    fn name(&self) -> &str {
        &self.name
    }
    fn start_phase(&mut self, phase: Phase) -> TbResult {
        cancel_on_done(phase, &mut self.tasks);
        Ok(())
    }
    fn children(&self) -> Vec<InfraRef> {
        let sb: InfraRef = self.scoreboard.clone();
        vec![sb]
    }
}

pub struct SharedDataMonitor {
    name: String,
    scoreboard: Rc<RefCell<ScoreboardInOrder>>,
    tasks: Vec<JoinHandle>,
}

impl SharedDataMonitor {
    pub fn start(name: &str, axi: &Axi4Shared, cd: ClockDomain) -> Rc<RefCell<Self>> {
        let scoreboard = data_scoreboard(name);
        let sb = scoreboard.clone();
        let cmd_task = StreamMonitor::start(&axi.arw, cd, move |cmd| {
            if cmd.get("write")? == 1 {
                push_write_beats(&sb, &cmd)
            } else {
                Ok(())
            }
        });
        let sb = scoreboard.clone();
        let data_task = StreamMonitor::start(&axi.w, cd, move |beat| sb.borrow_mut().uut_push(beat));
        Rc::new(RefCell::new(Self {
            name: name.to_string(),
            scoreboard,
            tasks: vec![cmd_task, data_task],
        }))
    }
}

impl Infrastructure for SharedDataMonitor {
    fn name(&self) -> &str {
        &self.name
    }
    fn start_phase(&mut self, phase: Phase) -> TbResult {
        cancel_on_done(phase, &mut self.tasks);
        Ok(())
    }
    fn children(&self) -> Vec<InfraRef> {
        let sb: InfraRef = self.scoreboard.clone();
        vec![sb]
    }
}
