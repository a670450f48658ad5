use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use super::{Axi4, Axi4Shared, OKAY};
use crate::executor::JoinHandle;
use crate::phase::{Infrastructure, Phase};
use crate::randomizer::Randomizer;
use crate::stream::{StreamDriverMaster, StreamDriverSlave, StreamMonitor};
use crate::transaction::Transaction;
use crate::utils::{rand_int, ClockDomain};
use crate::{TbError, TbResult};

/// Responses queued per id. Emission picks a random non-empty id, so
/// responses to different ids interleave while each id stays in order.
#[derive(Default)]
struct RspQueues {
    queues: BTreeMap<u64, VecDeque<Transaction>>,
}

impl RspQueues {
    fn push(&mut self, id: u64, rsp: Transaction) {
        self.queues.entry(id).or_default().push_back(rsp);
    }

    fn pop_random(&mut self) -> Option<Transaction> {
        if self.queues.is_empty() {
            return None;
        }
        let idx = rand_int(self.queues.len() as u64) as usize;
        let id = *self.queues.keys().nth(idx)?;
        let queue = self.queues.get_mut(&id)?;
        let rsp = queue.pop_front();
        if queue.is_empty() {
            self.queues.remove(&id);
        }
        rsp
    }

    fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }
}

fn check_window(addr: u64, base: u64, size: u64) -> TbResult {
    if addr < base || addr >= base + size {
        return Err(TbError::protocol(format!(
            "WRONG ADDRESS addr={} base={} size={}",
            addr, base, size
        )));
    }
    Ok(())
}

struct ReadSlave {
    base: u64,
    size: u64,
    rsp_rand: Randomizer,
    rsps: RspQueues,
}

impl ReadSlave {
    fn new(base: u64, size: u64) -> Self {
        Self {
            base,
            size,
            rsp_rand: Randomizer::new(),
            rsps: RspQueues::default(),
        }
    }

    fn on_read_cmd(&mut self, cmd: &Transaction) -> TbResult {
        let addr = cmd.get("addr")?;
        check_window(addr, self.base, self.size)?;
        let len = cmd.get("len")?;
        let id = cmd.get("id")?;
        for i in 0..=len {
            let rsp = Transaction::new()
                .with("data", addr + i)
                .with("resp", OKAY)
                .with("id", id)
                .with("last", (i == len) as u64);
            self.rsps.push(id, rsp);
        }
        Ok(())
    }

    fn gen_read_rsp(&mut self) -> Option<Transaction> {
        if self.rsps.is_empty() || !self.rsp_rand.get() {
            return None;
        }
        self.rsps.pop_random()
    }
}

struct WriteSlave {
    base: u64,
    size: u64,
    rsp_rand: Randomizer,
    cmds: VecDeque<Transaction>,
    datas: VecDeque<Transaction>,
    rsps: RspQueues,
}

impl WriteSlave {
    fn new(base: u64, size: u64) -> Self {
        Self {
            base,
            size,
            rsp_rand: Randomizer::new(),
            cmds: VecDeque::new(),
            datas: VecDeque::new(),
            rsps: RspQueues::default(),
        }
    }

    fn on_write_cmd(&mut self, cmd: Transaction) -> TbResult {
        check_window(cmd.get("addr")?, self.base, self.size)?;
        self.cmds.push_back(cmd);
        self.manage_pending_writes()
    }

    fn on_write_data(&mut self, beat: Transaction) -> TbResult {
        self.datas.push_back(beat);
        self.manage_pending_writes()
    }

    /// A write is answered once its `len + 1` beats arrived.
    fn manage_pending_writes(&mut self) -> TbResult {
        while let Some(cmd) = self.cmds.front() {
            let beats = cmd.get("len")? as usize + 1;
            if self.datas.len() < beats {
                break;
            }
            let id = cmd.get("id")?;
            self.datas.drain(..beats);
            self.cmds.pop_front();
            self.rsps
                .push(id, Transaction::new().with("id", id).with("resp", OKAY));
        }
        Ok(())
    }

    fn gen_write_rsp(&mut self) -> Option<Transaction> {
        if self.rsps.is_empty() || !self.rsp_rand.get() {
            return None;
        }
        self.rsps.pop_random()
    }

    fn is_idle(&self) -> bool {
        self.cmds.is_empty() && self.rsps.is_empty()
    }
}

fn cancel_on_done(phase: Phase, tasks: &mut Vec<JoinHandle>) {
    if phase == Phase::Done {
        for task in tasks.drain(..) {
            task.cancel();
        }
    }
}

/// Slave model answering reads in `[base, base + size)` with address-derived data.
pub struct ReadSlaveDriver {
    name: String,
    slave: Rc<RefCell<ReadSlave>>,
    tasks: Vec<JoinHandle>,
}

impl ReadSlaveDriver {
    pub fn start(axi: &Axi4, base: u64, size: u64, cd: ClockDomain) -> TbResult<Rc<RefCell<Self>>> {
        let (ar, r) = (axi.ar()?, axi.r()?);
        if let Some(id) = r.payload.get("id") {
            id.set(0);
        }
        let slave = Rc::new(RefCell::new(ReadSlave::new(base, size)));
        let mut tasks = vec![StreamDriverSlave::start(&ar, cd)];
        let s = slave.clone();
        tasks.push(StreamMonitor::start(&ar, cd, move |cmd| s.borrow_mut().on_read_cmd(&cmd)));
        let s = slave.clone();
        tasks.push(StreamDriverMaster::start(&r, cd, move || s.borrow_mut().gen_read_rsp()));
        Ok(Rc::new(RefCell::new(Self {
            name: format!("{}_readSlave", axi.name),
            slave,
            tasks,
        })))
    }
}

impl Infrastructure for ReadSlaveDriver {
    fn name(&self) -> &str {
        &self.name
    }
    fn start_phase(&mut self, phase: Phase) -> TbResult {
        cancel_on_done(phase, &mut self.tasks);
        Ok(())
    }
    fn is_drained(&self) -> bool {
        self.slave.borrow().rsps.is_empty()
    }
}

pub struct WriteSlaveDriver {
    name: String,
    slave: Rc<RefCell<WriteSlave>>,
    tasks: Vec<JoinHandle>,
}

impl WriteSlaveDriver {
    pub fn start(axi: &Axi4, base: u64, size: u64, cd: ClockDomain) -> TbResult<Rc<RefCell<Self>>> {
        let (aw, w, b) = (axi.aw()?, axi.w()?, axi.b()?);
        if let Some(id) = b.payload.get("id") {
            id.set(0);
        }
        let slave = Rc::new(RefCell::new(WriteSlave::new(base, size)));
        let mut tasks = vec![StreamDriverSlave::start(&aw, cd), StreamDriverSlave::start(&w, cd)];
        let s = slave.clone();
        tasks.push(StreamMonitor::start(&aw, cd, move |cmd| s.borrow_mut().on_write_cmd(cmd)));
        let s = slave.clone();
        tasks.push(StreamMonitor::start(&w, cd, move |beat| s.borrow_mut().on_write_data(beat)));
        let s = slave.clone();
        tasks.push(StreamDriverMaster::start(&b, cd, move || s.borrow_mut().gen_write_rsp()));
        Ok(Rc::new(RefCell::new(Self {
            name: format!("{}_writeSlave", axi.name),
            slave,
            tasks,
        })))
    }
}

impl Infrastructure for WriteSlaveDriver {
    fn name(&self) -> &str {
        &self.name
    }
    fn start_phase(&mut self, phase: Phase) -> TbResult {
        cancel_on_done(phase, &mut self.tasks);
        Ok(())
    }
    fn is_drained(&self) -> bool {
        self.slave.borrow().is_idle()
    }
}

struct SharedSlave {
    read: ReadSlave,
    write: WriteSlave,
}

/// Read and write slave models behind one `arw` command channel.
pub struct SharedSlaveDriver {
    name: String,
    slave: Rc<RefCell<SharedSlave>>,
    tasks: Vec<JoinHandle>,
}

impl SharedSlaveDriver {
    pub fn start(axi: &Axi4Shared, base: u64, size: u64, cd: ClockDomain) -> Rc<RefCell<Self>> {
        for id in [axi.r.payload.get("id"), axi.b.payload.get("id")].into_iter().flatten() {
            id.set(0);
        }
        let slave = Rc::new(RefCell::new(SharedSlave {
            read: ReadSlave::new(base, size),
            write: WriteSlave::new(base, size),
        }));
        let mut tasks = Vec::new();
        let s = slave.clone();
        tasks.push(StreamMonitor::start(&axi.arw, cd, move |cmd| {
            let mut s = s.borrow_mut();
            if cmd.get("write")? == 1 {
                s.write.on_write_cmd(cmd)
            } else {
                s.read.on_read_cmd(&cmd)
            }
        }));
        tasks.push(StreamDriverSlave::start(&axi.arw, cd));
        let s = slave.clone();
        tasks.push(StreamDriverMaster::start(&axi.r, cd, move || {
            s.borrow_mut().read.gen_read_rsp()
        }));
        tasks.push(StreamDriverSlave::start(&axi.w, cd));
        let s = slave.clone();
        tasks.push(StreamMonitor::start(&axi.w, cd, move |beat| {
            s.borrow_mut().write.on_write_data(beat)
        }));
        let s = slave.clone();
        tasks.push(StreamDriverMaster::start(&axi.b, cd, move || {
            s.borrow_mut().write.gen_write_rsp()
        }));
        Rc::new(RefCell::new(Self {
            name: format!("{}_sharedSlave", axi.name),
            slave,
            tasks,
        }))
    }
}

impl Infrastructure for SharedSlaveDriver {
    fn name(&self) -> &str {
        &self.name
    }
    fn start_phase(&mut self, phase: Phase) -> TbResult {
        cancel_on_done(phase, &mut self.tasks);
        Ok(())
    }
    fn is_drained(&self) -> bool {
        let s = self.slave.borrow();
        s.read.rsps.is_empty() && s.write.is_idle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils;

    #[test]
    fn out_of_window_command_is_a_protocol_violation() {
        let mut s = ReadSlave::new(0x800, 0x800);
        let cmd = Transaction::new().with("addr", 0x7ff).with("len", 0).with("id", 0);
        assert_eq!(
            s.on_read_cmd(&cmd),
            Err(TbError::ProtocolViolation(
                "WRONG ADDRESS addr=2047 base=2048 size=2048".into()
            ))
        );
    }

    #[test]
    fn responses_stay_ordered_per_id() {
        utils::seed(1);
        let mut s = ReadSlave::new(0, 0x1000);
        for (id, addr) in [(0u64, 0x10u64), (1, 0x20), (0, 0x30)] {
            let cmd = Transaction::new().with("addr", addr).with("len", 1).with("id", id);
            s.on_read_cmd(&cmd).unwrap();
        }
        let mut per_id: BTreeMap<u64, Vec<u64>> = BTreeMap::new();
        while let Some(rsp) = s.rsps.pop_random() {
            per_id
                .entry(rsp.get("id").unwrap())
                .or_default()
                .push(rsp.get("data").unwrap());
        }
        assert_eq!(per_id[&0], vec![0x10, 0x11, 0x30, 0x31]);
        assert_eq!(per_id[&1], vec![0x20, 0x21]);
    }

    #[test]
    fn write_response_waits_for_all_beats() {
        let mut s = WriteSlave::new(0, 0x1000);
        let beat = Transaction::new().with("data", 0).with("strb", 0).with("last", 0);
        s.on_write_data(beat.clone()).unwrap();
        s.on_write_cmd(Transaction::new().with("addr", 0x40).with("len", 2).with("id", 5))
            .unwrap();
        s.on_write_data(beat.clone()).unwrap();
        assert!(s.rsps.is_empty());
        s.on_write_data(beat).unwrap();
        assert!(!s.rsps.is_empty());
        assert_eq!(
            s.rsps.pop_random(),
            Some(Transaction::new().with("id", 5).with("resp", OKAY))
        );
        assert!(s.is_idle());
    }
}
