use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use super::{random_command, write_data_beats, Axi4, Axi4Shared, AddressPlan};
use crate::context::{IdPool, TbContext};
use crate::executor::JoinHandle;
use crate::phase::{Infrastructure, Phase};
use crate::randomizer::Randomizer;
use crate::stream::{StreamDriverMaster, StreamDriverSlave};
use crate::transaction::Transaction;
use crate::utils::ClockDomain;
use crate::TbResult;

#[derive(Clone, Debug, Default)]
pub struct MasterConfig {
    pub ids: IdPool,
    pub plan: AddressPlan,
    /// Stop issuing after this many commands, even before `WaitTasksEnd`.
    pub max_transactions: Option<u64>,
}

impl MasterConfig {
    pub fn new(ids: IdPool) -> Self {
        Self {
            ids,
            ..Self::default()
        }
    }

    pub fn with_plan(mut self, plan: AddressPlan) -> Self {
        self.plan = plan;
        self
    }

    pub fn with_max_transactions(mut self, max: u64) -> Self {
        self.max_transactions = Some(max);
        self
    }
}

/// Write traffic source: commands and their linked data beats.
struct WriteMaster {
    config: MasterConfig,
    cmd_queue: VecDeque<Transaction>,
    data_queue: VecDeque<Transaction>,
    cmd_idle: Randomizer,
    data_idle: Randomizer,
    closed: bool,
    issued: u64,
}

impl WriteMaster {
    fn new(config: MasterConfig) -> Self {
        Self {
            config,
            cmd_queue: VecDeque::new(),
            data_queue: VecDeque::new(),
            cmd_idle: Randomizer::new(),
            data_idle: Randomizer::new(),
            closed: false,
            issued: 0,
        }
    }

    fn gen_write(&mut self) -> TbResult {
        let cmd = random_command(&self.config.plan, &self.config.ids);
        self.data_queue.extend(write_data_beats(&cmd)?);
        self.cmd_queue.push_back(cmd);
        self.issued += 1;
        // enough transactions issued: stop issuing new ones
        if let Some(max) = self.config.max_transactions {
            if self.issued >= max {
                self.closed = true;
            }
        }
        Ok(())
    }

    fn next_cmd(&mut self) -> TbResult<Option<Transaction>> {
        if self.cmd_queue.is_empty() {
            if self.closed {
                return Ok(None);
            }
            self.gen_write()?;
        }
        Ok(self.cmd_queue.pop_front())
    }

    fn next_data(&mut self) -> TbResult<Option<Transaction>> {
        if self.data_queue.is_empty() {
            if self.closed {
                return Ok(None);
            }
            self.gen_write()?;
        }
        Ok(self.data_queue.pop_front())
    }

    fn gen_cmd(&mut self) -> TbResult<Option<Transaction>> {
        if !self.cmd_idle.get() {
            return Ok(None);
        }
        self.next_cmd()
    }

    fn gen_data(&mut self) -> TbResult<Option<Transaction>> {
        if !self.data_idle.get() {
            return Ok(None);
        }
        self.next_data()
    }

    fn is_drained(&self) -> bool {
        self.closed && self.cmd_queue.is_empty() && self.data_queue.is_empty()
    }
}

/// Read traffic source: commands only, responses are checked by a monitor.
struct ReadMaster {
    config: MasterConfig,
    idle: Randomizer,
    closed: bool,
    issued: u64,
}

impl ReadMaster {
    fn new(config: MasterConfig) -> Self {
        Self {
            config,
            idle: Randomizer::new(),
            closed: false,
            issued: 0,
        }
    }

    fn gen_cmd(&mut self) -> Option<Transaction> {
        if self.closed || !self.idle.get() {
            return None;
        }
        self.issued += 1;
        if let Some(max) = self.config.max_transactions {
            if self.issued >= max {
                self.closed = true;
            }
        }
        Some(random_command(&self.config.plan, &self.config.ids))
    }
}

// stream generators only return `Option`, so errors fail the test right here
fn or_fail(r: TbResult<Option<Transaction>>) -> Option<Transaction> {
    match r {
        Ok(t) => t,
        Err(e) => {
            crate::fail_test(e);
            None
        }
    }
}

fn cancel_all(tasks: &mut Vec<JoinHandle>) {
    for task in tasks.drain(..) {
        task.cancel();
    }
}

pub struct WriteMasterDriver {
    name: String,
    master: Rc<RefCell<WriteMaster>>,
    tasks: Vec<JoinHandle>,
}

impl WriteMasterDriver {
    pub fn start(
        name: &str,
        axi: &Axi4,
        config: MasterConfig,
        cd: ClockDomain,
        ctx: &mut TbContext,
    ) -> TbResult<Rc<RefCell<Self>>> {
        config.plan.validate()?;
        ctx.write_ids.register(name, config.ids)?;
        let (aw, w, b) = (axi.aw()?, axi.w()?, axi.b()?);
        let master = Rc::new(RefCell::new(WriteMaster::new(config)));
        let mut tasks = Vec::new();
        let m = master.clone();
        tasks.push(StreamDriverMaster::start(&aw, cd, move || {
            or_fail(m.borrow_mut().gen_cmd())
        }));
        let m = master.clone();
        tasks.push(StreamDriverMaster::start(&w, cd, move || {
            or_fail(m.borrow_mut().gen_data())
        }));
        tasks.push(StreamDriverSlave::start(&b, cd));
        Ok(Rc::new(RefCell::new(Self {
            name: name.to_string(),
            master,
            tasks,
        })))
    }

    pub fn issued(&self) -> u64 {
        self.master.borrow().issued
    }
}

impl Infrastructure for WriteMasterDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn start_phase(&mut self, phase: Phase) -> TbResult {
        match phase {
            Phase::WaitTasksEnd => self.master.borrow_mut().closed = true,
            Phase::Done => cancel_all(&mut self.tasks),
            _ => {}
        }
        Ok(())
    }

    fn is_drained(&self) -> bool {
        self.master.borrow().is_drained()
    }
}

pub struct ReadMasterDriver {
    name: String,
    master: Rc<RefCell<ReadMaster>>,
    tasks: Vec<JoinHandle>,
}

impl ReadMasterDriver {
    pub fn start(
        name: &str,
        axi: &Axi4,
        config: MasterConfig,
        cd: ClockDomain,
        ctx: &mut TbContext,
    ) -> TbResult<Rc<RefCell<Self>>> {
        config.plan.validate()?;
        ctx.read_ids.register(name, config.ids)?;
        let (ar, r) = (axi.ar()?, axi.r()?);
        let master = Rc::new(RefCell::new(ReadMaster::new(config)));
        let m = master.clone();
        let tasks = vec![
            StreamDriverMaster::start(&ar, cd, move || m.borrow_mut().gen_cmd()),
            StreamDriverSlave::start(&r, cd),
        ];
        Ok(Rc::new(RefCell::new(Self {
            name: name.to_string(),
            master,
            tasks,
        })))
    }

    pub fn issued(&self) -> u64 {
        self.master.borrow().issued
    }
}

impl Infrastructure for ReadMasterDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn start_phase(&mut self, phase: Phase) -> TbResult {
        match phase {
            Phase::WaitTasksEnd => self.master.borrow_mut().closed = true,
            Phase::Done => cancel_all(&mut self.tasks),
            _ => {}
        }
        Ok(())
    }
}

struct SharedMaster {
    write: WriteMaster,
    read: ReadMaster,
    read_or_write: Randomizer,
}

impl SharedMaster {
    fn gen_cmd(&mut self) -> TbResult<Option<Transaction>> {
        if self.read_or_write.get() {
            Ok(self.write.gen_cmd()?.map(|t| t.with("write", 1)))
        } else {
            Ok(self.read.gen_cmd().map(|t| t.with("write", 0)))
        }
    }
}

/// One write and one read traffic source sharing the `arw` channel.
pub struct SharedMasterDriver {
    name: String,
    master: Rc<RefCell<SharedMaster>>,
    tasks: Vec<JoinHandle>,
}

impl SharedMasterDriver {
    pub fn start(
        name: &str,
        axi: &Axi4Shared,
        config: MasterConfig,
        cd: ClockDomain,
        ctx: &mut TbContext,
    ) -> TbResult<Rc<RefCell<Self>>> {
        config.plan.validate()?;
        ctx.write_ids.register(name, config.ids)?;
        ctx.read_ids.register(name, config.ids)?;
        let master = Rc::new(RefCell::new(SharedMaster {
            write: WriteMaster::new(config.clone()),
            read: ReadMaster::new(config),
            read_or_write: Randomizer::new(),
        }));
        let mut tasks = Vec::new();
        let m = master.clone();
        tasks.push(StreamDriverMaster::start(&axi.arw, cd, move || {
            or_fail(m.borrow_mut().gen_cmd())
        }));
        let m = master.clone();
        tasks.push(StreamDriverMaster::start(&axi.w, cd, move || {
            or_fail(m.borrow_mut().write.gen_data())
        }));
        tasks.push(StreamDriverSlave::start(&axi.b, cd));
        tasks.push(StreamDriverSlave::start(&axi.r, cd));
        Ok(Rc::new(RefCell::new(Self {
            name: name.to_string(),
            master,
            tasks,
        })))
    }

    pub fn issued(&self) -> (u64, u64) {
        let m = self.master.borrow();
        (m.read.issued, m.write.issued)
    }
}

impl Infrastructure for SharedMasterDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn start_phase(&mut self, phase: Phase) -> TbResult {
        match phase {
            Phase::WaitTasksEnd => {
                let mut m = self.master.borrow_mut();
                m.write.closed = true;
                m.read.closed = true;
            }
            Phase::Done => cancel_all(&mut self.tasks),
            _ => {}
        }
        Ok(())
    }

    fn is_drained(&self) -> bool {
        self.master.borrow().write.is_drained()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils;

    #[test]
    fn write_master_stops_issuing_after_max() {
        utils::seed(2);
        let mut m = WriteMaster::new(MasterConfig::new(IdPool::new(0, 4)).with_max_transactions(3));
        let mut cmds = 0;
        while m.next_cmd().unwrap().is_some() {
            cmds += 1;
            assert!(cmds <= 3);
        }
        assert_eq!(cmds, 3);
        while m.next_data().unwrap().is_some() {}
        assert!(m.is_drained());
    }

    #[test]
    fn data_beats_follow_their_command() {
        utils::seed(4);
        let mut m = WriteMaster::new(MasterConfig::new(IdPool::new(0, 4)));
        let cmd = m.next_cmd().unwrap().unwrap();
        let len = cmd.get("len").unwrap();
        let addr = cmd.get("addr").unwrap();
        for i in 0..=len {
            let beat = m.next_data().unwrap().unwrap();
            assert_eq!(beat.get("data"), Ok(addr + i));
            assert_eq!(beat.get("last"), Ok((i == len) as u64));
        }
    }

    #[test]
    fn read_master_uses_its_id_pool() {
        utils::seed(9);
        let mut m = ReadMaster::new(MasterConfig::new(IdPool::new(12, 4)));
        let mut seen = 0;
        for _ in 0..200 {
            if let Some(cmd) = m.gen_cmd() {
                assert!(IdPool::new(12, 4).contains(cmd.get("id").unwrap()));
                seen += 1;
            }
        }
        assert!(seen > 0);
    }
}
