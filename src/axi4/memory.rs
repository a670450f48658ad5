use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use super::{Axi4Shared, BURST_INCR, OKAY};
use crate::executor::JoinHandle;
use crate::phase::{child_path, InfraRef, Infrastructure, Phase};
use crate::randomizer::Randomizer;
use crate::reservation::AddressReservations;
use crate::scoreboard::ScoreboardOutOfOrder;
use crate::shadow::ShadowMemory;
use crate::stream::{StreamDriverMaster, StreamDriverSlave, StreamMonitor};
use crate::transaction::Transaction;
use crate::utils::{rand_bits, rand_bool, rand_int, ClockDomain};
use crate::{TbError, TbResult};

// attempts at finding a free address range per command slot
const PLACEMENT_TRIES: u32 = 4;

/// Traffic source and shadow memory of the checker.
struct MemoryModel {
    // zero-initialized, like the RAM under test
    mem: ShadowMemory,
    mem_beats: u64,
    beat_bytes: u64,
    id_count: u64,
    cmd_idle: Randomizer,
    data_idle: Randomizer,
    data_queue: VecDeque<Transaction>,
    reservations: AddressReservations,
    // reservation tags in issue order, per id and direction
    write_tags: BTreeMap<u64, VecDeque<u64>>,
    read_tags: BTreeMap<u64, VecDeque<u64>>,
    next_tag: u64,
    closed: bool,
}

impl MemoryModel {
    fn new(address_width: u32, data_width: u32, id_width: u32) -> TbResult<Self> {
        if address_width >= 64 || id_width >= 64 {
            return Err(TbError::Config(format!(
                "address width {} / id width {} too wide",
                address_width, id_width
            )));
        }
        let beat_bytes = (data_width / 8).max(1) as u64;
        let mem_beats = (1u64 << address_width) / beat_bytes;
        if mem_beats == 0 {
            return Err(TbError::Config(format!(
                "{}-bit address space is smaller than one {}-byte beat",
                address_width, beat_bytes
            )));
        }
        Ok(Self {
            mem: ShadowMemory::new(),
            mem_beats,
            beat_bytes,
            id_count: 1 << id_width,
            cmd_idle: Randomizer::new(),
            data_idle: Randomizer::new(),
            data_queue: VecDeque::new(),
            reservations: AddressReservations::new(),
            write_tags: BTreeMap::new(),
            read_tags: BTreeMap::new(),
            next_tag: 0,
            closed: false,
        })
    }

    fn read_beat(&self, addr: u64) -> u64 {
        self.mem.read_lanes(addr, self.beat_bytes, 0)
    }

    /// A random full-width INCR burst inside the memory, never crossing a
    /// 4 KiB boundary, whose bytes are not reserved.
    fn place_burst(&mut self) -> Option<(u64, u64)> {
        let mem_beats = self.mem_beats;
        for _ in 0..PLACEMENT_TRIES {
            let len = rand_int(16).min(mem_beats - 1);
            let beats = len + 1;
            let addr = rand_int(mem_beats - len) * self.beat_bytes;
            let bytes = beats * self.beat_bytes;
            if addr / 4096 != (addr + bytes - 1) / 4096 {
                continue;
            }
            if self.reservations.is_free(addr, bytes) {
                return Some((addr, len));
            }
        }
        None
    }

    fn reserve(&mut self, addr: u64, bytes: u64) -> u64 {
        let tag = self.next_tag;
        self.next_tag += 1;
        self.reservations.reserve(tag, addr, bytes);
        tag
    }

    fn command(&self, addr: u64, len: u64, id: u64, write: bool) -> Transaction {
        Transaction::new()
            .with("addr", addr)
            .with("id", id)
            .with("region", 0)
            .with("len", len)
            .with("size", self.beat_bytes.trailing_zeros() as u64)
            .with("burst", BURST_INCR)
            .with("lock", 0)
            .with("cache", 0)
            .with("qos", 0)
            .with("prot", 2)
            .with("write", write as u64)
    }

    fn gen_cmd(&mut self, read_sb: &mut ScoreboardOutOfOrder, write_sb: &mut ScoreboardOutOfOrder) -> TbResult<Option<Transaction>> {
        if self.closed || !self.cmd_idle.get() {
            return Ok(None);
        }
        let Some((addr, len)) = self.place_burst() else {
            return Ok(None);
        };
        let id = rand_int(self.id_count);
        let bytes = (len + 1) * self.beat_bytes;
        let tag = self.reserve(addr, bytes);
        if rand_bool() {
            self.write_tags.entry(id).or_default().push_back(tag);
            for i in 0..=len {
                let beat_addr = addr + i * self.beat_bytes;
                let data = rand_bits(8 * self.beat_bytes as u32);
                let strb = rand_bits(self.beat_bytes as u32);
                for byte in 0..self.beat_bytes {
                    if (strb >> byte) & 1 == 1 {
                        self.mem.write_byte(beat_addr + byte, (data >> (8 * byte)) as u8);
                    }
                }
                self.data_queue.push_back(
                    Transaction::new()
                        .with("data", data)
                        .with("strb", strb)
                        .with("last", (i == len) as u64),
                );
            }
            write_sb.ref_push(Transaction::new().with("id", id).with("resp", OKAY), id)?;
            Ok(Some(self.command(addr, len, id, true)))
        } else {
            self.read_tags.entry(id).or_default().push_back(tag);
            for i in 0..=len {
                let rsp = Transaction::new()
                    .with("data", self.read_beat(addr + i * self.beat_bytes))
                    .with("id", id)
                    .with("resp", OKAY)
                    .with("last", (i == len) as u64);
                read_sb.ref_push(rsp, id)?;
            }
            Ok(Some(self.command(addr, len, id, false)))
        }
    }

    fn gen_data(&mut self) -> Option<Transaction> {
        if !self.data_idle.get() {
            return None;
        }
        self.data_queue.pop_front()
    }

    fn release(&mut self, write: bool, id: u64) {
        let tags = if write {
            &mut self.write_tags
        } else {
            &mut self.read_tags
        };
        let tag = tags.get_mut(&id).and_then(|q| q.pop_front());
        if let Some(tag) = tag {
            self.reservations.release(tag);
        }
        if tags.get(&id).map(|q| q.is_empty()).unwrap_or(false) {
            tags.remove(&id);
        }
    }
}

/// Random read/write traffic against an on-chip RAM behind an `Axi4Shared`
/// port, checked against a byte-addressable shadow memory.
///
/// Writes update the shadow when issued and keep their range reserved until
/// their B response matched. Reads take their expected data from the shadow
/// when issued and keep their range reserved until the last R beat, so no
/// read ever overlaps a write in flight.
pub struct Axi4SharedMemoryChecker {
    name: String,
    model: Rc<RefCell<MemoryModel>>,
    read_scoreboard: Rc<RefCell<ScoreboardOutOfOrder>>,
    write_scoreboard: Rc<RefCell<ScoreboardOutOfOrder>>,
    non_zero_read_rsp: Rc<Cell<u64>>,
    non_zero_read_rsp_target: u64,
    tasks: Vec<JoinHandle>,
}

impl Axi4SharedMemoryChecker {
    pub fn start(
        name: &str,
        axi: &Axi4Shared,
        address_width: u32,
        id_width: u32,
        cd: ClockDomain,
    ) -> TbResult<Rc<RefCell<Self>>> {
        let data_width = axi
            .w
            .payload
            .get("data")
            .map(|d| d.size())
            .ok_or_else(|| TbError::UnknownSignal(format!("{}_w_payload_data", axi.name)))?;
        if data_width > 64 {
            return Err(TbError::Config(format!(
                "{}: data width {} above 64 bits",
                name, data_width
            )));
        }
        let model = Rc::new(RefCell::new(MemoryModel::new(address_width, data_width, id_width)?));
        let read_scoreboard = Rc::new(RefCell::new(ScoreboardOutOfOrder::new(&child_path(
            name,
            "readRspScoreboard",
        ))));
        let write_scoreboard = Rc::new(RefCell::new(ScoreboardOutOfOrder::new(&child_path(
            name,
            "writeRspScoreboard",
        ))));
        {
            let m = model.clone();
            write_scoreboard
                .borrow_mut()
                .on_match(move |id, _, _| m.borrow_mut().release(true, id));
            let m = model.clone();
            read_scoreboard.borrow_mut().on_match(move |id, uut, _| {
                if uut.get("last") == Ok(1) {
                    m.borrow_mut().release(false, id);
                }
            });
        }
        let non_zero_read_rsp = Rc::new(Cell::new(0));

        let mut tasks = Vec::new();
        {
            let (m, rsb, wsb) = (model.clone(), read_scoreboard.clone(), write_scoreboard.clone());
            tasks.push(StreamDriverMaster::start(&axi.arw, cd, move || {
                let r = m
                    .borrow_mut()
                    .gen_cmd(&mut rsb.borrow_mut(), &mut wsb.borrow_mut());
                r.unwrap_or_else(|e| {
                    crate::fail_test(e);
                    None
                })
            }));
        }
        let m = model.clone();
        tasks.push(StreamDriverMaster::start(&axi.w, cd, move || m.borrow_mut().gen_data()));
        tasks.push(StreamDriverSlave::start(&axi.b, cd));
        tasks.push(StreamDriverSlave::start(&axi.r, cd));
        let sb = write_scoreboard.clone();
        tasks.push(StreamMonitor::start(&axi.b, cd, move |rsp| {
            let id = rsp.get("id")?;
            sb.borrow_mut().uut_push(rsp, id)
        }));
        let (sb, counter) = (read_scoreboard.clone(), non_zero_read_rsp.clone());
        tasks.push(StreamMonitor::start(&axi.r, cd, move |rsp| {
            if rsp.get("data")? != 0 {
                counter.set(counter.get() + 1);
            }
            let id = rsp.get("id")?;
            sb.borrow_mut().uut_push(rsp, id)
        }));

        Ok(Rc::new(RefCell::new(Self {
            name: name.to_string(),
            model,
            read_scoreboard,
            write_scoreboard,
            non_zero_read_rsp,
            non_zero_read_rsp_target: 1000,
            tasks,
        })))
    }

    pub fn set_non_zero_read_rsp_target(&mut self, target: u64) {
        self.non_zero_read_rsp_target = target;
    }

    pub fn non_zero_read_rsp(&self) -> u64 {
        self.non_zero_read_rsp.get()
    }
}

impl Infrastructure for Axi4SharedMemoryChecker {
    fn name(&self) -> &str {
        &self.name
    }

    fn start_phase(&mut self, phase: Phase) -> TbResult {
        match phase {
            Phase::WaitTasksEnd => self.model.borrow_mut().closed = true,
            Phase::Done => {
                for task in self.tasks.drain(..) {
                    task.cancel();
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn end_phase(&mut self, phase: Phase) -> TbResult {
        let model = self.model.borrow();
        if phase == Phase::CheckScoreboards && !model.reservations.is_empty() {
            return Err(TbError::leak(
                &self.name,
                format!("{} address reservations never released", model.reservations.len()),
            ));
        }
        Ok(())
    }

    fn has_enough_sim(&self) -> bool {
        self.non_zero_read_rsp.get() >= self.non_zero_read_rsp_target
    }

    fn is_drained(&self) -> bool {
        let model = self.model.borrow();
        model.data_queue.is_empty() && model.reservations.is_empty()
    }

    fn children(&self) -> Vec<InfraRef> {
        let r: InfraRef = self.read_scoreboard.clone();
        let w: InfraRef = self.write_scoreboard.clone();
        vec![r, w]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils;

    #[test]
    fn write_then_read_sees_shadow_data() {
        utils::seed(21);
        let mut m = MemoryModel::new(12, 32, 2).unwrap();
        let mut rsb = ScoreboardOutOfOrder::new("r");
        let mut wsb = ScoreboardOutOfOrder::new("w");
        m.cmd_idle = Randomizer::with_band(100, 1.0, 1.0);
        let mut writes = 0;
        for _ in 0..50 {
            if let Some(cmd) = m.gen_cmd(&mut rsb, &mut wsb).unwrap() {
                let addr = cmd.get("addr").unwrap();
                assert_eq!(addr % 4, 0);
                assert!(addr + (cmd.get("len").unwrap() + 1) * 4 <= 4096);
                if cmd.get("write").unwrap() == 1 {
                    writes += 1;
                }
            }
        }
        assert!(writes > 0);
        // every issued command holds a reservation until it completes
        assert!(!m.reservations.is_empty());
        assert!(wsb.ref_count() as usize + rsb.pending_keys().len() > 0);
    }

    #[test]
    fn released_tags_free_the_range() {
        let mut m = MemoryModel::new(12, 32, 2).unwrap();
        let tag = m.reserve(0x100, 16);
        m.write_tags.entry(1).or_default().push_back(tag);
        assert!(!m.reservations.is_free(0x104, 4));
        m.release(true, 1);
        assert!(m.reservations.is_free(0x104, 4));
        assert!(m.write_tags.is_empty());
    }

    #[test]
    fn beats_read_little_endian() {
        let mut m = MemoryModel::new(8, 32, 1).unwrap();
        for (i, b) in [0x78, 0x56, 0x34, 0x12].into_iter().enumerate() {
            m.mem.write_byte(4 + i as u64, b);
        }
        assert_eq!(m.read_beat(4), 0x1234_5678);
    }

    #[test]
    fn wide_address_space_stays_sparse() {
        utils::seed(4);
        let mut m = MemoryModel::new(32, 32, 2).unwrap();
        m.cmd_idle = Randomizer::with_band(100, 1.0, 1.0);
        let (mut rsb, mut wsb) = (ScoreboardOutOfOrder::new("r"), ScoreboardOutOfOrder::new("w"));
        let mut issued = 0;
        for _ in 0..20 {
            if m.gen_cmd(&mut rsb, &mut wsb).unwrap().is_some() {
                issued += 1;
            }
        }
        assert!(issued > 0);
        assert!(m.mem.touched() <= 20 * 16 * 4);
    }

    #[test]
    fn address_space_below_one_beat_is_rejected() {
        assert!(matches!(MemoryModel::new(1, 32, 1), Err(TbError::Config(_))));
        assert!(MemoryModel::new(2, 32, 1).is_ok());
    }
}
