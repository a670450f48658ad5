//! AHB-Lite3 traffic: legal burst generation, a pipelined master driver,
//! read data checking and a slave memory model.
//!
//! Signals are looked up as `<prefix>_<NAME>` with the usual upper-case AHB
//! names. A slave port reads `HREADY` (or `HREADYIN`) and drives `HREADYOUT`.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use crate::executor::{JoinHandle, Task};
use crate::phase::{Infrastructure, Phase};
use crate::randomizer::Randomizer;
use crate::shadow::ShadowMemory;
use crate::signal::SimObject;
use crate::stream::Bundle;
use crate::utils::{self, ClockDomain};
use crate::{TbError, TbResult};

pub const HTRANS_IDLE: u64 = 0;
pub const HTRANS_BUSY: u64 = 1;
pub const HTRANS_NONSEQ: u64 = 2;
pub const HTRANS_SEQ: u64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Burst {
    Single = 0,
    Incr = 1,
    Wrap4 = 2,
    Incr4 = 3,
    Wrap8 = 4,
    Incr8 = 5,
    Wrap16 = 6,
    Incr16 = 7,
}

/// Fixed-length bursts, the only ones the generator produces.
const FIXED_BURSTS: [Burst; 7] = [
    Burst::Single,
    Burst::Wrap4,
    Burst::Incr4,
    Burst::Wrap8,
    Burst::Incr8,
    Burst::Wrap16,
    Burst::Incr16,
];

impl Burst {
    pub fn from_hburst(value: u64) -> Option<Self> {
        Some(match value {
            0 => Burst::Single,
            1 => Burst::Incr,
            2 => Burst::Wrap4,
            3 => Burst::Incr4,
            4 => Burst::Wrap8,
            5 => Burst::Incr8,
            6 => Burst::Wrap16,
            7 => Burst::Incr16,
            _ => return None,
        })
    }

    /// Beat count, `None` for the undefined-length `Incr`.
    pub fn beats(self) -> Option<u64> {
        match self {
            Burst::Single => Some(1),
            Burst::Incr => None,
            Burst::Wrap4 | Burst::Incr4 => Some(4),
            Burst::Wrap8 | Burst::Incr8 => Some(8),
            Burst::Wrap16 | Burst::Incr16 => Some(16),
        }
    }

    pub fn is_wrapping(self) -> bool {
        matches!(self, Burst::Wrap4 | Burst::Wrap8 | Burst::Wrap16)
    }
}

/// Address after `addr` inside a burst of `bytes`-wide beats. Wrapping
/// bursts stay inside their `bytes * beats` aligned footprint.
pub fn next_beat_address(addr: u64, bytes: u64, burst: Burst) -> u64 {
    let next = addr + bytes;
    match burst.beats() {
        Some(beats) if burst.is_wrapping() => {
            let footprint = bytes * beats;
            let base = addr - addr % footprint;
            if next == base + footprint {
                base
            } else {
                next
            }
        }
        _ => next,
    }
}

/// One address phase as driven by a master.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AhbTransfer {
    pub addr: u64,
    pub write: bool,
    pub size: u64,
    pub burst: u64,
    pub prot: u64,
    pub trans: u64,
    pub mastlock: bool,
    pub wdata: u64,
}

impl AhbTransfer {
    pub fn idle() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.trans >= HTRANS_NONSEQ
    }

    pub fn bytes(&self) -> u64 {
        1 << self.size
    }
}

/// Source of AHB transfers. Each call returns a whole burst, or a single
/// idle transfer.
pub trait AhbTrafficSource {
    fn transfers(&mut self) -> Vec<AhbTransfer>;
}

type AddressFilter = Box<dyn Fn(u64) -> bool>;

pub struct AhbLite3TrafficGenerator {
    address_width: u32,
    data_width: u32,
    idle_probability: f64,
    filter: Option<AddressFilter>,
}

impl AhbLite3TrafficGenerator {
    pub fn new(address_width: u32, data_width: u32) -> Self {
        Self {
            address_width,
            data_width,
            idle_probability: 0.8,
            filter: None,
        }
    }

    /// Restricts every generated beat address to those accepted by `filter`.
    /// The filter must accept at least one aligned burst footprint.
    pub fn with_filter(mut self, filter: impl Fn(u64) -> bool + 'static) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }

    pub fn with_idle_probability(mut self, p: f64) -> Self {
        self.idle_probability = p;
        self
    }

    pub fn data_width(&self) -> u32 {
        self.data_width
    }

    fn accepts(&self, addr: u64) -> bool {
        self.filter.as_ref().map_or(true, |f| f(addr))
    }

    fn burst(&self) -> Vec<AhbTransfer> {
        let burst = utils::choose(&FIXED_BURSTS).unwrap_or(Burst::Single);
        let beats = burst.beats().unwrap_or(1);
        let max_size = (self.data_width / 8).max(1).trailing_zeros() as u64;
        let size = utils::rand_int(max_size + 1);
        let bytes = 1u64 << size;
        let footprint = bytes * beats;
        let write = utils::rand_bool();
        let prot = utils::rand_bits(4);

        loop {
            let raw = utils::rand_bits(self.address_width);
            // INCRx starts on its footprint so it never crosses it
            let start = if burst.is_wrapping() || burst == Burst::Single {
                raw & !(bytes - 1)
            } else {
                raw & !(footprint - 1)
            };
            let mut addr = start;
            let mut out = Vec::with_capacity(beats as usize);
            for beat in 0..beats {
                out.push(AhbTransfer {
                    addr,
                    write,
                    size,
                    burst: burst as u64,
                    prot,
                    trans: if beat == 0 { HTRANS_NONSEQ } else { HTRANS_SEQ },
                    mastlock: false,
                    wdata: utils::rand_bits(self.data_width),
                });
                addr = next_beat_address(addr, bytes, burst);
            }
            if out.iter().all(|t| self.accepts(t.addr)) {
                return out;
            }
        }
    }
}

impl AhbTrafficSource for AhbLite3TrafficGenerator {
    fn transfers(&mut self) -> Vec<AhbTransfer> {
        if utils::rand() < self.idle_probability {
            vec![AhbTransfer::idle()]
        } else {
            self.burst()
        }
    }
}

pub type ReadBuffer = Rc<RefCell<VecDeque<u64>>>;

/// Generator keeping a shadow of the address space: writes update it when
/// generated and reads push their expected data to `read_buffer`.
///
/// Masters sharing slaves must use disjoint address filters, otherwise the
/// shadow of one master misses the writes of the others.
pub struct AhbLite3TrafficGeneratorWithMemory {
    generator: AhbLite3TrafficGenerator,
    ram: ShadowMemory,
    read_buffer: ReadBuffer,
}

impl AhbLite3TrafficGeneratorWithMemory {
    pub fn new(generator: AhbLite3TrafficGenerator, read_buffer: ReadBuffer) -> Self {
        Self {
            generator,
            ram: ShadowMemory::new(),
            read_buffer,
        }
    }

    /// The `(value >> 10) != id && (value >> 8) & 3 == id` split, which gives
    /// each of up to four masters its own region in every 1 KiB slave.
    pub fn crossbar_region(id: u64) -> impl Fn(u64) -> bool {
        move |addr| (addr >> 10) != id && ((addr >> 8) & 0x3) == id
    }

    fn apply(&mut self, t: &AhbTransfer) {
        let lane_bytes = (self.generator.data_width / 8).max(1) as u64;
        let lane = t.addr % lane_bytes;
        if t.write {
            self.ram.write_lanes(t.addr, t.bytes(), lane, t.wdata);
        } else {
            let data = self.ram.read_lanes(t.addr, t.bytes(), lane);
            self.read_buffer.borrow_mut().push_back(data);
        }
    }
}

impl AhbTrafficSource for AhbLite3TrafficGeneratorWithMemory {
    fn transfers(&mut self) -> Vec<AhbTransfer> {
        let transfers = self.generator.transfers();
        for t in transfers.iter().filter(|t| t.is_active()) {
            self.apply(t);
        }
        transfers
    }
}

fn field(bundle: &Bundle, name: &str) -> TbResult<SimObject> {
    bundle.get(name).ok_or_else(|| TbError::MissingField {
        field: format!("{}_{}", bundle.prefix(), name),
    })
}

/// Signals of one AHB-Lite3 port.
#[derive(Debug, Clone)]
pub struct AhbLite3 {
    pub name: String,
    pub haddr: SimObject,
    pub hwrite: SimObject,
    pub hsize: SimObject,
    pub hburst: SimObject,
    pub hprot: SimObject,
    pub htrans: SimObject,
    pub hmastlock: SimObject,
    pub hwdata: SimObject,
    pub hrdata: SimObject,
    pub hready: SimObject,
    pub hresp: SimObject,
    pub hsel: Option<SimObject>,
    pub hreadyout: Option<SimObject>,
}

impl AhbLite3 {
    pub fn new(dut: SimObject, prefix: &str) -> TbResult<Self> {
        let b = Bundle::new(dut, prefix);
        let hready = match b.get("HREADY") {
            Some(s) => s,
            None => field(&b, "HREADYIN")?,
        };
        Ok(Self {
            name: prefix.to_string(),
            haddr: field(&b, "HADDR")?,
            hwrite: field(&b, "HWRITE")?,
            hsize: field(&b, "HSIZE")?,
            hburst: field(&b, "HBURST")?,
            hprot: field(&b, "HPROT")?,
            htrans: field(&b, "HTRANS")?,
            hmastlock: field(&b, "HMASTLOCK")?,
            hwdata: field(&b, "HWDATA")?,
            hrdata: field(&b, "HRDATA")?,
            hready,
            hresp: field(&b, "HRESP")?,
            hsel: b.get("HSEL"),
            hreadyout: b.get("HREADYOUT"),
        })
    }

    fn drive_address_phase(&self, t: &AhbTransfer) {
        self.haddr.set(t.addr);
        self.hwrite.set_bool(t.write);
        self.hsize.set(t.size);
        self.hburst.set(t.burst);
        self.hprot.set(t.prot);
        self.htrans.set(t.trans);
        self.hmastlock.set_bool(t.mastlock);
    }

    fn sample_address_phase(&self) -> AhbTransfer {
        AhbTransfer {
            addr: self.haddr.u64(),
            write: self.hwrite.bool(),
            size: self.hsize.u64(),
            burst: self.hburst.u64(),
            prot: self.hprot.u64(),
            trans: self.htrans.u64(),
            mastlock: self.hmastlock.bool(),
            wdata: 0,
        }
    }
}

fn cancel_on_done(phase: Phase, tasks: &mut Vec<JoinHandle>) {
    if phase == Phase::Done {
        for task in tasks.drain(..) {
            task.cancel();
        }
    }
}

/// Drives the address phase of each transfer once `HREADY` is high, and its
/// `HWDATA` with the next one.
pub struct AhbLite3MasterDriver {
    name: String,
    closed: Rc<Cell<bool>>,
    in_burst: Rc<Cell<bool>>,
    tasks: Vec<JoinHandle>,
}

impl AhbLite3MasterDriver {
    pub fn start<S>(ahb: &AhbLite3, mut source: S, cd: ClockDomain) -> Rc<RefCell<Self>>
    where
        S: AhbTrafficSource + 'static,
    {
        let ahb = ahb.clone();
        let closed = Rc::new(Cell::new(false));
        let in_burst = Rc::new(Cell::new(false));
        let (c, b) = (closed.clone(), in_burst.clone());
        let name = format!("{}_driver", ahb.name);
        let task = Task::spawn_from_future(
            async move {
                ahb.drive_address_phase(&AhbTransfer::idle());
                ahb.hwdata.set(0);
                let mut wdata_buffer = 0;
                loop {
                    // once closed only idle transfers go out, which still
                    // flushes the data phase of the last write
                    let transfers = if c.get() {
                        vec![AhbTransfer::idle()]
                    } else {
                        source.transfers()
                    };
                    b.set(transfers.iter().any(|t| t.is_active()));
                    for t in transfers {
                        loop {
                            cd.clk.rising_edge().await;
                            if !cd.is_reset_active() && ahb.hready.bool() {
                                break;
                            }
                        }
                        ahb.drive_address_phase(&t);
                        ahb.hwdata.set(wdata_buffer);
                        wdata_buffer = t.wdata;
                    }
                }
            },
            &name,
        );
        Rc::new(RefCell::new(Self {
            name,
            closed,
            in_burst,
            tasks: vec![task],
        }))
    }
}

impl Infrastructure for AhbLite3MasterDriver {
    fn name(&self) -> &str {
        &self.name
    }
    fn start_phase(&mut self, phase: Phase) -> TbResult {
        if phase == Phase::WaitTasksEnd {
            self.closed.set(true);
        }
        cancel_on_done(phase, &mut self.tasks);
        Ok(())
    }
    fn is_drained(&self) -> bool {
        self.closed.get() && !self.in_burst.get()
    }
}

/// Checks `HRDATA` of every completed read data phase against the head of
/// the read buffer.
pub struct AhbLite3MasterReadChecker {
    name: String,
    target: u64,
    counter: Rc<Cell<u64>>,
    buffer: ReadBuffer,
    tasks: Vec<JoinHandle>,
}

impl AhbLite3MasterReadChecker {
    pub fn start(ahb: &AhbLite3, buffer: ReadBuffer, cd: ClockDomain) -> Rc<RefCell<Self>> {
        let ahb = ahb.clone();
        let counter = Rc::new(Cell::new(0));
        let name = format!("{}_readChecker", ahb.name);
        let (count, buf, path) = (counter.clone(), buffer.clone(), name.clone());
        let task = Task::spawn_from_future(
            async move {
                let mut read_incoming = false;
                loop {
                    cd.clk.rising_edge().await;
                    if cd.is_reset_active() {
                        read_incoming = false;
                        continue;
                    }
                    if !ahb.hready.bool() {
                        continue;
                    }
                    if read_incoming {
                        let expected = buf.borrow_mut().pop_front().ok_or_else(|| {
                            TbError::leak(&path, "read data without a pending read")
                        })?;
                        let got = ahb.hrdata.u64();
                        if got != expected {
                            return Err(TbError::Mismatch {
                                path: path.clone(),
                                uut: format!("HRDATA : 0x{:x}", got),
                                reference: format!("HRDATA : 0x{:x}", expected),
                            });
                        }
                        count.set(count.get() + 1);
                    }
                    read_incoming = ahb.htrans.u64() >= HTRANS_NONSEQ && !ahb.hwrite.bool();
                }
            },
            &name,
        );
        Rc::new(RefCell::new(Self {
            name,
            target: 1000,
            counter,
            buffer,
            tasks: vec![task],
        }))
    }

    pub fn set_target(&mut self, target: u64) {
        self.target = target;
    }

    pub fn reads(&self) -> u64 {
        self.counter.get()
    }
}

impl Infrastructure for AhbLite3MasterReadChecker {
    fn name(&self) -> &str {
        &self.name
    }
    fn start_phase(&mut self, phase: Phase) -> TbResult {
        cancel_on_done(phase, &mut self.tasks);
        Ok(())
    }
    fn end_phase(&mut self, phase: Phase) -> TbResult {
        if phase == Phase::CheckScoreboards && !self.buffer.borrow().is_empty() {
            return Err(TbError::leak(
                &self.name,
                format!("{} reads never completed", self.buffer.borrow().len()),
            ));
        }
        Ok(())
    }
    fn has_enough_sim(&self) -> bool {
        self.counter.get() >= self.target
    }
    fn is_drained(&self) -> bool {
        self.buffer.borrow().is_empty()
    }
}

/// Expected continuation of a fixed-length burst.
#[derive(Debug, Clone, Copy)]
struct BurstTracker {
    next_addr: u64,
    remaining: u64,
    first: AhbTransfer,
}

impl BurstTracker {
    fn check(&mut self, t: &AhbTransfer) -> TbResult {
        let first = &self.first;
        if self.remaining == 0
            || t.addr != self.next_addr
            || t.write != first.write
            || t.size != first.size
            || t.burst != first.burst
        {
            return Err(TbError::protocol(format!(
                "malformed SEQ beat addr=0x{:x} expected=0x{:x} remaining={} burst={}",
                t.addr, self.next_addr, self.remaining, first.burst
            )));
        }
        let burst = Burst::from_hburst(first.burst).unwrap_or(Burst::Incr);
        self.next_addr = next_beat_address(self.next_addr, first.bytes(), burst);
        self.remaining -= 1;
        Ok(())
    }
}

struct SlaveState {
    base: u64,
    size: u64,
    ram: ShadowMemory,
    burst: Option<BurstTracker>,
    pending: Option<AhbTransfer>,
}

impl SlaveState {
    fn check_window(&self, t: &AhbTransfer) -> TbResult {
        if t.addr < self.base || t.addr + t.bytes() > self.base + self.size {
            return Err(TbError::protocol(format!(
                "WRONG ADDRESS addr={} base={} size={}",
                t.addr, self.base, self.size
            )));
        }
        Ok(())
    }

    /// Tracks the burst a new address phase belongs to.
    fn on_address_phase(&mut self, t: &AhbTransfer) -> TbResult {
        match t.trans {
            HTRANS_NONSEQ => {
                let burst = Burst::from_hburst(t.burst)
                    .ok_or_else(|| TbError::protocol(format!("invalid HBURST {}", t.burst)))?;
                // INCR has no length, SEQ beats just keep incrementing
                self.burst = Some(BurstTracker {
                    next_addr: next_beat_address(t.addr, t.bytes(), burst),
                    remaining: burst.beats().map_or(u64::MAX, |b| b - 1),
                    first: *t,
                });
            }
            HTRANS_SEQ => match self.burst.as_mut() {
                Some(tracker) => tracker.check(t)?,
                None => {
                    return Err(TbError::protocol(format!(
                        "SEQ beat at 0x{:x} without a NONSEQ",
                        t.addr
                    )))
                }
            },
            _ => {}
        }
        self.check_window(t)
    }

    fn complete_write(&mut self, t: &AhbTransfer, hwdata: u64, lane_bytes: u64) {
        self.ram.write_lanes(t.addr, t.bytes(), t.addr % lane_bytes, hwdata);
    }

    fn read(&self, t: &AhbTransfer, lane_bytes: u64) -> u64 {
        self.ram.read_lanes(t.addr, t.bytes(), t.addr % lane_bytes)
    }
}

/// Byte memory answering the window `[base, base + size)`.
pub struct AhbLite3SlaveMemory {
    name: String,
    state: Rc<RefCell<SlaveState>>,
    tasks: Vec<JoinHandle>,
}

impl AhbLite3SlaveMemory {
    pub fn start(ahb: &AhbLite3, base: u64, size: u64, cd: ClockDomain) -> TbResult<Rc<RefCell<Self>>> {
        Self::start_with(ahb, base, size, cd, Randomizer::new())
    }

    /// `ready` decides, once per data-phase cycle, whether `HREADYOUT` is high.
    pub fn start_with(
        ahb: &AhbLite3,
        base: u64,
        size: u64,
        cd: ClockDomain,
        mut ready: Randomizer,
    ) -> TbResult<Rc<RefCell<Self>>> {
        let ahb = ahb.clone();
        let hreadyout = ahb.hreadyout.ok_or_else(|| TbError::MissingField {
            field: format!("{}_HREADYOUT", ahb.name),
        })?;
        let state = Rc::new(RefCell::new(SlaveState {
            base,
            size,
            ram: ShadowMemory::new(),
            burst: None,
            pending: None,
        }));
        let name = format!("{}_memory", ahb.name);
        let s = state.clone();
        let task = Task::spawn_from_future(
            async move {
                let lane_bytes = (ahb.hwdata.size() as u64 / 8).max(1);
                hreadyout.set(1);
                ahb.hresp.set(0);
                ahb.hrdata.set(0);
                loop {
                    cd.clk.rising_edge().await;
                    let mut s = s.borrow_mut();
                    if cd.is_reset_active() {
                        s.pending = None;
                        s.burst = None;
                        hreadyout.set(1);
                        continue;
                    }
                    if !ahb.hready.bool() {
                        if s.pending.is_some() {
                            hreadyout.set_bool(ready.get());
                        }
                        continue;
                    }
                    if let Some(t) = s.pending.take() {
                        if t.write {
                            s.complete_write(&t, ahb.hwdata.u64(), lane_bytes);
                        }
                    }
                    ahb.hrdata.set(0);
                    let selected = ahb.hsel.map_or(true, |sel| sel.bool());
                    let t = ahb.sample_address_phase();
                    if selected && t.is_active() {
                        s.on_address_phase(&t)?;
                        if !t.write {
                            ahb.hrdata.set(s.read(&t, lane_bytes));
                        }
                        s.pending = Some(t);
                        hreadyout.set_bool(ready.get());
                    } else {
                        if selected && t.trans == HTRANS_IDLE {
                            s.burst = None;
                        }
                        hreadyout.set(1);
                    }
                }
            },
            &name,
        );
        Ok(Rc::new(RefCell::new(Self {
            name,
            state,
            tasks: vec![task],
        })))
    }

    /// Byte at `addr`, `None` outside the window.
    pub fn peek(&self, addr: u64) -> Option<u8> {
        let s = self.state.borrow();
        if addr < s.base || addr >= s.base + s.size {
            return None;
        }
        Some(s.ram.read_byte(addr))
    }
}

impl Infrastructure for AhbLite3SlaveMemory {
    fn name(&self) -> &str {
        &self.name
    }
    fn start_phase(&mut self, phase: Phase) -> TbResult {
        cancel_on_done(phase, &mut self.tasks);
        Ok(())
    }
    fn is_drained(&self) -> bool {
        self.state.borrow().pending.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slave(base: u64, size: u64) -> SlaveState {
        SlaveState {
            base,
            size,
            ram: ShadowMemory::new(),
            burst: None,
            pending: None,
        }
    }

    #[test]
    fn wrap4_wraps_inside_its_footprint() {
        let mut addr = 0x38;
        let mut seen = vec![addr];
        for _ in 0..3 {
            addr = next_beat_address(addr, 4, Burst::Wrap4);
            seen.push(addr);
        }
        assert_eq!(seen, vec![0x38, 0x3c, 0x30, 0x34]);
        assert_eq!(next_beat_address(0x3c, 4, Burst::Incr4), 0x40);
    }

    #[test]
    fn generated_bursts_are_legal() {
        utils::seed(11);
        let mut gen = AhbLite3TrafficGenerator::new(12, 32).with_idle_probability(0.0);
        for _ in 0..500 {
            let beats = gen.transfers();
            let first = beats[0];
            assert_eq!(first.trans, HTRANS_NONSEQ);
            let burst = Burst::from_hburst(first.burst).unwrap();
            assert_eq!(beats.len() as u64, burst.beats().unwrap());
            let footprint = first.bytes() * beats.len() as u64;
            let base = first.addr - first.addr % footprint;
            for pair in beats.windows(2) {
                assert_eq!(pair[1].trans, HTRANS_SEQ);
                assert_eq!(pair[1].addr, next_beat_address(pair[0].addr, first.bytes(), burst));
                assert_eq!(pair[1].write, first.write);
            }
            if burst != Burst::Single {
                assert!(beats.iter().all(|t| t.addr >= base && t.addr < base + footprint));
            }
            assert!(beats.iter().all(|t| t.addr % t.bytes() == 0 && t.addr < 1 << 12));
        }
    }

    #[test]
    fn filter_restricts_every_beat() {
        utils::seed(3);
        let mut gen = AhbLite3TrafficGenerator::new(12, 32)
            .with_idle_probability(0.0)
            .with_filter(AhbLite3TrafficGeneratorWithMemory::crossbar_region(2));
        for _ in 0..200 {
            for t in gen.transfers() {
                assert_eq!((t.addr >> 8) & 3, 2);
                assert_ne!(t.addr >> 10, 2);
            }
        }
    }

    #[test]
    fn shadow_memory_predicts_reads() {
        let buffer: ReadBuffer = Rc::default();
        let mut gen =
            AhbLite3TrafficGeneratorWithMemory::new(AhbLite3TrafficGenerator::new(8, 32), buffer.clone());
        let write = AhbTransfer {
            addr: 0x12,
            write: true,
            size: 1,
            trans: HTRANS_NONSEQ,
            wdata: 0xbeef_0000,
            ..AhbTransfer::default()
        };
        gen.apply(&write);
        let read = AhbTransfer {
            write: false,
            ..write
        };
        gen.apply(&read);
        let read_word = AhbTransfer {
            addr: 0x10,
            size: 2,
            write: false,
            ..write
        };
        gen.apply(&read_word);
        assert_eq!(*buffer.borrow(), VecDeque::from(vec![0xbeef_0000, 0xbeef_0000]));
    }

    #[test]
    fn slave_rejects_broken_wrap_sequence() {
        let mut s = slave(0, 0x400);
        let first = AhbTransfer {
            addr: 0x38,
            size: 2,
            burst: Burst::Wrap4 as u64,
            trans: HTRANS_NONSEQ,
            ..AhbTransfer::default()
        };
        s.on_address_phase(&first).unwrap();
        s.on_address_phase(&AhbTransfer { addr: 0x3c, trans: HTRANS_SEQ, ..first })
            .unwrap();
        assert!(matches!(
            s.on_address_phase(&AhbTransfer { addr: 0x40, trans: HTRANS_SEQ, ..first }),
            Err(TbError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn slave_rejects_beats_past_burst_length() {
        let mut s = slave(0, 0x400);
        let first = AhbTransfer {
            addr: 0x100,
            size: 0,
            burst: Burst::Single as u64,
            trans: HTRANS_NONSEQ,
            ..AhbTransfer::default()
        };
        s.on_address_phase(&first).unwrap();
        assert!(s
            .on_address_phase(&AhbTransfer { addr: 0x101, trans: HTRANS_SEQ, ..first })
            .is_err());
    }

    #[test]
    fn slave_checks_its_window() {
        let mut s = slave(0x400, 0x400);
        let t = AhbTransfer {
            addr: 0x3fe,
            size: 1,
            trans: HTRANS_NONSEQ,
            ..AhbTransfer::default()
        };
        assert_eq!(
            s.on_address_phase(&t),
            Err(TbError::ProtocolViolation(
                "WRONG ADDRESS addr=1022 base=1024 size=1024".into()
            ))
        );
    }

    #[test]
    fn slave_memory_uses_byte_lanes() {
        let mut s = slave(0x400, 0x400);
        let t = AhbTransfer {
            addr: 0x403,
            size: 0,
            write: true,
            trans: HTRANS_NONSEQ,
            ..AhbTransfer::default()
        };
        s.complete_write(&t, 0xab00_0000, 4);
        assert_eq!(s.ram.read_byte(0x403), 0xab);
        assert_eq!(s.read(&AhbTransfer { addr: 0x400, size: 2, ..t }, 4), 0xab00_0000);
    }
}
