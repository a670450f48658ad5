//! Software DUT models and register-file layouts shared by the integration
//! tests. Every model samples on the rising edge like registered logic.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use busverif::axi4::{Axi4, Axi4Shared, DECERR, OKAY};
use busverif::prelude::*;
use busverif::regfile::RegisterFile;
use busverif::stream::{StreamDriverMaster, StreamDriverSlave, StreamMonitor};

pub const AX: &[(&str, u32)] = &[
    ("addr", 32),
    ("id", 4),
    ("region", 4),
    ("len", 8),
    ("size", 3),
    ("burst", 2),
    ("lock", 1),
    ("cache", 4),
    ("qos", 4),
    ("prot", 3),
];
pub const W: &[(&str, u32)] = &[("data", 32), ("strb", 4), ("last", 1)];
pub const R: &[(&str, u32)] = &[("data", 32), ("id", 4), ("resp", 2), ("last", 1)];
pub const B: &[(&str, u32)] = &[("id", 4), ("resp", 2)];

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn clocked() -> RegisterFile {
    let mut rf = RegisterFile::new();
    rf.add_signal("clk", 1).unwrap();
    rf.add_signal("reset", 1).unwrap();
    rf
}

pub fn add_axi4(rf: &mut RegisterFile, name: &str) {
    rf.add_stream(&format!("{}_ar", name), AX).unwrap();
    rf.add_stream(&format!("{}_r", name), R).unwrap();
    rf.add_stream(&format!("{}_aw", name), AX).unwrap();
    rf.add_stream(&format!("{}_w", name), W).unwrap();
    rf.add_stream(&format!("{}_b", name), B).unwrap();
}

pub fn add_axi4_shared(rf: &mut RegisterFile, name: &str) {
    let mut arw = AX.to_vec();
    arw.push(("write", 1));
    rf.add_stream(&format!("{}_arw", name), &arw).unwrap();
    rf.add_stream(&format!("{}_w", name), W).unwrap();
    rf.add_stream(&format!("{}_b", name), B).unwrap();
    rf.add_stream(&format!("{}_r", name), R).unwrap();
}

pub fn add_ahb(rf: &mut RegisterFile, name: &str) {
    rf.add_bundle(
        name,
        &[
            ("HADDR", 32),
            ("HWRITE", 1),
            ("HSIZE", 3),
            ("HBURST", 3),
            ("HPROT", 4),
            ("HTRANS", 2),
            ("HMASTLOCK", 1),
            ("HWDATA", 32),
            ("HRDATA", 32),
            ("HREADY", 1),
            ("HREADYOUT", 1),
            ("HRESP", 1),
            ("HSEL", 1),
        ],
    )
    .unwrap();
}

/// Clock domain on `clk`/`reset`, started.
pub fn start_clock(dut: SimObject) -> ClockDomain {
    let cd = ClockDomain::new(dut.c("clk"), Some(dut.c("reset")));
    Task::fork(cd.start());
    cd
}

/// Drives `dst` with `src` whenever `src` changes.
pub fn wire(src: SimObject, dst: SimObject) -> JoinHandle {
    Task::spawn_from_future(
        async move {
            dst.set(src.u64());
            loop {
                src.edge().await;
                dst.set(src.u64());
            }
        },
        &format!("wire_{}", src.name()),
    )
}

/// Connects master stream `m` to slave stream `s`.
pub fn wire_stream(m: &Stream, s: &Stream) {
    wire(m.valid, s.valid);
    wire(s.ready, m.ready);
    for field in m.payload.fields() {
        if let Some(dst) = s.payload.get(field) {
            wire(m.payload.get(field).unwrap(), dst);
        }
    }
}

/// Connects a master-side AXI4 port to a slave-side one.
pub fn wire_axi4(m: &Axi4, s: &Axi4) {
    wire_stream(&m.ar().unwrap(), &s.ar().unwrap());
    wire_stream(&m.aw().unwrap(), &s.aw().unwrap());
    wire_stream(&m.w().unwrap(), &s.w().unwrap());
    wire_stream(&s.r().unwrap(), &m.r().unwrap());
    wire_stream(&s.b().unwrap(), &m.b().unwrap());
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FifoFault {
    None,
    /// Flips bit 0 of every popped `data` field.
    FlipData,
    /// Only presents its head while another entry is queued behind it, so
    /// the last transaction pushed never comes out.
    HoldLast,
}

/// Two-entry FIFO with an optional injected `fault`.
pub fn start_fifo2(push: &Stream, pop: &Stream, cd: ClockDomain, fault: FifoFault) -> JoinHandle {
    let (push, pop) = (push.clone(), pop.clone());
    Task::spawn_from_future(
        async move {
            let mut queue: VecDeque<Transaction> = VecDeque::new();
            push.ready.set(1);
            pop.valid.set(0);
            loop {
                cd.clk.rising_edge().await;
                if cd.is_reset_active() {
                    queue.clear();
                    push.ready.set(1);
                    pop.valid.set(0);
                    continue;
                }
                if pop.fire() {
                    queue.pop_front();
                }
                if push.fire() {
                    let mut t = push.payload.read();
                    if fault == FifoFault::FlipData {
                        let data = t.get("data")?;
                        t.set("data", data ^ 1);
                    }
                    queue.push_back(t);
                }
                push.ready.set_bool(queue.len() < 2);
                let stalled = fault == FifoFault::HoldLast && queue.len() < 2;
                match queue.front() {
                    Some(t) if !stalled => {
                        pop.payload.write(t)?;
                        pop.valid.set(1);
                    }
                    _ => pop.valid.set(0),
                }
            }
        },
        "fifo2",
    )
}

/// Rising edges after reset where `sig` was high, and low edges between two
/// high ones (trailing idle cycles are not counted).
pub fn count_levels(sig: SimObject, cd: ClockDomain) -> Rc<RefCell<(u64, u64)>> {
    let counts = Rc::new(RefCell::new((0u64, 0u64)));
    let c = counts.clone();
    Task::fork(async move {
        let mut seen_high = false;
        let mut low_run = 0u64;
        loop {
            cd.clk.rising_edge().await;
            if cd.is_reset_active() {
                continue;
            }
            if sig.bool() {
                let mut c = c.borrow_mut();
                c.0 += 1;
                if seen_high {
                    c.1 += low_run;
                }
                seen_high = true;
                low_run = 0;
            } else {
                low_run += 1;
            }
        }
    });
    counts
}

#[derive(Default)]
struct DecoderState {
    unmapped: u64,
    reads: BTreeMap<u64, VecDeque<Transaction>>,
    write_cmds: VecDeque<Transaction>,
    write_beats: u64,
    writes: BTreeMap<u64, VecDeque<Transaction>>,
}

fn pop_any_id(queues: &mut BTreeMap<u64, VecDeque<Transaction>>) -> Option<Transaction> {
    if queues.is_empty() {
        return None;
    }
    let idx = busverif::utils::rand_int(queues.len() as u64) as usize;
    let id = *queues.keys().nth(idx)?;
    let q = queues.get_mut(&id)?;
    let t = q.pop_front();
    if q.is_empty() {
        queues.remove(&id);
    }
    t
}

/// AXI4 slave answering every address below `unmapped` with `data = addr + beat`
/// and DECERR above. Responses of different ids interleave randomly.
pub fn start_axi_decoder(axi: &Axi4, unmapped: u64, cd: ClockDomain) {
    let state = Rc::new(RefCell::new(DecoderState {
        unmapped,
        ..DecoderState::default()
    }));
    let (ar, r, aw, w, b) = (
        axi.ar().unwrap(),
        axi.r().unwrap(),
        axi.aw().unwrap(),
        axi.w().unwrap(),
        axi.b().unwrap(),
    );
    StreamDriverSlave::start(&ar, cd);
    StreamDriverSlave::start(&aw, cd);
    StreamDriverSlave::start(&w, cd);

    let s = state.clone();
    StreamMonitor::start(&ar, cd, move |cmd| {
        let mut s = s.borrow_mut();
        let (addr, len, id) = (cmd.get("addr")?, cmd.get("len")?, cmd.get("id")?);
        let mapped = addr < s.unmapped;
        for i in 0..=len {
            let beat = Transaction::new()
                .with("data", if mapped { addr + i } else { 0 })
                .with("id", id)
                .with("resp", if mapped { OKAY } else { DECERR })
                .with("last", (i == len) as u64);
            s.reads.entry(id).or_default().push_back(beat);
        }
        Ok(())
    });
    let s = state.clone();
    StreamDriverMaster::start(&r, cd, move || pop_any_id(&mut s.borrow_mut().reads));

    let s = state.clone();
    StreamMonitor::start(&aw, cd, move |cmd| {
        s.borrow_mut().write_cmds.push_back(cmd);
        Ok(())
    });
    let s = state.clone();
    StreamMonitor::start(&w, cd, move |_beat| {
        let mut s = s.borrow_mut();
        s.write_beats += 1;
        while let Some(cmd) = s.write_cmds.front() {
            let beats = cmd.get("len")? + 1;
            if s.write_beats < beats {
                break;
            }
            let (addr, id) = (cmd.get("addr")?, cmd.get("id")?);
            s.write_beats -= beats;
            s.write_cmds.pop_front();
            let resp = if addr < s.unmapped { OKAY } else { DECERR };
            s.writes
                .entry(id)
                .or_default()
                .push_back(Transaction::new().with("id", id).with("resp", resp));
        }
        Ok(())
    });
    let s = state;
    StreamDriverMaster::start(&b, cd, move || pop_any_id(&mut s.borrow_mut().writes));
}

#[derive(Default)]
struct RamState {
    mem: Vec<u8>,
    write_cmds: VecDeque<Transaction>,
    write_beats: VecDeque<Transaction>,
    b: VecDeque<Transaction>,
    r: VecDeque<Transaction>,
    read_beats: u64,
    flip_read_beat: Option<u64>,
}

impl RamState {
    fn apply_writes(&mut self) -> TbResult {
        while let Some(cmd) = self.write_cmds.front() {
            let beats = cmd.get("len")? as usize + 1;
            if self.write_beats.len() < beats {
                break;
            }
            let (addr, id) = (cmd.get("addr")?, cmd.get("id")?);
            for (i, beat) in self.write_beats.drain(..beats).enumerate() {
                let (data, strb) = (beat.get("data")?, beat.get("strb")?);
                for byte in 0..4u64 {
                    if (strb >> byte) & 1 == 1 {
                        self.mem[(addr + i as u64 * 4 + byte) as usize] = (data >> (8 * byte)) as u8;
                    }
                }
            }
            self.write_cmds.pop_front();
            self.b.push_back(Transaction::new().with("id", id).with("resp", OKAY));
        }
        Ok(())
    }

    fn read(&mut self, cmd: &Transaction) -> TbResult {
        let (addr, len, id) = (cmd.get("addr")?, cmd.get("len")?, cmd.get("id")?);
        for i in 0..=len {
            let base = (addr + i * 4) as usize;
            let mut data = (0..4).fold(0u64, |acc, b| acc | (self.mem[base + b] as u64) << (8 * b));
            if self.flip_read_beat == Some(self.read_beats) {
                data ^= 1;
            }
            self.read_beats += 1;
            self.r.push_back(
                Transaction::new()
                    .with("data", data)
                    .with("id", id)
                    .with("resp", OKAY)
                    .with("last", (i == len) as u64),
            );
        }
        Ok(())
    }
}

/// 32-bit on-chip RAM of `bytes` bytes behind an `Axi4Shared` port.
/// Zero-initialized; answers in command order.
pub fn start_axi_shared_ram(axi: &Axi4Shared, bytes: usize, cd: ClockDomain) {
    start_faulty_axi_shared_ram(axi, bytes, cd, None);
}

/// Same RAM, but the read beat numbered `flip_read_beat` (counted from 0
/// over all reads) comes back with bit 0 of its data flipped.
pub fn start_faulty_axi_shared_ram(
    axi: &Axi4Shared,
    bytes: usize,
    cd: ClockDomain,
    flip_read_beat: Option<u64>,
) {
    let state = Rc::new(RefCell::new(RamState {
        mem: vec![0; bytes],
        flip_read_beat,
        ..RamState::default()
    }));
    StreamDriverSlave::start(&axi.arw, cd);
    StreamDriverSlave::start(&axi.w, cd);
    let s = state.clone();
    StreamMonitor::start(&axi.arw, cd, move |cmd| {
        let mut s = s.borrow_mut();
        if cmd.get("write")? == 1 {
            s.write_cmds.push_back(cmd);
            s.apply_writes()
        } else {
            s.read(&cmd)
        }
    });
    let s = state.clone();
    StreamMonitor::start(&axi.w, cd, move |beat| {
        let mut s = s.borrow_mut();
        s.write_beats.push_back(beat);
        s.apply_writes()
    });
    let s = state.clone();
    StreamDriverMaster::start(&axi.b, cd, move || s.borrow_mut().b.pop_front());
    let s = state;
    StreamDriverMaster::start(&axi.r, cd, move || s.borrow_mut().r.pop_front());
}
