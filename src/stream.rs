//! Valid/ready `Stream` and valid-only `Flow` channels, plus the agents that
//! drive and observe them.
//!
//! Every agent samples on the rising edge of its clock domain. Writes are
//! buffered by the kernel, so what an agent reads at the edge is the value of
//! the previous cycle, whatever the order agents were started in.

use crate::executor::{JoinHandle, Task};
use crate::randomizer::Randomizer;
use crate::signal::SimObject;
use crate::transaction::Transaction;
use crate::trigger::{Event, Trigger};
use crate::utils::ClockDomain;
use crate::{TbError, TbResult};

/// The signals named `<prefix>_<field>`.
#[derive(Clone, Debug)]
pub struct Bundle {
    prefix: String,
    elements: Vec<(String, SimObject)>,
}

fn mask(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

impl Bundle {
    pub fn new(dut: SimObject, prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            elements: dut.children_with_prefix(prefix),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.elements.iter().map(|(f, _)| f.as_str())
    }

    pub fn get(&self, field: &str) -> Option<SimObject> {
        self.elements
            .iter()
            .find(|(f, _)| f == field)
            .map(|(_, s)| *s)
    }

    pub fn read(&self) -> Transaction {
        let mut t = Transaction::new();
        for (field, sig) in self.elements.iter() {
            t.set(field, sig.u64());
        }
        t
    }

    /// Drives every element from `trans`; an element without a field in
    /// `trans` is an error and nothing is written.
    pub fn write(&self, trans: &Transaction) -> TbResult {
        let mut values = Vec::with_capacity(self.elements.len());
        for (field, sig) in self.elements.iter() {
            values.push((*sig, trans.get(field)?));
        }
        for (sig, value) in values {
            sig.set(value);
        }
        Ok(())
    }

    /// True when the current signal values equal `trans` truncated to the
    /// element widths.
    pub fn holds(&self, trans: &Transaction) -> bool {
        self.elements.iter().all(|(field, sig)| match trans.get(field) {
            Ok(v) => sig.u64() == v & mask(sig.size()),
            Err(_) => false,
        })
    }
}

#[derive(Clone, Debug)]
pub struct Stream {
    pub name: String,
    pub valid: SimObject,
    pub ready: SimObject,
    pub payload: Bundle,
}

impl Stream {
    pub fn new(dut: SimObject, name: &str) -> TbResult<Self> {
        Ok(Self {
            name: name.to_string(),
            valid: dut.get_child(&format!("{}_valid", name))?,
            ready: dut.get_child(&format!("{}_ready", name))?,
            payload: Bundle::new(dut, &format!("{}_payload", name)),
        })
    }

    pub fn fire(&self) -> bool {
        self.valid.bool() && self.ready.bool()
    }
}

#[derive(Clone)]
pub struct Flow {
    pub name: String,
    pub valid: SimObject,
    pub payload: Bundle,
    pub event_valid: Event<Transaction>,
}

impl Flow {
    pub fn new(dut: SimObject, name: &str) -> TbResult<Self> {
        Ok(Self {
            name: name.to_string(),
            valid: dut.get_child(&format!("{}_valid", name))?,
            payload: Bundle::new(dut, &format!("{}_payload", name)),
            event_valid: Event::new(),
        })
    }

    /// Publishes the payload on `event_valid` at every edge of `clk` where
    /// valid is high.
    pub fn start_monitoring_valid(&self, clk: SimObject) -> JoinHandle {
        let valid = self.valid;
        let payload = self.payload.clone();
        let event = self.event_valid.clone();
        Task::spawn_from_future(
            async move {
                loop {
                    clk.rising_edge().await;
                    if valid.bool() {
                        event.set(payload.read());
                    }
                }
            },
            &format!("{}_monitor_valid", self.name),
        )
    }
}

/// Pushes generated transactions into a stream.
///
/// `Idle -> Asserted` when the generator yields on an eligible cycle,
/// `Asserted -> Idle` exactly on an accepted handshake. While stalled the
/// payload is left untouched.
pub struct StreamDriverMaster;

impl StreamDriverMaster {
    pub fn start<G>(stream: &Stream, cd: ClockDomain, mut generator: G) -> JoinHandle
    where
        G: FnMut() -> Option<Transaction> + 'static,
    {
        let stream = stream.clone();
        let name = format!("{}_driver_master", stream.name);
        Task::spawn_from_future(
            async move {
                let clk = cd.clk;
                stream.valid.set(0);
                let mut held: Option<Transaction> = None;
                loop {
                    clk.rising_edge().await;
                    if cd.is_reset_active() {
                        stream.valid.set(0);
                        held = None;
                        continue;
                    }
                    if held.is_some() && stream.ready.bool() {
                        stream.valid.set(0);
                        let delay = held.take().map(|t| t.next_delay).unwrap_or(0);
                        for _ in 0..delay {
                            clk.rising_edge().await;
                        }
                    }
                    match &held {
                        Some(t) => debug_assert!(
                            stream.payload.holds(t),
                            "{} payload changed while stalled",
                            stream.name
                        ),
                        None => {
                            if let Some(t) = generator() {
                                stream.payload.write(&t)?;
                                stream.valid.set(1);
                                held = Some(t);
                            }
                        }
                    }
                }
            },
            &name,
        )
    }

    /// Like [`start`](Self::start), but `randomizer` decides on every idle
    /// cycle whether the generator is asked for the next transaction, so
    /// valid is stalled between transfers.
    pub fn start_randomized<G>(
        stream: &Stream,
        cd: ClockDomain,
        mut randomizer: Randomizer,
        mut generator: G,
    ) -> JoinHandle
    where
        G: FnMut() -> Option<Transaction> + 'static,
    {
        Self::start(stream, cd, move || {
            if randomizer.get() {
                generator()
            } else {
                None
            }
        })
    }
}

/// Drives `ready` from its own randomizer, independent of `valid`.
pub struct StreamDriverSlave;

impl StreamDriverSlave {
    pub fn start(stream: &Stream, cd: ClockDomain) -> JoinHandle {
        Self::start_with(stream, cd, Randomizer::new())
    }

    pub fn start_with(stream: &Stream, cd: ClockDomain, mut randomizer: Randomizer) -> JoinHandle {
        let ready = stream.ready;
        Task::spawn_from_future(
            async move {
                ready.set(1);
                loop {
                    cd.clk.rising_edge().await;
                    ready.set_bool(randomizer.get());
                }
            },
            &format!("{}_driver_slave", stream.name),
        )
    }
}

/// Forwards every accepted handshake to `callback`. The payload is
/// snapshotted at the edge, the callback runs once values settled.
pub struct StreamMonitor;

impl StreamMonitor {
    pub fn start<C>(stream: &Stream, cd: ClockDomain, mut callback: C) -> JoinHandle
    where
        C: FnMut(Transaction) -> TbResult + 'static,
    {
        let stream = stream.clone();
        let name = format!("{}_monitor", stream.name);
        Task::spawn_from_future(
            async move {
                loop {
                    cd.clk.rising_edge().await;
                    if cd.is_reset_active() || !stream.fire() {
                        continue;
                    }
                    let trans = stream.payload.read();
                    Trigger::read_only().await;
                    callback(trans)?;
                }
            },
            &name,
        )
    }
}

pub struct FlowMonitor;

impl FlowMonitor {
    pub fn start<C>(flow: &Flow, cd: ClockDomain, mut callback: C) -> JoinHandle
    where
        C: FnMut(Transaction) -> TbResult + 'static,
    {
        let valid = flow.valid;
        let payload = flow.payload.clone();
        Task::spawn_from_future(
            async move {
                loop {
                    cd.clk.rising_edge().await;
                    if cd.is_reset_active() || !valid.bool() {
                        continue;
                    }
                    let trans = payload.read();
                    Trigger::read_only().await;
                    callback(trans)?;
                }
            },
            &format!("{}_monitor", flow.name),
        )
    }
}

/// Each cycle: `Some` drives valid and payload for that cycle only, `None`
/// drives valid low.
pub struct FlowDriverMaster;

impl FlowDriverMaster {
    pub fn start<G>(flow: &Flow, cd: ClockDomain, mut generator: G) -> JoinHandle
    where
        G: FnMut() -> Option<Transaction> + 'static,
    {
        let valid = flow.valid;
        let payload = flow.payload.clone();
        Task::spawn_from_future(
            async move {
                valid.set(0);
                loop {
                    cd.clk.rising_edge().await;
                    if cd.is_reset_active() {
                        valid.set(0);
                        continue;
                    }
                    match generator() {
                        Some(t) => {
                            payload.write(&t)?;
                            valid.set(1);
                        }
                        None => valid.set(0),
                    }
                }
            },
            &format!("{}_driver_master", flow.name),
        )
    }
}

/// Checks the handshake rule on a stream driven by someone else: once
/// `valid && !ready` was sampled, valid must stay high and the payload
/// unchanged until the transfer happens.
pub struct HandshakeChecker;

impl HandshakeChecker {
    pub fn start(stream: &Stream, cd: ClockDomain) -> JoinHandle {
        let stream = stream.clone();
        let name = format!("{}_handshake_checker", stream.name);
        Task::spawn_from_future(
            async move {
                let mut stalled: Option<Transaction> = None;
                loop {
                    cd.clk.rising_edge().await;
                    if cd.is_reset_active() {
                        stalled = None;
                        continue;
                    }
                    let valid = stream.valid.bool();
                    let payload = stream.payload.read();
                    if let Some(prev) = stalled.take() {
                        if !valid {
                            return Err(TbError::protocol(format!(
                                "{}: valid dropped while stalled",
                                stream.name
                            )));
                        }
                        if payload != prev {
                            return Err(TbError::protocol(format!(
                                "{}: payload changed while stalled\nbefore =>\n{}\nafter =>\n{}",
                                stream.name, prev, payload
                            )));
                        }
                    }
                    if valid && !stream.ready.bool() {
                        stalled = Some(payload);
                    }
                }
            },
            &name,
        )
    }
}
