//! AXI4 agents for crossbar and memory testbenches.
//!
//! Channel field names are plain data: every channel is a [`Stream`] named
//! `<bus>_<channel>` whose payload bundle carries the fields below.

mod master;
mod memory;
mod monitor;
mod slave;

pub use master::{MasterConfig, ReadMasterDriver, SharedMasterDriver, WriteMasterDriver};
pub use memory::Axi4SharedMemoryChecker;
pub use monitor::{
    ReadMasterMonitor, SharedDataMonitor, SharedMasterMonitor, WriteDataMonitor,
    WriteMasterMonitor,
};
pub use slave::{ReadSlaveDriver, SharedSlaveDriver, WriteSlaveDriver};

use crate::context::IdPool;
use crate::signal::SimObject;
use crate::stream::Stream;
use crate::transaction::Transaction;
use crate::utils::{choose, rand, rand_bits};
use crate::{TbError, TbResult};

pub const OKAY: u64 = 0;
pub const DECERR: u64 = 3;
pub const BURST_INCR: u64 = 1;

pub const AX_FIELDS: &[&str] = &[
    "addr", "id", "region", "len", "size", "burst", "lock", "cache", "qos", "prot",
];
pub const W_FIELDS: &[&str] = &["data", "strb", "last"];
pub const R_FIELDS: &[&str] = &["data", "id", "resp", "last"];
pub const B_FIELDS: &[&str] = &["id", "resp"];

fn optional_stream(dut: SimObject, name: &str) -> TbResult<Option<Stream>> {
    if dut.has_child(&format!("{}_valid", name)) {
        Stream::new(dut, name).map(Some)
    } else {
        Ok(None)
    }
}

fn required(channel: &Option<Stream>, bus: &str, ch: &str) -> TbResult<Stream> {
    channel
        .clone()
        .ok_or_else(|| TbError::UnknownSignal(format!("{}_{}_valid", bus, ch)))
}

/// Full, read-only or write-only AXI4 port: whichever channels exist.
#[derive(Clone, Debug)]
pub struct Axi4 {
    pub name: String,
    pub ar: Option<Stream>,
    pub r: Option<Stream>,
    pub aw: Option<Stream>,
    pub w: Option<Stream>,
    pub b: Option<Stream>,
}

impl Axi4 {
    pub fn new(dut: SimObject, name: &str) -> TbResult<Self> {
        Ok(Self {
            name: name.to_string(),
            ar: optional_stream(dut, &format!("{}_ar", name))?,
            r: optional_stream(dut, &format!("{}_r", name))?,
            aw: optional_stream(dut, &format!("{}_aw", name))?,
            w: optional_stream(dut, &format!("{}_w", name))?,
            b: optional_stream(dut, &format!("{}_b", name))?,
        })
    }

    pub fn ar(&self) -> TbResult<Stream> {
        required(&self.ar, &self.name, "ar")
    }
    pub fn r(&self) -> TbResult<Stream> {
        required(&self.r, &self.name, "r")
    }
    pub fn aw(&self) -> TbResult<Stream> {
        required(&self.aw, &self.name, "aw")
    }
    pub fn w(&self) -> TbResult<Stream> {
        required(&self.w, &self.name, "w")
    }
    pub fn b(&self) -> TbResult<Stream> {
        required(&self.b, &self.name, "b")
    }
}

/// AXI4 port with a single command channel `arw` (AX fields plus `write`).
#[derive(Clone, Debug)]
pub struct Axi4Shared {
    pub name: String,
    pub arw: Stream,
    pub w: Stream,
    pub b: Stream,
    pub r: Stream,
}

impl Axi4Shared {
    pub fn new(dut: SimObject, name: &str) -> TbResult<Self> {
        Ok(Self {
            name: name.to_string(),
            arw: Stream::new(dut, &format!("{}_arw", name))?,
            w: Stream::new(dut, &format!("{}_w", name))?,
            b: Stream::new(dut, &format!("{}_b", name))?,
            r: Stream::new(dut, &format!("{}_r", name))?,
        })
    }
}

/// Where a master sends its commands.
///
/// A mapped address is `rand_bits(offset_bits) + page`: every page decodes
/// `[page, page + 2^offset_bits)` and nothing else does. With probability
/// `decode_error_rate` the command targets `unmapped` instead, which must
/// lie outside every page.
#[derive(Clone, Debug, PartialEq)]
pub struct AddressPlan {
    pub offset_bits: u32,
    pub pages: Vec<u64>,
    pub decode_error_rate: f64,
    pub unmapped: u64,
}

impl Default for AddressPlan {
    fn default() -> Self {
        Self {
            offset_bits: 12,
            pages: vec![0x0000, 0x1000, 0x2000],
            decode_error_rate: 0.1,
            unmapped: 1 << 14,
        }
    }
}

impl AddressPlan {
    pub fn with_pages(pages: &[u64]) -> Self {
        Self {
            pages: pages.to_vec(),
            ..Self::default()
        }
    }

    pub fn random_address(&self) -> u64 {
        if rand() < self.decode_error_rate {
            return self.unmapped;
        }
        rand_bits(self.offset_bits) + choose(&self.pages).unwrap_or(0)
    }

    pub fn is_mapped(&self, addr: u64) -> bool {
        self.pages.iter().any(|&page| {
            addr.checked_sub(page)
                .map_or(false, |offset| offset.checked_shr(self.offset_bits).unwrap_or(0) == 0)
        })
    }

    pub fn validate(&self) -> TbResult {
        if self.offset_bits >= 64 {
            return Err(TbError::Config(format!("offset_bits {} too wide", self.offset_bits)));
        }
        if self.decode_error_rate > 0.0 && self.is_mapped(self.unmapped) {
            return Err(TbError::Config(format!(
                "unmapped address {:#x} falls inside a page",
                self.unmapped
            )));
        }
        Ok(())
    }
}

/// A random, legal command for `plan` using an id of `ids`.
pub fn random_command(plan: &AddressPlan, ids: &IdPool) -> Transaction {
    Transaction::new()
        .with("addr", plan.random_address())
        .with("id", ids.random_id())
        .with("region", rand_bits(4))
        .with("len", rand_bits(4))
        .with("size", rand_bits(3))
        .with("burst", rand_bits(2))
        .with("lock", rand_bits(1))
        .with("cache", rand_bits(4))
        .with("qos", rand_bits(4))
        .with("prot", rand_bits(3))
}

/// The `len + 1` W beats linked to a write command: `data = addr + i`.
pub fn write_data_beats(cmd: &Transaction) -> TbResult<Vec<Transaction>> {
    let addr = cmd.get("addr")?;
    let len = cmd.get("len")?;
    Ok((0..=len)
        .map(|i| {
            Transaction::new()
                .with("data", addr + i)
                .with("strb", (addr + i) & 0xF)
                .with("last", (i == len) as u64)
        })
        .collect())
}

/// Expected R beats of a read command: address-derived data, or zero data
/// with DECERR when no slave decodes the address.
pub fn read_rsp_reference(cmd: &Transaction, plan: &AddressPlan) -> TbResult<Vec<Transaction>> {
    let addr = cmd.get("addr")?;
    let len = cmd.get("len")?;
    let id = cmd.get("id")?;
    let mapped = plan.is_mapped(addr);
    Ok((0..=len)
        .map(|i| {
            Transaction::new()
                .with("id", id)
                .with("data", if mapped { addr + i } else { 0 })
                .with("resp", if mapped { OKAY } else { DECERR })
                .with("last", (i == len) as u64)
        })
        .collect())
}

pub fn write_rsp_reference(cmd: &Transaction, plan: &AddressPlan) -> TbResult<Transaction> {
    let resp = if plan.is_mapped(cmd.get("addr")?) {
        OKAY
    } else {
        DECERR
    };
    Ok(Transaction::new().with("id", cmd.get("id")?).with("resp", resp))
}
