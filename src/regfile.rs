use std::collections::HashMap;

use crate::sim_if::SimIf;
use crate::{TbError, TbResult};

struct Register {
    name: String,
    width: u32,
    value: u64,
}

/// Flat table of named, width-masked registers. The built-in [`SimIf`]: DUT
/// models run as tasks and read/write it like wires.
#[derive(Default)]
pub struct RegisterFile {
    regs: Vec<Register>,
    by_name: HashMap<String, usize>,
}

#[inline]
fn mask(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

impl RegisterFile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_signal(&mut self, name: &str, width: u32) -> TbResult<usize> {
        if self.by_name.contains_key(name) {
            return Err(TbError::DuplicateSignal(name.to_string()));
        }
        let handle = self.regs.len();
        self.regs.push(Register {
            name: name.to_string(),
            width,
            value: 0,
        });
        self.by_name.insert(name.to_string(), handle);
        Ok(handle)
    }

    /// Declares `<prefix>_<field>` for every field.
    pub fn add_bundle(&mut self, prefix: &str, fields: &[(&str, u32)]) -> TbResult<()> {
        for (field, width) in fields {
            self.add_signal(&format!("{}_{}", prefix, field), *width)?;
        }
        Ok(())
    }

    /// Declares `<prefix>_valid`, `<prefix>_ready` and the `<prefix>_payload` bundle.
    pub fn add_stream(&mut self, prefix: &str, fields: &[(&str, u32)]) -> TbResult<()> {
        self.add_signal(&format!("{}_valid", prefix), 1)?;
        self.add_signal(&format!("{}_ready", prefix), 1)?;
        self.add_bundle(&format!("{}_payload", prefix), fields)
    }

    pub fn add_flow(&mut self, prefix: &str, fields: &[(&str, u32)]) -> TbResult<()> {
        self.add_signal(&format!("{}_valid", prefix), 1)?;
        self.add_bundle(&format!("{}_payload", prefix), fields)
    }

    pub fn len(&self) -> usize {
        self.regs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regs.is_empty()
    }
}

impl SimIf for RegisterFile {
    fn get_handle_by_name(&self, name: &str) -> TbResult<usize> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| TbError::UnknownSignal(name.to_string()))
    }

    fn get_value(&self, handle: usize) -> u64 {
        self.regs[handle].value
    }

    fn set_value(&mut self, handle: usize, value: u64) {
        let reg = &mut self.regs[handle];
        reg.value = value & mask(reg.width);
    }

    fn get_size(&self, handle: usize) -> u32 {
        self.regs[handle].width
    }

    fn get_full_name(&self, handle: usize) -> String {
        self.regs[handle].name.clone()
    }

    fn signal_names(&self) -> Vec<String> {
        self.regs.iter().map(|r| r.name.clone()).collect()
    }
}
