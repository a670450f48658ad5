use std::collections::HashMap;

use crate::{TbError, TbResult};

/// A master's transaction-id range `[base, base + count)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdPool {
    pub base: u64,
    pub count: u64,
}

impl IdPool {
    pub fn new(base: u64, count: u64) -> Self {
        Self { base, count }
    }

    pub fn contains(&self, id: u64) -> bool {
        id >= self.base && id < self.base + self.count
    }

    fn overlaps(&self, other: &IdPool) -> bool {
        self.base < other.base + other.count && other.base < self.base + self.count
    }

    pub fn random_id(&self) -> u64 {
        self.base + crate::utils::rand_int(self.count)
    }
}

impl Default for IdPool {
    fn default() -> Self {
        Self { base: 0, count: 4 }
    }
}

/// Ids of different masters must never overlap: the out-of-order scoreboards
/// key on id alone.
#[derive(Debug, Default)]
pub struct IdPoolRegistry {
    pools: Vec<(String, IdPool)>,
}

impl IdPoolRegistry {
    pub fn register(&mut self, owner: &str, pool: IdPool) -> TbResult {
        if let Some((other, p)) = self.pools.iter().find(|(_, p)| p.overlaps(&pool)) {
            return Err(TbError::protocol(format!(
                "id pool {:?} of {} overlaps {:?} of {}",
                pool, owner, p, other
            )));
        }
        self.pools.push((owner.to_string(), pool));
        Ok(())
    }

    pub fn owner_of(&self, id: u64) -> Option<&str> {
        self.pools
            .iter()
            .find(|(_, p)| p.contains(id))
            .map(|(o, _)| o.as_str())
    }
}

/// Per-test state handed explicitly to the agents that need it. Read and
/// write ids are separate namespaces on AXI4.
#[derive(Debug, Default)]
pub struct TbContext {
    counters: HashMap<String, u64>,
    pub read_ids: IdPoolRegistry,
    pub write_ids: IdPoolRegistry,
}

impl TbContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(&mut self, counter: &str) -> u64 {
        let c = self.counters.entry(counter.to_string()).or_insert(0);
        *c += 1;
        *c
    }

    pub fn get(&self, counter: &str) -> u64 {
        self.counters.get(counter).copied().unwrap_or(0)
    }
}
