use crate::kernel::with_kernel;
use crate::trigger::Trigger;
use crate::TbResult;

const ROOT_HANDLE: usize = usize::MAX;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SimObject {
    pub(crate) handle: usize,
    pub(crate) kind: ObjectKind,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ObjectKind {
    Signal(u32),
    Hier,
}

impl SimObject {
    pub fn handle(&self) -> usize {
        self.handle
    }

    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    pub fn get_root() -> Self {
        SimObject {
            handle: ROOT_HANDLE,
            kind: ObjectKind::Hier,
        }
    }

    pub fn is_root(&self) -> bool {
        self.kind == ObjectKind::Hier
    }

    pub fn name(&self) -> String {
        match self.kind {
            ObjectKind::Hier => String::new(),
            ObjectKind::Signal(_) => with_kernel(|k| k.sim().get_full_name(self.handle)),
        }
    }

    pub fn size(&self) -> u32 {
        match self.kind {
            ObjectKind::Signal(size) => size,
            ObjectKind::Hier => panic!("the hierarchy root does not have a size"),
        }
    }

    pub fn from_name(full_name: &str) -> TbResult<Self> {
        with_kernel(|k| {
            let handle = k.sim().get_handle_by_name(full_name)?;
            Ok(SimObject {
                handle,
                kind: ObjectKind::Signal(k.sim().get_size(handle)),
            })
        })
    }

    /// Names are flat: below the root a child is looked up by its full name,
    /// below a signal as `<signal>_<name>`.
    pub fn get_child(&self, name: &str) -> TbResult<Self> {
        match self.kind {
            ObjectKind::Hier => SimObject::from_name(name),
            ObjectKind::Signal(_) => SimObject::from_name(&format!("{}_{}", self.name(), name)),
        }
    }

    pub fn has_child(&self, name: &str) -> bool {
        self.get_child(name).is_ok()
    }

    pub fn c(&self, name: &str) -> Self {
        self.get_child(name).unwrap_or_else(|_| {
            if self.is_root() {
                panic!("Could not get object with name {}", name)
            } else {
                panic!("Could not get object with name {}_{}", self.name(), name)
            }
        })
    }

    /// Every signal named `<prefix>_<field>`, as `(field, object)` in
    /// declaration order.
    pub fn children_with_prefix(&self, prefix: &str) -> Vec<(String, SimObject)> {
        let full_prefix = match self.kind {
            ObjectKind::Hier => format!("{}_", prefix),
            ObjectKind::Signal(_) => format!("{}_{}_", self.name(), prefix),
        };
        let names = with_kernel(|k| k.sim().signal_names());
        names
            .into_iter()
            .filter_map(|n| {
                let field = n.strip_prefix(&full_prefix)?.to_string();
                SimObject::from_name(&n).ok().map(|obj| (field, obj))
            })
            .collect()
    }

    fn signal_handle(&self) -> usize {
        if self.is_root() {
            panic!("the hierarchy root has no value");
        }
        self.handle
    }

    pub fn u64(&self) -> u64 {
        let handle = self.signal_handle();
        with_kernel(|k| k.sim().get_value(handle))
    }

    pub fn u32(&self) -> u32 {
        self.u64() as u32
    }

    pub fn bool(&self) -> bool {
        self.u64() != 0
    }

    /// Buffered: the new value becomes visible in the next delta cycle.
    pub fn set(&self, val: u64) {
        let handle = self.signal_handle();
        with_kernel(|k| k.write(handle, val));
    }

    pub fn set_bool(&self, val: bool) {
        self.set(val as u64);
    }

    // convenience functions to get edge triggers for this signal
    pub fn rising_edge(self) -> Trigger {
        Trigger::rising_edge(self)
    }
    pub async fn rising_edge_ro(self) -> TbResult {
        self.rising_edge().await;
        Trigger::read_only().await;
        Ok(())
    }
    pub async fn rising_edge_rw(self) -> TbResult {
        self.rising_edge().await;
        Trigger::read_write().await;
        Ok(())
    }
    pub fn falling_edge(self) -> Trigger {
        Trigger::falling_edge(self)
    }
    pub fn edge(self) -> Trigger {
        Trigger::edge(self)
    }
}
