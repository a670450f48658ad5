//! Reference vs observed (UUT) transaction matching.
//!
//! Both scoreboards compare the head of the observed queue with the head of
//! the reference queue (FIFO). The out-of-order one keeps that FIFO per key
//! and puts no ordering constraint across keys.

use std::collections::{BTreeMap, VecDeque};

use crate::phase::{Infrastructure, Phase};
use crate::transaction::Transaction;
use crate::{TbError, TbResult};

pub type MatchListener = Box<dyn FnMut(u64, &Transaction, &Transaction)>;

#[derive(Default)]
struct Bucket {
    refs: VecDeque<Transaction>,
    uuts: VecDeque<Transaction>,
}

impl Bucket {
    fn is_empty(&self) -> bool {
        self.refs.is_empty() && self.uuts.is_empty()
    }

    fn dump(&self, out: &mut String) {
        for e in self.refs.iter() {
            out.push_str(&format!("REF:\n{}\n", e));
        }
        for e in self.uuts.iter() {
            out.push_str(&format!("UUT:\n{}\n", e));
        }
    }
}

/// State and behavior shared by both disciplines.
struct Core {
    path: String,
    max_depth: Option<usize>,
    strict: bool,
    ref_count: u64,
    uut_count: u64,
    matched: u64,
    listeners: Vec<MatchListener>,
}

impl Core {
    fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            max_depth: None,
            strict: true,
            ref_count: 0,
            uut_count: 0,
            matched: 0,
            listeners: Vec::new(),
        }
    }

    fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    fn check_depth(&self, key: u64, bucket: &Bucket) -> TbResult {
        match self.max_depth {
            Some(max) if bucket.refs.len() > max || bucket.uuts.len() > max => Err(TbError::leak(
                &self.path,
                format!(
                    "backlog on key {}: {} REF / {} UUT queued, max {}",
                    key,
                    bucket.refs.len(),
                    bucket.uuts.len(),
                    max
                ),
            )),
            _ => Ok(()),
        }
    }

    fn ref_push(&mut self, bucket: &mut Bucket, key: u64, trans: Transaction) -> TbResult {
        self.ref_count += 1;
        bucket.refs.push_back(trans);
        self.update(bucket, key)
    }

    fn uut_push(&mut self, bucket: &mut Bucket, key: u64, trans: Transaction) -> TbResult {
        self.uut_count += 1;
        if self.strict && bucket.refs.is_empty() {
            return Err(TbError::leak(
                &self.path,
                format!("unexpected transaction on key {}, no reference pending:\n{}", key, trans),
            ));
        }
        bucket.uuts.push_back(trans);
        self.update(bucket, key)
    }

    fn update(&mut self, bucket: &mut Bucket, key: u64) -> TbResult {
        while !bucket.refs.is_empty() && !bucket.uuts.is_empty() {
            let (Some(r), Some(uut)) = (bucket.refs.pop_front(), bucket.uuts.pop_front()) else {
                break;
            };
            if uut != r {
                log::error!("Mismatch detected in {}", self.path);
                return uut.assert_equal_ref(&r, &self.path);
            }
            self.matched += 1;
            for listener in self.listeners.iter_mut() {
                listener(key, &uut, &r);
            }
        }
        self.check_depth(key, bucket)
    }
}

pub struct ScoreboardInOrder {
    core: Core,
    queue: Bucket,
}

impl ScoreboardInOrder {
    pub fn new(path: &str) -> Self {
        Self {
            core: Core::new(path),
            queue: Bucket::default(),
        }
    }

    pub fn path(&self) -> &str {
        &self.core.path
    }

    pub fn ref_push(&mut self, trans: Transaction) -> TbResult {
        self.core.ref_push(&mut self.queue, 0, trans)
    }

    pub fn uut_push(&mut self, trans: Transaction) -> TbResult {
        self.core.uut_push(&mut self.queue, 0, trans)
    }

    pub fn set_max_depth(&mut self, depth: usize) {
        self.core.max_depth = Some(depth);
    }

    /// Queue observed transactions that arrive before their reference
    /// instead of failing.
    pub fn tolerate_early_uut(&mut self) {
        self.core.strict = false;
    }

    /// `f(key, uut, ref)` runs after every successful match; the key is 0.
    pub fn on_match(&mut self, f: impl FnMut(u64, &Transaction, &Transaction) + 'static) {
        self.core.listeners.push(Box::new(f));
    }

    pub fn ref_count(&self) -> u64 {
        self.core.ref_count
    }
    pub fn uut_count(&self) -> u64 {
        self.core.uut_count
    }
    pub fn matched(&self) -> u64 {
        self.core.matched
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl Infrastructure for ScoreboardInOrder {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn is_drained(&self) -> bool {
        self.is_empty()
    }

    fn start_phase(&mut self, phase: Phase) -> TbResult {
        if phase == Phase::CheckScoreboards && !self.is_empty() {
            let mut error = format!("{} has some remaining transaction :\n", self.core.path);
            self.queue.dump(&mut error);
            log::error!("{}", error);
        }
        Ok(())
    }

    fn end_phase(&mut self, phase: Phase) -> TbResult {
        if phase == Phase::CheckScoreboards && !self.is_empty() {
            return Err(TbError::leak(
                &self.core.path,
                format!(
                    "scoreboard not empty: {} REF / {} UUT remaining",
                    self.queue.refs.len(),
                    self.queue.uuts.len()
                ),
            ));
        }
        Ok(())
    }
}

pub struct ScoreboardOutOfOrder {
    core: Core,
    buckets: BTreeMap<u64, Bucket>,
}

impl ScoreboardOutOfOrder {
    pub fn new(path: &str) -> Self {
        Self {
            core: Core::new(path),
            buckets: BTreeMap::new(),
        }
    }

    pub fn path(&self) -> &str {
        &self.core.path
    }

    fn push(&mut self, key: u64, trans: Transaction, is_ref: bool) -> TbResult {
        let mut bucket = self.buckets.remove(&key).unwrap_or_default();
        let result = if is_ref {
            self.core.ref_push(&mut bucket, key, trans)
        } else {
            self.core.uut_push(&mut bucket, key, trans)
        };
        // empty buckets are dropped so the leak check is exact
        if !bucket.is_empty() {
            self.buckets.insert(key, bucket);
        }
        result
    }

    pub fn ref_push(&mut self, trans: Transaction, key: u64) -> TbResult {
        self.push(key, trans, true)
    }

    pub fn uut_push(&mut self, trans: Transaction, key: u64) -> TbResult {
        self.push(key, trans, false)
    }

    pub fn set_max_depth(&mut self, depth: usize) {
        self.core.max_depth = Some(depth);
    }

    pub fn tolerate_early_uut(&mut self) {
        self.core.strict = false;
    }

    pub fn on_match(&mut self, f: impl FnMut(u64, &Transaction, &Transaction) + 'static) {
        self.core.listeners.push(Box::new(f));
    }

    pub fn ref_count(&self) -> u64 {
        self.core.ref_count
    }
    pub fn uut_count(&self) -> u64 {
        self.core.uut_count
    }
    pub fn matched(&self) -> u64 {
        self.core.matched
    }

    /// Keys with at least one queued transaction.
    pub fn pending_keys(&self) -> Vec<u64> {
        self.buckets.keys().copied().collect()
    }

    pub fn pending_refs(&self, key: u64) -> usize {
        self.buckets.get(&key).map(|b| b.refs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

impl Infrastructure for ScoreboardOutOfOrder {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn is_drained(&self) -> bool {
        self.is_empty()
    }

    fn start_phase(&mut self, phase: Phase) -> TbResult {
        if phase == Phase::CheckScoreboards && !self.is_empty() {
            let mut error = format!("{} has some remaining transaction :\n", self.core.path);
            for bucket in self.buckets.values() {
                bucket.dump(&mut error);
            }
            log::error!("{}", error);
        }
        Ok(())
    }

    fn end_phase(&mut self, phase: Phase) -> TbResult {
        if phase == Phase::CheckScoreboards && !self.is_empty() {
            let refs: usize = self.buckets.values().map(|b| b.refs.len()).sum();
            let uuts: usize = self.buckets.values().map(|b| b.uuts.len()).sum();
            return Err(TbError::leak(
                &self.core.path,
                format!(
                    "scoreboard not empty: {} REF / {} UUT remaining over keys {:?}",
                    refs,
                    uuts,
                    self.pending_keys()
                ),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn t(a: u64) -> Transaction {
        Transaction::new().with("a", a)
    }

    #[test]
    fn in_order_matches_fifo() {
        let mut sb = ScoreboardInOrder::new("fifo/scoreboard");
        sb.ref_push(t(5)).unwrap();
        sb.ref_push(t(9)).unwrap();
        sb.uut_push(t(5)).unwrap();
        sb.uut_push(t(9)).unwrap();
        assert_eq!(sb.matched(), 2);
        assert!(sb.is_empty());
        assert_eq!(sb.name(), "scoreboard");
    }

    #[test]
    fn in_order_mismatch_fails_with_both_dumps() {
        let mut sb = ScoreboardInOrder::new("sb");
        sb.ref_push(t(5)).unwrap();
        let err = sb.uut_push(t(9)).unwrap_err();
        assert_eq!(
            err,
            TbError::Mismatch {
                path: "sb".into(),
                uut: "a : 0x9\n".into(),
                reference: "a : 0x5\n".into()
            }
        );
    }

    #[test]
    fn unexpected_uut_is_a_leak() {
        let mut sb = ScoreboardInOrder::new("sb");
        assert!(matches!(sb.uut_push(t(1)), Err(TbError::Leak { .. })));
    }

    #[test]
    fn tolerant_scoreboard_waits_for_reference() {
        let mut sb = ScoreboardInOrder::new("sb");
        sb.tolerate_early_uut();
        sb.uut_push(t(1)).unwrap();
        sb.ref_push(t(1)).unwrap();
        assert_eq!(sb.matched(), 1);
    }

    #[test]
    fn out_of_order_across_keys_fifo_within() {
        let mut sb = ScoreboardOutOfOrder::new("sb");
        sb.ref_push(t(1), 0).unwrap();
        sb.ref_push(t(2), 0).unwrap();
        sb.ref_push(t(10), 1).unwrap();
        sb.uut_push(t(10), 1).unwrap();
        sb.uut_push(t(1), 0).unwrap();
        assert_eq!(sb.pending_keys(), vec![0]);
        assert!(matches!(sb.uut_push(t(3), 0), Err(TbError::Mismatch { .. })));
    }

    #[test]
    fn leftovers_fail_at_check_end() {
        let mut sb = ScoreboardOutOfOrder::new("m0/sb");
        sb.ref_push(t(1), 4).unwrap();
        sb.start_phase(Phase::CheckScoreboards).unwrap();
        assert!(sb.end_phase(Phase::Sim).is_ok());
        assert!(matches!(
            sb.end_phase(Phase::CheckScoreboards),
            Err(TbError::Leak { .. })
        ));
    }

    #[test]
    fn max_depth_catches_backlog() {
        let mut sb = ScoreboardOutOfOrder::new("sb");
        sb.set_max_depth(2);
        sb.ref_push(t(1), 0).unwrap();
        sb.ref_push(t(2), 0).unwrap();
        assert!(matches!(sb.ref_push(t(3), 0), Err(TbError::Leak { .. })));
    }

    #[test]
    fn listeners_see_each_match() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        let mut sb = ScoreboardOutOfOrder::new("sb");
        sb.on_match(move |key, uut, _| s.borrow_mut().push((key, uut.get("a").unwrap())));
        sb.ref_push(t(7), 3).unwrap();
        sb.uut_push(t(7), 3).unwrap();
        assert_eq!(*seen.borrow(), vec![(3, 7)]);
    }
}
