//! Binding between the pairing heap and model records.
//!
//! Each live model owns exactly one heap node, referenced through the `u32`
//! handle stored inline in the model. A model popped for transition is
//! *detached* (its node keeps its slot) and is reintegrated with its new
//! `tn` at the end of the transition; `update` is the fan-out path that
//! re-wakes a message target at the current time.

use core_sched::{Handle, INVALID_HANDLE, PairingHeap};

use crate::message::Time;
use crate::simulation::Model;
use crate::ModelId;

pub struct Scheduler {
    heap: PairingHeap<ModelId>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            heap: PairingHeap::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            heap: PairingHeap::with_capacity(capacity),
        }
    }

    pub fn reserve(&mut self, capacity: usize) -> bool {
        self.heap.reserve(capacity)
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }

    /// Allocate a heap node for `mdl` and store the handle inside it. The
    /// model must not already own a node.
    pub fn alloc(&mut self, mdl: &mut Model, id: ModelId, tn: Time) {
        debug_assert!(mdl.handle == INVALID_HANDLE, "model already scheduled");
        mdl.handle = self.heap.alloc(tn, id);
    }

    /// Release the model's node entirely (deallocation path).
    pub fn free(&mut self, mdl: &mut Model) {
        if mdl.handle != INVALID_HANDLE {
            self.heap.remove(mdl.handle);
            self.heap.destroy(mdl.handle);
            mdl.handle = INVALID_HANDLE;
        }
    }

    /// Reinsert a detached node at `tn`.
    pub fn reintegrate(&mut self, mdl: &Model, tn: Time) {
        debug_assert!(mdl.handle != INVALID_HANDLE);
        self.heap.reintegrate(tn, mdl.handle);
    }

    /// Detach the node, keeping it reusable via `reintegrate`.
    pub fn remove(&mut self, mdl: &Model) {
        if mdl.handle != INVALID_HANDLE {
            self.heap.remove(mdl.handle);
        }
    }

    /// Re-key an in-tree node towards `tn`. Only valid for finite times;
    /// a model going silent must be `remove`d instead.
    pub fn update(&mut self, mdl: &Model, tn: Time) {
        debug_assert!(mdl.handle != INVALID_HANDLE);
        debug_assert!(tn.is_finite(), "update with an infinite tn");
        debug_assert!(tn <= mdl.tn);

        let current = self.heap.tn(mdl.handle);
        if tn < current {
            self.heap.decrease(tn, mdl.handle);
        } else if tn > current {
            self.heap.increase(tn, mdl.handle);
        }
    }

    /// Drain every model tied at the earliest `tn` into `out`. The order
    /// within the tie is unspecified; callers treat it as a bag.
    pub fn pop(&mut self, out: &mut Vec<ModelId>) {
        out.clear();
        if self.heap.is_empty() {
            return;
        }

        let t = self.heap.top_tn();
        let top = self.heap.pop();
        out.push(self.heap.item(top));

        while !self.heap.is_empty() && self.heap.top_tn() == t {
            let handle = self.heap.pop();
            out.push(self.heap.item(handle));
        }
    }

    /// Earliest scheduled time, `+inf` when empty.
    pub fn tn(&self) -> Time {
        self.heap.top_tn()
    }

    pub fn tn_of(&self, handle: Handle) -> Time {
        self.heap.tn(handle)
    }

    pub fn is_in_tree(&self, handle: Handle) -> bool {
        self.heap.is_in_tree(handle)
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }
}
