//! Scoped compute buffers.
//!
//! Every per-tick input buffer is a [`Tensor`] leased from a [`TensorPool`].
//! Dropping the tensor returns the lease, so the pool's live count drops back
//! to zero whenever a tick unwinds, whether it returned normally, returned an
//! error or panicked inside an estimator.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct PoolCounters {
    live: AtomicUsize,
    peak: AtomicUsize,
    leased: AtomicU64,
}

/// Shared accounting for tensors leased during a session.
#[derive(Debug, Clone, Default)]
pub struct TensorPool {
    counters: Arc<PoolCounters>,
}

impl TensorPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lease a zero-filled tensor with the given shape.
    pub fn zeros(&self, shape: &[usize]) -> Tensor {
        let len = shape.iter().product();
        self.lease(shape.to_vec(), vec![0.0; len])
    }

    /// Lease a tensor wrapping existing data. The length must match the shape.
    pub fn from_vec(&self, shape: &[usize], data: Vec<f32>) -> Tensor {
        debug_assert_eq!(shape.iter().product::<usize>(), data.len());
        self.lease(shape.to_vec(), data)
    }

    fn lease(&self, shape: Vec<usize>, data: Vec<f32>) -> Tensor {
        let live = self.counters.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.peak.fetch_max(live, Ordering::SeqCst);
        self.counters.leased.fetch_add(1, Ordering::Relaxed);
        Tensor {
            shape,
            data,
            counters: Arc::clone(&self.counters),
        }
    }

    /// Tensors currently alive.
    pub fn live(&self) -> usize {
        self.counters.live.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously live tensors.
    pub fn peak(&self) -> usize {
        self.counters.peak.load(Ordering::SeqCst)
    }

    /// Total number of leases handed out.
    pub fn total_leased(&self) -> u64 {
        self.counters.leased.load(Ordering::Relaxed)
    }
}

/// A dense `f32` buffer with a shape, released on drop.
#[derive(Debug)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f32>,
    counters: Arc<PoolCounters>,
}

impl Tensor {
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }
}

impl Drop for Tensor {
    fn drop(&mut self) {
        self.counters.live.fetch_sub(1, Ordering::SeqCst);
    }
}
