use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

use runlog_core::types::{Step, StepIndexed};

/// Fixed RNG seed: any two reservoirs of equal capacity fed the same stream
/// must produce identical samples.
const RESERVOIR_SEED: u64 = 0;

/// A naive reservoir sample over step-indexed values. Every record in the
/// stream is inspected; the most recent record is always retained, and older
/// records are kept with uniform probability.
///
/// Preemption occurs implicitly whenever an offered step fails to increase:
/// stored values whose step is not smaller than the incoming one are
/// discarded first, modeling a training job that restarted from an earlier
/// step.
#[derive(Debug)]
pub struct EagerReservoir<T> {
    rng: ChaCha20Rng,
    /// Number of non-preempted records seen in the stream so far, whether or
    /// not they were kept. Scaled down on preemption.
    seen: u64,
    /// Stored values, in step-sorted order. Never longer than `capacity`.
    buf: Vec<T>,
    capacity: usize,
}

impl<T: StepIndexed + Clone> EagerReservoir<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        EagerReservoir {
            rng: ChaCha20Rng::seed_from_u64(RESERVOIR_SEED),
            seen: 0,
            buf: Vec::new(),
            capacity,
        }
    }

    /// Accepts one record from the stream, either storing it or discarding
    /// it (except that the newest record is always stored).
    pub fn offer(&mut self, value: T) {
        self.preempt(value.step());

        self.seen += 1;
        let dst = self.rng.gen_range(0..self.seen);
        if dst >= self.capacity as u64 {
            // Keep-last only.
            match self.buf.last_mut() {
                Some(last) => *last = value,
                // A preemption can empty the buffer while `seen` stays
                // large; store the value rather than indexing thin air.
                None => self.buf.push(value),
            }
            return;
        }
        if self.buf.len() < self.capacity {
            self.buf.push(value);
            return;
        }
        self.buf.remove(dst as usize);
        self.buf.push(value);
    }

    /// Discards stored values whose step is not smaller than `first_bad`,
    /// scaling the seen-counter by the fraction discarded.
    fn preempt(&mut self, first_bad: Step) {
        let stored = self.buf.len();
        let mut preempted = 0;
        while preempted < stored && self.buf[stored - 1 - preempted].step() >= first_bad {
            preempted += 1;
        }
        if preempted > 0 {
            let frac = preempted as f64 / stored as f64;
            self.buf.truncate(stored - preempted);
            self.seen = (frac * self.seen as f64).ceil() as u64;
        }
    }

    /// A copy of the current sample, in step order. Owned by the caller.
    pub fn sample(&self) -> Vec<T> {
        self.buf.clone()
    }

    /// The most recently offered value that has not been preempted.
    pub fn last(&self) -> Option<&T> {
        self.buf.last()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}
