//! Append-only acquisition buffer.
//!
//! The active run is the only writer. Readers take point-in-time copies with
//! [`AcquisitionBuffer::snapshot`] or follow new records live through
//! [`AcquisitionBuffer::subscribe`].

use parking_lot::RwLock;
use smu_core::{ConflictError, MeasurementRecord, SmuError, SmuResult};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;

pub struct AcquisitionBuffer {
    records: RwLock<Vec<MeasurementRecord>>,
    active: AtomicBool,
    live: broadcast::Sender<MeasurementRecord>,
}

impl AcquisitionBuffer {
    pub fn new(channel_capacity: usize) -> Self {
        let (live, _) = broadcast::channel(channel_capacity.max(1));
        Self {
            records: RwLock::new(Vec::new()),
            active: AtomicBool::new(false),
            live,
        }
    }

    /// Append the next record.
    ///
    /// `record.sequence_index` must equal the current length, so the stored
    /// sequence is always `0..N` without gaps.
    pub(crate) fn append(&self, record: MeasurementRecord) -> SmuResult<()> {
        let mut records = self.records.write();
        let expected = records.len() as u64;
        if record.sequence_index != expected {
            return Err(SmuError::InvalidState(format!(
                "record {} appended out of order (expected {expected})",
                record.sequence_index
            )));
        }
        records.push(record.clone());
        drop(records);

        // No subscribers is fine.
        let _ = self.live.send(record);
        Ok(())
    }

    /// Consistent copy of every record appended so far.
    pub fn snapshot(&self) -> Vec<MeasurementRecord> {
        self.records.read().clone()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Discard all records. Refused while a run owns the buffer.
    pub fn clear(&self) -> Result<(), ConflictError> {
        if self.is_active() {
            return Err(ConflictError::BufferInUse);
        }
        self.records.write().clear();
        Ok(())
    }

    /// Live feed of records appended after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<MeasurementRecord> {
        self.live.subscribe()
    }

    /// Hand the buffer to a new run. Previous records are discarded.
    pub(crate) fn begin_run(&self) -> Result<(), ConflictError> {
        if self
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ConflictError::BufferInUse);
        }
        self.records.write().clear();
        Ok(())
    }

    pub(crate) fn end_run(&self) {
        self.active.store(false, Ordering::Release);
    }
}

impl Default for AcquisitionBuffer {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl std::fmt::Debug for AcquisitionBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcquisitionBuffer")
            .field("len", &self.len())
            .field("active", &self.is_active())
            .finish()
    }
}
