//! Fixed-capacity slot ring between the DMA worker and the socket logger.
//!
//! Each slot holds exactly one DMA transfer. Ownership of slots moves between
//! the single producer and the single consumer through two counting
//! semaphores only:
//!
//! - `empty` starts at capacity: permits are slots the producer may fill
//! - `full` starts at zero: permits are slots the consumer may read
//!
//! Permits taken are forgotten and handed to the other side with
//! `add_permits`, the way a pooled buffer returns its permit on drop.
//!
//! The storage mutex is held for the copy in and the copy out, nothing else.
//! Each side keeps its own index, so the producer can never overwrite a slot
//! the consumer has not released.
//!
//! Both ends live on plain OS threads. Each owns a small current-thread
//! runtime used only to block on a timed permit acquire.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::{Builder, Runtime};
use tokio::sync::Semaphore;

/// Shared storage and semaphores of a slot ring.
#[derive(Debug)]
pub struct SlotRing {
    storage: Mutex<Vec<Box<[u8]>>>,
    capacity: usize,
    slot_bytes: usize,
    empty: Semaphore,
    full: Semaphore,
}

impl SlotRing {
    /// Create a ring and split it into its producer and consumer ends.
    ///
    /// Fails only if a waiter runtime cannot be built.
    pub fn channel(slots: usize, slot_bytes: usize) -> io::Result<(RingWriter, RingReader)> {
        let ring = Arc::new(Self {
            storage: Mutex::new(vec![vec![0u8; slot_bytes].into_boxed_slice(); slots]),
            capacity: slots,
            slot_bytes,
            empty: Semaphore::new(slots),
            full: Semaphore::new(0),
        });
        let writer = RingWriter {
            ring: Arc::clone(&ring),
            waiter: waiter_runtime()?,
            next: 0,
        };
        let reader = RingReader {
            ring,
            waiter: waiter_runtime()?,
            next: 0,
            scratch: vec![0u8; slot_bytes],
        };
        Ok((writer, reader))
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes per slot.
    pub fn slot_bytes(&self) -> usize {
        self.slot_bytes
    }

    /// Slots filled and not yet released by the consumer.
    pub fn occupied(&self) -> usize {
        self.capacity() - self.empty.available_permits()
    }
}

fn waiter_runtime() -> io::Result<Runtime> {
    Builder::new_current_thread().enable_time().build()
}

/// Take one permit from `semaphore` within `timeout` and forget it.
fn take_permit(waiter: &Runtime, semaphore: &Semaphore, timeout: Duration) -> bool {
    if let Ok(permit) = semaphore.try_acquire() {
        permit.forget();
        return true;
    }
    waiter.block_on(async {
        match tokio::time::timeout(timeout, semaphore.acquire()).await {
            Ok(Ok(permit)) => {
                permit.forget();
                true
            }
            // Timed out; the ring never closes its semaphores
            _ => false,
        }
    })
}

/// Producer end of a [`SlotRing`].
#[derive(Debug)]
pub struct RingWriter {
    ring: Arc<SlotRing>,
    waiter: Runtime,
    next: usize,
}

impl RingWriter {
    /// Wait up to `timeout` for a free slot, then fill it with `fill`.
    ///
    /// Returns `Ok(false)` if no slot freed up in time. If `fill` fails the
    /// slot goes back to the free pool and the error is returned.
    pub fn push_with<E>(
        &mut self,
        timeout: Duration,
        fill: impl FnOnce(&mut [u8]) -> Result<(), E>,
    ) -> Result<bool, E> {
        if !take_permit(&self.waiter, &self.ring.empty, timeout) {
            return Ok(false);
        }
        let filled = {
            let mut storage = self.ring.storage.lock();
            fill(&mut storage[self.next])
        };
        if let Err(err) = filled {
            self.ring.empty.add_permits(1);
            return Err(err);
        }
        self.next = (self.next + 1) % self.ring.capacity;
        self.ring.full.add_permits(1);
        Ok(true)
    }

    /// The shared ring.
    pub fn ring(&self) -> &SlotRing {
        &self.ring
    }
}

/// Consumer end of a [`SlotRing`].
#[derive(Debug)]
pub struct RingReader {
    ring: Arc<SlotRing>,
    waiter: Runtime,
    next: usize,
    scratch: Vec<u8>,
}

impl RingReader {
    /// Wait up to `timeout` for a filled slot and copy it out.
    ///
    /// The slot stays owned by the consumer until [`release`](Self::release).
    pub fn pop_timeout(&mut self, timeout: Duration) -> Option<&[u8]> {
        if !take_permit(&self.waiter, &self.ring.full, timeout) {
            return None;
        }
        {
            let storage = self.ring.storage.lock();
            self.scratch.copy_from_slice(&storage[self.next]);
        }
        Some(&self.scratch)
    }

    /// Hand the slot returned by the last [`pop_timeout`](Self::pop_timeout)
    /// back to the producer.
    pub fn release(&mut self) {
        self.next = (self.next + 1) % self.ring.capacity();
        self.ring.empty.add_permits(1);
    }

    /// The shared ring.
    pub fn ring(&self) -> &SlotRing {
        &self.ring
    }
}
