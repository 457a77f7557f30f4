//! Seams to the board: the register port and the DMA engine.
//!
//! Everything above this module talks to hardware exclusively through these
//! two traits, so the daemon runs unchanged against the simulated board or a
//! mapped register window.

use std::fmt;
use std::sync::Arc;

use crate::error::{HardwareError, HardwareResult};

/// Synchronous register access by offset.
///
/// The access width is implied by the offset (see
/// [`registers::width_of`](crate::registers::width_of)); callers never pick it.
pub trait RegisterPort: Send + Sync {
    /// Read the register at `offset`.
    fn read(&self, offset: u8) -> HardwareResult<u32>;

    /// Write `value` to the register at `offset`.
    fn write(&self, offset: u8, value: u32) -> HardwareResult<()>;
}

/// Slots the DMA engine has filled and not yet handed back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DmaReady {
    /// Index of the oldest filled slot in the engine's own ring
    pub first_slot: usize,
    /// Number of consecutive filled slots (wrapping)
    pub count: usize,
}

/// Outcome of a blocking interrupt wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqWait {
    /// The board raised its DMA interrupt
    Fired,
    /// [`DmaEngine::cancel_wait`] was called
    Cancelled,
}

/// Interrupt-driven DMA engine feeding the streaming pipeline.
pub trait DmaEngine: Send + Sync {
    /// Set the size of one transfer (one slot) in bytes.
    fn configure(&self, transfer_bytes: usize) -> HardwareResult<()>;

    /// Start transferring.
    ///
    /// Clears a cancel latched by [`cancel_wait`](Self::cancel_wait) while no
    /// wait was pending.
    fn start(&self) -> HardwareResult<()>;

    /// Stop transferring and discard pending slots.
    fn stop(&self) -> HardwareResult<()>;

    /// Number of slots in the engine's own ring.
    fn slot_count(&self) -> usize;

    /// Query the filled slots.
    fn ready(&self) -> HardwareResult<DmaReady>;

    /// Copy the contents of `slot` into `dst` (exactly one transfer).
    fn copy_slot(&self, slot: usize, dst: &mut [u8]) -> HardwareResult<()>;

    /// Hand `count` oldest slots back to the engine.
    fn release(&self, count: usize) -> HardwareResult<()>;

    /// Block until the DMA interrupt fires or the wait is cancelled.
    fn wait_for_irq(&self) -> HardwareResult<IrqWait>;

    /// Cancel a pending (or the next) [`wait_for_irq`](Self::wait_for_irq).
    fn cancel_wait(&self);
}

/// DMA side of backends without a DMA engine.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDma;

impl DmaEngine for NoDma {
    fn configure(&self, _transfer_bytes: usize) -> HardwareResult<()> {
        Err(HardwareError::DmaNotSupported)
    }

    fn start(&self) -> HardwareResult<()> {
        Err(HardwareError::DmaNotSupported)
    }

    fn stop(&self) -> HardwareResult<()> {
        Ok(())
    }

    fn slot_count(&self) -> usize {
        0
    }

    fn ready(&self) -> HardwareResult<DmaReady> {
        Err(HardwareError::DmaNotSupported)
    }

    fn copy_slot(&self, _slot: usize, _dst: &mut [u8]) -> HardwareResult<()> {
        Err(HardwareError::DmaNotSupported)
    }

    fn release(&self, _count: usize) -> HardwareResult<()> {
        Err(HardwareError::DmaNotSupported)
    }

    fn wait_for_irq(&self) -> HardwareResult<IrqWait> {
        Ok(IrqWait::Cancelled)
    }

    fn cancel_wait(&self) {}
}

/// The board as seen by the daemon: one register port plus one DMA engine.
#[derive(Clone)]
pub struct Hardware {
    registers: Arc<dyn RegisterPort>,
    dma: Arc<dyn DmaEngine>,
}

impl Hardware {
    /// Bundle a register port and a DMA engine.
    pub fn new(registers: Arc<dyn RegisterPort>, dma: Arc<dyn DmaEngine>) -> Self {
        Self { registers, dma }
    }

    /// Register port.
    pub fn registers(&self) -> &dyn RegisterPort {
        self.registers.as_ref()
    }

    /// DMA engine.
    pub fn dma(&self) -> &dyn DmaEngine {
        self.dma.as_ref()
    }

    /// Shared handle to the DMA engine, for threads that outlive a borrow.
    pub fn dma_handle(&self) -> Arc<dyn DmaEngine> {
        Arc::clone(&self.dma)
    }

    /// Shared handle to the register port.
    pub fn registers_handle(&self) -> Arc<dyn RegisterPort> {
        Arc::clone(&self.registers)
    }
}

impl fmt::Debug for Hardware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hardware")
            .field("dma_slots", &self.dma.slot_count())
            .finish()
    }
}
