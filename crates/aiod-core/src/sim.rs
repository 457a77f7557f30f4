//! In-memory simulated AIO board.
//!
//! The simulator models just enough of the board for the daemon to run end to
//! end without hardware:
//!
//! - a 256-byte register file honouring the width/read-only rules,
//! - ADC scan synthesis: the software-start strobe pushes `(oversample + 1)`
//!   samples per channel of the configured range into the FIFO,
//! - a free-running 1 MHz clock,
//! - a DMA engine producing sequentially numbered 32-bit samples, one slot per
//!   interrupt, at a configurable interval.
//!
//! Every accepted write is logged so tests can assert on the exact register
//! traffic.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::error::{HardwareError, HardwareResult};
use crate::port::{DmaEngine, DmaReady, IrqWait, RegisterPort};
use crate::registers::{self, sample, RegisterWidth};

/// Device id reported by the simulator.
pub const SIM_DEVICE_ID: u32 = 0x0000_A116;
/// Feature bits reported by the simulator (ADC, DAC, DIO, DMA).
pub const SIM_FEATURES: u32 = 0x0000_000F;
/// Firmware revision reported by the simulator.
pub const SIM_FIRMWARE_REV: u32 = 0x0001_0200;
/// Slots in the simulated DMA engine's ring.
pub const SIM_DMA_SLOTS: usize = 16;

struct BoardState {
    regs: [u32; 256],
    fifo: VecDeque<u32>,
    analog_inputs: [u16; registers::ADC_CHANNELS as usize],
    channel_samples: Vec<Option<Vec<u16>>>,
    dio_inputs: u32,
    scan_sample_limit: Option<usize>,
    writes: Vec<(u8, u32)>,
    powered_on: Instant,
}

impl BoardState {
    fn new() -> Self {
        let mut regs = [0u32; 256];
        regs[usize::from(registers::OFS_DEVICE_ID)] = SIM_DEVICE_ID;
        regs[usize::from(registers::OFS_FEATURES)] = SIM_FEATURES;
        regs[usize::from(registers::OFS_FIRMWARE_REV)] = SIM_FIRMWARE_REV;
        Self {
            regs,
            fifo: VecDeque::new(),
            analog_inputs: [0x8000; registers::ADC_CHANNELS as usize],
            channel_samples: vec![None; usize::from(registers::ADC_CHANNELS)],
            dio_inputs: 0,
            scan_sample_limit: None,
            writes: Vec::new(),
            powered_on: Instant::now(),
        }
    }

    fn reset(&mut self, bits: u32) {
        if bits & (registers::RESET_ALL | registers::RESET_ADC) != 0 {
            self.fifo.clear();
            self.regs[usize::from(registers::OFS_ADC_TRIGGER)] = registers::TRIGGER_DISABLED;
        }
        if bits & (registers::RESET_ALL | registers::RESET_DAC) != 0 {
            for channel in 0..registers::DAC_CHANNELS {
                self.regs[usize::from(registers::dac_output(channel))] = 0;
            }
        }
        if bits & (registers::RESET_ALL | registers::RESET_DIO) != 0 {
            self.regs[usize::from(registers::OFS_DIO_DIRECTION)] = 0;
            self.regs[usize::from(registers::OFS_DIO_OUTPUT)] = 0;
        }
    }

    fn synthesize_scan(&mut self) {
        let start = self.regs[usize::from(registers::OFS_ADC_START_CHANNEL)] as u8;
        let end = self.regs[usize::from(registers::OFS_ADC_END_CHANNEL)] as u8;
        let per_channel = self.regs[usize::from(registers::OFS_ADC_OVERSAMPLES)] as usize + 1;
        let limit = self.scan_sample_limit.unwrap_or(usize::MAX);

        let mut pushed = 0usize;
        'channels: for channel in start..=end.min(registers::ADC_CHANNELS - 1) {
            let range = self.regs[usize::from(registers::adc_range(channel / 2))];
            let gain = (range & 0x3) as u8;
            let unipolar = range & 0x4 != 0;
            for n in 0..per_channel {
                if pushed >= limit {
                    break 'channels;
                }
                let count = match &self.channel_samples[usize::from(channel)] {
                    Some(values) if !values.is_empty() => values[n % values.len()],
                    _ => self.analog_inputs[usize::from(channel)],
                };
                self.fifo
                    .push_back(sample::encode(channel, gain, unipolar, count));
                pushed += 1;
            }
        }
        debug!(start, end, per_channel, pushed, "Simulated scan filled FIFO");
    }
}

struct DmaState {
    transfer_bytes: usize,
    slots: Vec<Vec<u8>>,
    running: bool,
    cancel_pending: bool,
    produced: u64,
    released: u64,
    next_sample: u32,
    slot_limit: Option<u64>,
    interval: Duration,
    last_fire: Instant,
}

impl DmaState {
    fn new() -> Self {
        Self {
            transfer_bytes: 0,
            slots: Vec::new(),
            running: false,
            cancel_pending: false,
            produced: 0,
            released: 0,
            next_sample: 0,
            slot_limit: None,
            interval: Duration::from_millis(1),
            last_fire: Instant::now(),
        }
    }

    fn pending(&self) -> u64 {
        self.produced - self.released
    }

    fn can_produce(&self) -> bool {
        self.running
            && self.transfer_bytes > 0
            && self.pending() < SIM_DMA_SLOTS as u64
            && self.slot_limit.map_or(true, |limit| self.produced < limit)
    }

    fn produce_slot(&mut self) {
        let index = (self.produced % SIM_DMA_SLOTS as u64) as usize;
        let mut next = self.next_sample;
        for chunk in self.slots[index].chunks_exact_mut(4) {
            chunk.copy_from_slice(&next.to_le_bytes());
            next = next.wrapping_add(1);
        }
        self.next_sample = next;
        self.produced += 1;
    }
}

/// Simulated board implementing both [`RegisterPort`] and [`DmaEngine`].
pub struct SimulatedBoard {
    state: Mutex<BoardState>,
    dma: Mutex<DmaState>,
    dma_cond: Condvar,
}

impl SimulatedBoard {
    /// Power on a fresh board: mid-scale analog inputs, all registers zero.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BoardState::new()),
            dma: Mutex::new(DmaState::new()),
            dma_cond: Condvar::new(),
        }
    }

    /// Set the constant count returned for `channel`.
    pub fn set_analog_input(&self, channel: u8, count: u16) {
        if let Some(slot) = self.state.lock().analog_inputs.get_mut(usize::from(channel)) {
            *slot = count;
        }
    }

    /// Script the counts returned for `channel`, cycling through `values`
    /// within one scan.
    pub fn set_channel_samples(&self, channel: u8, values: Vec<u16>) {
        if let Some(slot) = self
            .state
            .lock()
            .channel_samples
            .get_mut(usize::from(channel))
        {
            *slot = Some(values);
        }
    }

    /// Drive the digital input lines.
    pub fn set_dio_inputs(&self, bits: u32) {
        self.state.lock().dio_inputs = bits;
    }

    /// Cap the number of samples a scan pushes (`None` for no cap).
    pub fn limit_scan_samples(&self, limit: Option<usize>) {
        self.state.lock().scan_sample_limit = limit;
    }

    /// Push raw samples into the FIFO as if left over from earlier activity.
    pub fn inject_fifo(&self, samples: &[u32]) {
        self.state.lock().fifo.extend(samples.iter().copied());
    }

    /// Samples currently waiting in the FIFO.
    pub fn fifo_len(&self) -> usize {
        self.state.lock().fifo.len()
    }

    /// Current register contents without side effects.
    pub fn peek(&self, offset: u8) -> u32 {
        self.state.lock().regs[usize::from(offset)]
    }

    /// Every accepted write, oldest first.
    pub fn writes(&self) -> Vec<(u8, u32)> {
        self.state.lock().writes.clone()
    }

    /// Forget the write log.
    pub fn clear_writes(&self) {
        self.state.lock().writes.clear();
    }

    /// Time between simulated DMA interrupts.
    pub fn set_dma_interval(&self, interval: Duration) {
        self.dma.lock().interval = interval;
    }

    /// Stop producing after `limit` slots per run (`None` for no limit).
    pub fn limit_dma_slots(&self, limit: Option<u64>) {
        self.dma.lock().slot_limit = limit;
        self.dma_cond.notify_all();
    }

    /// Whether the DMA engine is running.
    pub fn dma_running(&self) -> bool {
        self.dma.lock().running
    }

    /// Configured transfer size in bytes.
    pub fn dma_transfer_bytes(&self) -> usize {
        self.dma.lock().transfer_bytes
    }

    /// Slots produced since the last start.
    pub fn dma_slots_produced(&self) -> u64 {
        self.dma.lock().produced
    }
}

impl Default for SimulatedBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterPort for SimulatedBoard {
    fn read(&self, offset: u8) -> HardwareResult<u32> {
        registers::width_of(offset)?;
        let mut state = self.state.lock();
        let value = match offset {
            registers::OFS_ADC_FIFO_COUNT => state.fifo.len() as u32,
            registers::OFS_ADC_FIFO_DATA => state.fifo.pop_front().unwrap_or(sample::INVALID),
            registers::OFS_CLOCK_LO => state.powered_on.elapsed().as_micros() as u32,
            registers::OFS_CLOCK_HI => (state.powered_on.elapsed().as_micros() >> 32) as u32,
            registers::OFS_DIO_INPUT => state.dio_inputs,
            _ => state.regs[usize::from(offset)],
        };
        trace!(offset, value, "sim read");
        Ok(value)
    }

    fn write(&self, offset: u8, value: u32) -> HardwareResult<()> {
        let width = registers::width_of(offset)?;
        if registers::is_read_only(offset) {
            return Err(HardwareError::ReadOnlyRegister { offset });
        }
        if width == RegisterWidth::Byte && value > width.max_value() {
            return Err(HardwareError::ValueTooWide { offset, value });
        }

        let mut state = self.state.lock();
        state.writes.push((offset, value));
        trace!(offset, value, "sim write");
        match offset {
            registers::OFS_RESET => state.reset(value),
            registers::OFS_ADC_SOFTWARE_START => {
                let trigger = state.regs[usize::from(registers::OFS_ADC_TRIGGER)];
                if trigger == registers::TRIGGER_SOFTWARE {
                    state.synthesize_scan();
                }
            }
            _ => state.regs[usize::from(offset)] = value,
        }
        Ok(())
    }
}

impl DmaEngine for SimulatedBoard {
    fn configure(&self, transfer_bytes: usize) -> HardwareResult<()> {
        if transfer_bytes == 0 || transfer_bytes % 4 != 0 {
            return Err(HardwareError::Dma {
                message: format!("transfer size {} is not a positive multiple of 4", transfer_bytes),
            });
        }
        let mut dma = self.dma.lock();
        if dma.running {
            return Err(HardwareError::Dma {
                message: "cannot reconfigure a running transfer".to_string(),
            });
        }
        dma.transfer_bytes = transfer_bytes;
        dma.slots = vec![vec![0u8; transfer_bytes]; SIM_DMA_SLOTS];
        debug!(transfer_bytes, "Simulated DMA configured");
        Ok(())
    }

    fn start(&self) -> HardwareResult<()> {
        let mut dma = self.dma.lock();
        if dma.transfer_bytes == 0 {
            return Err(HardwareError::Dma {
                message: "transfer size not configured".to_string(),
            });
        }
        dma.running = true;
        dma.cancel_pending = false;
        dma.produced = 0;
        dma.released = 0;
        dma.next_sample = 0;
        dma.last_fire = Instant::now();
        self.dma_cond.notify_all();
        debug!("Simulated DMA started");
        Ok(())
    }

    fn stop(&self) -> HardwareResult<()> {
        let mut dma = self.dma.lock();
        dma.running = false;
        dma.released = dma.produced;
        self.dma_cond.notify_all();
        debug!(produced = dma.produced, "Simulated DMA stopped");
        Ok(())
    }

    fn slot_count(&self) -> usize {
        SIM_DMA_SLOTS
    }

    fn ready(&self) -> HardwareResult<DmaReady> {
        let dma = self.dma.lock();
        Ok(DmaReady {
            first_slot: (dma.released % SIM_DMA_SLOTS as u64) as usize,
            count: dma.pending() as usize,
        })
    }

    fn copy_slot(&self, slot: usize, dst: &mut [u8]) -> HardwareResult<()> {
        let dma = self.dma.lock();
        let src = dma.slots.get(slot).ok_or_else(|| HardwareError::Dma {
            message: format!("slot {} out of range", slot),
        })?;
        if dst.len() != src.len() {
            return Err(HardwareError::Dma {
                message: format!("slot is {} bytes, destination {}", src.len(), dst.len()),
            });
        }
        dst.copy_from_slice(src);
        Ok(())
    }

    fn release(&self, count: usize) -> HardwareResult<()> {
        let mut dma = self.dma.lock();
        if count as u64 > dma.pending() {
            return Err(HardwareError::Dma {
                message: format!("released {} slots, only {} pending", count, dma.pending()),
            });
        }
        dma.released += count as u64;
        self.dma_cond.notify_all();
        Ok(())
    }

    fn wait_for_irq(&self) -> HardwareResult<IrqWait> {
        let mut dma = self.dma.lock();
        loop {
            if dma.cancel_pending {
                dma.cancel_pending = false;
                return Ok(IrqWait::Cancelled);
            }
            if dma.can_produce() {
                let due = dma.last_fire + dma.interval;
                let now = Instant::now();
                if now >= due {
                    dma.produce_slot();
                    dma.last_fire = now;
                    return Ok(IrqWait::Fired);
                }
                self.dma_cond.wait_for(&mut dma, due - now);
            } else {
                self.dma_cond.wait(&mut dma);
            }
        }
    }

    fn cancel_wait(&self) {
        self.dma.lock().cancel_pending = true;
        self.dma_cond.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_identity_registers() {
        let board = SimulatedBoard::new();
        assert_eq!(board.read(registers::OFS_DEVICE_ID).unwrap(), SIM_DEVICE_ID);
        assert!(matches!(
            board.write(registers::OFS_DEVICE_ID, 1),
            Err(HardwareError::ReadOnlyRegister { .. })
        ));
    }

    #[test]
    fn test_byte_register_rejects_wide_value() {
        let board = SimulatedBoard::new();
        assert!(board.write(registers::OFS_ADC_START_CHANNEL, 0xFF).is_ok());
        assert!(matches!(
            board.write(registers::OFS_ADC_START_CHANNEL, 0x100),
            Err(HardwareError::ValueTooWide { .. })
        ));
        assert_eq!(board.writes(), vec![(registers::OFS_ADC_START_CHANNEL, 0xFF)]);
    }

    #[test]
    fn test_software_scan_fills_fifo() {
        let board = SimulatedBoard::new();
        board.set_analog_input(2, 0x1234);
        board.write(registers::adc_range(1), 0x5).unwrap();
        board.write(registers::OFS_ADC_START_CHANNEL, 2).unwrap();
        board.write(registers::OFS_ADC_END_CHANNEL, 3).unwrap();
        board.write(registers::OFS_ADC_OVERSAMPLES, 1).unwrap();

        // Strobe ignored unless the trigger is in software mode
        board.write(registers::OFS_ADC_SOFTWARE_START, 1).unwrap();
        assert_eq!(board.fifo_len(), 0);

        board
            .write(registers::OFS_ADC_TRIGGER, registers::TRIGGER_SOFTWARE)
            .unwrap();
        board.write(registers::OFS_ADC_SOFTWARE_START, 1).unwrap();
        assert_eq!(board.read(registers::OFS_ADC_FIFO_COUNT).unwrap(), 4);

        let first = board.read(registers::OFS_ADC_FIFO_DATA).unwrap();
        assert_eq!(sample::channel(first), 2);
        assert_eq!(sample::count(first), 0x1234);
        assert_eq!(sample::gain_code(first), 1);
        assert!(sample::is_unipolar(first));
    }

    #[test]
    fn test_empty_fifo_reads_invalid() {
        let board = SimulatedBoard::new();
        let raw = board.read(registers::OFS_ADC_FIFO_DATA).unwrap();
        assert!(sample::is_invalid(raw));
    }

    #[test]
    fn test_reset_clears_fifo() {
        let board = SimulatedBoard::new();
        board.inject_fifo(&[1, 2, 3]);
        board.write(registers::OFS_RESET, registers::RESET_ADC).unwrap();
        assert_eq!(board.fifo_len(), 0);
    }

    #[test]
    fn test_dma_produces_sequential_slots() {
        let board = SimulatedBoard::new();
        board.set_dma_interval(Duration::ZERO);
        board.configure(16).unwrap();
        board.start().unwrap();

        assert_eq!(board.wait_for_irq().unwrap(), IrqWait::Fired);
        assert_eq!(board.wait_for_irq().unwrap(), IrqWait::Fired);
        let ready = board.ready().unwrap();
        assert_eq!(ready, DmaReady { first_slot: 0, count: 2 });

        let mut buf = [0u8; 16];
        board.copy_slot(1, &mut buf).unwrap();
        assert_eq!(u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]), 4);

        board.release(2).unwrap();
        assert_eq!(board.ready().unwrap().count, 0);
        assert!(board.release(1).is_err());
    }

    #[test]
    fn test_cancel_wakes_blocked_wait() {
        let board = Arc::new(SimulatedBoard::new());
        board.configure(16).unwrap();
        board.limit_dma_slots(Some(0));
        board.start().unwrap();

        let waiter = Arc::clone(&board);
        let handle = thread::spawn(move || waiter.wait_for_irq());
        thread::sleep(Duration::from_millis(20));
        board.cancel_wait();

        assert_eq!(handle.join().unwrap().unwrap(), IrqWait::Cancelled);
    }
}
