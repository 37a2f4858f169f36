//! Host-memory loopback of the hardware encoder contract
//!
//! Emulates the externally visible behaviour of the hardware: a fixed slot
//! pool that can be momentarily exhausted, an output ring in which access
//! units wrap into two segments, warm-up latency before the first unit,
//! and injectable encode failures. Bitstream payloads are a deterministic
//! digest of the submitted slot, framed as Annex B NAL units, not real
//! H.264 slices.
//!
//! Every command is counted in [`LoopbackCounters`], readable through a
//! [`LoopbackMonitor`] after the device has moved into a session.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::{
    check_status, BaseConfig, HostBitstream, HostSlot, InputBuffer, InputFormat, SlotAddresses,
    VencCommand, VencDevice, VencPlatform,
};
use crate::error::{VencError, VencResult};

/// Base of the fake physical address space handed out for slots
const PHYS_BASE: u64 = 0x4000_0000;

/// Behaviour knobs for the loopback device
#[derive(Debug, Clone)]
pub struct LoopbackOptions {
    /// Size of the output ring in bytes; units crossing its end are split
    pub ring_capacity: usize,
    /// Failed polls before each acquisition succeeds
    pub busy_polls: u32,
    /// Bitstream polls answered with nothing after the encoder opens
    pub warmup_polls: u32,
    /// Every Nth encode call fails (1-based); `None` never fails
    pub fail_encode_every: Option<u64>,
    /// Encode succeeds but never produces output
    pub withhold_output: bool,
    /// `hardware_init` fails
    pub fail_hardware_init: bool,
    /// `open` fails after configuration and pool allocation succeeded
    pub fail_open: bool,
}

impl Default for LoopbackOptions {
    fn default() -> Self {
        Self {
            ring_capacity: 64 * 1024,
            busy_polls: 0,
            warmup_polls: 0,
            fail_encode_every: None,
            withhold_output: false,
            fail_hardware_init: false,
            fail_open: false,
        }
    }
}

/// Command counters recorded by the loopback device
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopbackCounters {
    /// Successful `hardware_init` calls
    pub hardware_inits: u32,
    /// `hardware_exit` calls
    pub hardware_exits: u32,
    /// Encoder handles created
    pub encoders_created: u32,
    /// Last base configuration applied
    pub base_config: Option<BaseConfig>,
    /// Input pool size requested
    pub pool_size: u32,
    /// `open` calls that succeeded
    pub opens: u32,
    /// `close` calls
    pub closes: u32,
    /// Acquisition polls that found the pool empty
    pub empty_polls: u64,
    /// Slots handed out
    pub slots_acquired: u64,
    /// Slots flushed
    pub slots_flushed: u64,
    /// Slots handed back
    pub slots_released: u64,
    /// Encode commands received
    pub encode_calls: u64,
    /// Encode commands that failed
    pub encode_failures: u64,
    /// Bitstream units handed out
    pub bitstreams_issued: u64,
    /// Bitstream units handed back
    pub bitstreams_returned: u64,
    /// Units that wrapped around the ring end
    pub split_units: u64,
}

impl LoopbackCounters {
    /// Slots currently leased by the caller
    pub fn slots_outstanding(&self) -> u64 {
        self.slots_acquired - self.slots_released
    }

    /// Bitstream units currently leased by the caller
    pub fn bitstreams_outstanding(&self) -> u64 {
        self.bitstreams_issued - self.bitstreams_returned
    }
}

/// Read-only handle onto a loopback device's counters
#[derive(Debug, Clone)]
pub struct LoopbackMonitor {
    shared: Arc<Mutex<LoopbackCounters>>,
}

impl LoopbackMonitor {
    /// Snapshot of the counters
    pub fn counters(&self) -> LoopbackCounters {
        self.shared.lock().clone()
    }
}

/// Loopback hardware subsystem
#[derive(Debug)]
pub struct LoopbackPlatform {
    options: LoopbackOptions,
    shared: Arc<Mutex<LoopbackCounters>>,
}

impl LoopbackPlatform {
    /// Create a platform whose encoders use `options`
    pub fn new(options: LoopbackOptions) -> Self {
        Self {
            options,
            shared: Arc::new(Mutex::new(LoopbackCounters::default())),
        }
    }

    /// Handle for reading counters after the platform moved into a session
    pub fn monitor(&self) -> LoopbackMonitor {
        LoopbackMonitor {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Default for LoopbackPlatform {
    fn default() -> Self {
        Self::new(LoopbackOptions::default())
    }
}

impl VencPlatform for LoopbackPlatform {
    type Device = LoopbackDevice;

    fn hardware_init(&mut self) -> VencResult<()> {
        if self.options.fail_hardware_init {
            return Err(VencError::HardwareInit(
                "loopback hardware refused initialization".to_string(),
            ));
        }
        self.shared.lock().hardware_inits += 1;
        debug!("Loopback hardware initialized");
        Ok(())
    }

    fn create_encoder(&mut self) -> VencResult<LoopbackDevice> {
        self.shared.lock().encoders_created += 1;
        Ok(LoopbackDevice::new(
            self.options.clone(),
            Arc::clone(&self.shared),
        ))
    }

    fn hardware_exit(&mut self) {
        self.shared.lock().hardware_exits += 1;
        debug!("Loopback hardware torn down");
    }
}

/// Loopback encoder instance
#[derive(Debug)]
pub struct LoopbackDevice {
    options: LoopbackOptions,
    shared: Arc<Mutex<LoopbackCounters>>,
    config: Option<BaseConfig>,
    free: Vec<HostSlot>,
    pool_size: u32,
    opened: bool,
    busy_remaining: u32,
    warmup_remaining: u32,
    pending: VecDeque<Vec<u8>>,
    ring_head: usize,
    next_unit_id: u32,
    pictures: u64,
}

impl LoopbackDevice {
    fn new(options: LoopbackOptions, shared: Arc<Mutex<LoopbackCounters>>) -> Self {
        Self {
            options,
            shared,
            config: None,
            free: Vec::new(),
            pool_size: 0,
            opened: false,
            busy_remaining: 0,
            warmup_remaining: 0,
            pending: VecDeque::new(),
            ring_head: 0,
            next_unit_id: 0,
            pictures: 0,
        }
    }

    fn region_sizes(config: &BaseConfig) -> (usize, usize) {
        let pixels = config.input_width as usize * config.input_height as usize;
        match config.input_format {
            InputFormat::Yuv420 => (pixels, pixels / 2 + config.input_width as usize),
            InputFormat::Rgba => (pixels * 4, 0),
        }
    }

    /// Annex B digest of a slot: one NAL unit carrying the picture number
    /// and additive checksums of both regions
    fn digest(&self, slot: &HostSlot, keyframe: bool) -> Vec<u8> {
        let nal_header = if keyframe { 0x65 } else { 0x41 };
        let luma_sum = slot
            .luma()
            .iter()
            .fold(0u32, |acc, b| acc.wrapping_add(*b as u32));
        let chroma_sum = slot
            .chroma()
            .iter()
            .fold(0u32, |acc, b| acc.wrapping_add(*b as u32));

        let mut unit = Vec::with_capacity(17);
        unit.extend_from_slice(&[0x00, 0x00, 0x00, 0x01, nal_header]);
        unit.extend_from_slice(&(self.pictures as u32).to_be_bytes());
        unit.extend_from_slice(&luma_sum.to_be_bytes());
        unit.extend_from_slice(&chroma_sum.to_be_bytes());
        unit
    }

    /// Place a unit in the output ring, splitting it at the ring end
    fn place_in_ring(&mut self, data: Vec<u8>) -> HostBitstream {
        let id = self.next_unit_id;
        self.next_unit_id = self.next_unit_id.wrapping_add(1);

        let capacity = self.options.ring_capacity.max(1);
        let room = capacity - self.ring_head;
        self.ring_head = (self.ring_head + data.len()) % capacity;

        if data.len() > room {
            self.shared.lock().split_units += 1;
            let mut first = data;
            let second = first.split_off(room);
            HostBitstream::split(id, first, second)
        } else {
            HostBitstream::contiguous(id, data)
        }
    }
}

impl VencDevice for LoopbackDevice {
    type Slot = HostSlot;
    type Bitstream = HostBitstream;

    fn base_config(&mut self, config: &BaseConfig) -> VencResult<()> {
        if config.input_width == 0 || config.input_height == 0 {
            return check_status(VencCommand::BaseConfig, -1);
        }
        self.shared.lock().base_config = Some(config.clone());
        self.config = Some(config.clone());
        Ok(())
    }

    fn allocate_input_buffers(&mut self, count: u32) -> VencResult<()> {
        let Some(config) = self.config.as_ref() else {
            return check_status(VencCommand::AllocateInputBuffer, -1);
        };
        if count == 0 {
            return check_status(VencCommand::AllocateInputBuffer, -1);
        }

        let (luma, chroma) = Self::region_sizes(config);
        let stride = (luma + chroma) as u64;
        self.free = (0..count)
            .rev()
            .map(|id| {
                let phys_y = PHYS_BASE + id as u64 * stride;
                HostSlot::new(id, luma, chroma).with_addresses(SlotAddresses {
                    phys_y,
                    phys_c: phys_y + luma as u64,
                })
            })
            .collect();
        self.pool_size = count;
        self.shared.lock().pool_size = count;
        Ok(())
    }

    fn open(&mut self) -> VencResult<()> {
        if self.options.fail_open || self.config.is_none() || self.pool_size == 0 {
            return check_status(VencCommand::Open, -1);
        }
        self.opened = true;
        self.busy_remaining = self.options.busy_polls;
        self.warmup_remaining = self.options.warmup_polls;
        self.shared.lock().opens += 1;
        Ok(())
    }

    fn close(&mut self) -> VencResult<()> {
        self.opened = false;
        self.pending.clear();
        self.shared.lock().closes += 1;
        Ok(())
    }

    fn sequence_header(&mut self) -> VencResult<Vec<u8>> {
        let Some(config) = self.config.as_ref().filter(|_| self.opened) else {
            return Err(VencError::CommandFailed {
                command: VencCommand::HeaderData,
                status: -1,
            });
        };

        let mut header = vec![0x00, 0x00, 0x00, 0x01, 0x67, 0x42, 0x00, 0x1f];
        header.extend_from_slice(&(config.input_width as u16).to_be_bytes());
        header.extend_from_slice(&(config.input_height as u16).to_be_bytes());
        header.extend_from_slice(&[0x00, 0x00, 0x00, 0x01, 0x68, 0xce, 0x3c, 0x80]);
        Ok(header)
    }

    fn acquire_input_buffer(&mut self) -> Option<HostSlot> {
        if !self.opened {
            return None;
        }

        if self.busy_remaining > 0 {
            self.busy_remaining -= 1;
            self.shared.lock().empty_polls += 1;
            return None;
        }

        match self.free.pop() {
            Some(slot) => {
                self.busy_remaining = self.options.busy_polls;
                self.shared.lock().slots_acquired += 1;
                trace!("Loopback: slot {} acquired", slot.id());
                Some(slot)
            }
            None => {
                self.shared.lock().empty_polls += 1;
                None
            }
        }
    }

    fn flush_input_buffer(&mut self, _slot: &mut HostSlot) -> VencResult<()> {
        self.shared.lock().slots_flushed += 1;
        Ok(())
    }

    fn encode(&mut self, slot: &HostSlot) -> VencResult<()> {
        let call = {
            let mut counters = self.shared.lock();
            counters.encode_calls += 1;
            counters.encode_calls
        };

        if let Some(every) = self.options.fail_encode_every.filter(|n| *n > 0) {
            if call % every == 0 {
                self.shared.lock().encode_failures += 1;
                return check_status(VencCommand::Encode, -1);
            }
        }

        let key_interval = self
            .config
            .as_ref()
            .map_or(1, |c| c.max_key_interval.max(1)) as u64;
        let unit = self.digest(slot, self.pictures % key_interval == 0);
        self.pictures += 1;

        if !self.options.withhold_output {
            self.pending.push_back(unit);
        }
        Ok(())
    }

    fn release_input_buffer(&mut self, slot: HostSlot) {
        trace!("Loopback: slot {} released", slot.id());
        self.free.push(slot);
        self.shared.lock().slots_released += 1;
    }

    fn bitstream(&mut self) -> Option<HostBitstream> {
        if self.warmup_remaining > 0 {
            self.warmup_remaining -= 1;
            return None;
        }

        let unit = self.pending.pop_front()?;
        let bitstream = self.place_in_ring(unit);
        self.shared.lock().bitstreams_issued += 1;
        Some(bitstream)
    }

    fn return_bitstream(&mut self, _bitstream: HostBitstream) {
        self.shared.lock().bitstreams_returned += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{CodecKind, OutputBitstream};

    fn base_config() -> BaseConfig {
        BaseConfig {
            codec: CodecKind::H264,
            frame_rate: 25,
            input_width: 64,
            input_height: 32,
            dst_width: 64,
            dst_height: 32,
            input_format: InputFormat::Yuv420,
            target_bitrate: 1_000_000,
            max_key_interval: 25,
        }
    }

    fn opened_device(options: LoopbackOptions) -> (LoopbackDevice, LoopbackMonitor) {
        let mut platform = LoopbackPlatform::new(options);
        let monitor = platform.monitor();
        platform.hardware_init().unwrap();
        let mut device = platform.create_encoder().unwrap();
        device.base_config(&base_config()).unwrap();
        device.allocate_input_buffers(2).unwrap();
        device.open().unwrap();
        (device, monitor)
    }

    #[test]
    fn test_open_requires_configuration() {
        let mut platform = LoopbackPlatform::default();
        let mut device = platform.create_encoder().unwrap();
        assert!(matches!(
            device.open(),
            Err(VencError::CommandFailed {
                command: VencCommand::Open,
                ..
            })
        ));
        assert!(device.allocate_input_buffers(4).is_err());
    }

    #[test]
    fn test_pool_exhausts_and_refills() {
        let (mut device, monitor) = opened_device(LoopbackOptions::default());

        let a = device.acquire_input_buffer().unwrap();
        let b = device.acquire_input_buffer().unwrap();
        assert_ne!(a.id(), b.id());
        assert!(device.acquire_input_buffer().is_none());

        device.release_input_buffer(a);
        assert!(device.acquire_input_buffer().is_some());

        let counters = monitor.counters();
        assert_eq!(counters.slots_acquired, 3);
        assert_eq!(counters.slots_released, 1);
        assert_eq!(counters.empty_polls, 1);
    }

    #[test]
    fn test_slot_regions_sized_for_yuv420() {
        let (mut device, _) = opened_device(LoopbackOptions::default());
        let slot = device.acquire_input_buffer().unwrap();
        assert_eq!(slot.luma().len(), 64 * 32);
        assert!(slot.chroma().len() >= 64 * 32 / 2);
        assert_eq!(
            slot.addresses().phys_c,
            slot.addresses().phys_y + slot.luma().len() as u64
        );
    }

    #[test]
    fn test_busy_polls_before_each_acquire() {
        let options = LoopbackOptions {
            busy_polls: 2,
            ..Default::default()
        };
        let (mut device, monitor) = opened_device(options);

        assert!(device.acquire_input_buffer().is_none());
        assert!(device.acquire_input_buffer().is_none());
        let slot = device.acquire_input_buffer().unwrap();
        device.release_input_buffer(slot);
        assert!(device.acquire_input_buffer().is_none());

        assert_eq!(monitor.counters().empty_polls, 3);
    }

    #[test]
    fn test_ring_wrap_splits_unit() {
        let options = LoopbackOptions {
            ring_capacity: 24,
            ..Default::default()
        };
        let (mut device, monitor) = opened_device(options);

        for _ in 0..2 {
            let slot = device.acquire_input_buffer().unwrap();
            device.encode(&slot).unwrap();
            device.release_input_buffer(slot);
        }

        let first = device.bitstream().unwrap();
        assert!(first.secondary().is_empty());
        assert_eq!(first.primary().len(), 17);

        let second = device.bitstream().unwrap();
        assert_eq!(second.primary().len(), 7);
        assert_eq!(second.secondary().len(), 10);
        assert_eq!(&second.primary()[..4], &[0, 0, 0, 1]);

        assert_eq!(monitor.counters().split_units, 1);
    }

    #[test]
    fn test_first_unit_is_keyframe() {
        let (mut device, _) = opened_device(LoopbackOptions::default());
        let slot = device.acquire_input_buffer().unwrap();
        device.encode(&slot).unwrap();
        device.encode(&slot).unwrap();
        device.release_input_buffer(slot);

        assert_eq!(device.bitstream().unwrap().primary()[4], 0x65);
        assert_eq!(device.bitstream().unwrap().primary()[4], 0x41);
    }

    #[test]
    fn test_warmup_withholds_output() {
        let options = LoopbackOptions {
            warmup_polls: 1,
            ..Default::default()
        };
        let (mut device, _) = opened_device(options);
        let slot = device.acquire_input_buffer().unwrap();
        device.encode(&slot).unwrap();
        device.release_input_buffer(slot);

        assert!(device.bitstream().is_none());
        assert!(device.bitstream().is_some());
    }

    #[test]
    fn test_injected_encode_failure() {
        let options = LoopbackOptions {
            fail_encode_every: Some(2),
            ..Default::default()
        };
        let (mut device, monitor) = opened_device(options);
        let slot = device.acquire_input_buffer().unwrap();
        assert!(device.encode(&slot).is_ok());
        assert!(device.encode(&slot).is_err());
        assert!(device.encode(&slot).is_ok());
        device.release_input_buffer(slot);

        assert_eq!(monitor.counters().encode_failures, 1);
    }

    #[test]
    fn test_sequence_header_after_open() {
        let (mut device, _) = opened_device(LoopbackOptions::default());
        let header = device.sequence_header().unwrap();
        assert_eq!(&header[..5], &[0, 0, 0, 1, 0x67]);

        device.close().unwrap();
        assert!(device.sequence_header().is_err());
    }
}
