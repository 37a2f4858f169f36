//! Per-session encoder statistics
//!
//! Counts what happened to every submitted frame (packet, no output yet,
//! hardware failure) plus how long slot acquisition had to poll, so a
//! stalled pool or a lossy encoder shows up in the close-time summary.

use std::time::{Duration, Instant};

/// Cumulative statistics for one encoder session
#[derive(Debug, Clone)]
pub struct EncoderStats {
    /// Frames handed to the hardware
    pub frames_submitted: u64,

    /// Compressed packets emitted
    pub packets_emitted: u64,

    /// Total bytes of emitted packets
    pub bytes_emitted: u64,

    /// Packets flagged as keyframes
    pub keyframes_emitted: u64,

    /// Submissions the hardware rejected (frame dropped)
    pub encode_failures: u64,

    /// Successful submissions that produced no packet yet
    pub no_output: u64,

    /// Acquisition polls that found the pool exhausted
    pub empty_polls: u64,

    /// Average submit cycle time in milliseconds
    pub avg_cycle_time_ms: f32,

    /// Minimum submit cycle time observed (ms)
    pub min_cycle_time_ms: f32,

    /// Maximum submit cycle time observed (ms)
    pub max_cycle_time_ms: f32,

    /// Target bitrate from configuration (kbps)
    pub target_bitrate_kbps: u32,

    /// Time since the session was configured
    pub uptime: Duration,

    /// Timestamp when the session was configured
    pub created_at: Instant,
}

impl EncoderStats {
    /// Create empty stats
    pub fn new(target_bitrate_kbps: u32) -> Self {
        Self {
            frames_submitted: 0,
            packets_emitted: 0,
            bytes_emitted: 0,
            keyframes_emitted: 0,
            encode_failures: 0,
            no_output: 0,
            empty_polls: 0,
            avg_cycle_time_ms: 0.0,
            min_cycle_time_ms: f32::MAX,
            max_cycle_time_ms: 0.0,
            target_bitrate_kbps,
            uptime: Duration::ZERO,
            created_at: Instant::now(),
        }
    }

    /// Record one submit cycle, whatever its outcome
    pub fn record_cycle(&mut self, cycle_time_ms: f32, empty_polls: u32) {
        self.frames_submitted += 1;
        self.empty_polls += empty_polls as u64;

        if self.frames_submitted == 1 {
            self.avg_cycle_time_ms = cycle_time_ms;
        } else {
            // Exponential moving average (α = 0.1)
            self.avg_cycle_time_ms = self.avg_cycle_time_ms * 0.9 + cycle_time_ms * 0.1;
        }

        self.min_cycle_time_ms = self.min_cycle_time_ms.min(cycle_time_ms);
        self.max_cycle_time_ms = self.max_cycle_time_ms.max(cycle_time_ms);
        self.uptime = self.created_at.elapsed();
    }

    /// Record an emitted packet
    pub fn record_packet(&mut self, bytes: usize, is_keyframe: bool) {
        self.packets_emitted += 1;
        self.bytes_emitted += bytes as u64;
        if is_keyframe {
            self.keyframes_emitted += 1;
        }
    }

    /// Record a submission that produced nothing yet
    pub fn record_no_output(&mut self) {
        self.no_output += 1;
    }

    /// Record a submission the hardware rejected
    pub fn record_failure(&mut self) {
        self.encode_failures += 1;
    }

    /// Current bitrate estimate from total output and uptime (kbps)
    pub fn bitrate_kbps(&self) -> u32 {
        let elapsed_secs = self.created_at.elapsed().as_secs_f32();
        if elapsed_secs > 0.5 {
            ((self.bytes_emitted * 8) as f32 / elapsed_secs / 1000.0) as u32
        } else {
            0
        }
    }

    /// Share of submitted frames the hardware dropped
    pub fn failure_percentage(&self) -> f32 {
        if self.frames_submitted > 0 {
            (self.encode_failures as f32 / self.frames_submitted as f32) * 100.0
        } else {
            0.0
        }
    }

    /// Format stats for logging
    pub fn summary(&self) -> String {
        format!(
            "{} frames in, {} packets out ({} bytes, {} keyframes), {} failed, {} empty polls, {} kbps (target {}), avg {:.2}ms/frame",
            self.frames_submitted,
            self.packets_emitted,
            self.bytes_emitted,
            self.keyframes_emitted,
            self.encode_failures,
            self.empty_polls,
            self.bitrate_kbps(),
            self.target_bitrate_kbps,
            self.avg_cycle_time_ms
        )
    }
}

impl Default for EncoderStats {
    fn default() -> Self {
        Self::new(0)
    }
}

/// Timing helper for measuring submit cycles
pub struct CycleTimer {
    start: Instant,
}

impl CycleTimer {
    /// Start timing a cycle
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed time in milliseconds
    pub fn elapsed_ms(&self) -> f32 {
        self.start.elapsed().as_secs_f32() * 1000.0
    }
}
