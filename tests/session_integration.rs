//! Session integration tests
//!
//! Drives complete encoder sessions against the loopback device and checks
//! the externally visible contract: packet ordering, slot accounting,
//! split-segment assembly and teardown.

use std::thread;

use cedar_venc::acquire::NoWait;
use cedar_venc::config::EncoderConfig;
use cedar_venc::device::loopback::{
    LoopbackCounters, LoopbackMonitor, LoopbackOptions, LoopbackPlatform,
};
use cedar_venc::frame::{Frame, PixelFormat};
use cedar_venc::nal;
use cedar_venc::repack::ChromaTransfer;
use cedar_venc::{EncodeOutcome, Session, SessionState, VencError};

const WIDTH: u32 = 64;
const HEIGHT: u32 = 32;

fn session_with(options: LoopbackOptions) -> (Session<LoopbackPlatform>, LoopbackMonitor) {
    let platform = LoopbackPlatform::new(options);
    let monitor = platform.monitor();
    let session = Session::new(platform).with_wait_strategy(NoWait);
    (session, monitor)
}

fn configured(options: LoopbackOptions) -> (Session<LoopbackPlatform>, LoopbackMonitor) {
    let (mut session, monitor) = session_with(options);
    session
        .configure(EncoderConfig::new(WIDTH, HEIGHT))
        .expect("configure");
    (session, monitor)
}

fn frame(fill: u8) -> Frame {
    Frame::filled(PixelFormat::Yuv420p, WIDTH, HEIGHT, fill)
}

#[test]
fn test_packets_numbered_without_gaps() {
    let (mut session, monitor) = configured(LoopbackOptions::default());

    let pts: Vec<i64> = (0..10)
        .map(|i| {
            session
                .encode(&frame(i))
                .unwrap()
                .into_packet()
                .expect("packet")
                .pts
        })
        .collect();
    assert_eq!(pts, (0..10).collect::<Vec<_>>());

    session.close().unwrap();
    let counters = monitor.counters();
    assert_eq!(counters.slots_outstanding(), 0);
    assert_eq!(counters.bitstreams_outstanding(), 0);
    assert_eq!(counters.hardware_exits, 1);
}

#[test]
fn test_configure_hands_hardware_the_session_record() {
    let (mut session, monitor) = session_with(LoopbackOptions::default());
    let mut config = EncoderConfig::new(WIDTH, HEIGHT);
    config.bitrate = 1_500_000;
    config.max_key_interval = 12;
    config.input_buffers = 3;
    session.configure(config).unwrap();

    let counters = monitor.counters();
    let base = counters.base_config.expect("base config applied");
    assert_eq!(base.frame_rate, 25);
    assert_eq!((base.dst_width, base.dst_height), (WIDTH, HEIGHT));
    assert_eq!(base.target_bitrate, 1_500_000);
    assert_eq!(base.max_key_interval, 12);
    assert_eq!(counters.pool_size, 3);
    assert_eq!(counters.opens, 1);

    assert!(nal::parameter_sets(session.header()).is_some());
}

#[test]
fn test_busy_pool_delays_but_never_fails() {
    let (mut session, monitor) = configured(LoopbackOptions {
        busy_polls: 5,
        ..Default::default()
    });

    for i in 0..3 {
        let outcome = session.encode(&frame(i)).unwrap();
        assert!(matches!(outcome, EncodeOutcome::Packet(_)));
    }

    assert_eq!(monitor.counters().empty_polls, 15);
    assert_eq!(session.stats().empty_polls, 15);
}

#[test]
fn test_bounded_acquisition_times_out() {
    let (mut session, monitor) = session_with(LoopbackOptions {
        busy_polls: 50,
        ..Default::default()
    });
    let mut config = EncoderConfig::new(WIDTH, HEIGHT);
    config.poll_interval_ms = 1;
    config.acquire_timeout_ms = Some(10);
    session.configure(config).unwrap();

    let err = session.encode(&frame(0)).unwrap_err();
    assert!(matches!(err, VencError::AcquireTimeout { polls: 10 }));
    assert!(err.is_recoverable());
    assert_eq!(monitor.counters().slots_outstanding(), 0);
}

#[test]
fn test_split_units_assembled_in_order() {
    let (mut session, monitor) = configured(LoopbackOptions {
        ring_capacity: 40,
        ..Default::default()
    });

    let mut packets = Vec::new();
    for i in 0..6 {
        packets.push(session.encode(&frame(i)).unwrap().into_packet().unwrap());
    }

    assert!(monitor.counters().split_units > 0);
    for packet in &packets {
        assert_eq!(packet.len(), 17);
        assert_eq!(&packet.data[..4], &[0, 0, 0, 1]);
        assert_eq!(
            u32::from_be_bytes(packet.data[5..9].try_into().unwrap()) as i64,
            packet.pts
        );
    }
}

#[test]
fn test_keyframe_interval_flags_packets() {
    let (mut session, _) = session_with(LoopbackOptions::default());
    let mut config = EncoderConfig::new(WIDTH, HEIGHT);
    config.max_key_interval = 4;
    session.configure(config).unwrap();

    let keyframes: Vec<bool> = (0..8)
        .map(|i| {
            session
                .encode(&frame(i))
                .unwrap()
                .into_packet()
                .unwrap()
                .is_keyframe
        })
        .collect();
    assert_eq!(
        keyframes,
        vec![true, false, false, false, true, false, false, false]
    );
    assert_eq!(session.stats().keyframes_emitted, 2);
}

#[test]
fn test_encode_failure_drops_frame_without_gap() {
    let (mut session, monitor) = configured(LoopbackOptions {
        fail_encode_every: Some(3),
        ..Default::default()
    });

    let outcomes: Vec<EncodeOutcome> = (0..6).map(|i| session.encode(&frame(i)).unwrap()).collect();
    let failed = outcomes
        .iter()
        .filter(|o| matches!(o, EncodeOutcome::EncodeFailed(_)))
        .count();
    let pts: Vec<i64> = outcomes
        .into_iter()
        .filter_map(EncodeOutcome::into_packet)
        .map(|p| p.pts)
        .collect();

    assert_eq!(failed, 2);
    assert_eq!(pts, vec![0, 1, 2, 3]);
    assert_eq!(monitor.counters().slots_outstanding(), 0);
    assert_eq!(session.stats().encode_failures, 2);
}

#[test]
fn test_withheld_output_does_not_leak_slots() {
    let (mut session, monitor) = configured(LoopbackOptions {
        withhold_output: true,
        ..Default::default()
    });

    for i in 0..10 {
        assert_eq!(session.encode(&frame(i)).unwrap(), EncodeOutcome::NoOutput);
    }

    let counters = monitor.counters();
    assert_eq!(counters.slots_acquired, 10);
    assert_eq!(counters.slots_released, 10);
    assert_eq!(session.next_pts(), 0);
}

#[test]
fn test_drain_after_warmup() {
    let (mut session, _) = configured(LoopbackOptions {
        warmup_polls: 3,
        ..Default::default()
    });

    let mut packets = Vec::new();
    for i in 0..5 {
        if let EncodeOutcome::Packet(p) = session.encode(&frame(i)).unwrap() {
            packets.push(p);
        }
    }
    assert_eq!(packets.len(), 2);

    packets.extend(session.drain().unwrap());
    let pts: Vec<i64> = packets.iter().map(|p| p.pts).collect();
    assert_eq!(pts, vec![0, 1, 2, 3, 4]);
    assert_eq!(session.stats().packets_emitted, 5);
}

#[test]
fn test_incremented_transfer_leaves_frame_untouched() {
    let (mut session, _) = session_with(LoopbackOptions::default());
    let mut config = EncoderConfig::new(WIDTH, HEIGHT);
    config.chroma_transfer = ChromaTransfer::Incremented;
    session.configure(config).unwrap();

    let source = frame(7);
    let before = source.clone();
    let incremented = session.encode(&source).unwrap().into_packet().unwrap();
    assert_eq!(source, before);

    let (mut plain, _) = configured(LoopbackOptions::default());
    let verbatim = plain.encode(&source).unwrap().into_packet().unwrap();

    // Chroma checksum lives in the last four payload bytes
    let chroma_sum = |data: &[u8]| u32::from_be_bytes(data[13..17].try_into().unwrap());
    assert_eq!(
        chroma_sum(&incremented.data) - chroma_sum(&verbatim.data),
        WIDTH * HEIGHT / 2
    );
}

#[test]
fn test_rgba_session() {
    let (mut session, _) = session_with(LoopbackOptions::default());
    let mut config = EncoderConfig::new(WIDTH, HEIGHT);
    config.pixel_format = PixelFormat::Rgba;
    session.configure(config).unwrap();

    let rgba = Frame::filled(PixelFormat::Rgba, WIDTH, HEIGHT, 1);
    let packet = session.encode(&rgba).unwrap().into_packet().unwrap();
    assert_eq!(
        u32::from_be_bytes(packet.data[9..13].try_into().unwrap()),
        WIDTH * HEIGHT * 4
    );

    let yuv = frame(0);
    assert!(matches!(
        session.encode(&yuv),
        Err(VencError::FrameMismatch(_))
    ));
}

#[test]
fn test_failed_open_releases_hardware() {
    let (mut session, monitor) = session_with(LoopbackOptions {
        fail_open: true,
        ..Default::default()
    });

    assert!(session.configure(EncoderConfig::new(WIDTH, HEIGHT)).is_err());
    assert_eq!(session.state(), SessionState::Uninitialized);

    let counters = monitor.counters();
    assert_eq!(counters.hardware_inits, 1);
    assert_eq!(counters.hardware_exits, 1);
    assert_eq!(counters.opens, 0);
}

#[test]
fn test_hardware_init_failure_is_configuration_error() {
    let (mut session, monitor) = session_with(LoopbackOptions {
        fail_hardware_init: true,
        ..Default::default()
    });

    let err = session
        .configure(EncoderConfig::new(WIDTH, HEIGHT))
        .unwrap_err();
    assert!(err.is_configuration_error());
    assert_eq!(monitor.counters().encoders_created, 0);
    assert_eq!(monitor.counters().hardware_exits, 0);
}

#[test]
fn test_misaligned_width_allocates_nothing() {
    let (mut session, monitor) = session_with(LoopbackOptions::default());
    let err = session
        .configure(EncoderConfig::new(100, HEIGHT))
        .unwrap_err();

    assert!(matches!(err, VencError::MisalignedWidth { width: 100, .. }));
    assert_eq!(monitor.counters(), LoopbackCounters::default());
}

#[test]
fn test_closed_session_rejects_encode() {
    let (mut session, monitor) = configured(LoopbackOptions::default());
    session.encode(&frame(0)).unwrap();
    session.close().unwrap();
    session.close().unwrap();

    assert!(matches!(
        session.encode(&frame(1)),
        Err(VencError::InvalidState { .. })
    ));
    assert_eq!(session.state(), SessionState::Closed);

    let counters = monitor.counters();
    assert_eq!(counters.closes, 1);
    assert_eq!(counters.hardware_exits, 1);
}

#[test]
fn test_drop_closes_session() {
    let (session, monitor) = configured(LoopbackOptions::default());
    drop(session);

    let counters = monitor.counters();
    assert_eq!(counters.closes, 1);
    assert_eq!(counters.hardware_exits, 1);
}

#[test]
fn test_shared_session_serializes_cycles() {
    let (session, monitor) = configured(LoopbackOptions {
        busy_polls: 1,
        ..Default::default()
    });
    let shared = session.into_shared();

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let shared = shared.clone();
            thread::spawn(move || {
                (0..25)
                    .filter_map(|i| {
                        shared
                            .lock()
                            .encode(&frame((t * 25 + i) as u8))
                            .unwrap()
                            .into_packet()
                    })
                    .map(|p| p.pts)
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut pts: Vec<i64> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    pts.sort_unstable();
    assert_eq!(pts, (0..100).collect::<Vec<_>>());

    shared.lock().close().unwrap();
    assert_eq!(monitor.counters().slots_outstanding(), 0);
}
