//! Snapshot determinism, replay and run-ahead on the reference machine

use lockstep_core::machine::bus::ButtonState;
use lockstep_core::machine::{Machine, MachineConfig};
use lockstep_core::run_ahead::RunAhead;
use lockstep_core::serializer::{Header, HEADER_LEN};
use lockstep_core::{CoreConfig, CoreError, Event, SnapshotError, System};

fn core(seed: u64) -> CoreConfig {
    CoreConfig {
        seed: Some(seed),
        description: "replay test".into(),
        ..Default::default()
    }
}

fn small() -> MachineConfig {
    MachineConfig {
        lines_per_frame: 8,
        ..Default::default()
    }
}

/// Scripted input so every run sees the same button presses
fn buttons(frame: u64) -> ButtonState {
    ButtonState::from_byte((frame.wrapping_mul(37) % 256) as u8)
}

fn advance(system: &mut System, machine: &Machine) -> Event {
    machine.set_input(buttons(system.frame_count()));
    system.run_frame().unwrap()
}

#[test]
fn test_same_seed_same_snapshots() {
    let (mut first, first_machine) = Machine::boot(core(42), small()).unwrap();
    let (mut second, second_machine) = Machine::boot(core(42), small()).unwrap();

    for frame in 1..=30 {
        assert_eq!(advance(&mut first, &first_machine), Event::Frame);
        assert_eq!(advance(&mut second, &second_machine), Event::Frame);
        assert_eq!(
            first.serialize(true).unwrap(),
            second.serialize(true).unwrap(),
            "diverged at frame {frame}"
        );
    }
    assert_eq!(first_machine.ram(), second_machine.ram());
}

#[test]
fn test_different_seed_diverges() {
    let (mut first, _) = Machine::boot(core(1), small()).unwrap();
    let (mut second, _) = Machine::boot(core(2), small()).unwrap();
    first.run_frame().unwrap();
    second.run_frame().unwrap();
    assert_ne!(first.serialize(true).unwrap(), second.serialize(true).unwrap());
}

#[test]
fn test_replay_from_frame_100() {
    let (mut system, machine) = Machine::boot(core(7), small()).unwrap();
    while system.frame_count() < 100 {
        advance(&mut system, &machine);
    }
    let at_100 = system.serialize(true).unwrap();

    while system.frame_count() < 200 {
        advance(&mut system, &machine);
    }
    let at_200 = system.serialize(true).unwrap();

    // Same system, rolled back
    system.unserialize(&at_100).unwrap();
    assert_eq!(system.frame_count(), 100);
    while system.frame_count() < 200 {
        advance(&mut system, &machine);
    }
    assert_eq!(system.serialize(true).unwrap(), at_200);

    // Fresh system, same configuration
    let (mut fresh, fresh_machine) = Machine::boot(core(7), small()).unwrap();
    fresh.unserialize(&at_100).unwrap();
    while fresh.frame_count() < 200 {
        advance(&mut fresh, &fresh_machine);
    }
    assert_eq!(fresh.serialize(true).unwrap(), at_200);
}

#[test]
fn test_round_trip_is_byte_identical() {
    let (mut system, machine) = Machine::boot(core(5), small()).unwrap();
    for _ in 0..5 {
        advance(&mut system, &machine);
    }
    let blob = system.serialize(true).unwrap();
    system.unserialize(&blob).unwrap();
    assert_eq!(system.serialize(true).unwrap(), blob);

    let header = Header::read(&blob).unwrap();
    assert!(header.synchronized);
    assert_eq!(header.size, blob.len());
    assert_eq!(header.description, "replay test");
}

#[test]
fn test_rejected_snapshots_leave_state_untouched() {
    let (mut system, machine) = Machine::boot(core(11), small()).unwrap();
    advance(&mut system, &machine);
    let good = system.serialize(true).unwrap();
    advance(&mut system, &machine);
    let current = system.serialize(true).unwrap();

    let mut bad_signature = good.clone();
    bad_signature[0] ^= 0xFF;
    assert!(matches!(
        system.unserialize(&bad_signature),
        Err(CoreError::Snapshot(SnapshotError::Signature { .. }))
    ));

    let mut bad_version = good.clone();
    bad_version[9] = b'X';
    assert!(matches!(
        system.unserialize(&bad_version),
        Err(CoreError::Snapshot(SnapshotError::Version { .. }))
    ));

    assert!(matches!(
        system.unserialize(&good[..good.len() - 1]),
        Err(CoreError::Snapshot(SnapshotError::Size { .. }))
    ));
    assert!(matches!(
        system.unserialize(&good[..HEADER_LEN - 1]),
        Err(CoreError::Snapshot(SnapshotError::TooShort { .. }))
    ));

    // A machine with more RAM has a different layout
    let bigger = MachineConfig {
        ram_size: 0x1000,
        ..small()
    };
    let (mut other, _) = Machine::boot(core(11), bigger).unwrap();
    let foreign = other.serialize(true).unwrap();
    assert!(matches!(
        system.unserialize(&foreign),
        Err(CoreError::Snapshot(SnapshotError::Layout { .. }))
    ));

    assert_eq!(system.serialize(true).unwrap(), current);
    assert_eq!(system.frame_count(), 2);
}

#[test]
fn test_unsynchronized_snapshot_loads() {
    let (mut system, machine) = Machine::boot(core(13), small()).unwrap();
    advance(&mut system, &machine);
    let blob = system.serialize(false).unwrap();
    assert!(!Header::read(&blob).unwrap().synchronized);

    advance(&mut system, &machine);
    system.unserialize(&blob).unwrap();
    assert_eq!(system.frame_count(), 1);
    assert_eq!(advance(&mut system, &machine), Event::Frame);
}

/// Every line is a whole frame, so frames also complete while synchronizing
fn single_line() -> MachineConfig {
    MachineConfig {
        lines_per_frame: 1,
        ..Default::default()
    }
}

#[test]
fn test_snapshots_do_not_move_the_timeline() {
    for config in [small(), single_line()] {
        let (mut quiet, quiet_machine) = Machine::boot(core(1), config).unwrap();
        let (mut watched, watched_machine) = Machine::boot(core(1), config).unwrap();

        for frame in 0..10u64 {
            quiet_machine.set_input(buttons(frame));
            watched_machine.set_input(buttons(frame));
            assert_eq!(quiet.run_frame().unwrap(), Event::Frame);
            assert_eq!(watched.run_frame().unwrap(), Event::Frame);
            watched.serialize(true).unwrap();
            assert_eq!(quiet.frame_count(), watched.frame_count());
        }
        assert_eq!(quiet.frame_count(), 10);

        // Frames finished while synchronizing are counted when reported
        let presented = watched_machine.screen().latest().unwrap().number;
        let pending = watched.scheduler().pending_events() as u64;
        assert_eq!(presented, watched.frame_count() + pending);
        assert_eq!(quiet_machine.screen().latest().unwrap().number, presented);

        assert_eq!(quiet.serialize(true).unwrap(), watched.serialize(true).unwrap());
    }
}

#[test]
fn test_run_ahead_is_transparent() {
    for config in [small(), single_line()] {
        let (mut plain, plain_machine) = Machine::boot(core(21), config).unwrap();
        let (mut ahead, ahead_machine) = Machine::boot(core(21), config).unwrap();
        let mut run_ahead = RunAhead::new(true);

        for frame in 1..=20u64 {
            plain_machine.set_input(buttons(frame));
            ahead_machine.set_input(buttons(frame));
            assert_eq!(plain.run_frame().unwrap(), Event::Frame);
            assert_eq!(run_ahead.run_frame(&mut ahead).unwrap(), Event::Frame);
            assert_eq!(plain.frame_count(), ahead.frame_count(), "frame {frame}");

            let shown = ahead_machine.screen().latest().unwrap().number;
            let committed = plain_machine.screen().latest().unwrap().number;
            if config.lines_per_frame > 1 {
                assert_eq!(shown, committed + 1);
            } else {
                assert!(shown > committed, "frame {frame}: showed {shown}, committed {committed}");
            }
        }

        // Only the end of the plain run is ever snapshotted
        assert_eq!(plain.serialize(true).unwrap(), ahead.serialize(true).unwrap());
        assert_eq!(run_ahead.speculative_frames(), 20);
        assert!(!ahead.run_ahead());
    }
}

#[test]
fn test_run_ahead_suppresses_committed_audio() {
    let (mut plain, plain_machine) = Machine::boot(core(3), small()).unwrap();
    let (mut ahead, ahead_machine) = Machine::boot(core(3), small()).unwrap();
    let mut run_ahead = RunAhead::new(true);

    for _ in 0..10 {
        plain.run_frame().unwrap();
        run_ahead.run_frame(&mut ahead).unwrap();
    }
    // Only the presented pass reaches the stream, one frame's worth each time
    let plain_samples = plain_machine.stream().drain().len() as i64;
    let ahead_samples = ahead_machine.stream().drain().len() as i64;
    assert!((plain_samples - ahead_samples).abs() <= 64, "{plain_samples} vs {ahead_samples}");
    assert!(ahead_machine.screen().suppressed() >= 10);
}
