//! Protocol output against the simulated SMU.

use smu_core::{
    BiasConfig, EngineSettings, EnduranceConfig, InstrumentErrorKind, IvLoopConfig,
    MeasureRange, MeasurementRecord, ProgramState, ResistanceConfig, RetentionConfig, SmuError,
    SourceMode, SweepConfig, SweepShape, TestPhase, TestRunConfig, WireMode,
};
use smu_driver_keithley::{connect, ConnectOptions};
use smu_driver_mock::{ResistanceState, SimHandle, SimulatedSmu};
use smu_experiment::{RunController, RunState};
use std::time::Duration;

async fn controller(smu: SimulatedSmu) -> (RunController, SimHandle) {
    let handle = smu.handle();
    let session = connect(smu, &ConnectOptions::default()).await.unwrap();
    (RunController::new(session, EngineSettings::default()), handle)
}

fn assert_gapless(records: &[MeasurementRecord]) {
    for (i, record) in records.iter().enumerate() {
        assert_eq!(record.sequence_index, i as u64);
    }
    assert!(records.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
}

fn approx(a: f64, b: f64, tol: f64) -> bool {
    (a - b).abs() <= tol
}

#[tokio::test(start_paused = true)]
async fn linear_sweep_records_each_setpoint() {
    let (controller, handle) = controller(SimulatedSmu::keithley_2400()).await;
    let config = TestRunConfig::Sweep(SweepConfig {
        source: SourceMode::Voltage,
        start: 0.0,
        stop: 1.0,
        step: 0.25,
        shape: SweepShape::Linear,
        compliance: 1e-3,
        range: MeasureRange::Auto,
        settle: Duration::from_millis(5),
    });

    controller.start(config).unwrap();
    let status = controller.wait().await;

    assert_eq!(status.state, RunState::Completed);
    assert_eq!(status.progress.records, 5);
    let records = controller.snapshot();
    assert_gapless(&records);
    let levels: Vec<f64> = records.iter().map(|r| r.source_value).collect();
    for (got, want) in levels.iter().zip([0.0, 0.25, 0.5, 0.75, 1.0]) {
        assert!(approx(*got, want, 1e-9), "{levels:?}");
    }
    assert!(records.iter().all(|r| r.phase == TestPhase::SweepUp));
    assert!(records.iter().all(|r| r.loop_index.is_none()));
    // 0 V gives no current, so no resistance.
    assert_eq!(records[0].resistance, None);
    assert!(records[1].resistance.is_some());
    assert!(!handle.output_enabled());
    assert_eq!(handle.level(), 0.0);
}

#[tokio::test(start_paused = true)]
async fn iv_loop_repeats_triangle_and_tags_loops() {
    let (controller, _handle) = controller(SimulatedSmu::keithley_2600()).await;
    let config = TestRunConfig::IvLoop(IvLoopConfig {
        source: SourceMode::Voltage,
        start: 0.0,
        stop: 1.0,
        step: 0.5,
        loops: 2,
        compliance: 1e-2,
        range: MeasureRange::Auto,
        settle: Duration::from_millis(1),
    });

    controller.start(config).unwrap();
    assert_eq!(controller.wait().await.state, RunState::Completed);

    let records = controller.snapshot();
    assert_eq!(records.len(), 10);
    assert_gapless(&records);
    let loops: Vec<_> = records.iter().map(|r| r.loop_index).collect();
    assert_eq!(loops[..5], [Some(0); 5]);
    assert_eq!(loops[5..], [Some(1); 5]);
    let phases: Vec<_> = records.iter().take(5).map(|r| r.phase).collect();
    assert_eq!(
        phases,
        vec![
            TestPhase::SweepUp,
            TestPhase::SweepUp,
            TestPhase::SweepUp,
            TestPhase::SweepDown,
            TestPhase::SweepDown,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn endurance_alternates_set_and_reset() {
    let (controller, handle) = controller(SimulatedSmu::keithley_2400()).await;
    let config = TestRunConfig::Endurance(EnduranceConfig {
        cycles: 3,
        set_level: 1.5,
        reset_level: -1.5,
        read_level: 0.1,
        compliance: 1e-2,
        pulse_width: Duration::from_millis(1),
        read_settle: Duration::from_millis(1),
    });

    controller.start(config).unwrap();
    assert_eq!(controller.wait().await.state, RunState::Completed);

    let records = controller.snapshot();
    assert_gapless(&records);
    let phases: Vec<_> = records.iter().map(|r| r.phase).collect();
    assert_eq!(
        phases,
        vec![
            TestPhase::Set,
            TestPhase::Reset,
            TestPhase::Set,
            TestPhase::Reset,
            TestPhase::Set,
            TestPhase::Reset,
        ]
    );
    let cycles: Vec<_> = records.iter().map(|r| r.cycle_index).collect();
    assert_eq!(
        cycles,
        vec![Some(0), Some(0), Some(1), Some(1), Some(2), Some(2)]
    );
    for record in &records {
        assert!(approx(record.source_value, 0.1, 1e-9));
        let ohms = record.resistance.unwrap();
        match record.phase {
            TestPhase::Set => assert!(approx(ohms, 1e3, 1e-3)),
            _ => assert!(approx(ohms, 1e5, 1e-1)),
        }
    }
    assert_eq!(handle.switch_count(), 6);
    assert!(!handle.output_enabled());
}

#[tokio::test(start_paused = true)]
async fn retention_samples_on_anchored_schedule() {
    let (controller, handle) = controller(SimulatedSmu::keithley_2600()).await;
    let config = TestRunConfig::Retention(RetentionConfig {
        state: ProgramState::Set,
        program_level: 1.5,
        pulse_width: Duration::from_millis(10),
        read_level: 0.1,
        compliance: 1e-2,
        duration: Duration::from_secs(10),
        sample_interval: Duration::from_secs(2),
        read_settle: Duration::from_millis(10),
    });

    controller.start(config).unwrap();
    let status = controller.wait().await;

    assert_eq!(status.state, RunState::Completed);
    assert_eq!(status.progress.expected, Some(5));
    let records = controller.snapshot();
    assert!(records.len() >= 5);
    assert_gapless(&records);
    for (k, record) in records.iter().enumerate() {
        let since = record.since_programming.unwrap().as_secs_f64();
        assert!(approx(since, 2.0 * k as f64, 0.05), "sample {k} at {since}s");
        assert_eq!(record.phase, TestPhase::Set);
        assert!(approx(record.resistance.unwrap(), 1e3, 1e-3));
    }
    // The read bias is removed between samples.
    assert_eq!(handle.level(), 0.0);
    assert_eq!(handle.device_state(), ResistanceState::Low);
}

#[tokio::test(start_paused = true)]
async fn late_retention_reads_keep_real_times_and_skip_missed_slots() {
    let (controller, _handle) = controller(SimulatedSmu::keithley_2400()).await;
    // Each read takes longer than the sample interval.
    let config = TestRunConfig::Retention(RetentionConfig {
        state: ProgramState::Reset,
        program_level: -1.5,
        pulse_width: Duration::from_millis(10),
        read_level: 0.1,
        compliance: 1e-2,
        duration: Duration::from_secs(10),
        sample_interval: Duration::from_secs(2),
        read_settle: Duration::from_secs(3),
    });

    controller.start(config).unwrap();
    let status = controller.wait().await;

    assert_eq!(status.state, RunState::Completed);
    assert_eq!(status.progress.expected, Some(5));
    let records = controller.snapshot();
    assert_gapless(&records);
    // Slots 0, 2 and 4 are sampled, each finishing 3 s after its deadline;
    // slots 1 and 3 are skipped instead of replayed.
    let since: Vec<f64> = records
        .iter()
        .map(|r| r.since_programming.unwrap().as_secs_f64())
        .collect();
    assert_eq!(since.len(), 3, "{since:?}");
    for (got, want) in since.iter().zip([3.0, 7.0, 11.0]) {
        assert!(approx(*got, want, 0.05), "{since:?}");
    }
    assert!(records.iter().all(|r| r.phase == TestPhase::Reset));
    assert!(records.iter().all(|r| approx(r.resistance.unwrap(), 1e5, 1e-3)));
}

#[tokio::test(start_paused = true)]
async fn bias_holds_level_and_samples() {
    let (controller, handle) = controller(SimulatedSmu::keithley_2400()).await;
    handle.set_device_state(ResistanceState::Low);
    let config = TestRunConfig::Bias(BiasConfig {
        source: SourceMode::Voltage,
        level: 0.2,
        compliance: 1e-2,
        range: MeasureRange::Auto,
        duration: Duration::from_secs(1),
        sample_interval: Duration::from_millis(250),
    });

    controller.start(config).unwrap();
    assert_eq!(controller.wait().await.state, RunState::Completed);

    let records = controller.snapshot();
    assert_eq!(records.len(), 4);
    assert_gapless(&records);
    assert!(records.iter().all(|r| r.phase == TestPhase::Hold));
    assert!(records.iter().all(|r| approx(r.measured_value, 2e-4, 1e-12)));
    let spacing = records[3].timestamp - records[0].timestamp;
    assert!(approx(spacing.as_secs_f64(), 0.75, 5e-3));
}

#[tokio::test(start_paused = true)]
async fn two_wire_resistance_probe() {
    let (controller, handle) = controller(SimulatedSmu::keithley_2600()).await;
    let config = TestRunConfig::Resistance(ResistanceConfig {
        wire_mode: WireMode::TwoWire,
        source: SourceMode::Current,
        probe_level: 1e-6,
        compliance: 20.0,
        range: MeasureRange::Auto,
        settle: Duration::from_millis(10),
    });

    controller.start(config).unwrap();
    assert_eq!(controller.wait().await.state, RunState::Completed);

    let records = controller.snapshot();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].phase, TestPhase::Probe);
    // 1 µA through the 100 kΩ high-resistance state
    assert!(approx(records[0].measured_value, 0.1, 1e-9));
    assert!(approx(records[0].resistance.unwrap(), 1e5, 1e-3));
    assert_eq!(handle.device_state(), ResistanceState::High);
}

#[tokio::test(start_paused = true)]
async fn four_wire_resistance_routes_sense_on_2400() {
    let (controller, handle) = controller(SimulatedSmu::keithley_2400()).await;
    let config = TestRunConfig::Resistance(ResistanceConfig {
        wire_mode: WireMode::FourWire,
        source: SourceMode::Current,
        probe_level: 1e-6,
        compliance: 20.0,
        range: MeasureRange::Auto,
        settle: Duration::from_millis(10),
    });

    controller.start(config).unwrap();
    assert_eq!(controller.wait().await.state, RunState::Completed);
    assert!(handle.remote_sense());
    assert_eq!(controller.snapshot().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn four_wire_sensing_does_not_carry_into_next_run() {
    let (controller, handle) = controller(SimulatedSmu::keithley_2400()).await;
    let four_wire = TestRunConfig::Resistance(ResistanceConfig {
        wire_mode: WireMode::FourWire,
        source: SourceMode::Current,
        probe_level: 1e-6,
        compliance: 20.0,
        range: MeasureRange::Auto,
        settle: Duration::from_millis(10),
    });
    controller.start(four_wire).unwrap();
    assert_eq!(controller.wait().await.state, RunState::Completed);
    assert!(handle.remote_sense());

    let sweep = TestRunConfig::Sweep(SweepConfig {
        source: SourceMode::Voltage,
        start: 0.0,
        stop: 1.0,
        step: 0.5,
        shape: SweepShape::Linear,
        compliance: 1e-3,
        range: MeasureRange::Auto,
        settle: Duration::from_millis(5),
    });
    controller.start(sweep).unwrap();
    assert_eq!(controller.wait().await.state, RunState::Completed);

    assert!(!handle.remote_sense());
    let sense: Vec<String> = handle
        .commands()
        .into_iter()
        .filter(|c| c.starts_with(":SYST:RSEN"))
        .collect();
    assert_eq!(sense.last().map(String::as_str), Some(":SYST:RSEN OFF"));
    assert!(sense.iter().any(|c| c == ":SYST:RSEN ON"));
}

#[tokio::test]
async fn four_wire_on_2600_is_rejected_before_any_command() {
    let (controller, handle) = controller(SimulatedSmu::keithley_2600()).await;
    let sent = handle.commands().len();
    let config = TestRunConfig::Resistance(ResistanceConfig {
        wire_mode: WireMode::FourWire,
        source: SourceMode::Current,
        probe_level: 1e-6,
        compliance: 20.0,
        range: MeasureRange::Auto,
        settle: Duration::ZERO,
    });

    let err = controller.start(config).unwrap_err();

    match err {
        SmuError::Instrument(e) => assert_eq!(e.kind, InstrumentErrorKind::Unsupported),
        other => panic!("expected unsupported, got {other:?}"),
    }
    assert_eq!(handle.commands().len(), sent);
    assert_eq!(controller.status().state, RunState::Idle);
}
