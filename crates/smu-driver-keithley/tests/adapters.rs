//! Family adapters driven against the simulated SMU.

use smu_core::{
    resistance, InstrumentErrorKind, InstrumentFamily, MeasureRange, SourceMode, SourceSetpoint,
    WireMode,
};
use smu_driver_keithley::{connect, Channel, ConnectOptions};
use smu_driver_mock::{ErrorConfig, ErrorScenario, ResistanceState, SimulatedSmu};
use std::time::Duration;

#[tokio::test]
async fn connect_selects_scpi_adapter_and_resets() {
    let smu = SimulatedSmu::keithley_2400();
    let handle = smu.handle();

    let session = connect(smu, &ConnectOptions::default()).await.unwrap();

    assert_eq!(session.family(), InstrumentFamily::Keithley2400);
    assert!(session.identity().contains("MODEL 2400"));
    assert!(!session.output_enabled());
    assert_eq!(session.compliance(), None);
    assert_eq!(
        handle.commands(),
        vec![
            "*IDN?",
            "*RST",
            "*CLS",
            ":FORM:ELEM VOLT,CURR",
            ":SOUR:FUNC VOLT",
            ":SOUR:VOLT:LEV 0",
            ":OUTP OFF",
        ]
    );
}

#[tokio::test]
async fn connect_selects_tsp_adapter_on_requested_channel() {
    let smu = SimulatedSmu::keithley_2600();
    let handle = smu.handle();
    let options = ConnectOptions {
        channel: Channel::B,
        ..Default::default()
    };

    let session = connect(smu, &options).await.unwrap();

    assert_eq!(session.family(), InstrumentFamily::Keithley2600);
    let commands = handle.commands();
    assert_eq!(commands[1], "smub.reset()");
    assert!(commands.contains(&"format.data = format.ASCII".to_string()));
    assert_eq!(commands.last().unwrap(), "smub.source.output = smub.OUTPUT_OFF");
}

#[tokio::test]
async fn unsupported_identity_refuses_connection() {
    let smu = SimulatedSmu::keithley_2400().with_identity("Agilent Technologies,B2902A,MY1,3.4");
    let handle = smu.handle();

    let err = connect(smu, &ConnectOptions::default()).await.unwrap_err();

    assert_eq!(err.kind, InstrumentErrorKind::Unsupported);
    assert_eq!(handle.commands(), vec!["*IDN?"]);
}

#[tokio::test]
async fn same_calls_produce_same_readings_on_both_families() {
    for smu in [SimulatedSmu::keithley_2400(), SimulatedSmu::keithley_2600()] {
        smu.handle().set_device_state(ResistanceState::Low);
        let mut session = connect(smu, &ConnectOptions::default()).await.unwrap();
        let driver = session.driver_mut();

        driver
            .configure_source(SourceMode::Voltage, MeasureRange::Auto)
            .await
            .unwrap();
        driver
            .set_level(&SourceSetpoint::voltage(0.1, 1e-3))
            .await
            .unwrap();
        driver.enable_output(true).await.unwrap();
        let reading = driver.measure().await.unwrap();

        assert!((reading.source - 0.1).abs() < 1e-9, "{:?}", driver.family());
        assert!((reading.measured - 1e-4).abs() < 1e-12, "{:?}", driver.family());
        let ohms = resistance(SourceMode::Voltage, reading).unwrap();
        assert!((ohms - 1e3).abs() < 1e-6);
        assert_eq!(driver.compliance(), Some(1e-3));
    }
}

#[tokio::test]
async fn current_sourcing_reports_voltage_as_measured() {
    for smu in [SimulatedSmu::keithley_2400(), SimulatedSmu::keithley_2600()] {
        let handle = smu.handle();
        let mut session = connect(smu, &ConnectOptions::default()).await.unwrap();
        let driver = session.driver_mut();

        driver
            .configure_source(SourceMode::Current, MeasureRange::Fixed(2.0))
            .await
            .unwrap();
        driver
            .set_level(&SourceSetpoint::current(5e-6, 2.0))
            .await
            .unwrap();
        driver.enable_output(true).await.unwrap();
        let reading = driver.measure().await.unwrap();

        assert_eq!(handle.source_mode(), SourceMode::Current);
        assert!((reading.source - 5e-6).abs() < 1e-15);
        // 5 µA through 100 kΩ
        assert!((reading.measured - 0.5).abs() < 1e-9);
    }
}

#[tokio::test]
async fn compliance_is_reissued_only_when_it_changes() {
    let smu = SimulatedSmu::keithley_2400();
    let handle = smu.handle();
    let mut session = connect(smu, &ConnectOptions::default()).await.unwrap();
    let driver = session.driver_mut();
    driver
        .configure_source(SourceMode::Voltage, MeasureRange::Auto)
        .await
        .unwrap();

    for level in [0.1, 0.2, 0.3] {
        driver
            .set_level(&SourceSetpoint::voltage(level, 1e-3))
            .await
            .unwrap();
    }
    driver
        .set_level(&SourceSetpoint::voltage(0.4, 2e-3))
        .await
        .unwrap();

    let protections: Vec<_> = handle
        .commands()
        .into_iter()
        .filter(|c| c.starts_with(":SENS:CURR:PROT"))
        .collect();
    assert_eq!(protections, vec![":SENS:CURR:PROT 0.001", ":SENS:CURR:PROT 0.002"]);
}

#[tokio::test]
async fn out_of_range_level_is_rejected_before_sending() {
    let smu = SimulatedSmu::keithley_2400();
    let handle = smu.handle();
    let mut session = connect(smu, &ConnectOptions::default()).await.unwrap();
    let sent_before = handle.commands().len();

    let err = session
        .driver_mut()
        .set_level(&SourceSetpoint::voltage(500.0, 1e-3))
        .await
        .unwrap_err();

    assert_eq!(err.kind, InstrumentErrorKind::OutOfRange);
    assert_eq!(handle.commands().len(), sent_before);
}

#[tokio::test]
async fn setpoint_mode_must_match_configured_source() {
    let mut session = connect(SimulatedSmu::keithley_2600(), &ConnectOptions::default())
        .await
        .unwrap();
    let err = session
        .driver_mut()
        .set_level(&SourceSetpoint::current(1e-6, 1.0))
        .await
        .unwrap_err();
    assert_eq!(err.kind, InstrumentErrorKind::ProtocolError);
}

#[tokio::test]
async fn four_wire_routes_remote_sense_on_2400() {
    let smu = SimulatedSmu::keithley_2400();
    let handle = smu.handle();
    let mut session = connect(smu, &ConnectOptions::default()).await.unwrap();

    assert!(session.driver_mut().supports_remote_sense());
    session
        .driver_mut()
        .set_wire_mode(WireMode::FourWire)
        .await
        .unwrap();

    assert!(handle.remote_sense());
}

#[tokio::test]
async fn four_wire_is_unsupported_on_2600_adapter() {
    let mut session = connect(SimulatedSmu::keithley_2600(), &ConnectOptions::default())
        .await
        .unwrap();

    assert!(!session.driver_mut().supports_remote_sense());
    let err = session
        .driver_mut()
        .set_wire_mode(WireMode::FourWire)
        .await
        .unwrap_err();
    assert_eq!(err.kind, InstrumentErrorKind::Unsupported);
}

#[tokio::test(start_paused = true)]
async fn silent_instrument_times_out() {
    let smu = SimulatedSmu::keithley_2400().with_errors(ErrorConfig::scenario(
        ErrorScenario::Timeout {
            operation: "measure",
        },
    ));
    let options = ConnectOptions {
        timeout: Duration::from_millis(250),
        ..Default::default()
    };
    let mut session = connect(smu, &options).await.unwrap();
    let driver = session.driver_mut();
    driver.enable_output(true).await.unwrap();

    let err = driver.measure().await.unwrap_err();

    assert_eq!(err.kind, InstrumentErrorKind::Timeout);
    assert!(err.message.contains(":READ?"));
}

#[tokio::test]
async fn disconnect_turns_output_off() {
    let smu = SimulatedSmu::keithley_2600();
    let handle = smu.handle();
    let mut session = connect(smu, &ConnectOptions::default()).await.unwrap();
    let driver = session.driver_mut();
    driver
        .configure_source(SourceMode::Voltage, MeasureRange::Auto)
        .await
        .unwrap();
    driver
        .set_level(&SourceSetpoint::voltage(0.5, 1e-3))
        .await
        .unwrap();
    driver.enable_output(true).await.unwrap();
    assert!(handle.output_enabled());

    session.disconnect().await.unwrap();

    assert!(!handle.output_enabled());
    assert_eq!(handle.level(), 0.0);
}
