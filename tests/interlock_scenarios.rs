//! End-to-end interlock behaviour of every source-capable wrapper, driven
//! through the mock transport.

use lab_instruments::instrument::{
    Afg3000, CurrentUnit, Kei2230g, Kei2600b, OutputState, VoltageUnit,
};
use lab_instruments::transport::mock::MockCall;
use lab_instruments::transport::{MockResourceManager, MockTransport, ResourceManager};
use lab_instruments::{InstrumentError, Rejection, SourceOutcome};

const SMU_ADDR: &str = "GPIB0::1::INSTR";

#[tokio::test]
async fn two_channel_smu_walkthrough() {
    let mock = MockTransport::new(SMU_ADDR);
    let mut smu = Kei2600b::new(mock.clone());

    // Source before arming: rejected, nothing on the bus.
    let outcome = smu.set_voltage(1, 5.0).await.unwrap();
    assert_eq!(outcome, SourceOutcome::Rejected(Rejection::LimitNotSet));
    assert!(mock.calls().is_empty());

    // Arm channel 1 only.
    smu.set_limit(1, 1.0, 1e-3).await.unwrap();
    assert_eq!(
        mock.writes(),
        vec!["smua.source.limitv = 1", "smua.source.limiti = 0.001"]
    );
    assert!(smu.interlock().is_armed(1).unwrap());
    assert!(!smu.interlock().is_armed(2).unwrap());

    // Armed channel sources.
    mock.clear_log();
    assert!(smu.set_voltage(1, 0.22).await.unwrap().is_applied());
    assert_eq!(
        mock.writes(),
        vec![
            "smua.source.func = smua.OUTPUT_DCVOLTS",
            "smua.source.levelv = 0.22",
            "display.smua.measure.func = display.MEASURE_DCAMPS",
        ]
    );

    // Channel 2 is still locked.
    mock.clear_log();
    assert!(smu.set_voltage(2, 0.22).await.unwrap().is_rejected());
    assert!(mock.writes().is_empty());
}

#[tokio::test]
async fn rejected_before_arming_on_every_channel() {
    let psu_mock = MockTransport::new("GPIB0::3::INSTR");
    let mut psu = Kei2230g::new(psu_mock.clone());
    for ch in 1..=3 {
        let voltage = psu.set_voltage(ch, 100.0, VoltageUnit::Millivolts);
        assert!(voltage.await.unwrap().is_rejected());
        let current = psu.set_current(ch, 10.0, CurrentUnit::Milliamps);
        assert!(current.await.unwrap().is_rejected());
    }
    assert!(psu_mock.writes().is_empty());

    let smu_mock = MockTransport::new(SMU_ADDR);
    let mut smu = Kei2600b::new(smu_mock.clone());
    for ch in 1..=2 {
        assert!(smu.set_voltage(ch, 0.1).await.unwrap().is_rejected());
        assert!(smu.set_current(ch, 1e-6).await.unwrap().is_rejected());
    }
    assert!(smu_mock.writes().is_empty());

    let afg_mock = MockTransport::new("GPIB0::11::INSTR");
    let mut afg = Afg3000::new(afg_mock.clone());
    for ch in 1..=2 {
        assert!(afg.set_output_vpp(ch, 1.0).await.unwrap().is_rejected());
        assert!(afg.set_output_offset(ch, 0.0).await.unwrap().is_rejected());
    }
    assert!(afg_mock.writes().is_empty());
}

#[tokio::test]
async fn output_state_never_gated() {
    let smu_mock = MockTransport::new(SMU_ADDR);
    let mut smu = Kei2600b::new(smu_mock.clone());
    let afg_mock = MockTransport::new("GPIB0::11::INSTR");
    let mut afg = Afg3000::new(afg_mock.clone());
    let psu_mock = MockTransport::new("GPIB0::3::INSTR");
    let mut psu = Kei2230g::new(psu_mock.clone());

    for ch in 1..=2 {
        smu.set_output_state(ch, OutputState::On).await.unwrap();
        afg.set_output_state(ch, OutputState::Off).await.unwrap();
    }
    psu.set_output_state(OutputState::On).await.unwrap();

    assert_eq!(smu_mock.writes().len(), 2);
    assert_eq!(afg_mock.writes(), vec!["OUTPUT1:STATE OFF", "OUTPUT2:STATE OFF"]);
    assert_eq!(psu_mock.writes(), vec!["OUTP ON"]);

    // Toggling output off does not re-lock an armed channel.
    smu.set_limit(1, 2.0, 0.01).await.unwrap();
    smu.set_output_state(1, OutputState::Off).await.unwrap();
    assert!(smu.set_voltage(1, 1.5).await.unwrap().is_applied());
}

#[tokio::test]
async fn arming_is_idempotent_and_permanent() {
    let mock = MockTransport::new("GPIB0::3::INSTR");
    let mut psu = Kei2230g::new(mock.clone());

    psu.set_voltage_limit(1, 5.0).await.unwrap();
    psu.set_voltage_limit(1, 3.3).await.unwrap();

    assert!(psu.interlock().is_armed(1).unwrap());
    assert_eq!(psu.interlock().limit(1).unwrap(), Some(&3.3));
    assert_eq!(psu.interlock().armed_channels().collect::<Vec<_>>(), vec![1]);
    for volts in [3.0, 1.2] {
        let outcome = psu.set_voltage(1, volts, VoltageUnit::Volts).await.unwrap();
        assert!(outcome.is_applied());
    }
}

#[tokio::test]
async fn out_of_range_channels_are_reported() {
    let mock = MockTransport::new(SMU_ADDR);
    let mut smu = Kei2600b::new(mock.clone());

    for ch in [0u8, 3] {
        match smu.set_limit(ch, 1.0, 1e-3).await {
            Err(InstrumentError::InvalidChannel {
                channel,
                channel_count,
            }) => {
                assert_eq!(channel, ch);
                assert_eq!(channel_count, 2);
            }
            other => panic!("expected InvalidChannel, got {:?}", other),
        }
        assert!(matches!(
            smu.set_voltage(ch, 0.1).await,
            Err(InstrumentError::InvalidChannel { .. })
        ));
    }

    let afg_mock = MockTransport::new("GPIB0::11::INSTR");
    let mut afg = Afg3000::new(afg_mock.clone());
    for ch in [0u8, 3] {
        assert!(matches!(
            afg.set_voltage_limit(ch, 0.0, 1.0).await,
            Err(InstrumentError::InvalidChannel { .. })
        ));
        assert!(matches!(
            afg.set_output_vpp(ch, 0.5).await,
            Err(InstrumentError::InvalidChannel { .. })
        ));
        assert!(matches!(
            afg.set_output_offset(ch, 0.0).await,
            Err(InstrumentError::InvalidChannel { .. })
        ));
    }

    // Arming a real channel does not open up the missing ones.
    afg.set_voltage_limit(1, -1.0, 1.0).await.unwrap();
    afg_mock.clear_log();
    assert!(matches!(
        afg.set_output_vpp(3, 0.5).await,
        Err(InstrumentError::InvalidChannel {
            channel: 3,
            channel_count: 2
        })
    ));

    assert!(mock.calls().is_empty());
    assert!(afg_mock.calls().is_empty());
}

#[tokio::test]
async fn transport_failure_propagates_without_retry() {
    let mock = MockTransport::new(SMU_ADDR);
    let mut smu = Kei2600b::new(mock.clone());
    smu.set_limit(1, 1.0, 1e-3).await.unwrap();
    mock.clear_log();

    mock.inject_next_failure();
    assert!(matches!(
        smu.set_voltage(1, 0.5).await,
        Err(InstrumentError::Transport(_))
    ));
    // The failed write was the first of the sequence; nothing was resent.
    assert!(mock.calls().is_empty());
}

#[tokio::test]
async fn wrappers_over_opened_resources() {
    let rm = MockResourceManager::new();
    let smu_mock = rm.add(SMU_ADDR);
    smu_mock.push_reply("*IDN?", "Keithley Instruments Inc., Model 2602B, 4417234, 3.2.2");
    smu_mock.push_reply("print(iReading)", "9.99e-05");
    smu_mock.push_reply("print(vReading)", "0.22");

    let transport = rm.open(SMU_ADDR).await.ok().unwrap();
    let mut smu = Kei2600b::open(transport).await.unwrap();
    assert_eq!(
        smu.identity(),
        Some("Keithley Instruments Inc., Model 2602B, 4417234, 3.2.2")
    );

    smu.set_limit(1, 1.0, 1e-3).await.unwrap();
    assert!(smu.set_voltage(1, 0.22).await.unwrap().is_applied());
    smu.set_output_state(1, OutputState::On).await.unwrap();
    let reading = smu.get_current_voltage(1).await.unwrap();
    assert_eq!(reading.voltage, 0.22);
    assert_eq!(reading.current, 9.99e-5);

    assert_eq!(smu_mock.calls()[0], MockCall::Query("*IDN?".into()));
    assert_eq!(smu_mock.writes().len(), 7);
}
