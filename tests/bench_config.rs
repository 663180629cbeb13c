//! The shipped bench configuration must stay loadable, and every section of
//! it must drive the part of the library it configures.

use lab_instruments::config::{InstrumentKind, LabConfig, DEFAULT_CONFIG_PATH};
use lab_instruments::discovery::{identify_configured, list_connected_instruments};
use lab_instruments::fpga::{FpgaLoader, FrontPanelCall, MockFrontPanel};
use lab_instruments::instrument::{Kei2230g, OutputState};
use lab_instruments::transport::{MockResourceManager, ResourceManager};

#[test]
fn shipped_config_loads_and_validates() {
    let config = LabConfig::load_from(DEFAULT_CONFIG_PATH).unwrap();
    config.validate().unwrap();

    assert_eq!(config.visa.timeout_ms, 5000);
    assert_eq!(config.enabled_instruments().len(), 3);
    assert_eq!(
        config.instrument("smu").map(|entry| entry.kind),
        Some(InstrumentKind::SourceMeter)
    );
    assert!(config.fpga.is_none());
}

#[tokio::test]
async fn configured_instruments_are_identified_in_order() {
    let config = LabConfig::load_from(DEFAULT_CONFIG_PATH).unwrap();
    let rm = MockResourceManager::new();
    for entry in &config.instruments {
        rm.add(&entry.resource)
            .push_reply("*IDN?", &format!("MOCK,{},0,1.0", entry.id));
    }

    let entries: Vec<_> = config.enabled_instruments().into_iter().cloned().collect();
    let found = identify_configured(&rm, &entries).await;
    let identities: Vec<_> = found
        .iter()
        .map(|instrument| instrument.identity.as_ref().unwrap().as_str())
        .collect();
    assert_eq!(
        identities,
        vec!["MOCK,psu,0,1.0", "MOCK,smu,0,1.0", "MOCK,afg,0,1.0"]
    );
}

#[tokio::test]
async fn instrument_usable_after_listing() {
    let config = LabConfig::load_from(DEFAULT_CONFIG_PATH).unwrap();
    let psu_entry = config.instrument("psu").unwrap();
    let rm = MockResourceManager::new();
    let psu_mock = rm.add(&psu_entry.resource);
    psu_mock.set_default_reply("Keithley instruments, 2230G-30-1, 9203020, 1.16-1.04");

    let listed = list_connected_instruments(&rm).await.unwrap();
    assert!(listed[0].identity.is_ok());

    let transport = rm.open(&psu_entry.resource).await.ok().unwrap();
    let mut psu = Kei2230g::open(transport).await.unwrap();
    psu.set_output_state(OutputState::On).await.unwrap();
    assert_eq!(psu_mock.writes(), vec!["OUTP ON"]);
}

#[tokio::test]
async fn fpga_section_drives_the_loader() {
    let dir = tempfile::tempdir().unwrap();
    let bitfile = dir.path().join("toplevel.bit");
    std::fs::write(&bitfile, b"bitstream").unwrap();
    let config_path = dir.path().join("lab.toml");
    std::fs::write(
        &config_path,
        format!(
            "[fpga]\nbitfile = {:?}\nserial = \"1234000ABC\"\n",
            bitfile.display().to_string()
        ),
    )
    .unwrap();

    let config = LabConfig::load_from(&config_path).unwrap();
    let settings = config.fpga.expect("fpga section");
    let device = MockFrontPanel::new();
    FpgaLoader::load_configured(device.clone(), &settings)
        .await
        .unwrap();

    assert_eq!(
        device.calls(),
        vec![
            FrontPanelCall::Open(Some("1234000ABC".to_string())),
            FrontPanelCall::Configure(bitfile),
        ]
    );
}
