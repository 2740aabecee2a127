mod common;

use anyhow::Result;
use vst2_host::ffi::effect_flags;
use vst2_host::persistence::{self, Bank, BankData, Preset, PresetData};
use vst2_host::{HostError, HostRegistry, PresetError, PresetFileInfo, PresetOptions};
use vst2_test_plugin::FakePluginConfig;

#[test]
fn parameter_preset_restores_values_and_name() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("lead.fxp");
    let registry = HostRegistry::default();
    let (plugin, _) = common::instantiate(&registry, FakePluginConfig::default())?;

    for (index, value) in [0.1f32, 0.2, 0.3, 0.4].into_iter().enumerate() {
        plugin.set_parameter(index, value)?;
    }
    plugin.set_program_name("Lead")?;
    persistence::save_preset(&plugin, &path)?;

    plugin.set_parameter(2, 0.9)?;
    plugin.set_program_name("Changed")?;
    persistence::load_preset(&plugin, &path, PresetOptions::default())?;

    assert_eq!(plugin.parameter(2)?, 0.3);
    assert_eq!(plugin.program_name(), "Lead");

    let preset = Preset::read(std::fs::File::open(&path)?)?;
    assert_eq!(preset.data, PresetData::Params(vec![0.1, 0.2, 0.3, 0.4]));
    assert_eq!(PresetFileInfo::read_from(&path)?, preset.info());
    Ok(())
}

#[test]
fn parameter_bank_covers_every_program() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("banks").join("all.fxb");
    let registry = HostRegistry::default();
    let (plugin, _) = common::instantiate(&registry, FakePluginConfig::default())?;

    for program in 0..3 {
        plugin.set_program(program)?;
        plugin.set_parameter(0, program as f32 / 4.0)?;
    }
    plugin.set_program(1)?;
    persistence::save_bank(&plugin, &path)?;
    assert_eq!(plugin.program(), 1);

    let bank = Bank::read(std::fs::File::open(&path)?)?;
    assert_eq!(bank.current_program, 1);
    let BankData::Programs(programs) = &bank.data else {
        panic!("expected a parameter bank");
    };
    assert_eq!(programs.len(), 3);
    assert_eq!(programs[2].name, "Program 3");

    let (fresh, _) = common::instantiate(&registry, FakePluginConfig::default())?;
    persistence::load_bank(&fresh, &path, PresetOptions::default())?;
    assert_eq!(fresh.program(), 1);
    // The test plug-in keeps a single parameter set, so the last program
    // written wins.
    assert_eq!(fresh.parameter(0)?, 0.5);
    Ok(())
}

#[test]
fn chunk_plugins_save_opaque_files() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let preset_path = dir.path().join("state.fxp");
    let bank_path = dir.path().join("state.fxb");
    let registry = HostRegistry::default();
    let config = FakePluginConfig {
        chunk: vec![9, 8, 7, 6],
        ..FakePluginConfig::default().with_flags(effect_flags::PROGRAM_CHUNKS)
    };
    let (plugin, _) = common::instantiate(&registry, config.clone())?;

    persistence::save_preset(&plugin, &preset_path)?;
    persistence::save_bank(&plugin, &bank_path)?;
    assert!(PresetFileInfo::read_from(&preset_path)?.opaque);
    let bank_info = PresetFileInfo::read_from(&bank_path)?;
    assert!(bank_info.opaque && bank_info.is_bank);

    let (other, _) = common::instantiate(
        &registry,
        FakePluginConfig {
            chunk: Vec::new(),
            ..config
        },
    )?;
    persistence::load_preset(&other, &preset_path, PresetOptions::default())?;
    assert_eq!(other.chunk(vst2_host::ChunkKind::Program)?, vec![9, 8, 7, 6]);
    Ok(())
}

#[test]
fn chunk_preset_needs_a_chunk_plugin() -> Result<()> {
    let registry = HostRegistry::default();
    let (plugin, _) = common::instantiate(&registry, FakePluginConfig::default())?;
    let preset = Preset {
        name: "Opaque".into(),
        unique_id: plugin.unique_id(),
        plugin_version: plugin.plugin_version(),
        data: PresetData::Chunk(vec![1, 2, 3]),
    };
    let err = persistence::apply_preset(&plugin, &preset, PresetOptions::default()).unwrap_err();
    assert!(matches!(err, HostError::Preset(PresetError::ChunkUnsupported)));
    Ok(())
}

#[test]
fn files_from_other_plugins_are_rejected() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("other.fxp");
    let registry = HostRegistry::default();
    let (source, _) = common::instantiate(
        &registry,
        FakePluginConfig {
            unique_id: i32::from_be_bytes(*b"Othr"),
            ..FakePluginConfig::default()
        },
    )?;
    persistence::save_preset(&source, &path)?;

    let (target, _) = common::instantiate(&registry, FakePluginConfig::default())?;
    let err = persistence::load_preset(&target, &path, PresetOptions::default()).unwrap_err();
    match err {
        HostError::Preset(PresetError::PluginMismatch { expected, found }) => {
            assert_eq!(expected, "TsT1");
            assert_eq!(found, "Othr");
        }
        other => panic!("unexpected error {other}"),
    }
    Ok(())
}

#[test]
fn plugin_version_is_checked_unless_ignored() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("old.fxp");
    let registry = HostRegistry::default();
    let (old, _) = common::instantiate(&registry, FakePluginConfig::default())?;
    old.set_parameter(0, 0.6)?;
    persistence::save_preset(&old, &path)?;

    let (new, _) = common::instantiate(
        &registry,
        FakePluginConfig {
            plugin_version: 2,
            ..FakePluginConfig::default()
        },
    )?;
    let err = persistence::load_preset(&new, &path, PresetOptions::default()).unwrap_err();
    assert!(matches!(
        err,
        HostError::Preset(PresetError::VersionMismatch { expected: 2, found: 1 })
    ));

    let options = PresetOptions {
        ignore_plugin_version: true,
    };
    persistence::load_preset(&new, &path, options)?;
    assert_eq!(new.parameter(0)?, 0.6);
    Ok(())
}

#[test]
fn text_dump_lists_parameters() -> Result<()> {
    let registry = HostRegistry::default();
    let (plugin, _) = common::instantiate(&registry, FakePluginConfig::default())?;
    plugin.set_parameter(3, 0.25)?;

    let mut text = Vec::new();
    persistence::write_preset_text(&plugin, &mut text)?;
    let text = String::from_utf8(text)?;

    assert!(text.starts_with("plugin: Test Plugin (TsT1)\n"));
    assert!(text.contains("program: Program 1\n"));
    assert_eq!(text.lines().count(), 3 + 4);
    let last = text.lines().last().expect("parameter line");
    assert!(last.contains("Param 3"));
    assert!(last.contains("0.250000"));
    assert!(last.trim_end().ends_with("25 %"));
    Ok(())
}
