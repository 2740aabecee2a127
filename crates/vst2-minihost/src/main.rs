use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;
use vst2_host::persistence;
use vst2_host::{HostConfig, HostRegistry, PluginCanDo, PresetFileInfo, PresetOptions, Vst2Plugin};

#[cfg(feature = "cpal")]
mod cpal_output;
#[cfg_attr(not(feature = "cpal"), allow(dead_code))]
mod play;
mod render;

use render::RenderSettings;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .try_init()
        .ok();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => HostConfig::load_from(path)
            .with_context(|| format!("failed to read host config {}", path.display()))?,
        None => HostConfig::load_or_default(),
    };
    let registry = HostRegistry::new(config);

    match cli.command {
        Commands::Info(args) => execute_info(&registry, args),
        Commands::Render(args) => execute_render(&registry, args),
        Commands::Random(args) => execute_random(&registry, args),
        Commands::Preset(args) => execute_preset(&registry, args),
        Commands::Play(args) => execute_play(&registry, args),
    }
}

#[derive(Parser)]
#[command(author, version, about = "Inspect and render VST 2.x plug-ins")]
struct Cli {
    /// Host configuration file (JSON). Defaults to the per-user config.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print plug-in metadata, parameters and programs.
    Info(InfoArgs),
    /// Play one note through the plug-in and write a WAV file.
    Render(RenderArgs),
    /// Play random notes through the plug-in and write a WAV file.
    Random(RandomArgs),
    /// Save, load or print presets.
    Preset(PresetArgs),
    /// Play one note through the plug-in on the default output device.
    Play(PlayArgs),
}

#[derive(Args)]
struct InfoArgs {
    plugin: PathBuf,
    /// Emit JSON instead of text.
    #[arg(long)]
    json: bool,
}

#[derive(Args, Clone)]
struct StreamArgs {
    #[arg(long, default_value_t = 44_100)]
    sample_rate: u32,
    #[arg(long, default_value_t = 512)]
    block_size: usize,
    /// Output WAV file.
    #[arg(long)]
    out: PathBuf,
}

#[derive(Args)]
struct RenderArgs {
    plugin: PathBuf,
    #[arg(long, default_value_t = 60)]
    note: u8,
    #[arg(long, default_value_t = 100)]
    velocity: u8,
    #[arg(long, default_value_t = 2.0)]
    seconds: f32,
    #[command(flatten)]
    stream: StreamArgs,
}

#[derive(Args)]
#[cfg_attr(not(feature = "cpal"), allow(dead_code))]
struct PlayArgs {
    plugin: PathBuf,
    #[arg(long, default_value_t = 60)]
    note: u8,
    #[arg(long, default_value_t = 100)]
    velocity: u8,
    #[arg(long, default_value_t = 2.0)]
    seconds: f32,
    #[arg(long, default_value_t = 44_100)]
    sample_rate: u32,
    #[arg(long, default_value_t = 512)]
    block_size: usize,
}

#[derive(Args)]
struct RandomArgs {
    plugin: PathBuf,
    #[arg(long, default_value_t = 8)]
    notes: usize,
    #[arg(long, default_value_t = 1)]
    seed: u64,
    #[command(flatten)]
    stream: StreamArgs,
}

#[derive(Args)]
struct PresetArgs {
    #[command(subcommand)]
    action: PresetAction,
}

#[derive(Subcommand)]
enum PresetAction {
    /// Write the current program (or every program with --bank).
    Save(PresetFileArgs),
    /// Apply a preset or bank file.
    Load(PresetLoadArgs),
    /// Print the current program as text, after applying `file` if given.
    Text { plugin: PathBuf, file: Option<PathBuf> },
}

#[derive(Args)]
struct PresetFileArgs {
    plugin: PathBuf,
    file: PathBuf,
    #[arg(long)]
    bank: bool,
}

#[derive(Args)]
struct PresetLoadArgs {
    #[command(flatten)]
    target: PresetFileArgs,
    /// Accept files written by another plug-in version.
    #[arg(long)]
    ignore_version: bool,
}

fn load(registry: &HostRegistry, path: &Path) -> Result<Vst2Plugin> {
    registry
        .load(path)
        .with_context(|| format!("failed to load plugin {}", path.display()))
}

#[derive(Serialize)]
struct PluginInfo {
    name: String,
    vendor: String,
    product: String,
    vendor_version: i32,
    unique_id: String,
    plugin_version: i32,
    vst_version: String,
    category: String,
    inputs: usize,
    outputs: usize,
    initial_delay: i32,
    flags: BTreeMap<&'static str, bool>,
    can_do: BTreeMap<&'static str, bool>,
    parameters: Vec<ParameterInfo>,
    programs: Vec<String>,
}

#[derive(Serialize)]
struct ParameterInfo {
    index: usize,
    name: String,
    label: String,
    display: String,
    value: f32,
}

fn collect_info(plugin: &Vst2Plugin) -> Result<PluginInfo> {
    let flags = BTreeMap::from([
        ("editor", plugin.has_editor()),
        ("replacing", plugin.can_replacing()),
        ("double_replacing", plugin.can_double_replacing()),
        ("synth", plugin.is_synth()),
        ("chunks", plugin.accepts_programs_as_chunks()),
        ("sound_in_stop", plugin.produces_sound_in_stop()),
    ]);
    let can_do = PluginCanDo::ALL
        .iter()
        .map(|capability| (capability.as_str(), plugin.can_do_capability(*capability)))
        .collect();

    let mut parameters = Vec::with_capacity(plugin.num_params());
    for index in 0..plugin.num_params() {
        parameters.push(ParameterInfo {
            index,
            name: plugin.parameter_name(index)?,
            label: plugin.parameter_label(index)?,
            display: plugin.parameter_display(index)?,
            value: plugin.parameter(index)?,
        });
    }
    let mut programs = Vec::with_capacity(plugin.num_programs());
    for index in 0..plugin.num_programs() {
        programs.push(plugin.program_name_indexed(index)?.unwrap_or_else(|| format!("#{index}")));
    }

    Ok(PluginInfo {
        name: plugin.effect_name(),
        vendor: plugin.vendor_name(),
        product: plugin.product_string(),
        vendor_version: plugin.vendor_version(),
        unique_id: plugin.unique_id_string(),
        plugin_version: plugin.plugin_version(),
        vst_version: plugin.vst_version().to_string(),
        category: format!("{:?}", plugin.category()),
        inputs: plugin.num_inputs(),
        outputs: plugin.num_outputs(),
        initial_delay: plugin.initial_delay(),
        flags,
        can_do,
        parameters,
        programs,
    })
}

fn execute_info(registry: &HostRegistry, args: InfoArgs) -> Result<()> {
    let plugin = load(registry, &args.plugin)?;
    let info = collect_info(&plugin)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    println!("{} by {} ({})", info.name, info.vendor, info.product);
    println!("  id {}  version {}  {}", info.unique_id, info.plugin_version, info.vst_version);
    println!("  category {}  io {}x{}  delay {}", info.category, info.inputs, info.outputs, info.initial_delay);
    let enabled: Vec<_> = info.flags.iter().filter(|(_, on)| **on).map(|(name, _)| *name).collect();
    println!("  flags: {}", enabled.join(", "));
    let supported: Vec<_> = info.can_do.iter().filter(|(_, on)| **on).map(|(name, _)| *name).collect();
    println!("  can do: {}", supported.join(", "));
    println!("Parameters ({}):", info.parameters.len());
    for param in &info.parameters {
        println!("  {:>4}  {:<24} {} {}", param.index, param.name, param.display, param.label);
    }
    println!("Programs ({}):", info.programs.len());
    for (index, name) in info.programs.iter().enumerate() {
        println!("  {index:>4}  {name}");
    }
    Ok(())
}

fn settings(stream: &StreamArgs, frames: usize) -> Result<RenderSettings> {
    if stream.sample_rate == 0 || stream.block_size == 0 {
        bail!("sample rate and block size must be positive");
    }
    Ok(RenderSettings {
        sample_rate: stream.sample_rate as f32,
        block_size: stream.block_size,
        frames,
    })
}

fn execute_render(registry: &HostRegistry, args: RenderArgs) -> Result<()> {
    if !(args.seconds > 0.0) {
        bail!("--seconds must be positive");
    }
    let frames = (args.seconds * args.stream.sample_rate as f32).round() as usize;
    let settings = settings(&args.stream, frames)?;
    let plugin = load(registry, &args.plugin)?;
    let messages = render::single_note(&settings, args.note.min(127), args.velocity.min(127));
    let rendered = render::render(&plugin, &settings, &messages)?;
    render::write_wav(&args.stream.out, args.stream.sample_rate, &rendered)?;
    println!("Rendered {frames} frames to {}", args.stream.out.display());
    Ok(())
}

fn execute_random(registry: &HostRegistry, args: RandomArgs) -> Result<()> {
    let frames = (args.notes + 1) * args.stream.sample_rate as usize;
    let settings = settings(&args.stream, frames)?;
    let plugin = load(registry, &args.plugin)?;
    let messages = render::random_notes(&settings, args.notes, args.seed);
    let rendered = render::render(&plugin, &settings, &messages)?;
    render::write_wav(&args.stream.out, args.stream.sample_rate, &rendered)?;
    println!("Rendered {} random notes to {}", args.notes, args.stream.out.display());
    Ok(())
}

#[cfg(feature = "cpal")]
fn execute_play(registry: &HostRegistry, args: PlayArgs) -> Result<()> {
    if !(args.seconds > 0.0) {
        bail!("--seconds must be positive");
    }
    if args.sample_rate == 0 || args.block_size == 0 {
        bail!("sample rate and block size must be positive");
    }
    let frames = (args.seconds * args.sample_rate as f32).round() as usize;
    let plugin = load(registry, &args.plugin)?;
    let note = play::LiveNote {
        note: args.note.min(127),
        velocity: args.velocity.min(127),
        release_at: frames * 3 / 4,
    };
    let player = play::LivePlayer::new(plugin, args.sample_rate as f32, args.block_size, note)?;
    cpal_output::play(player, args.sample_rate, args.block_size, frames)?;
    println!("Played {frames} frames");
    Ok(())
}

#[cfg(not(feature = "cpal"))]
fn execute_play(_registry: &HostRegistry, _args: PlayArgs) -> Result<()> {
    bail!("live playback needs vst2-minihost built with the `cpal` feature")
}

fn execute_preset(registry: &HostRegistry, args: PresetArgs) -> Result<()> {
    match args.action {
        PresetAction::Save(target) => {
            let plugin = load(registry, &target.plugin)?;
            if target.bank {
                persistence::save_bank(&plugin, &target.file)?;
            } else {
                persistence::save_preset(&plugin, &target.file)?;
            }
            println!("Saved {}", target.file.display());
        }
        PresetAction::Load(args) => {
            let plugin = load(registry, &args.target.plugin)?;
            let options = PresetOptions {
                ignore_plugin_version: args.ignore_version,
            };
            if args.target.bank {
                persistence::load_bank(&plugin, &args.target.file, options)?;
            } else {
                persistence::load_preset(&plugin, &args.target.file, options)?;
            }
            persistence::write_preset_text(&plugin, io::stdout().lock())?;
        }
        PresetAction::Text { plugin, file } => {
            let plugin = load(registry, &plugin)?;
            if let Some(file) = file {
                let info = PresetFileInfo::read_from(&file)
                    .with_context(|| format!("failed to read {}", file.display()))?;
                let options = PresetOptions {
                    ignore_plugin_version: true,
                };
                if info.is_bank {
                    persistence::load_bank(&plugin, &file, options)?;
                } else {
                    persistence::load_preset(&plugin, &file, options)?;
                }
            }
            persistence::write_preset_text(&plugin, io::stdout().lock())?;
        }
    }
    Ok(())
}
