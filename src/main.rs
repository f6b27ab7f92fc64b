use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use owo_colors::OwoColorize;
use parley::audio::output::AudioOutput;
use parley::audio::recorder::AudioSource;
use parley::audio::wav::WavAudioSource;
use parley::cli::{Cli, Commands, ConfigAction};
use parley::config::{Config, Credentials};
use parley::dialogue::create_backend;
use parley::pipeline::PipelineControl;
use parley::stt::create_transcriber;
use parley::tts::create_synthesizer;
use parley::{Pipeline, PipelineConfig, PipelineReport, VoiceBackends, logging};
use std::io::BufReader;
use std::sync::Arc;

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.quiet);

    match &cli.command {
        None => run_session(&cli),
        Some(Commands::Devices) => list_audio_devices(),
        Some(Commands::Config { action }) => handle_config_command(action, &cli),
        Some(Commands::Completions { shell }) => {
            clap_complete::generate(*shell, &mut Cli::command(), "parley", &mut std::io::stdout());
            Ok(())
        }
    }
}

/// Load configuration with the following priority:
/// 1. Command-line options
/// 2. Environment variables
/// 3. Config file (`--config`, else ~/.config/parley/config.toml)
/// 4. Built-in defaults
fn load_config(cli: &Cli) -> Result<Config> {
    let config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("cannot load config from {}", path.display()))?,
        None => Config::load_or_default(&Config::default_path())?,
    };
    let config = config.with_env_overrides()?.with_overrides(&cli.overrides());
    config.validate()?;
    Ok(config)
}

fn run_session(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    let credentials = Credentials::from_env()?;
    let timeout = config.pipeline.request_timeout();

    let dialogue = create_backend(&config.dialogue, &credentials, timeout)
        .context("cannot set up the dialogue backend")?;
    let pipeline = Pipeline::new(PipelineConfig::from_config(&config));
    spawn_interrupt_handler(pipeline.control())?;

    let handle = if cli.text {
        pipeline.start_text(
            Box::new(BufReader::new(std::io::stdin())),
            Box::new(std::io::stdout()),
            dialogue,
        )?
    } else {
        let transcriber = create_transcriber(&config.stt, &credentials, timeout)
            .context("cannot set up the transcriber")?;
        let synthesizer = create_synthesizer(&config.tts, &credentials, timeout)
            .context("cannot set up the synthesizer")?;
        let backends = VoiceBackends {
            source: open_source(cli, &config)?,
            transcriber,
            dialogue,
            synthesizer,
            output: open_output(&config)?,
        };
        if !cli.quiet {
            eprintln!("{} listening, press Ctrl-C to stop", "parley".green());
        }
        pipeline.start_voice(backends)?
    };

    handle.wait();
    let report = handle.stop();
    if !cli.quiet {
        print_summary(&report);
    }
    if report.fatal_errors > 0 {
        anyhow::bail!("session stopped after a fatal error, see the log above");
    }
    Ok(())
}

/// First Ctrl-C drains the pipeline, a second one exits immediately.
///
/// Runs on its own thread with a single-threaded runtime, so blocking HTTP
/// clients never run inside an async context.
fn spawn_interrupt_handler(control: Arc<PipelineControl>) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("cannot start the signal runtime")?;

    std::thread::spawn(move || {
        runtime.block_on(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "cannot listen for Ctrl-C");
                return;
            }
            tracing::info!("interrupted, finishing in-flight work");
            control.request_shutdown();

            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("parley: interrupted twice, exiting");
                std::process::exit(130);
            }
        });
    });
    Ok(())
}

fn open_source(cli: &Cli, config: &Config) -> Result<Box<dyn AudioSource>> {
    if let Some(path) = &cli.input_wav {
        let source = WavAudioSource::open(path, config.audio.sample_rate)
            .with_context(|| format!("cannot read {}", path.display()))?;
        return Ok(Box::new(source));
    }
    open_microphone(config)
}

#[cfg(feature = "cpal-audio")]
fn open_microphone(config: &Config) -> Result<Box<dyn AudioSource>> {
    let source = parley::audio::capture::CpalAudioSource::new(
        config.audio.input_device.as_deref(),
        config.audio.sample_rate,
    )?;
    Ok(Box::new(source))
}

#[cfg(not(feature = "cpal-audio"))]
fn open_microphone(_config: &Config) -> Result<Box<dyn AudioSource>> {
    anyhow::bail!("built without microphone support: rebuild with --features cpal-audio, or use --input-wav / --text")
}

#[cfg(feature = "cpal-audio")]
fn open_output(config: &Config) -> Result<Box<dyn AudioOutput>> {
    let output = parley::audio::output::CpalAudioOutput::new(config.audio.output_device.as_deref())?;
    Ok(Box::new(output))
}

#[cfg(not(feature = "cpal-audio"))]
fn open_output(_config: &Config) -> Result<Box<dyn AudioOutput>> {
    anyhow::bail!("built without speaker support: rebuild with --features cpal-audio, or use --text")
}

/// List available audio input and output devices.
#[cfg(feature = "cpal-audio")]
fn list_audio_devices() -> Result<()> {
    let inputs = parley::audio::capture::list_devices()?;
    let outputs = parley::audio::output::list_output_devices()?;

    println!("{}", "Input devices:".bold());
    if inputs.is_empty() {
        println!("  {}", "none".dimmed());
    }
    for (idx, device) in inputs.iter().enumerate() {
        println!("  [{idx}] {device}");
    }

    println!("{}", "Output devices:".bold());
    if outputs.is_empty() {
        println!("  {}", "none".dimmed());
    }
    for (idx, device) in outputs.iter().enumerate() {
        println!("  [{idx}] {device}");
    }
    Ok(())
}

#[cfg(not(feature = "cpal-audio"))]
fn list_audio_devices() -> Result<()> {
    anyhow::bail!("built without audio device support: rebuild with --features cpal-audio")
}

fn handle_config_command(action: &ConfigAction, cli: &Cli) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(cli)?;
            print!("{}", config.to_toml_string()?);
        }
        ConfigAction::Path => {
            let path = cli.config.clone().unwrap_or_else(Config::default_path);
            println!("{}", path.display());
        }
    }
    Ok(())
}

fn print_summary(report: &PipelineReport) {
    let turns = report.conversation.as_ref().map_or(0, |c| c.len());
    eprintln!(
        "{} {} exchanges, {} turns kept, {} interruptions, {} errors",
        "parley:".dimmed(),
        report.exchanges,
        turns,
        report.interruptions,
        report.recoverable_errors + report.fatal_errors,
    );
}
