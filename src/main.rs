mod cli;

use dcim_converter::{
    config,
    logging,
    pipeline::Pipeline,
    projector::{ConsoleProjector, RecordingProjector},
};
use dcim_av::{FfprobeProber, Prober, ToolRegistry, FFMPEG, FFPROBE};

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Convert {
            source,
            output,
            quality,
            max_resolution,
            threads,
            timeout,
            overwrite,
        } => {
            let overrides = config::Overrides {
                source,
                output,
                quality,
                max_resolution: max_resolution.map(|cap| cap.0),
                threads,
                timeout_secs: timeout,
                overwrite,
                log_file: cli.log_file,
            };
            let config = prepare(cli.config.as_deref(), overrides)?;
            let _guard = init_logging(cli.verbose, &config)?;

            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(run_convert(config, cli.verbose))
        }
        Commands::Scan { source, json } => {
            let overrides = config::Overrides {
                source,
                log_file: cli.log_file,
                ..config::Overrides::default()
            };
            let config = prepare(cli.config.as_deref(), overrides)?;
            let _guard = init_logging(cli.verbose, &config)?;

            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(run_scan(config, json, cli.verbose))
        }
        Commands::Probe { file, json } => {
            logging::init_logging(cli.verbose, None)?;
            let config = config::load_config_or_default(cli.config.as_deref())?;
            probe_file(&file, &config, json)
        }
        Commands::CheckTools => {
            logging::init_logging(cli.verbose, None)?;
            let config = config::load_config_or_default(cli.config.as_deref())?;
            check_tools(&config)
        }
        Commands::Validate {
            config: config_path,
        } => {
            logging::init_logging(cli.verbose, None)?;
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("dcim-converter {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Load the config file and apply command-line overrides.
fn prepare(config_path: Option<&Path>, overrides: config::Overrides) -> Result<config::Config> {
    let mut config = config::load_config_or_default(config_path)?;
    overrides.apply(&mut config);
    Ok(config)
}

fn init_logging(
    verbose: bool,
    config: &config::Config,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let guard = logging::init_logging(verbose, config.logging.file.as_deref())?;
    for warning in config.validate() {
        tracing::warn!("{}", warning);
    }
    Ok(guard)
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_interrupt(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing running conversions");
            token.cancel();
        }
    });
}

fn discover_prober(tools: &ToolRegistry, config: &config::Config) -> Option<Arc<dyn Prober>> {
    match tools.get(FFPROBE) {
        Some(path) => Some(Arc::new(
            FfprobeProber::new(path.to_path_buf()).with_timeout(config.scan.probe_timeout()),
        )),
        None => {
            tracing::warn!("ffprobe not found; video metadata will be unknown");
            None
        }
    }
}

async fn run_convert(config: config::Config, verbose: bool) -> Result<()> {
    let tools = ToolRegistry::discover(&config.tools);
    let ffmpeg = tools
        .require(FFMPEG)
        .context("Cannot convert without ffmpeg")?
        .to_path_buf();

    let prober = discover_prober(&tools, &config);
    let mut pipeline = Pipeline::new(config).with_ffmpeg(ffmpeg);
    if let Some(prober) = prober {
        pipeline = pipeline.with_prober(prober);
    }

    let cancel = CancellationToken::new();
    cancel_on_interrupt(cancel.clone());

    let mut projector = ConsoleProjector::new(verbose);
    let summary = pipeline.convert(cancel, &mut projector).await?;

    if summary.dropped_discoveries > 0 {
        println!(
            "Warning: {} discovered files were dropped because the queue was full; run again to pick them up",
            summary.dropped_discoveries
        );
    }

    if !summary.is_clean() {
        anyhow::bail!(
            "{} conversions failed and {} timed out",
            summary.conversion.failed,
            summary.conversion.timed_out
        );
    }
    Ok(())
}

async fn run_scan(config: config::Config, json: bool, verbose: bool) -> Result<()> {
    let tools = ToolRegistry::discover(&config.tools);
    let prober = discover_prober(&tools, &config);
    let mut pipeline = Pipeline::new(config);
    if let Some(prober) = prober {
        pipeline = pipeline.with_prober(prober);
    }

    let cancel = CancellationToken::new();
    cancel_on_interrupt(cancel.clone());

    let (summary, files) = if json {
        // Events are not printed in JSON mode; stdout carries only the document.
        pipeline
            .scan(cancel, &mut RecordingProjector::default())
            .await?
    } else {
        pipeline
            .scan(cancel, &mut ConsoleProjector::new(verbose))
            .await?
    };

    if json {
        let doc = serde_json::json!({ "summary": summary, "files": files });
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    println!();
    for file in &files {
        println!(
            "{:>10.1} MB  {:<8} {}",
            file.size_mb(),
            file.format_label(),
            file.relative_path.display()
        );
    }
    let total_mb: f64 = files.iter().map(|f| f.size_mb()).sum();
    println!(
        "\n{} videos, {:.1} MB total ({} folders, {} unprobed large files)",
        files.len(),
        total_mb,
        summary.directories,
        summary.unprobed_large
    );
    Ok(())
}

fn probe_file(file: &Path, config: &config::Config, json: bool) -> Result<()> {
    if !file.exists() {
        anyhow::bail!("File does not exist: {:?}", file);
    }

    let tools = ToolRegistry::discover(&config.tools);
    let ffprobe = tools.require(FFPROBE)?;
    let info = FfprobeProber::new(ffprobe.to_path_buf())
        .with_timeout(config.scan.probe_timeout())
        .probe(file)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    println!("File: {}", file.display());
    println!("Format: {}", info.format.as_deref().unwrap_or("unknown"));
    println!("Codec: {}", info.codec.as_deref().unwrap_or("unknown"));
    match info.resolution() {
        Some(resolution) => println!("Resolution: {}", resolution),
        None => println!("Resolution: unknown"),
    }
    if let Some(duration) = info.duration {
        let secs = duration.as_secs();
        let mins = secs / 60;
        let hours = mins / 60;
        println!("Duration: {:02}:{:02}:{:02}", hours, mins % 60, secs % 60);
    }

    Ok(())
}

fn check_tools(config: &config::Config) -> Result<()> {
    println!("Checking external tools...\n");

    let tools = ToolRegistry::discover(&config.tools).check_all();
    let mut ffmpeg_ok = false;

    for tool in &tools {
        let status = if tool.available { "✓" } else { "✗" };
        if tool.available && tool.name == FFMPEG {
            ffmpeg_ok = true;
        }

        print!("{} {}", status, tool.name);
        if let Some(ref version) = tool.version {
            print!(" ({})", version);
        }
        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }
        println!();
    }

    println!();
    if ffmpeg_ok {
        println!("ffmpeg is available; conversions can run.");
    } else {
        println!("ffmpeg is missing. Install it from https://ffmpeg.org/download.html");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            config
        }
        None => {
            println!("No config file specified, using defaults");
            config::load_config_or_default(None)?
        }
    };

    println!("  Source: {}", config.paths.source.display());
    println!("  Output: {}", config.paths.output.display());
    println!("  Quality: {}", config.conversion.quality);
    match config.conversion.max_resolution {
        Some(cap) => println!("  Max resolution: {}", cap),
        None => println!("  Max resolution: original"),
    }
    println!("  Conversion workers: {}", config.conversion.workers);
    println!("  Timeout: {}s", config.conversion.timeout_secs);
    println!("  Extensions: {}", config.scan.extensions.join(", "));

    let warnings = config.validate();
    if !warnings.is_empty() {
        println!("\nWarnings:");
        for warning in warnings {
            println!("  - {}", warning);
        }
    }

    Ok(())
}
