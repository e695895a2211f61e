// Vigil daemon entry point
//
// Owns process-level concerns only: logging setup, config loading, source
// and sink selection, signal handling, and the exit code. The first
// interrupt requests a clean drain; a second one forces the stop.

use std::path::PathBuf;

use vigil::capture::FrameSource;
use vigil::encode::SegmentEncoder;
use vigil::pipeline;
use vigil::Config;

struct CliArgs {
    config_path: Option<PathBuf>,
    synthetic: bool,
    write_config: bool,
}

fn parse_args() -> anyhow::Result<CliArgs> {
    let mut args = CliArgs {
        config_path: None,
        synthetic: false,
        write_config: false,
    };
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--synthetic" => args.synthetic = true,
            "--write-config" => args.write_config = true,
            "--help" | "-h" => {
                println!("usage: vigil [--synthetic] [--write-config] [CONFIG_PATH]");
                println!();
                println!("  --synthetic     record the built-in test pattern instead of a camera");
                println!("  --write-config  write the effective config to CONFIG_PATH and exit");
                std::process::exit(0);
            }
            flag if flag.starts_with('-') => {
                anyhow::bail!("unknown flag: {}", flag);
            }
            path => {
                if args.config_path.replace(PathBuf::from(path)).is_some() {
                    anyhow::bail!("at most one config path may be given");
                }
            }
        }
    }
    Ok(args)
}

fn build_source(config: &Config, synthetic: bool) -> anyhow::Result<Box<dyn FrameSource>> {
    if synthetic {
        return Ok(Box::new(vigil::SyntheticSource::new(
            config.frame_width,
            config.frame_height,
        )));
    }

    #[cfg(feature = "gstreamer")]
    {
        let source = vigil::capture::gst::GstCameraSource::open(
            config.camera_index,
            config.frame_width,
            config.frame_height,
            config.target_fps,
        )?;
        Ok(Box::new(source))
    }
    #[cfg(not(feature = "gstreamer"))]
    {
        anyhow::bail!(
            "camera capture requires the `gstreamer` feature; \
             rebuild with --features gstreamer or run with --synthetic"
        )
    }
}

fn build_encoder(config: &Config) -> Box<dyn SegmentEncoder> {
    #[cfg(feature = "gstreamer")]
    {
        let _ = config;
        Box::new(vigil::encode::gst::GstSegmentEncoder::new())
    }
    #[cfg(not(feature = "gstreamer"))]
    {
        Box::new(vigil::MjpegEncoder::new(config.jpeg_quality))
    }
}

/// Resolve on SIGINT or SIGTERM, whichever lands first.
async fn wait_for_interrupt() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = parse_args()?;
    let config = Config::load_or_default(args.config_path.as_deref());
    config.validate()?;

    if args.write_config {
        let path = args
            .config_path
            .ok_or_else(|| anyhow::anyhow!("--write-config needs a CONFIG_PATH"))?;
        config.save(&path)?;
        log::info!("wrote config to {}", path.display());
        return Ok(());
    }

    let source = build_source(&config, args.synthetic)?;
    let encoder = build_encoder(&config);

    let handle = pipeline::launch(&config, source, encoder)?;
    let coordinator = handle.coordinator();

    tokio::spawn(async move {
        wait_for_interrupt().await;
        log::info!("interrupt received, shutting down cleanly (interrupt again to force)");
        coordinator.begin_drain();

        wait_for_interrupt().await;
        log::warn!("second interrupt, forcing stop");
        coordinator.escalate();
    });

    let report = tokio::task::spawn_blocking(move || handle.wait()).await?;

    if let Some(reason) = report.fatal {
        log::error!("pipeline stopped on fatal error: {}", reason);
        std::process::exit(1);
    }
    Ok(())
}
