use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::{CommandFactory, Parser, Subcommand, ValueHint};
use iocraft::prelude::*;
use picup::config::{self, Config, ConfigFile};
use picup::{Outcome, ProgressEvent, ReqwestTransport, Uploader, completion_fn};
use tokio::runtime::Runtime;
use tokio::sync::watch;
use url::Url;

use crate::ui::{ErrorMessage, ProgressBar, SuccessMessage};

mod ui;

#[derive(Parser)]
#[command(name = "picup")]
#[command(version)]
#[command(about = "Upload a picture and report its progress")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a picture
    Upload {
        #[arg(value_hint = ValueHint::FilePath)]
        file: PathBuf,
        /// Upload endpoint, overrides the configured one
        #[arg(short, long)]
        url: Option<Url>,
    },
    /// Store the upload endpoint in the config file
    Config {
        url: Url,
        /// Message reported for failures the server does not describe
        #[arg(long)]
        default_error_message: Option<String>,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start the tokio runtime")?;
    let _rt_guard = rt.enter();
    clap_complete::CompleteEnv::with_factory(Cli::command).complete();
    let cli = Cli::parse();

    match cli.command {
        Commands::Config {
            url,
            default_error_message,
        } => configure(url, default_error_message),
        Commands::Upload { file, url } => {
            let config = config::read_config(url)?;
            upload(&rt, config, file)
        }
    }
}

fn configure(upload_url: Url, default_error_message: Option<String>) -> Result<()> {
    let path = config::write_config(&ConfigFile {
        upload_url: Some(upload_url),
        default_error_message,
    })?;
    element!(SuccessMessage(message: format!("Configuration written to {}", path.display())))
        .print();
    Ok(())
}

/// Runs one upload, using the main thread as the designated context for every callback.
fn upload(rt: &Runtime, config: Config, file: PathBuf) -> Result<()> {
    if file.as_os_str().is_empty() {
        bail!("No file given");
    }

    let (dispatcher, mut context) = picup::context();
    let uploader = Uploader::new(
        config.upload_url,
        ReqwestTransport::new()?,
        dispatcher,
        rt.handle().clone(),
    )
    .with_default_message(config.default_error_message);

    let (progress_tx, progress_rx) = watch::channel(ProgressEvent::default());
    let (outcome_tx, outcome_rx) = watch::channel(None::<Outcome>);
    uploader.set_progress_listener(move |event: &ProgressEvent| {
        progress_tx.send_replace(*event);
    });
    uploader.set_completion_listener(completion_fn(move |outcome| {
        outcome_tx.send_replace(Some(outcome));
    }));

    let started = Instant::now();
    uploader.upload_picture(&file)?;

    let mut progress_bar = element!(ProgressBar(
        title: format!("Uploading {}", file.display()),
        progress: Some(progress_rx)
    ));

    rt.block_on(async {
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        let drive = async {
            loop {
                tokio::select! {
                    running = context.run_next() => {
                        if !running || outcome_rx.borrow().is_some() {
                            break;
                        }
                    }
                    _ = &mut ctrl_c => {
                        uploader.cancel();
                        break;
                    }
                }
            }
        };

        tokio::select! {
            _ = drive => Ok(()),
            result = progress_bar.render_loop() => {
                result.context("Failed to render upload progress")
            }
        }
    })?;

    let elapsed = Duration::from_millis(started.elapsed().as_millis() as u64);
    let outcome = outcome_rx.borrow().clone();
    match outcome {
        Some(Outcome::Success { url }) => {
            element!(SuccessMessage(message: format!(
                "Uploaded {} in {}: {}",
                file.display(),
                humantime::format_duration(elapsed),
                url
            )))
            .print();
            Ok(())
        }
        Some(Outcome::Failure { code, message }) => {
            element!(ErrorMessage(message: format!("Upload failed ({}): {}", code, message)))
                .print();
            bail!("Upload of {} failed with code {}", file.display(), code)
        }
        None => bail!("Upload of {} was cancelled", file.display()),
    }
}
