//! muxfys CLI - mount S3-like object stores as a local "filey" system.
//!
//! Targets given as full URLs are used as-is; bare `bucket/sub/path`
//! arguments are completed from the standard S3 environment (~/.s3cfg,
//! ~/.aws/*, AWS_* variables). The process stays in the foreground until
//! killed; SIGINT/SIGTERM unmount cleanly and upload anything written.

mod error;

use clap::{Parser, Subcommand};
use error::CliError;
use muxfys::{set_log_handler, Config, MuxFys, StderrSink, Target};
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(name = "muxfys", version, about = "Mount S3-like object stores as a filey system")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Mount one or more remote targets on a local directory
    Mount {
        /// Local directory to mount on (created if missing; must be empty)
        #[arg(short, long, default_value = "mnt")]
        mount: String,

        /// Target URL or bucket/sub/path; repeat to multiplex several
        /// targets onto the one mount point
        #[arg(short, long = "target", required = true)]
        targets: Vec<String>,

        /// Profile to use when reading the S3 config environment for
        /// bare bucket/path targets
        #[arg(short, long)]
        profile: Option<String>,

        /// Allow writes through the mount, via the first target
        #[arg(short, long)]
        write: bool,

        /// Cache object data on local disk
        #[arg(short, long)]
        cache: bool,

        /// Cache directory for the first target (implies --cache)
        #[arg(long)]
        cache_dir: Option<String>,

        /// Base directory for auto-created cache directories
        #[arg(long, default_value = "")]
        cache_base: String,

        /// Times to retry failed remote calls
        #[arg(short, long, default_value_t = 3)]
        retries: u32,

        /// Log every remote call to stderr
        #[arg(short, long)]
        verbose: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    match cli.command {
        Commands::Mount {
            mount,
            targets,
            profile,
            write,
            cache,
            cache_dir,
            cache_base,
            retries,
            verbose,
        } => {
            if let Err(err) = run_mount(
                mount, targets, profile, write, cache, cache_dir, cache_base, retries, verbose,
            ) {
                err.exit();
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_mount(
    mount: String,
    target_args: Vec<String>,
    profile: Option<String>,
    write: bool,
    cache: bool,
    cache_dir: Option<String>,
    cache_base: String,
    retries: u32,
    verbose: bool,
) -> Result<(), CliError> {
    let mut targets = Vec::new();
    for (i, arg) in target_args.iter().enumerate() {
        let mut target = Target {
            cache_data: cache,
            ..Default::default()
        };
        if arg.contains("://") {
            // full URL given; credentials come from the environment only
            target.target = arg.clone();
            target.access_key = std::env::var("AWS_ACCESS_KEY_ID").unwrap_or_default();
            target.secret_key = std::env::var("AWS_SECRET_ACCESS_KEY").unwrap_or_default();
            target.region = std::env::var("AWS_DEFAULT_REGION").unwrap_or_default();
        } else {
            target
                .read_environment(profile.as_deref().unwrap_or(""), arg)
                .map_err(|err| CliError::Config(format!("bad target [{arg}]: {err}")))?;
        }
        if i == 0 {
            target.write = write;
            if let Some(dir) = &cache_dir {
                target.cache_dir = dir.clone();
            }
        }
        targets.push(target);
    }

    if verbose {
        set_log_handler(Arc::new(StderrSink));
    } else {
        // without --verbose, errors still surface through tracing so
        // RUST_LOG works as usual
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("error")),
            )
            .with_writer(std::io::stderr)
            .init();
        set_log_handler(Arc::new(muxfys::TracingSink));
    }

    let config = Config {
        mount,
        retries,
        cache_base,
        verbose,
        targets,
    };

    let fs = MuxFys::new(&config).map_err(CliError::Setup)?;
    fs.mount().map_err(CliError::Mount)?;
    fs.unmount_on_death();

    // stay in the foreground; the signal handler unmounts and exits
    loop {
        std::thread::park();
    }
}
