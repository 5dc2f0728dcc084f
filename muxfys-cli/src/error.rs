//! CLI error handling with user-friendly messages.

use muxfys::MountError;
use std::fmt;
use std::process;

/// CLI-specific errors with actionable messages.
#[derive(Debug)]
pub enum CliError {
    /// Bad command-line arguments or environment discovery failure
    Config(String),
    /// Creating the filesystem failed
    Setup(MountError),
    /// Mounting failed
    Mount(MountError),
}

impl CliError {
    /// Print the error (and any extra help) and exit non-zero.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {self}");

        if let CliError::Mount(_) = self {
            eprintln!();
            eprintln!("Common issues:");
            eprintln!("  1. FUSE not installed: sudo apt install fuse (Linux)");
            eprintln!("  2. user_allow_other not set in /etc/fuse.conf");
            eprintln!("  3. Mountpoint in use: try: fusermount -u <mountpoint>");
        }

        process::exit(1)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(msg) => write!(f, "{msg}"),
            CliError::Setup(err) => write!(f, "could not configure the filesystem: {err}"),
            CliError::Mount(err) => write!(f, "could not mount: {err}"),
        }
    }
}
