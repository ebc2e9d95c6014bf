//! Command line arguments for the surveillance daemon.

use std::path::PathBuf;

use clap::Parser;

/// Maximum number of `-c`/`--config-file` flags accepted on one invocation.
const MAX_CONFIG_FILES: usize = 10;

/// Watch configured directories and run a shell action on every file that goes quiescent.
#[derive(Parser, Debug)]
#[command(name = "surveild", version, about = "Filesystem surveillance daemon")]
pub struct CliArgs {
    /// Send SIGTERM to the running daemon's process group and exit.
    #[arg(long)]
    pub kill: bool,

    /// Logging verbosity, 0 (quiet) through 7 (trace); seeds the default filter when `RUST_LOG`
    /// is unset.
    #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u8).range(0..=7))]
    pub debug_level: u8,

    /// Additional configuration file to load, in addition to the standard chain. May be given up
    /// to 10 times; later files override earlier ones.
    #[arg(short = 'c', long = "config-file", value_name = "FILE")]
    pub config_files: Vec<PathBuf>,

    /// Root directories to watch, in addition to any configured via `[[watch]]` entries.
    pub paths: Vec<PathBuf>,
}

impl CliArgs {
    pub fn parse_validated() -> anyhow::Result<Self> {
        let args = Self::parse();
        if args.config_files.len() > MAX_CONFIG_FILES {
            anyhow::bail!("at most {MAX_CONFIG_FILES} -c/--config-file flags are accepted, got {}", args.config_files.len());
        }
        Ok(args)
    }

    /// `tracing_subscriber::EnvFilter` directive implied by `--debug-level` when `RUST_LOG` is
    /// unset, following `syslog`-style severity ordering (0 = off, 7 = trace).
    pub fn default_filter_directive(&self) -> &'static str {
        match self.debug_level {
            0 => "off",
            1 => "error",
            2 => "warn",
            3 => "info",
            4 | 5 => "debug",
            _ => "trace",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_level_maps_to_filter_directive() {
        let mut args = CliArgs { kill: false, debug_level: 0, config_files: Vec::new(), paths: Vec::new() };
        assert_eq!(args.default_filter_directive(), "off");
        args.debug_level = 3;
        assert_eq!(args.default_filter_directive(), "info");
        args.debug_level = 7;
        assert_eq!(args.default_filter_directive(), "trace");
    }
}
