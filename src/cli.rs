//! Command-line surface (C9): `-p/--port`, `-i/--io-threads`,
//! `-w/--worker-threads`, `-h/--help`.

use clap::Parser;

use crate::error::ServerError;

/// Maximum `--io-threads` the original's `MAX_THREADS` constant permits.
pub const MAX_IO_THREADS: usize = 16;
/// Maximum `--worker-threads`, per spec.md §6.
pub const MAX_WORKER_THREADS: usize = 32;

/// Multi-reactor TCP echo server.
#[derive(Debug, Parser)]
#[command(name = "reactord", version, about)]
pub struct Args {
    /// Port to listen on.
    #[arg(short, long, default_value_t = 8080)]
    pub port: u16,

    /// Number of I/O reactor threads.
    #[arg(short, long = "io-threads", default_value_t = 12)]
    pub io_threads: usize,

    /// Number of worker threads.
    #[arg(short, long = "worker-threads", default_value_t = 24)]
    pub worker_threads: usize,
}

impl Args {
    /// Parses `std::env::args()` and validates the documented maxima.
    pub fn parse_validated() -> Result<Self, ServerError> {
        let args = Args::parse();
        args.validate()?;
        Ok(args)
    }

    fn validate(&self) -> Result<(), ServerError> {
        if self.io_threads == 0 || self.io_threads > MAX_IO_THREADS {
            return Err(ServerError::Config(format!(
                "io-threads must be in 1..={MAX_IO_THREADS}, got {}",
                self.io_threads
            )));
        }
        if self.worker_threads == 0 || self.worker_threads > MAX_WORKER_THREADS {
            return Err(ServerError::Config(format!(
                "worker-threads must be in 1..={MAX_WORKER_THREADS}, got {}",
                self.worker_threads
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values_are_within_bounds() {
        let args = Args {
            port: 8080,
            io_threads: 12,
            worker_threads: 24,
        };
        assert!(args.validate().is_ok());
    }

    #[test]
    fn io_threads_over_the_maximum_is_rejected() {
        let args = Args {
            port: 8080,
            io_threads: MAX_IO_THREADS + 1,
            worker_threads: 24,
        };
        assert!(args.validate().is_err());
    }

    #[test]
    fn zero_worker_threads_is_rejected() {
        let args = Args {
            port: 8080,
            io_threads: 12,
            worker_threads: 0,
        };
        assert!(args.validate().is_err());
    }
}
