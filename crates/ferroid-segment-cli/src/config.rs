use core::time::Duration;
use std::path::PathBuf;

use anyhow::bail;
use clap::Parser;
use ferroid_segment::{AllocatorConfig, RetryPolicy, StepPolicy};

/// Runtime configuration for the `ferroid-segment` binary.
///
/// All values are parsed from CLI arguments or environment variables (a
/// `.env` file in the working directory is loaded first), with defaults
/// matching the library's.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "ferroid-segment",
    version,
    about = "Draw segment-allocated IDs from a SQLite allocation table"
)]
pub struct CliArgs {
    /// Path of the SQLite database holding the allocation table. Created if
    /// missing.
    ///
    /// Environment variable: `SEGMENT_DATABASE`
    #[arg(long, env = "SEGMENT_DATABASE", default_value = "segments.db")]
    pub database: PathBuf,

    /// How long a bump waits for another process holding the database write
    /// lock, in milliseconds.
    ///
    /// Environment variable: `SEGMENT_BUSY_TIMEOUT_MS`
    #[arg(long, env = "SEGMENT_BUSY_TIMEOUT_MS", default_value_t = 5000)]
    pub busy_timeout_ms: u64,

    /// List every tag with its current `max_id` instead of drawing IDs.
    #[arg(short, long, default_value_t = false, conflicts_with = "tag")]
    pub list: bool,

    /// Business tag to draw IDs for.
    ///
    /// Environment variable: `SEGMENT_TAG`
    #[arg(short, long, env = "SEGMENT_TAG")]
    pub tag: Option<String>,

    /// Number of IDs to draw.
    #[arg(short = 'n', long, default_value_t = 1)]
    pub count: usize,

    /// Range size fetched from the store per bump.
    ///
    /// Environment variable: `SEGMENT_STEP`
    #[arg(long, env = "SEGMENT_STEP", default_value_t = ferroid_segment::DEFAULT_STEP)]
    pub step: u64,

    /// Grow the step while ranges are consumed faster than `segment_ttl_secs`.
    ///
    /// Environment variable: `SEGMENT_ADAPTIVE`
    #[arg(long, env = "SEGMENT_ADAPTIVE", default_value_t = false)]
    pub adaptive: bool,

    /// Target lifetime of one segment under `--adaptive`, in seconds.
    #[arg(long, env = "SEGMENT_TTL_SECS", default_value_t = 900)]
    pub segment_ttl_secs: u64,

    /// Largest step `--adaptive` may reach.
    #[arg(long, env = "SEGMENT_MAX_STEP", default_value_t = ferroid_segment::DEFAULT_MAX_STEP)]
    pub max_step: u64,

    /// Remaining fraction of a segment that triggers the background refill.
    ///
    /// Environment variable: `SEGMENT_REFILL_THRESHOLD`
    #[arg(long, env = "SEGMENT_REFILL_THRESHOLD", default_value_t = 0.1)]
    pub refill_threshold: f64,

    /// Refill threads kept alive.
    #[arg(long, env = "SEGMENT_CORE_WORKERS", default_value_t = 2)]
    pub core_workers: usize,

    /// Upper bound on refill threads.
    #[arg(long, env = "SEGMENT_MAX_WORKERS", default_value_t = 8)]
    pub max_workers: usize,

    /// Attempts per ID before giving up on a pending or exhausted tag.
    #[arg(long, default_value_t = 100)]
    pub max_attempts: u32,

    /// Pause between attempts, in milliseconds.
    #[arg(long, default_value_t = 10)]
    pub backoff_ms: u64,
}

/// What the binary was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    List,
    Draw { tag: String, count: usize },
}

#[derive(Debug, Clone)]
pub struct CliConfig {
    pub database: PathBuf,
    pub busy_timeout: Duration,
    pub command: Command,
    pub allocator: AllocatorConfig,
    pub retry: RetryPolicy,
}

impl TryFrom<CliArgs> for CliConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let command = match (args.list, args.tag) {
            (true, _) => Command::List,
            (false, Some(tag)) => {
                if tag.is_empty() {
                    bail!("SEGMENT_TAG must not be empty");
                }
                if args.count == 0 {
                    bail!("--count must be greater than 0");
                }
                Command::Draw {
                    tag,
                    count: args.count,
                }
            }
            (false, None) => bail!("either --list or --tag is required"),
        };

        if args.max_attempts == 0 {
            bail!("--max-attempts must be greater than 0");
        }

        let step_policy = if args.adaptive {
            StepPolicy::Adaptive {
                segment_ttl: Duration::from_secs(args.segment_ttl_secs),
                max_step: args.max_step,
            }
        } else {
            StepPolicy::Fixed
        };

        let allocator = AllocatorConfig {
            default_step: args.step,
            step_policy,
            refill_threshold: args.refill_threshold,
            core_workers: args.core_workers,
            max_workers: args.max_workers,
            ..AllocatorConfig::default()
        };
        allocator.validate()?;

        Ok(Self {
            database: args.database,
            busy_timeout: Duration::from_millis(args.busy_timeout_ms),
            command,
            allocator,
            retry: RetryPolicy::new(args.max_attempts, Duration::from_millis(args.backoff_ms)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<CliConfig> {
        let argv = core::iter::once("ferroid-segment").chain(args.iter().copied());
        CliConfig::try_from(CliArgs::try_parse_from(argv)?)
    }

    #[test]
    fn draw_command() {
        let config = parse(&["--tag", "orders", "-n", "3", "--step", "50"]).unwrap();
        assert_eq!(
            config.command,
            Command::Draw {
                tag: "orders".to_string(),
                count: 3
            }
        );
        assert_eq!(config.allocator.default_step, 50);
        assert_eq!(config.allocator.step_policy, StepPolicy::Fixed);
    }

    #[test]
    fn list_command() {
        let config = parse(&["--list", "--database", "/tmp/x.db"]).unwrap();
        assert_eq!(config.command, Command::List);
        assert_eq!(config.database, PathBuf::from("/tmp/x.db"));
    }

    #[test]
    fn adaptive_policy() {
        let config = parse(&["--tag", "t", "--adaptive", "--max-step", "5000"]).unwrap();
        assert_eq!(
            config.allocator.step_policy,
            StepPolicy::Adaptive {
                segment_ttl: Duration::from_secs(900),
                max_step: 5000
            }
        );
    }

    #[test]
    fn rejects_invalid_input() {
        assert!(parse(&[]).is_err());
        assert!(parse(&["--tag", "t", "-n", "0"]).is_err());
        assert!(parse(&["--tag", "t", "--step", "0"]).is_err());
        assert!(parse(&["--tag", "t", "--refill-threshold", "1.5"]).is_err());
        assert!(parse(&["--list", "--tag", "t"]).is_err());
    }
}
