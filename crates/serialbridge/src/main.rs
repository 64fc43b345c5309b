mod cmd;
mod exit;
mod host;
mod logging;
mod output;
mod params;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(
    name = "serialbridge",
    version,
    about = "Bridge a serial or UDP link to JSON lines on stdio"
)]
struct Cli {
    /// Output format for bridged messages and tables.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_with_overrides() {
        let cli = Cli::try_parse_from([
            "serialbridge",
            "run",
            "--params",
            "/etc/serialbridge.yaml",
            "--device",
            "/dev/ttyUSB0",
            "--dynamic-serial-mapping-ms",
            "-1",
            "--count",
            "3",
        ])
        .expect("run args should parse");

        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.params.device.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(args.params.dynamic_serial_mapping_ms, Some(-1));
        assert_eq!(args.count, Some(3));
    }

    #[test]
    fn parses_mapping_with_global_format() {
        let cli = Cli::try_parse_from(["serialbridge", "mapping", "--format", "table"])
            .expect("mapping args should parse");
        assert!(matches!(cli.command, Command::Mapping(_)));
        assert_eq!(cli.format, Some(OutputFormat::Table));
    }

    #[test]
    fn rejects_unknown_format() {
        let err = Cli::try_parse_from(["serialbridge", "--format", "raw", "version"])
            .expect_err("raw is not an output format");
        assert_eq!(err.kind(), clap::error::ErrorKind::InvalidValue);
    }
}
