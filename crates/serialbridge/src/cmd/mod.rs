use clap::{Args, Subcommand};

use crate::exit::CliResult;
use crate::output::OutputFormat;
use crate::params::ParamArgs;

pub mod mapping;
pub mod run;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Bridge the link to stdio until interrupted.
    Run(RunArgs),
    /// Build the topic table and print it.
    Mapping(MappingArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Run(args) => run::run(args, format),
        Command::Mapping(args) => mapping::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub params: ParamArgs,
    /// Exit after publishing N messages from the link.
    #[arg(long)]
    pub count: Option<u64>,
    /// Do not read host-to-serial messages from stdin.
    #[arg(long)]
    pub no_stdin: bool,
}

#[derive(Args, Debug)]
pub struct MappingArgs {
    #[command(flatten)]
    pub params: ParamArgs,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
