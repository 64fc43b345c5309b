use serialbridge_bridge::{link_from_parameters, load_table, BridgeConfig, DispatchTable, Parameters};
use serialbridge_frame::Transporter;
use tracing::warn;

use crate::cmd::MappingArgs;
use crate::exit::{bridge_error, frame_error, CliResult, SUCCESS};
use crate::output::{render_table, OutputFormat};

pub fn run(args: MappingArgs, format: OutputFormat) -> CliResult<i32> {
    let params = args.params.load()?;
    let config =
        BridgeConfig::from_parameters(&params).map_err(|err| bridge_error("invalid parameters", err))?;

    let (table, source) = build(&config, &params)?;
    println!("{}", render_table(&table, source, format));
    Ok(SUCCESS)
}

/// The static table needs no link; negotiation opens it for the exchange.
fn build(config: &BridgeConfig, params: &Parameters) -> CliResult<(DispatchTable, &'static str)> {
    if config.mapping_wait().is_none() {
        let table = DispatchTable::from_parameters(params)
            .map_err(|err| bridge_error("invalid topic table", err))?;
        return Ok((table, "static"));
    }

    let link = link_from_parameters(params).map_err(|err| bridge_error("invalid parameters", err))?;
    let mut transporter = Transporter::open(&link, config.frame_config())
        .map_err(|err| frame_error("link open failed", err))?;
    let table = load_table(&mut transporter, config, params);
    if let Err(err) = transporter.close() {
        warn!(error = %err, "failed to close link");
    }
    let table = table.map_err(|err| bridge_error("serial mapping failed", err))?;
    Ok((table, "negotiated"))
}
