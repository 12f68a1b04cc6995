//! The `run` command: download, then convert.

use super::{convert::convert_selection, download::crawl_selection, *};

/// Function for the [`Commands::Run`] in the CLI.
///
/// Conversion only starts when the download step succeeded as a whole.
pub async fn run_all(config: &Config, args: &RunArgs) -> Result<()> {
  crawl_selection(config, &args.selection, &args.download).await?;
  let converter = args.convert.converter(config, None);
  convert_selection(config, &args.selection, &converter, args.convert.force).await
}
