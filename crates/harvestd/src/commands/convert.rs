//! The `convert` command: turn downloaded PDFs into Markdown.

use super::*;

/// Function for the [`Commands::Convert`] in the CLI.
pub async fn convert(config: &Config, args: &ConvertArgs) -> Result<()> {
  if args.install_guide {
    println!("{}", Converter::install_guide());
    return Ok(());
  }
  let converter = args.options.converter(config, args.workers);
  convert_selection(config, &args.selection, &converter, args.options.force).await
}

/// Converts every selected conference with `converter`.
pub(crate) async fn convert_selection(
  config: &Config,
  selection: &Selection,
  converter: &Converter,
  force: bool,
) -> Result<()> {
  let keys = selection.conferences(config)?;
  ensure_converter(converter).await?;

  let mut summary = ConversionSummary::default();
  for key in &keys {
    let conference = config.conference(key)?;
    let years = selection.years_for(conference);
    let converted = converter.convert_conference(conference, &years, force).await;
    summary.converted += converted.converted;
    summary.failed += converted.failed;
    summary.already_converted += converted.already_converted;
  }

  let attempted = summary.converted + summary.failed;
  let prefix = if summary.failed == 0 { style(SUCCESS_PREFIX).green() } else { style(WARNING_PREFIX).yellow() };
  println!(
    "{prefix} Conversion complete: {}/{attempted} files converted, {} already converted",
    style(summary.converted).cyan(),
    summary.already_converted
  );
  if summary.failed > 0 {
    warn!("{} conversions failed; rerun to retry them", summary.failed);
  }
  Ok(())
}
