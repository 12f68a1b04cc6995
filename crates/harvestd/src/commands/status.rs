//! The `status` command: what is downloaded and converted.

use super::*;

/// Number of `*.pdf` files in `dir`, or `None` if it does not exist.
fn count_pdfs(dir: &Path) -> Option<usize> {
  let entries = std::fs::read_dir(dir).ok()?;
  Some(
    entries
      .filter_map(|entry| entry.ok())
      .filter(|entry| entry.file_name().to_string_lossy().ends_with(".pdf"))
      .count(),
  )
}

/// Function for the [`Commands::Status`] in the CLI.
pub async fn status(config: &Config, args: &StatusArgs) -> Result<()> {
  let selection = &args.selection;
  let keys = match selection.conferences(config) {
    Err(HarvestdError::NoConference) => config.conference_keys(),
    other => other?,
  };
  let converter = Converter::new(config);

  println!("{}", "=".repeat(70));
  println!("Conference Papers Status ({})", style(config.base_dir.display()).yellow());
  println!("{}", "=".repeat(70));

  println!("\n{}", style("📥 Download Status").bold());
  println!("{}", "-".repeat(50));
  for key in &keys {
    let conference = config.conference(key)?;
    println!("\n{}:", style(&conference.name).bold());
    for year in selection.years_for(conference) {
      match count_pdfs(&config.year_dir(conference, year).join("papers")) {
        Some(count) => println!("  {year}: {} papers", style(count).cyan()),
        None => println!("  {year}: {}", style("(not downloaded)").dim()),
      }
    }
  }

  println!("\n{}", style("📄 Conversion Status").bold());
  println!("{}", "-".repeat(50));
  for key in &keys {
    let conference = config.conference(key)?;
    println!("\n{}:", style(&conference.name).bold());
    for year in converter.status(conference, &selection.years_for(conference)) {
      let (pdfs, markdown) = (year.pdf_count, year.markdown_count);
      if pdfs == 0 {
        println!("  {}: {}", year.year, style("(no PDFs)").dim());
      } else if year.remaining == 0 {
        println!("  {}: {markdown}/{pdfs} converted {}", year.year, style("✓").green());
      } else {
        println!("  {}: {markdown}/{pdfs} converted ({} remaining)", year.year, style(year.remaining).yellow());
      }
    }
  }

  let command = &converter.settings().command;
  println!("\n{}", style("🔧 Converter Status").bold());
  println!("{}", "-".repeat(50));
  if converter.check_available().await {
    println!("  {} {command} is installed", style(SUCCESS_PREFIX).green());
  } else {
    println!("  {} {command} is not installed", style(ERROR_PREFIX).red());
    println!("  {} Run `harvest convert --install-guide` for installation instructions", style(INFO_PREFIX).blue());
  }
  println!();
  Ok(())
}
