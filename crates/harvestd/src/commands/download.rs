//! The `download` command: crawl the selected conferences and years.

use std::sync::Arc;

use harvest::{crawler::Crawler, sources::build_source};

use super::*;

/// Function for the [`Commands::Download`] in the CLI.
pub async fn download(config: &Config, args: &DownloadArgs) -> Result<()> {
  crawl_selection(config, &args.selection, &args.options).await
}

/// Crawls every selected conference.
///
/// A conference whose source cannot be constructed (unknown adapter, missing credential) is
/// reported and skipped so the other conferences still run; the first such error is returned at
/// the end so the exit status reflects it.
pub(crate) async fn crawl_selection(
  config: &Config,
  selection: &Selection,
  options: &DownloadOptions,
) -> Result<()> {
  let keys = selection.conferences(config)?;
  let config = options.apply(config)?;
  let mut first_error = None;

  for key in &keys {
    let conference = config.conference(key)?;
    let years = selection.years_for(conference);
    info!("{}", "=".repeat(60));
    info!("Downloading {} papers for years: {years:?}", conference.name);
    info!("{}", "=".repeat(60));

    let source = match build_source(key, &config, options.source_options()) {
      Ok(source) => source,
      Err(e) => {
        eprintln!("{} {}: {e}", style(ERROR_PREFIX).red(), style(&conference.name).bold());
        first_error.get_or_insert(e);
        continue;
      },
    };

    let crawler = Crawler::new(Arc::from(source), &config);
    let total = crawler.crawl(&years).await;
    println!(
      "{} {}: {} papers present under {}",
      style(SUCCESS_PREFIX).green(),
      style(&conference.name).bold(),
      style(total).cyan(),
      style(config.base_dir.join(&conference.dir_name).display()).yellow()
    );
  }

  match first_error {
    Some(e) => Err(e.into()),
    None => Ok(()),
  }
}
