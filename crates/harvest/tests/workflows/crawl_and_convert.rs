use std::sync::Arc;

use harvest::{
  convert::{ConversionSummary, Converter, YearStatus},
  crawler::{CrawlReport, Crawler},
  metadata::MetadataFormat,
  sources::NdssSource,
};

use super::*;

const LISTING: &str = r#"<html><body><ul>
  <li><a href="/wp-content/uploads/2024-3-paper.pdf">Measuring Login Walls at Scale</a></li>
  <li><a href="/wp-content/uploads/2024-9-paper.pdf">Paywalled Proceedings Considered Harmful</a></li>
  <li><a href="/wp-content/uploads/2024-3-slides.pdf">Measuring Login Walls at Scale (slides)</a></li>
</ul></body></html>"#;

const LOGIN_WALL: &str = "<!DOCTYPE html><html><body>Please sign in to continue</body></html>";

async fn ndss_server() -> mockito::ServerGuard {
  let mut server = mockito::Server::new_async().await;
  server.mock("GET", "/ndss2024/accepted-papers/").with_body(LISTING).create_async().await;
  server
    .mock("GET", "/wp-content/uploads/2024-3-paper.pdf")
    .with_header("content-type", "application/pdf")
    .with_body(pdf_body(80_000))
    .create_async()
    .await;
  server
    .mock("GET", "/wp-content/uploads/2024-9-paper.pdf")
    .with_header("content-type", "text/html")
    .with_body(LOGIN_WALL)
    .create_async()
    .await;
  server
}

fn crawler(config: &Config, base: &str) -> Crawler {
  let source = NdssSource::new(config.conference("ndss").unwrap().clone(), config).with_base_url(base);
  Crawler::new(Arc::new(source), config)
}

#[tokio::test]
async fn test_crawl_is_resumable() -> TestResult<()> {
  let server = ndss_server().await;
  let (config, dir) = test_config();
  let config = config.with_metadata_format(MetadataFormat::All);
  let crawler = crawler(&config, &server.url());

  let first = crawler.crawl_year_report(2024).await?;
  assert_eq!(first, CrawlReport { year: 2024, listed: 2, downloaded: 1, skipped: 0, failed: 1 });

  let year_dir = dir.path().join("NDSS/2024");
  assert!(year_dir.join("papers/Measuring Login Walls at Scale.pdf").is_file());
  assert!(!year_dir.join("papers/Paywalled Proceedings Considered Harmful.pdf").exists());
  assert!(!year_dir.join("papers/Paywalled Proceedings Considered Harmful.pdf.tmp").exists());
  for file in ["metadata.csv", "metadata.json", "metadata.txt"] {
    let content = std::fs::read_to_string(year_dir.join(file))?;
    assert!(content.contains("Paywalled Proceedings Considered Harmful"), "{file} lists every paper");
  }

  let second = crawler.crawl_year_report(2024).await?;
  assert_eq!(second, CrawlReport { year: 2024, listed: 2, downloaded: 0, skipped: 1, failed: 1 });
  Ok(())
}

#[tokio::test]
async fn test_missing_year_does_not_stop_crawl() {
  let server = ndss_server().await;
  let (config, dir) = test_config();
  let crawler = crawler(&config, &server.url());

  assert_eq!(crawler.crawl(&[2023, 2024]).await, 1);
  assert!(!dir.path().join("NDSS/2023/metadata.csv").exists());
  assert!(dir.path().join("NDSS/2024/metadata.csv").is_file());
}

#[cfg(unix)]
#[tokio::test]
async fn test_downloaded_papers_convert_to_markdown() -> TestResult<()> {
  let server = ndss_server().await;
  let (config, dir) = test_config();
  let config = config.with_conversion(fake_converter(dir.path()));
  crawler(&config, &server.url()).crawl_year_report(2024).await?;

  let converter = Converter::new(&config);
  assert!(converter.check_available().await);
  let ndss = config.conference("ndss")?;
  assert_eq!(converter.status(ndss, &[2024])[0], YearStatus {
    year:           2024,
    pdf_count:      1,
    markdown_count: 0,
    remaining:      1,
  });

  let summary = converter.convert_conference(ndss, &[2024], false).await;
  assert_eq!(summary, ConversionSummary { converted: 1, failed: 0, already_converted: 0 });
  let markdown = dir.path().join("NDSS/2024/markdown/Measuring Login Walls at Scale/auto");
  assert!(markdown.join("Measuring Login Walls at Scale.md").is_file());
  assert_eq!(converter.status(ndss, &[2024])[0].remaining, 0);

  let forced = converter.convert_conference(ndss, &[2024], true).await;
  assert_eq!(forced.converted, 1);
  Ok(())
}
