use harvest::{config::MAX_CONVERT_PDF_SIZE, metadata::MetadataFormat};

use super::*;

#[test]
fn test_example_config_parses() -> TestResult<()> {
  let config = Config::load("config/harvest.toml")?;
  assert_eq!(config.workers, 5);
  assert_eq!(config.metadata_format, MetadataFormat::Csv);
  assert_eq!(config.max_pdf_size, MAX_CONVERT_PDF_SIZE);
  assert_eq!(config.conversion.env.get("PYTHONIOENCODING").map(String::as_str), Some("utf-8"));

  let acm = config.conference("acm_ccs")?;
  assert_eq!(acm.years, vec![2024, 2023]);
  assert_eq!(acm.cookie_file.as_deref(), Some(Path::new("cookies/acm_cookies.json")));
  assert_eq!(acm.proceeding(2022), Some("10.1145/3548606"));

  let ieee = config.conference("ieee_sp")?;
  assert_eq!(ieee.proceeding(2026), Some("11023456"));
  assert_eq!(ieee.proceeding(2020), Some("9144328"));

  let raid = config.conference("raid")?;
  assert_eq!(raid.dir_name, "RAID");
  assert_eq!(config.conference_keys(), vec!["acm_ccs", "ieee_sp", "ndss", "raid", "usenix"]);
  Ok(())
}

#[test]
fn test_saved_config_reloads() -> TestResult<()> {
  let (config, dir) = test_config();
  let path = dir.path().join("config.toml");
  config.save(&path)?;
  assert_eq!(Config::load(&path)?, config);
  Ok(())
}
