use super::*;

mod configuration;
mod crawl_and_convert;
