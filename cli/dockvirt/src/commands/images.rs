//! `dockvirt images`.

use std::collections::BTreeSet;

use anyhow::Result;
use clap::Args;
use dockvirt_provision::image::cache_file_name;
use dockvirt_provision::OsFamily;
use serde::Serialize;
use tabled::Tabled;

use crate::output::{print_output, OutputFormat};

use super::CommandContext;

#[derive(Debug, Args)]
pub struct ImagesCommand {}

#[derive(Debug, Serialize, Tabled)]
struct ImageRow {
    #[tabled(rename = "OS")]
    os: String,

    #[tabled(rename = "Variant")]
    variant: String,

    #[tabled(rename = "Family")]
    family: String,

    #[tabled(rename = "Cached")]
    cached: bool,

    #[tabled(rename = "Source")]
    source: String,
}

impl ImagesCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let controller = ctx.controller();
        let cached: BTreeSet<String> = controller
            .resolver()
            .list_cached()?
            .iter()
            .filter_map(|p| p.file_name()?.to_str().map(str::to_string))
            .collect();

        let rows: Vec<ImageRow> = ctx
            .config
            .catalog
            .iter()
            .map(|(os, spec)| ImageRow {
                os: os.clone(),
                variant: spec.variant.clone(),
                family: OsFamily::detect(os).as_str().to_string(),
                cached: cache_file_name(&spec.url)
                    .map(|file| cached.contains(&file))
                    .unwrap_or(false),
                source: spec.url.clone(),
            })
            .collect();

        print_output(&rows, ctx.format);
        Ok(())
    }
}
