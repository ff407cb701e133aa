use crate::infra::{CatalogFixture, InMemoryCatalog};
use campaign_engine::campaigns::{describe_rule, RuleSummary};
use campaign_engine::error::AppError;
use clap::Args;
use serde::Serialize;
use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;

#[derive(Args, Debug)]
pub(crate) struct ReportArgs {
    /// JSON catalogue fixture (defaults to the bundled demo catalogue)
    #[arg(long)]
    pub(crate) fixtures: Option<PathBuf>,
    /// Write the CSV to this file instead of stdout
    #[arg(long)]
    pub(crate) output: Option<PathBuf>,
}

/// One CSV row per campaign with its rules flattened to readable text.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub(crate) struct RequirementRow {
    pub(crate) campaign: String,
    pub(crate) slug: String,
    pub(crate) status: &'static str,
    pub(crate) segments: String,
    pub(crate) requirements: String,
    pub(crate) variables: String,
}

pub(crate) fn run_report(args: ReportArgs) -> Result<(), AppError> {
    let (catalog, _) = CatalogFixture::load(args.fixtures.as_deref())?.into_adapters();
    let rows = requirement_rows(&catalog);

    match args.output {
        Some(path) => {
            write_report(File::create(&path)?, &rows)?;
            println!("Wrote {} campaigns to {}", rows.len(), path.display());
        }
        None => write_report(io::stdout().lock(), &rows)?,
    }
    Ok(())
}

pub(crate) fn requirement_rows(catalog: &InMemoryCatalog) -> Vec<RequirementRow> {
    catalog
        .campaigns()
        .iter()
        .map(|campaign| {
            let summaries: Vec<RuleSummary> = catalog
                .rules_for(&campaign.id)
                .iter()
                .map(describe_rule)
                .collect();
            let mut variables: Vec<String> = Vec::new();
            for variable in summaries.iter().flat_map(|summary| summary.variables.iter()) {
                if !variables.contains(variable) {
                    variables.push(variable.clone());
                }
            }

            RequirementRow {
                campaign: campaign.name.clone(),
                slug: campaign.slug.clone(),
                status: campaign.status.label(),
                segments: catalog.segment_names(campaign).join(", "),
                requirements: summaries
                    .iter()
                    .map(|summary| summary.summary.as_str())
                    .collect::<Vec<_>>()
                    .join("; "),
                variables: variables.join(", "),
            }
        })
        .collect()
}

pub(crate) fn write_report<W: Write>(writer: W, rows: &[RequirementRow]) -> Result<(), io::Error> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    for row in rows {
        csv_writer.serialize(row).map_err(io::Error::from)?;
    }
    csv_writer.flush()
}
