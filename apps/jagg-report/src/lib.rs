use std::{fs, path::PathBuf};

use clap::Parser;
use color_eyre::eyre;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use jagg_cli::OutputFormat;
use jagg_domain::{Across, IssueFilter, VelocityConfig};
use jagg_service::{AggService, AggregationRequest, ListRequest, PgStore};
use jagg_storage::db::Db;

/// Runs one aggregation, listing or bootstrap against the configured tenant schema.
#[derive(Debug, Parser)]
#[command(
	version = jagg_cli::VERSION,
	rename_all = "kebab",
	styles = jagg_cli::styles(),
)]
pub struct Args {
	#[arg(long, short = 'c', value_name = "FILE")]
	pub config: PathBuf,
	/// JSON issue filter.
	#[arg(long, short = 'f', value_name = "FILE", required_unless_present = "bootstrap")]
	pub filter: Option<PathBuf>,
	/// Distinct grouping values only.
	#[arg(long, conflicts_with = "stacks")]
	pub values_only: bool,
	/// Breaks every bucket down by this dimension.
	#[arg(long = "stack", value_name = "DIM")]
	pub stacks: Vec<Across>,
	/// JSON velocity stage configuration.
	#[arg(long, value_name = "FILE")]
	pub velocity: Option<PathBuf>,
	/// Lists the filtered issues instead of aggregating them.
	#[arg(long, conflicts_with_all = ["values_only", "stacks"])]
	pub list: bool,
	#[arg(long, default_value_t = 0, requires = "list")]
	pub page: u32,
	#[arg(long, requires = "list")]
	pub page_size: Option<u32>,
	/// Creates the reference tables before running.
	#[arg(long)]
	pub bootstrap: bool,
	#[arg(long, value_enum, default_value_t)]
	pub format: OutputFormat,
}

pub async fn run(args: Args) -> color_eyre::Result<()> {
	let config = jagg_config::load(&args.config)?;

	init_tracing(&config);

	let postgres = &config.storage.postgres;
	let db = Db::connect(postgres).await?;

	if args.bootstrap {
		db.ensure_schema(&postgres.schema).await?;

		tracing::info!(company = %postgres.schema, "Reference schema is ready.");
	}

	let Some(filter_path) = &args.filter else {
		return Ok(());
	};
	let filter = parse_filter(&fs::read_to_string(filter_path)?)?;
	let velocity = match &args.velocity {
		Some(path) => Some(serde_json::from_str::<VelocityConfig>(&fs::read_to_string(path)?)?),
		None => None,
	};
	let service =
		AggService::postgres(config.aggregation.clone(), PgStore::from_db(&db, postgres.schema.clone()));
	let output = if args.list {
		let request = ListRequest {
			filter,
			page: args.page,
			page_size: args.page_size,
			org_unit: None,
		};

		render(&service.list(&request).await?, args.format)?
	} else {
		let request = AggregationRequest {
			filter,
			values_only: args.values_only,
			velocity,
			org_unit: None,
		};
		let page = if args.stacks.is_empty() {
			service.group_by_and_calculate(&request).await?
		} else {
			service.stacked_group_by(&request, &args.stacks).await?
		};

		render(&page, args.format)?
	};

	println!("{output}");

	Ok(())
}

/// Parses a filter document and runs the structural checks an aggregation would run.
pub fn parse_filter(raw: &str) -> color_eyre::Result<IssueFilter> {
	let filter = serde_json::from_str::<IssueFilter>(raw)?;

	filter.validate_fields().map_err(|err| eyre::eyre!("Invalid filter: {err}"))?;

	Ok(filter)
}

pub fn render<T>(value: &T, format: OutputFormat) -> color_eyre::Result<String>
where
	T: Serialize,
{
	let rendered = match format {
		OutputFormat::Compact => serde_json::to_string(value)?,
		OutputFormat::Pretty => serde_json::to_string_pretty(value)?,
	};

	Ok(rendered)
}

fn init_tracing(config: &jagg_config::Config) {
	let filter =
		EnvFilter::try_new(&config.service.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

	tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}
