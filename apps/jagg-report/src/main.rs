use clap::Parser;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;

	let args = jagg_report::Args::parse();

	jagg_report::run(args).await
}
