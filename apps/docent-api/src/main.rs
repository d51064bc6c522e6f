use clap::Parser;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;

	let args = docent_api::Args::parse();

	docent_api::run(args).await
}
