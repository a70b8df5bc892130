use {
    anyhow::Result,
    clap::Parser,
    cloudex::{
        cli::{Cli, default_config_path},
        config::Config,
        run, setup_logger,
    },
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => default_config_path()?,
    };
    let config = Config::parse(&fs_err::read_to_string(&config_path)?)?;
    setup_logger(config.log_file.as_deref(), &config.log_filter)?;
    run(cli, config).await
}
