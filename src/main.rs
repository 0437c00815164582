use imget::{
    downloader,
    logging::init_logging,
    pb::{FancyProgress, ProgressPrinter},
    BarStyle, Config,
};

fn main() -> anyhow::Result<()> {
    let cfg = Config::build()?;
    init_logging(cfg.verbose);

    let download = match cfg.style {
        BarStyle::Classic => downloader::run(&cfg, &mut ProgressPrinter::stdout(cfg.delay()))?,
        BarStyle::Fancy => downloader::run(&cfg, &mut FancyProgress::new()?)?,
    };

    log::info!(
        "'{}' saved [{}]",
        download.path.display(),
        download.bytes
    );

    Ok(())
}
