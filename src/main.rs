use anyhow::{Context, Result};
use log::{debug, info, warn};
use provider_bench::admin::{self, AdminContext};
use provider_bench::{BenchmarkRunner, Cli, Config, PromptTemplate, logging, report, scheduler};
use std::net::SocketAddr;
use std::sync::Arc;

fn main() -> Result<()> {
    let cli = Cli::parse_args();
    let config = Config::load(&cli.config)?;
    let flusher = Arc::new(logging::init(&config.log)?);

    println!("Provider Benchmark");
    println!("   Config: {}", cli.config.display());
    println!("   Providers: {}", config.selected_providers().join(", "));
    println!("   Probe timeout: {}s", config.benchmark.timeout);
    println!();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.runtime.worker_threads)
        .enable_all()
        .build()?;

    let result = runtime.block_on(async {
        tokio::spawn(Arc::clone(&flusher).run());
        run(config, cli.once).await
    });
    flusher.flush();
    result
}

async fn run(config: Config, once: bool) -> Result<()> {
    debug!("Initializing benchmark runner");
    let runner = BenchmarkRunner::new(&config)?;
    let prompt = PromptTemplate::new(config.benchmark.prompt.clone());

    if once {
        info!("Running a single benchmark");
        let run = runner
            .run_once(config.benchmark.timeout(), prompt.render())
            .await?;
        report::print_console_report(&run);
        return Ok(());
    }

    let mut serving = false;

    if let Some(ref admin_config) = config.admin
        && admin_config.enabled
    {
        let addr: SocketAddr = admin_config
            .listen
            .parse()
            .with_context(|| format!("invalid admin listen address: {}", admin_config.listen))?;

        let ctx = AdminContext {
            runner: runner.clone(),
            prompt: prompt.clone(),
            default_timeout: config.benchmark.timeout,
        };
        tokio::spawn(admin::start_server(addr, ctx));
        serving = true;
    }

    if let Some(ref schedule) = config.schedule
        && schedule.enabled
    {
        let timeout = schedule
            .timeout
            .map(std::time::Duration::from_secs)
            .unwrap_or_else(|| config.benchmark.timeout());
        tokio::spawn(scheduler::run_schedule(
            runner.clone(),
            prompt.clone(),
            schedule.interval()?,
            timeout,
        ));
        serving = true;
    }

    if !serving {
        anyhow::bail!("nothing to do: enable [admin] or [schedule], or pass --once");
    }

    tokio::signal::ctrl_c().await?;
    warn!("Interrupted, shutting down");
    Ok(())
}
