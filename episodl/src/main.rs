use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use episodl::cli::Args;
use episodl::logging::init_logging;
use episodl::{AppConfig, DownloadManager, Job, JobStatus, Orchestrator};
use episodl_engine::{HttpClient, ManifestCache, SegmentFetcher, StreamResolver};
use hls::ContentReference;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use mimalloc::MiMalloc;
use tracing::{error, info, warn};
use url::Url;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

const BAR_SCALE: u64 = 1000;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    if let Err(e) = init_logging(args.verbose, args.quiet) {
        eprintln!("Error: failed to initialize logging: {e:#}");
        return ExitCode::FAILURE;
    }

    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{e:#}");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Identifier of a URL given on the command line: its last path segment
/// without extension, or the host.
fn content_id(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
        .map(|last| last.rsplit_once('.').map_or(last, |(stem, _)| stem).to_string())
        .filter(|id| !id.is_empty())
        .or_else(|| url.host_str().map(str::to_string))
        .unwrap_or_else(|| "episode".to_string())
}

/// Returns whether every job finished `Done`.
async fn run(args: Args) -> anyhow::Result<bool> {
    let mut config = AppConfig::load(args.config.as_deref()).context("loading configuration")?;
    args.apply(&mut config);
    config.validate()?;

    let http = Arc::new(HttpClient::new(&config.http)?);
    let resolver = StreamResolver::new(http.clone())
        .with_cache(ManifestCache::new(config.cache_capacity, config.cache_ttl));
    let manager = Arc::new(DownloadManager::new(
        Orchestrator::new(resolver, SegmentFetcher::new(http)),
        config.concurrency,
    ));

    let mut jobs = Vec::new();
    for url in &args.urls {
        let id = content_id(url);
        let params = config.job_params(ContentReference::new(&id, url.clone()), &id);
        match manager.restore(params, args.priority) {
            Ok(job) => jobs.push(job),
            Err(e) => warn!(%url, "skipping: {e}"),
        }
    }
    info!(jobs = jobs.len(), concurrency = config.concurrency, "downloads queued");

    tokio::spawn({
        let manager = manager.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling downloads");
                manager.cancel_all();
            }
        }
    });

    let bars = MultiProgress::with_draw_target(ProgressDrawTarget::stdout());
    let watchers: Vec<_> = jobs
        .iter()
        .map(|job| tokio::spawn(watch_job(job.clone(), bars.add(progress_bar(job)))))
        .collect();
    futures::future::join_all(watchers).await;

    let mut all_done = true;
    for job in &jobs {
        match job.status() {
            JobStatus::Done => {}
            status => {
                all_done = false;
                match job.error() {
                    Some(e) => eprintln!("{}: {e}", job.params().title),
                    None => eprintln!("{}: {status}", job.params().title),
                }
            }
        }
    }
    Ok(all_done && !jobs.is_empty())
}

fn progress_bar(job: &Job) -> ProgressBar {
    let bar = ProgressBar::new(BAR_SCALE);
    let style = ProgressStyle::with_template("{prefix:.bold} [{bar:30}] {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");
    bar.set_style(style);
    bar.set_prefix(job.params().title.clone());
    bar.enable_steady_tick(Duration::from_millis(250));
    bar
}

async fn watch_job(job: Arc<Job>, bar: ProgressBar) {
    let mut rx = job.subscribe();
    loop {
        let progress = *rx.borrow_and_update();
        bar.set_message(progress.to_string());
        bar.set_position(progress.value.map_or(0, |v| (v * BAR_SCALE as f64) as u64));
        if progress.status.is_terminal() {
            break;
        }
        if rx.changed().await.is_err() {
            break;
        }
    }
    match job.status() {
        JobStatus::Done => bar.finish_with_message("done"),
        status => bar.abandon_with_message(status.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_id_from_url() {
        let id = |s: &str| content_id(&Url::parse(s).unwrap());
        assert_eq!(id("https://cdn.example/shows/s01e02.m3u8"), "s01e02");
        assert_eq!(id("https://media.example/services/ep-7/?format=json"), "ep-7");
        assert_eq!(id("https://media.example/"), "media.example");
    }
}
