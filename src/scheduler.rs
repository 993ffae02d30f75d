//! Job Scheduler
//!
//! Runs each bot job in its own tokio task on a fixed interval. Ticks that
//! fire while a run is still in progress are delayed, never stacked, so a
//! job never overlaps itself. A failed run is logged and the job waits for
//! its next tick. Jobs of different kinds run concurrently.

use futures_util::future::join_all;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::bot::Bot;

/// Boxed job run
pub type JobFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// The periodic jobs a bot runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    PostStatement,
    RefreshFollowParity,
    RefreshArchiveAndModel,
    PollInbound,
}

impl Job {
    pub const ALL: [Job; 4] = [
        Job::PostStatement,
        Job::RefreshFollowParity,
        Job::RefreshArchiveAndModel,
        Job::PollInbound,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PostStatement => "post_statement",
            Self::RefreshFollowParity => "refresh_follow_parity",
            Self::RefreshArchiveAndModel => "refresh_archive_and_model",
            Self::PollInbound => "poll_inbound",
        }
    }

    pub fn interval(&self, bot: &Bot) -> Duration {
        let config = bot.config();
        match self {
            Self::PostStatement => config.tweet_interval,
            Self::RefreshFollowParity => config.update_follows_interval,
            Self::RefreshArchiveAndModel => config.refresh_model_interval,
            Self::PollInbound => config.poll_interval,
        }
    }

    /// One run of this job against `bot`
    pub fn run(&self, bot: Arc<Bot>) -> JobFuture {
        match self {
            Self::PostStatement => Box::pin(async move { bot.post_statement().await }),
            Self::RefreshFollowParity => Box::pin(async move { bot.refresh_follow_parity().await }),
            Self::RefreshArchiveAndModel => {
                Box::pin(async move { bot.refresh_archive_and_model().await })
            }
            Self::PollInbound => Box::pin(async move { bot.poll_inbound().await }),
        }
    }
}

/// Run `job` once, logging a failure instead of propagating it
pub async fn run_job(job: Job, bot: Arc<Bot>) -> bool {
    debug!("Running {}", job.as_str());
    match job.run(bot).await {
        Ok(()) => true,
        Err(e) => {
            error!(job = job.as_str(), "Job failed: {:#}", e);
            false
        }
    }
}

pub struct Scheduler {
    bot: Arc<Bot>,
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(bot: Arc<Bot>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            bot,
            shutdown_tx,
            handles: Vec::new(),
        }
    }

    /// Spawn one loop per job; the first run of each happens one interval from now
    pub fn start(&mut self) {
        for job in Job::ALL {
            let period = job.interval(&self.bot);
            let bot = self.bot.clone();
            let shutdown = self.shutdown_tx.subscribe();
            self.handles
                .push(tokio::spawn(job_loop(job, period, bot, shutdown)));
            info!("Scheduled {} every {}s", job.as_str(), period.as_secs());
        }
    }

    /// Run every job once, in order
    pub async fn run_once(&self) {
        for job in Job::ALL {
            run_job(job, self.bot.clone()).await;
        }
    }

    /// Stop scheduling new runs and wait for in-flight runs to finish
    pub async fn shutdown(&mut self) {
        let _ = self.shutdown_tx.send(true);
        let handles = std::mem::take(&mut self.handles);
        join_all(handles).await;
        info!("Scheduler stopped ({})", self.bot.call_stats().format());
    }
}

async fn job_loop(job: Job, period: Duration, bot: Arc<Bot>, mut shutdown: watch::Receiver<bool>) {
    let period = period.max(Duration::from_millis(1));
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                run_job(job, bot.clone()).await;
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!("{} loop shutting down", job.as_str());
                    break;
                }
            }
        }
    }
}
