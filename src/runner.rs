//! Host-side autofocus ownership
//!
//! The search itself is stateless. Whoever embeds it owns "is a run active",
//! "when did the last run finish" and the cancellation handle of the active
//! run; [`AutofocusRunner`] is that owner.

use crate::errors::LensAfError;
use crate::focus::{
    run_search, CancellationToken, FrameSampler, ResultSink, SearchConfiguration, SearchResult,
    StepDriver,
};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Snapshot of runner state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub running: bool,
    pub last_run_at: Option<DateTime<Local>>,
}

#[derive(Debug, Default)]
struct RunnerInner {
    state: RunState,
    active: Option<CancellationToken>,
}

/// Single-lens autofocus owner. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct AutofocusRunner {
    inner: Arc<Mutex<RunnerInner>>,
}

/// Marks a run as active until dropped
#[derive(Debug)]
pub struct RunGuard {
    inner: Arc<Mutex<RunnerInner>>,
    token: CancellationToken,
}

fn lock(inner: &Mutex<RunnerInner>) -> MutexGuard<'_, RunnerInner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RunGuard {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Record the finish time of the run this guard covers
    pub fn finish(&self, at: DateTime<Local>) {
        lock(&self.inner).state.last_run_at = Some(at);
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let mut inner = lock(&self.inner);
        inner.state.running = false;
        inner.active = None;
    }
}

impl AutofocusRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> RunState {
        lock(&self.inner).state.clone()
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner).state.running
    }

    pub fn last_run_at(&self) -> Option<DateTime<Local>> {
        lock(&self.inner).state.last_run_at
    }

    /// Claim the lens for one run
    pub fn begin(&self) -> Result<RunGuard, LensAfError> {
        let mut inner = lock(&self.inner);
        if inner.state.running {
            return Err(LensAfError::AlreadyRunning);
        }
        let token = CancellationToken::new();
        inner.state.running = true;
        inner.active = Some(token.clone());
        Ok(RunGuard {
            inner: Arc::clone(&self.inner),
            token,
        })
    }

    /// Cancel the active run. Returns false when nothing was running.
    pub fn abort(&self) -> bool {
        match &lock(&self.inner).active {
            Some(token) => {
                log::info!("Cancelling autofocus...");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Run a search on the current thread
    pub fn run_blocking<D, S, R>(
        &self,
        config: &SearchConfiguration,
        driver: &mut D,
        sampler: &mut S,
        sink: &mut R,
    ) -> Result<SearchResult, LensAfError>
    where
        D: StepDriver + ?Sized,
        S: FrameSampler + ?Sized,
        R: ResultSink + ?Sized,
    {
        config.validate()?;
        let guard = self.begin()?;
        let result = run_search(config, guard.token(), driver, sampler, sink)?;
        guard.finish(result.finished_at);
        Ok(result)
    }

    /// Run a search on the blocking pool. The collaborators are moved into
    /// the task and dropped when it ends.
    ///
    /// The runner stays claimed until the task ends, even if this future is
    /// dropped first; [`abort`](Self::abort) still reaches such a run.
    pub async fn run<D, S, R>(
        &self,
        config: SearchConfiguration,
        mut driver: D,
        mut sampler: S,
        mut sink: R,
    ) -> Result<SearchResult, LensAfError>
    where
        D: StepDriver + Send + 'static,
        S: FrameSampler + Send + 'static,
        R: ResultSink + Send + 'static,
    {
        config.validate()?;
        let guard = self.begin()?;

        let task = tokio::task::spawn_blocking(move || {
            let result =
                run_search(&config, guard.token(), &mut driver, &mut sampler, &mut sink)?;
            guard.finish(result.finished_at);
            Ok::<_, LensAfError>(result)
        });
        task.await
            .map_err(|e| LensAfError::Detector(format!("autofocus task failed: {}", e)))?
    }
}
