use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info_span, warn, Instrument};

use relay_core::metadata::shared;
use relay_core::{
    Metadata, PanicHandler, PanicReport, PanicSite, PipelineHook, SharedMetadata, Stage, StageError,
    StageOutcome, TraceId,
};

use crate::panic::panic_message;

type MetadataBuilder<E> = Arc<dyn Fn(&E) -> Metadata + Send + Sync>;

/// Fans one event out to independent stages.
///
/// Per run: build metadata, run pre-run hooks in order, run every stage
/// concurrently, wait for all of them, then run defer hooks in order. Panics in
/// any stage or hook are recovered, logged with the run's trace id, and handed
/// to the panic handler. Nothing is retried.
pub struct Pipeline<E> {
    name: String,
    builder: MetadataBuilder<E>,
    stages: Vec<Arc<dyn Stage<E>>>,
    pre_run: Vec<Arc<dyn PipelineHook<E>>>,
    defers: Vec<Arc<dyn PipelineHook<E>>>,
    panic_handler: Option<Arc<dyn PanicHandler<E>>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StageStatus {
    Ok,
    Skipped(String),
    Failed(String),
    Panicked(String),
    Cancelled,
}

#[derive(Clone, Debug)]
pub struct StageReport {
    pub name: String,
    pub status: StageStatus,
    pub elapsed: Duration,
}

/// Outcome of one pipeline run. Stage reports are in registration order.
#[derive(Clone, Debug)]
pub struct RunReport {
    pub trace_id: TraceId,
    pub stages: Vec<StageReport>,
    pub panics: Vec<PanicReport>,
    /// Metadata as the defer hooks saw it.
    pub metadata: Metadata,
    /// The metadata builder panicked; no stage or hook ran.
    pub aborted: bool,
}

impl RunReport {
    pub fn stage(&self, name: &str) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.name == name)
    }

    pub fn failures(&self) -> impl Iterator<Item = &StageReport> {
        self.stages
            .iter()
            .filter(|s| matches!(s.status, StageStatus::Failed(_) | StageStatus::Panicked(_)))
    }
}

impl<E: Send + Sync + 'static> Pipeline<E> {
    pub fn new(name: impl Into<String>, builder: impl Fn(&E) -> Metadata + Send + Sync + 'static) -> Self {
        Self {
            name: name.into(),
            builder: Arc::new(builder),
            stages: Vec::new(),
            pre_run: Vec::new(),
            defers: Vec::new(),
            panic_handler: None,
        }
    }

    pub fn register(&mut self, stage: Arc<dyn Stage<E>>) -> &mut Self {
        self.stages.push(stage);
        self
    }

    #[must_use]
    pub fn with_pre_run(mut self, hook: Arc<dyn PipelineHook<E>>) -> Self {
        self.pre_run.push(hook);
        self
    }

    #[must_use]
    pub fn with_defer(mut self, hook: Arc<dyn PipelineHook<E>>) -> Self {
        self.defers.push(hook);
        self
    }

    #[must_use]
    pub fn on_panic(mut self, handler: Arc<dyn PanicHandler<E>>) -> Self {
        self.panic_handler = Some(handler);
        self
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub async fn run(&self, event: Arc<E>, cancel: CancellationToken) -> RunReport {
        let builder = Arc::clone(&self.builder);
        let built = std::panic::catch_unwind(AssertUnwindSafe(|| builder(&event)));

        let meta = match built {
            Ok(meta) => meta,
            Err(panic) => {
                let trace_id = TraceId::new();
                let report = PanicReport {
                    trace_id: trace_id.clone(),
                    site: PanicSite::MetadataBuilder,
                    component: self.name.clone(),
                    message: panic_message(&panic),
                };
                error!(pipeline = %self.name, trace_id = %trace_id, panic = %report.message, "metadata builder panicked");
                self.notify_panic(&event, &report).await;
                return RunReport {
                    trace_id,
                    stages: Vec::new(),
                    panics: vec![report],
                    metadata: Metadata::default(),
                    aborted: true,
                };
            }
        };

        let trace_id = meta.trace_id.clone();
        let span = info_span!("pipeline.run", pipeline = %self.name, trace_id = %trace_id);
        self.run_built(event, shared(meta), trace_id, cancel)
            .instrument(span)
            .await
    }

    async fn run_built(
        &self,
        event: Arc<E>,
        meta: SharedMetadata,
        trace_id: TraceId,
        cancel: CancellationToken,
    ) -> RunReport {
        let mut panics = Vec::new();

        for hook in &self.pre_run {
            self.call_hook(hook, PanicSite::PreRunHook, &event, &meta, &trace_id, &mut panics)
                .await;
        }

        let names: Vec<String> = self.stages.iter().map(|s| s.name().to_string()).collect();
        let mut set = JoinSet::new();
        let mut tasks = HashMap::new();
        for (idx, stage) in self.stages.iter().enumerate() {
            let stage = Arc::clone(stage);
            let event = Arc::clone(&event);
            let meta = Arc::clone(&meta);
            let cancel = cancel.clone();
            let span = tracing::debug_span!("stage", stage = %names[idx]);
            let handle = set.spawn(
                async move { (idx, drive_stage(stage, event, meta, cancel).await) }.instrument(span),
            );
            let _ = tasks.insert(handle.id(), idx);
        }

        let mut reports: Vec<Option<StageReport>> = vec![None; self.stages.len()];
        while let Some(joined) = set.join_next().await {
            let (idx, report, panic) = match joined {
                Ok((idx, (report, panic))) => (idx, report, panic),
                // The task died outside its own barrier.
                Err(join_err) => {
                    let Some(idx) = tasks.get(&join_err.id()).copied() else {
                        error!(error = %join_err, "unknown stage task failed");
                        continue;
                    };
                    error!(stage = %names[idx], error = %join_err, "stage task failed");
                    let report = StageReport {
                        name: names[idx].clone(),
                        status: StageStatus::Failed(format!("stage task failed: {join_err}")),
                        elapsed: Duration::ZERO,
                    };
                    let panic = join_err
                        .try_into_panic()
                        .ok()
                        .map(|payload| (PanicSite::StageRun, panic_message(&payload)));
                    (idx, report, panic)
                }
            };
            if let Some((site, message)) = panic {
                let panic_report = PanicReport {
                    trace_id: trace_id.clone(),
                    site,
                    component: report.name.clone(),
                    message,
                };
                self.notify_panic(&event, &panic_report).await;
                panics.push(panic_report);
            }
            reports[idx] = Some(report);
        }

        for hook in &self.defers {
            self.call_hook(hook, PanicSite::DeferHook, &event, &meta, &trace_id, &mut panics)
                .await;
        }

        let stages: Vec<StageReport> = reports
            .into_iter()
            .zip(names)
            .map(|(r, name)| {
                r.unwrap_or_else(|| StageReport {
                    name,
                    status: StageStatus::Failed("stage task lost".into()),
                    elapsed: Duration::ZERO,
                })
            })
            .collect();

        let metadata = meta.lock().clone();
        debug!(
            stages = stages.len(),
            panics = panics.len(),
            skip_done = metadata.skip_done,
            "pipeline run finished"
        );

        RunReport {
            trace_id,
            stages,
            panics,
            metadata,
            aborted: false,
        }
    }

    async fn call_hook(
        &self,
        hook: &Arc<dyn PipelineHook<E>>,
        site: PanicSite,
        event: &Arc<E>,
        meta: &SharedMetadata,
        trace_id: &TraceId,
        panics: &mut Vec<PanicReport>,
    ) {
        let result = AssertUnwindSafe(hook.call(event, meta)).catch_unwind().await;
        if let Err(panic) = result {
            let report = PanicReport {
                trace_id: trace_id.clone(),
                site,
                component: hook.name().to_string(),
                message: panic_message(&panic),
            };
            error!(hook = %report.component, site = %report.site, panic = %report.message, "hook panicked");
            self.notify_panic(event, &report).await;
            panics.push(report);
        }
    }

    async fn notify_panic(&self, event: &E, report: &PanicReport) {
        let Some(handler) = &self.panic_handler else {
            return;
        };
        if let Err(panic) = AssertUnwindSafe(handler.on_panic(event, report)).catch_unwind().await {
            error!(trace_id = %report.trace_id, panic = %panic_message(&panic), "panic handler panicked");
        }
    }
}

/// Runs gate then action for one stage behind a single recovery barrier.
async fn drive_stage<E: Send + Sync + 'static>(
    stage: Arc<dyn Stage<E>>,
    event: Arc<E>,
    meta: SharedMetadata,
    cancel: CancellationToken,
) -> (StageReport, Option<(PanicSite, String)>) {
    let name = stage.name().to_string();
    let start = Instant::now();
    let mut site = PanicSite::StagePreRun;

    let result = AssertUnwindSafe(async {
        match stage.pre_run(&event, &meta, &cancel).await {
            StageOutcome::Ok => {}
            gate => return gate,
        }
        site = PanicSite::StageRun;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => StageOutcome::Fail(StageError::Cancelled),
            outcome = stage.run(&event, &meta, &cancel) => outcome,
        }
    })
    .catch_unwind()
    .await;

    let (status, panic) = match result {
        Ok(StageOutcome::Ok) => (StageStatus::Ok, None),
        Ok(StageOutcome::Skip(reason)) => {
            debug!(stage = %name, reason = %reason, "stage skipped");
            (StageStatus::Skipped(reason), None)
        }
        Ok(StageOutcome::Fail(StageError::Cancelled)) => {
            debug!(stage = %name, "stage cancelled");
            (StageStatus::Cancelled, None)
        }
        Ok(StageOutcome::Fail(e)) => {
            warn!(stage = %name, error = %e, "stage failed");
            (StageStatus::Failed(e.to_string()), None)
        }
        Err(panic) => {
            let message = panic_message(&panic);
            error!(stage = %name, site = %site, panic = %message, "stage panicked");
            (StageStatus::Panicked(message.clone()), Some((site, message)))
        }
    };

    let report = StageReport {
        name,
        status,
        elapsed: start.elapsed(),
    };
    (report, panic)
}
