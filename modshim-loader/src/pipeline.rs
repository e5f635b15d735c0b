//! The load pipeline.
//!
//! This module implements [`LoadPipeline`], which turns a set of discovered
//! mods into one [`LoadOutcome`] per mod:
//!
//! - Dependency resolution runs once, synchronously, before any binary is read
//! - Each eligible binary is read, scanned, classified and rewritten on a
//!   blocking worker, bounded by the configured worker count
//! - Results are consumed strictly in resolved order, so a dependent is never
//!   activated before its dependencies
//! - The run can be cancelled between mods; the rest are listed as skipped
//!
//! # Architecture
//!
//! Inspection does not depend on other mods, so it is started speculatively
//! for every eligible mod as soon as resolution finishes. Only the consumer
//! loop looks at outcomes of earlier mods: if a required dependency did not
//! load, the dependent's inspection is aborted and discarded, and its state
//! trail never reaches `Scanned`.

use chrono::Utc;
use modshim_compat::{
    classify, resolve, rewrite, scan_bytes, AggregateVerdict, CompatData, Resolution, Verdict,
};
use modshim_runtime::{
    BinaryLoader, DiscoveredMod, FailReason, PluginBinary, PluginManifest, RejectedFolder,
    WarningSet,
};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::host::PluginHost;
use crate::outcome::{
    Diagnostic, DiagnosticKind, LoadOutcome, LoadReport, LoadedPlugin, PluginReport,
};
use crate::source::{BinaryHandle, Candidate};
use crate::state::{LoadState, StateTrail};

// ============================================================================
// Options and Cancellation
// ============================================================================

/// Tuning for one pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Maximum number of binaries inspected at once.
    pub workers: usize,
    /// Write rewritten binaries here as `<id>.mbc`.
    pub rewrite_cache_dir: Option<PathBuf>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            rewrite_cache_dir: None,
        }
    }
}

/// Requests cancellation of a running pipeline.
///
/// The flag is sticky: once cancelled, every later run of the same pipeline
/// stops before its first mod.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

// ============================================================================
// Inspection
// ============================================================================

/// Result of the blocking part of the pipeline for one mod.
enum Inspection {
    Ready {
        binary: PluginBinary,
        rewritten: bool,
        warnings: WarningSet,
        rewrite_lines: Vec<String>,
    },
    Failed {
        reason: FailReason,
        detail: String,
        symbol: Option<String>,
        /// States reached before the failure.
        reached: Vec<LoadState>,
    },
}

impl Inspection {
    fn failed(reason: FailReason, detail: impl Into<String>, reached: &[LoadState]) -> Self {
        Inspection::Failed {
            reason,
            detail: detail.into(),
            symbol: None,
            reached: reached.to_vec(),
        }
    }
}

/// Read, scan, classify and rewrite one binary. Blocking.
fn inspect(handle: &dyn BinaryHandle, data: &CompatData) -> Inspection {
    let bytes = match handle.read() {
        Ok(bytes) => bytes,
        Err(e) => {
            return Inspection::failed(
                FailReason::LoadFailed,
                format!("Failed to read {}: {}", handle.describe(), e),
                &[],
            )
        }
    };

    let (binary, references) = match scan_bytes(&bytes) {
        Ok(scanned) => scanned,
        Err(e) => return Inspection::failed(FailReason::UnsupportedFormat, e.to_string(), &[]),
    };
    debug!(
        "Scanned {}: {} host reference(s)",
        handle.describe(),
        references.len()
    );

    let classification = classify(&references, &data.rules, &data.facades);
    let classified = [LoadState::Scanned, LoadState::Classified];

    match classification.aggregate {
        AggregateVerdict::Compatible => Inspection::Ready {
            binary,
            rewritten: false,
            warnings: classification.warnings,
            rewrite_lines: Vec::new(),
        },
        AggregateVerdict::Incompatible => {
            let (detail, symbol) = match classification.deciding_fatal() {
                Some(fatal) => {
                    let detail = match &fatal.verdict {
                        Verdict::Fatal(cause) => {
                            format!("{} at {}", cause, fatal.reference.location)
                        }
                        _ => String::new(),
                    };
                    (detail, Some(fatal.reference.symbol.to_string()))
                }
                None => (String::new(), None),
            };
            Inspection::Failed {
                reason: classification
                    .fail_reason()
                    .unwrap_or(FailReason::Incompatible),
                detail,
                symbol,
                reached: classified.to_vec(),
            }
        }
        AggregateVerdict::RewritableWithWarnings => {
            match rewrite(&binary, &classification, &data.facades) {
                Ok(output) => Inspection::Ready {
                    binary: output.binary,
                    rewritten: true,
                    warnings: classification.warnings,
                    rewrite_lines: output.warnings.iter().map(|w| w.to_string()).collect(),
                },
                Err(e) => Inspection::failed(
                    FailReason::LoadFailed,
                    format!("Rewrite failed: {}", e),
                    &classified,
                ),
            }
        }
    }
}

// ============================================================================
// Load Pipeline
// ============================================================================

/// Resolves, inspects, rewrites and activates mods.
///
/// The compatibility data snapshot and the host are fixed at construction and
/// shared read-only by every worker.
pub struct LoadPipeline {
    data: Arc<CompatData>,
    host: Arc<dyn PluginHost>,
    options: PipelineOptions,
    cancel_tx: Arc<watch::Sender<bool>>,
}

impl LoadPipeline {
    pub fn new(
        data: Arc<CompatData>,
        host: Arc<dyn PluginHost>,
        options: PipelineOptions,
    ) -> Self {
        let (cancel_tx, _) = watch::channel(false);
        Self {
            data,
            host,
            options,
            cancel_tx: Arc::new(cancel_tx),
        }
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            tx: self.cancel_tx.clone(),
        }
    }

    /// Run the pipeline over the result of folder discovery.
    pub async fn run(&self, discovered: Vec<DiscoveredMod>) -> LoadReport {
        let mut candidates = Vec::new();
        let mut rejected = Vec::new();
        for entry in discovered {
            match entry {
                DiscoveredMod::Candidate(folder) => {
                    candidates.push(Candidate::from_folder(folder))
                }
                DiscoveredMod::Rejected(folder) => rejected.push(folder),
            }
        }
        self.run_candidates(candidates, rejected).await
    }

    /// Run the pipeline over explicit candidates.
    ///
    /// `rejected` folders are reported as failed without further work.
    pub async fn run_candidates(
        &self,
        candidates: Vec<Candidate>,
        rejected: Vec<RejectedFolder>,
    ) -> LoadReport {
        let started_at = Utc::now();
        let cancel_rx = self.cancel_tx.subscribe();
        info!(
            "Starting load pipeline: {} candidate(s), {} rejected folder(s)",
            candidates.len(),
            rejected.len()
        );

        let mut run = Run::default();

        for folder in rejected {
            let name = folder.display_name();
            run.fail(
                name.clone(),
                name,
                StateTrail::new(),
                LoadOutcome::failed(folder.reason, folder.detail),
            );
        }

        let manifests: Vec<PluginManifest> =
            candidates.iter().map(|c| c.manifest.clone()).collect();
        let resolution = resolve(&manifests, &self.data.mod_data);

        for (&index, exclusion) in &resolution.excluded {
            let manifest = &manifests[index];
            run.fail(
                manifest.id().to_string(),
                manifest.plugin.name.clone(),
                StateTrail::new(),
                LoadOutcome::failed(exclusion.reason, exclusion.detail.clone()),
            );
        }

        let mut inspections = self.spawn_inspections(&candidates, &resolution.order);
        let mut loaded: HashSet<usize> = HashSet::new();

        for (position, &index) in resolution.order.iter().enumerate() {
            if *cancel_rx.borrow() {
                warn!("Load pipeline cancelled");
                run.cancelled = true;
                run.skipped = resolution.order[position..]
                    .iter()
                    .map(|&i| manifests[i].id().to_string())
                    .collect();
                break;
            }

            let inspection = inspections.remove(&index);
            self.process(&mut run, &candidates, index, inspection, &resolution, &mut loaded)
                .await;
        }

        for (_, handle) in inspections {
            handle.abort();
        }

        let report = LoadReport {
            started_at,
            finished_at: Utc::now(),
            order: resolution
                .order
                .iter()
                .map(|&i| manifests[i].id().to_string())
                .collect(),
            plugins: run.plugins,
            diagnostics: run.diagnostics,
            skipped: run.skipped,
            cancelled: run.cancelled,
        };
        info!("Load pipeline finished: {}", report.summary());
        report
    }

    /// Start inspection of every eligible mod, bounded by the worker count.
    fn spawn_inspections(
        &self,
        candidates: &[Candidate],
        order: &[usize],
    ) -> HashMap<usize, JoinHandle<Inspection>> {
        let permits = Arc::new(Semaphore::new(self.options.workers.max(1)));

        order
            .iter()
            .map(|&index| {
                let permits = permits.clone();
                let handle = candidates[index].binary.clone();
                let data = self.data.clone();
                let task = tokio::spawn(async move {
                    let _permit = match permits.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(e) => {
                            return Inspection::failed(FailReason::LoadFailed, e.to_string(), &[])
                        }
                    };
                    tokio::task::spawn_blocking(move || inspect(handle.as_ref(), &data))
                        .await
                        .unwrap_or_else(|e| {
                            Inspection::failed(
                                FailReason::LoadFailed,
                                format!("Inspection worker failed: {}", e),
                                &[],
                            )
                        })
                });
                (index, task)
            })
            .collect()
    }

    /// Turn one mod's inspection into its outcome, in resolved order.
    async fn process(
        &self,
        run: &mut Run,
        candidates: &[Candidate],
        index: usize,
        inspection: Option<JoinHandle<Inspection>>,
        resolution: &Resolution,
        loaded: &mut HashSet<usize>,
    ) {
        let candidate = &candidates[index];
        let manifest = &candidate.manifest;
        let id = manifest.id().to_string();
        let name = manifest.plugin.name.clone();
        let mut trail = StateTrail::new();
        advance(&mut trail, &id, LoadState::DependencyChecked);

        let failed_dependency = resolution
            .required_dependencies(index)
            .iter()
            .find(|dep| !loaded.contains(dep));
        if let Some(&dep) = failed_dependency {
            if let Some(handle) = inspection {
                handle.abort();
            }
            let detail = format!(
                "Required dependency '{}' failed to load",
                candidates[dep].id()
            );
            let outcome = LoadOutcome::failed(FailReason::MissingDependencies, detail);
            run.fail(id, name, trail, outcome);
            return;
        }

        let inspection = match inspection {
            Some(handle) => handle.await.unwrap_or_else(|e| {
                Inspection::failed(
                    FailReason::LoadFailed,
                    format!("Inspection task failed: {}", e),
                    &[],
                )
            }),
            None => Inspection::failed(FailReason::LoadFailed, "Inspection was not started", &[]),
        };

        let (binary, rewritten, mut warnings, rewrite_lines) = match inspection {
            Inspection::Ready {
                binary,
                rewritten,
                warnings,
                rewrite_lines,
            } => (binary, rewritten, warnings, rewrite_lines),
            Inspection::Failed {
                reason,
                detail,
                symbol,
                reached,
            } => {
                for state in reached {
                    advance(&mut trail, &id, state);
                }
                let outcome = LoadOutcome::Failed {
                    reason,
                    detail,
                    symbol,
                };
                run.fail(id, name, trail, outcome);
                return;
            }
        };

        advance(&mut trail, &id, LoadState::Scanned);
        advance(&mut trail, &id, LoadState::Classified);
        if rewritten {
            advance(&mut trail, &id, LoadState::Rewritten);
            for line in rewrite_lines {
                warn!("{}: {}", id, line);
                run.diagnostics.push(Diagnostic {
                    plugin: id.clone(),
                    kind: DiagnosticKind::Rewrite,
                    message: line,
                });
            }
            self.write_rewritten(&id, &binary).await;
        } else {
            advance(&mut trail, &id, LoadState::Skipped);
        }

        warnings.extend_from(&manifest.warnings());
        let plugin = LoadedPlugin {
            id: id.clone(),
            name: name.clone(),
            version: manifest.version().clone(),
            binary: Arc::new(binary),
            rewritten,
            warnings,
            source: candidate.path.clone(),
        };

        if let Err(e) = self.host.activate(&plugin).await {
            let detail = format!("Activation failed: {}", e);
            let outcome = LoadOutcome::failed(FailReason::LoadFailed, detail);
            run.fail(id, name, trail, outcome);
            return;
        }

        advance(&mut trail, &id, LoadState::Loaded);
        info!("Loaded {} {}", id, plugin.version);
        loaded.insert(index);
        run.plugins.push(PluginReport {
            id,
            name,
            outcome: LoadOutcome::Loaded(plugin),
            states: trail,
        });
    }

    /// Save a rewritten binary to the cache directory, if one is configured.
    async fn write_rewritten(&self, id: &str, binary: &PluginBinary) {
        let Some(dir) = &self.options.rewrite_cache_dir else {
            return;
        };
        let path = dir.join(format!("{}.mbc", id));

        let bytes = match BinaryLoader::to_bytes(binary) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("Failed to serialize rewritten binary for {}: {}", id, e);
                return;
            }
        };
        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            error!("Failed to create {}: {}", dir.display(), e);
            return;
        }
        match tokio::fs::write(&path, bytes).await {
            Ok(()) => debug!("Wrote rewritten binary to {}", path.display()),
            Err(e) => error!("Failed to write {}: {}", path.display(), e),
        }
    }
}

/// Outcomes accumulated during one run.
#[derive(Default)]
struct Run {
    plugins: Vec<PluginReport>,
    diagnostics: Vec<Diagnostic>,
    skipped: Vec<String>,
    cancelled: bool,
}

impl Run {
    fn fail(&mut self, id: String, name: String, mut trail: StateTrail, outcome: LoadOutcome) {
        if let Some(reason) = outcome.fail_reason() {
            trail.fail(reason);
        }
        let report = PluginReport {
            id: id.clone(),
            name,
            outcome,
            states: trail,
        };
        warn!("{}", report);
        self.diagnostics.push(Diagnostic {
            plugin: id,
            kind: DiagnosticKind::Exclusion,
            message: report.to_string(),
        });
        self.plugins.push(report);
    }
}

fn advance(trail: &mut StateTrail, id: &str, state: LoadState) {
    if let Err(e) = trail.advance(state) {
        error!("{}: {}", id, e);
    }
}
