//! The engine handle and its background worker.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashSet;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use treesync_core::{
    ChangeReport, ChangeSource, ChildFilter, EngineConfig, Node, NodeId, StatusOverlay, SyncError,
    TreeStore,
};
use treesync_git::{GitStatusProvider, RepoDiscovery};
use treesync_ops::{Batch, BatchEvent, OPERATION_CHANNEL_SIZE, OperationExecutor};
use treesync_scan::{ScanDepth, ScanSummary, ScanUpdate, Scanner};

use crate::command::EngineCommand;
use crate::event::EngineEvent;

/// Handle to a running synchronization engine.
///
/// Cheap to clone. Queries read the tree directly and never wait on
/// in-flight work; commands are queued to a worker task.
#[derive(Debug, Clone)]
pub struct Engine {
    inner: Arc<Inner>,
    commands: mpsc::UnboundedSender<EngineCommand>,
}

#[derive(Debug)]
struct Inner {
    config: EngineConfig,
    tree: Arc<TreeStore>,
    scanner: Scanner,
    executor: OperationExecutor,
    provider: GitStatusProvider,
    overlay: StatusOverlay,
    discovery: RepoDiscovery,
    /// Repositories whose first refresh has been started.
    seen_repos: DashSet<PathBuf>,
    filter: RwLock<ChildFilter>,
    events: broadcast::Sender<EngineEvent>,
    /// Parent of every in-flight task's cancellation token.
    work: Mutex<CancellationToken>,
}

impl Engine {
    /// Build the tree for `config.root` and start the worker.
    ///
    /// Must be called from within a tokio runtime. Nothing is scanned until
    /// a scan is requested.
    pub fn start(config: EngineConfig) -> Result<Self, SyncError> {
        if config.max_concurrent_groups == 0 || config.event_capacity == 0 {
            return Err(SyncError::InvalidConfig {
                message: "max_concurrent_groups and event_capacity must be positive".into(),
            });
        }

        let tree = Arc::new(TreeStore::new(&config.root)?);
        let (events, _) = broadcast::channel(config.event_capacity);
        let inner = Arc::new(Inner {
            scanner: Scanner::new(tree.clone()),
            executor: OperationExecutor::from_config(tree.clone(), &config),
            provider: GitStatusProvider::from_config(&config),
            overlay: StatusOverlay::new(tree.clone()),
            discovery: RepoDiscovery::new(tree.root_path()),
            seen_repos: DashSet::new(),
            filter: RwLock::new(ChildFilter {
                show_hidden: config.show_hidden,
                show_ignored: config.show_ignored,
            }),
            events,
            work: Mutex::new(CancellationToken::new()),
            tree,
            config,
        });

        let (commands, rx) = mpsc::unbounded_channel();
        tokio::spawn(worker_loop(inner.clone(), rx));

        info!(root = %inner.tree.root_path().display(), "engine started");
        Ok(Self { inner, commands })
    }

    /// Queue a command for the worker.
    pub fn send(&self, command: EngineCommand) -> Result<(), SyncError> {
        self.commands
            .send(command)
            .map_err(|_| SyncError::Interrupted)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// The tree this engine maintains.
    pub fn tree(&self) -> &Arc<TreeStore> {
        &self.inner.tree
    }

    pub fn root(&self) -> NodeId {
        self.inner.tree.root()
    }

    // Queries

    /// Look up a node.
    pub fn get_node(&self, id: NodeId) -> Option<Node> {
        self.inner.tree.get(id)
    }

    /// Children of `id` in render order, with display filters applied.
    pub fn children(&self, id: NodeId) -> Vec<Node> {
        self.inner.tree.children(id, self.filter())
    }

    /// Resolve a path to a node.
    pub fn resolve_path(&self, path: &Path) -> Option<NodeId> {
        self.inner.tree.resolve_path(path)
    }

    /// Current display filters.
    pub fn filter(&self) -> ChildFilter {
        *self.inner.filter.read()
    }

    // Events

    /// Subscribe to change events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.events.subscribe()
    }

    /// Subscribe to change events as a [`Stream`](tokio_stream::Stream).
    ///
    /// A subscriber that falls behind sees a lag error item and continues
    /// with the oldest retained event.
    pub fn event_stream(&self) -> BroadcastStream<EngineEvent> {
        BroadcastStream::new(self.subscribe())
    }

    // Commands

    /// Queue a scan of `node`.
    pub fn request_scan(&self, node: NodeId, depth: ScanDepth) -> Result<(), SyncError> {
        self.send(EngineCommand::RequestScan {
            node,
            depth,
            done: None,
        })
    }

    /// Scan `node` and wait for it to finish.
    pub async fn scan(&self, node: NodeId, depth: ScanDepth) -> Result<ScanSummary, SyncError> {
        let (done, rx) = oneshot::channel();
        self.send(EngineCommand::RequestScan {
            node,
            depth,
            done: Some(done),
        })?;
        rx.await.map_err(|_| SyncError::Interrupted)
    }

    /// Queue expansion of `node`.
    pub fn request_expand(&self, node: NodeId) -> Result<(), SyncError> {
        self.send(EngineCommand::Expand { node, done: None })
    }

    /// Expand `node` and wait for its listing.
    pub async fn expand(&self, node: NodeId) -> Result<ChangeReport, SyncError> {
        let (done, rx) = oneshot::channel();
        self.send(EngineCommand::Expand {
            node,
            done: Some(done),
        })?;
        rx.await.map_err(|_| SyncError::Interrupted)?
    }

    /// Queue collapse of `node` and every expanded directory below it.
    pub fn request_collapse(&self, node: NodeId) -> Result<(), SyncError> {
        self.send(EngineCommand::Collapse { node })
    }

    /// Queue a batch and receive its per-item outcomes.
    pub fn request_operation_batch(
        &self,
        batch: Batch,
    ) -> Result<mpsc::Receiver<BatchEvent>, SyncError> {
        let (tx, rx) = mpsc::channel(OPERATION_CHANNEL_SIZE);
        self.send(EngineCommand::OperationBatch {
            batch,
            events: Some(tx),
        })?;
        Ok(rx)
    }

    /// Queue a git refresh of `root`, or of every known repository.
    pub fn request_git_refresh(&self, root: Option<PathBuf>) -> Result<(), SyncError> {
        self.send(EngineCommand::GitRefresh { root, done: None })
    }

    /// Refresh git status and wait for the merged result.
    pub async fn refresh_git(&self, root: Option<PathBuf>) -> Result<ChangeReport, SyncError> {
        let (done, rx) = oneshot::channel();
        self.send(EngineCommand::GitRefresh {
            root,
            done: Some(done),
        })?;
        rx.await.map_err(|_| SyncError::Interrupted)
    }

    /// Show or hide git-ignored entries. Never queries git.
    pub fn set_ignored_visible(&self, visible: bool) {
        self.inner.set_filter(|f| f.show_ignored = visible);
    }

    /// Show or hide dotfiles.
    pub fn set_hidden_visible(&self, visible: bool) {
        self.inner.set_filter(|f| f.show_hidden = visible);
    }

    /// Cancel everything in flight. Later commands run normally.
    pub fn cancel_all(&self) -> Result<(), SyncError> {
        self.send(EngineCommand::CancelAll)
    }

    /// Stop the worker and cancel in-flight work.
    pub fn shutdown(&self) -> Result<(), SyncError> {
        self.send(EngineCommand::Shutdown)
    }
}

async fn worker_loop(inner: Arc<Inner>, mut rx: mpsc::UnboundedReceiver<EngineCommand>) {
    while let Some(command) = rx.recv().await {
        if !inner.handle_command(command) {
            break;
        }
    }
    inner.work.lock().cancel();
    debug!("engine worker stopped");
}

impl Inner {
    /// Dispatch one command. Returns `false` to stop the worker.
    fn handle_command(self: &Arc<Self>, command: EngineCommand) -> bool {
        match command {
            EngineCommand::RequestScan { node, depth, done } => {
                let inner = self.clone();
                let cancel = self.work_token();
                tokio::spawn(async move {
                    let summary = inner.run_scan(node, depth, cancel).await;
                    if let Some(done) = done {
                        let _ = done.send(summary);
                    }
                });
            }
            EngineCommand::Expand { node, done } => {
                let inner = self.clone();
                let cancel = self.work_token();
                tokio::spawn(async move {
                    let result = inner.run_expand(node, cancel).await;
                    if let Some(done) = done {
                        let _ = done.send(result);
                    }
                });
            }
            EngineCommand::Collapse { node } => match self.tree.collapse(node) {
                Ok(report) => self.publish(ChangeSource::Scan, report),
                Err(error) => self.fail(ChangeSource::Scan, None, &error),
            },
            EngineCommand::OperationBatch { batch, events } => {
                let inner = self.clone();
                let cancel = self.work_token();
                tokio::spawn(async move {
                    inner.run_batch(batch, events, cancel).await;
                });
            }
            EngineCommand::GitRefresh { root, done } => {
                let inner = self.clone();
                let cancel = self.work_token();
                tokio::spawn(async move {
                    let roots = match root {
                        Some(root) => vec![root],
                        None => inner.discovery.known_roots(),
                    };
                    let report = inner.refresh_all(roots, &cancel).await;
                    if let Some(done) = done {
                        let _ = done.send(report);
                    }
                });
            }
            EngineCommand::SetIgnoredVisible(visible) => {
                self.set_filter(|f| f.show_ignored = visible);
            }
            EngineCommand::SetHiddenVisible(visible) => {
                self.set_filter(|f| f.show_hidden = visible);
            }
            EngineCommand::CancelAll => {
                let mut work = self.work.lock();
                work.cancel();
                *work = CancellationToken::new();
                debug!("cancelled in-flight work");
            }
            EngineCommand::Shutdown => return false,
        }
        true
    }

    fn work_token(&self) -> CancellationToken {
        self.work.lock().child_token()
    }

    async fn run_scan(
        self: &Arc<Self>,
        node: NodeId,
        depth: ScanDepth,
        cancel: CancellationToken,
    ) -> ScanSummary {
        let mut updates = self.scanner.scan(node, depth, cancel.clone());
        let mut scanned = Vec::new();
        let mut summary = ScanSummary::default();

        while let Some(update) = updates.recv().await {
            match update {
                ScanUpdate::Report {
                    directory,
                    report,
                    warnings,
                } => {
                    scanned.push(directory);
                    self.publish(ChangeSource::Scan, report);
                    if !warnings.is_empty() {
                        let _ = self.events.send(EngineEvent::Warnings(warnings));
                    }
                }
                ScanUpdate::Failed { directory, error } => {
                    let path = self.tree.get(directory).map(|n| n.path);
                    self.fail(ChangeSource::Scan, path, &error);
                }
                ScanUpdate::Complete(done) => summary = done,
            }
        }

        let _ = self.events.send(EngineEvent::ScanFinished(summary.clone()));
        scanned.push(node);
        self.discover_repos(scanned, &cancel).await;
        summary
    }

    async fn run_expand(
        self: &Arc<Self>,
        node: NodeId,
        cancel: CancellationToken,
    ) -> Result<ChangeReport, SyncError> {
        match self.scanner.expand(node, &cancel).await {
            Ok(report) => {
                self.publish(ChangeSource::Scan, report.clone());
                self.discover_repos(vec![node], &cancel).await;
                Ok(report)
            }
            Err(error) => {
                let path = self.tree.get(node).map(|n| n.path);
                self.fail(ChangeSource::Scan, path, &error);
                Err(error)
            }
        }
    }

    async fn run_batch(
        self: &Arc<Self>,
        batch: Batch,
        events: Option<mpsc::Sender<BatchEvent>>,
        cancel: CancellationToken,
    ) {
        let touched: Vec<PathBuf> = batch
            .operations
            .iter()
            .flat_map(|op| op.touched_paths())
            .collect();
        let mut rx = self.executor.execute(batch, cancel.clone());

        while let Some(event) = rx.recv().await {
            match &event {
                BatchEvent::Outcome(outcome) => {
                    self.publish(ChangeSource::Operation, outcome.report.clone());
                    if let Some(error) = outcome.status.error() {
                        self.fail(
                            ChangeSource::Operation,
                            Some(outcome.operation.source().to_path_buf()),
                            error,
                        );
                    }
                }
                BatchEvent::Complete(complete) => {
                    info!(summary = %complete.summary(), elapsed = ?complete.elapsed, "batch finished");
                    let _ = self.events.send(EngineEvent::BatchFinished(complete.clone()));
                }
            }
            if let Some(events) = &events {
                let _ = events.send(event).await;
            }
        }

        if self.config.git_enabled && self.config.refresh_after_batch {
            let inner = self.clone();
            let roots = blocking_discover(inner.clone(), touched).await;
            inner.refresh_all(roots, &cancel).await;
        }
    }

    /// Start the first refresh of any repository containing `nodes`.
    async fn discover_repos(self: &Arc<Self>, nodes: Vec<NodeId>, cancel: &CancellationToken) {
        if !self.config.git_enabled {
            return;
        }
        let paths: Vec<PathBuf> = nodes
            .into_iter()
            .filter_map(|id| self.tree.get(id))
            .map(|node| node.path)
            .collect();
        let fresh: Vec<PathBuf> = blocking_discover(self.clone(), paths)
            .await
            .into_iter()
            .filter(|root| self.seen_repos.insert(root.clone()))
            .collect();
        if !fresh.is_empty() {
            debug!(repos = ?fresh, "discovered repositories");
            self.refresh_all(fresh, cancel).await;
        }
    }

    async fn refresh_all(&self, roots: Vec<PathBuf>, cancel: &CancellationToken) -> ChangeReport {
        let mut report = ChangeReport::new();
        if !self.config.git_enabled {
            return report;
        }
        for root in roots {
            self.seen_repos.insert(root.clone());
            report.merge(self.refresh_repo(&root, cancel).await);
        }
        report
    }

    /// Query one repository and merge the result onto the tree.
    ///
    /// A repository that is gone returns its nodes to `NotInRepo`. Any
    /// other failure (timeout included) keeps the previous status.
    async fn refresh_repo(&self, root: &Path, cancel: &CancellationToken) -> ChangeReport {
        match self.provider.refresh(root, cancel).await {
            Ok(status) => {
                let report = self.overlay.merge(status).await;
                self.publish(ChangeSource::Status, report.clone());
                report
            }
            Err(SyncError::Interrupted) => ChangeReport::new(),
            Err(error) => {
                self.fail(ChangeSource::Status, Some(root.to_path_buf()), &error);
                let marker = root.join(".git");
                let gone = tokio::task::spawn_blocking(move || {
                    std::fs::symlink_metadata(marker).is_err()
                })
                .await
                .unwrap_or(false);
                if !gone {
                    return ChangeReport::new();
                }
                self.seen_repos.remove(root);
                self.discovery.invalidate();
                let report = self.overlay.clear(root).await;
                self.publish(ChangeSource::Status, report.clone());
                report
            }
        }
    }

    fn set_filter(&self, change: impl FnOnce(&mut ChildFilter)) {
        let filter = {
            let mut filter = self.filter.write();
            change(&mut filter);
            *filter
        };
        debug!(?filter, "display filter changed");
        let _ = self.events.send(EngineEvent::FilterChanged(filter));
    }

    fn publish(&self, source: ChangeSource, report: ChangeReport) {
        if !report.is_empty() {
            let _ = self.events.send(EngineEvent::Changed { source, report });
        }
    }

    fn fail(&self, source: ChangeSource, path: Option<PathBuf>, error: &SyncError) {
        warn!(?source, path = ?path, error = %error, "engine task failed");
        let _ = self.events.send(EngineEvent::Failed {
            source,
            path,
            message: error.to_string(),
        });
    }
}

/// Repository roots containing `paths`, deduplicated.
async fn blocking_discover(inner: Arc<Inner>, paths: Vec<PathBuf>) -> Vec<PathBuf> {
    tokio::task::spawn_blocking(move || {
        let mut roots: Vec<PathBuf> = paths
            .iter()
            .filter_map(|path| inner.discovery.discover(path))
            .collect();
        roots.sort();
        roots.dedup();
        roots
    })
    .await
    .unwrap_or_default()
}
