//! Drives a full build over the discovered file set
//!
//! 1. Scan the input directories
//! 2. Build every file's chain and record its inclusion directives
//! 3. Merge included chains into their parents (parents first)
//! 4. Execute every root chain and write it to the output sink
//!
//! Root chains are processed one after another; the first failure stops
//! the build.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{Config, ConfigError};
use crate::fd_budget::FdBudget;
use crate::handlers::{AssetMeta, ExtensionRegistry, RegistryError};
use crate::observability::{BuildMetrics, MetricsSnapshot};
use crate::pipeline::{
    ChainBuilder, ChainGraph, ChainId, DEFAULT_PIPE_CAPACITY, DisplaySteps, Executor,
    FsSink, HandlerChain, MergeError, OutputSink, PipelineError,
};
use crate::source::{
    DirectiveError, DirectiveProvider, HeaderDirectives, Include, NameIndex, NoDirectives,
    ScanError, SourceFile, scan_dirs,
};

#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Directive(#[from] DirectiveError),

    #[error("{file}: cannot resolve included file `{reference}`")]
    UnresolvedInclude { file: PathBuf, reference: String },

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error("failed to build {file}: {source}")]
    Pipeline {
        file: String,
        #[source]
        source: PipelineError,
    },

    #[error("build task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Outcome of a successful build
#[derive(Debug, Clone)]
pub struct BuildReport {
    /// Final name of every root chain's output, in processing order
    pub outputs: Vec<AssetMeta>,
    pub metrics: MetricsSnapshot,
}

/// One root chain as it would be executed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedOutput {
    pub source: String,
    pub output: String,
    pub steps: String,
}

impl fmt::Display for PlannedOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} => {}: {}", self.source, self.output, self.steps)
    }
}

pub struct Orchestrator {
    registry: ExtensionRegistry,
    directives: Arc<dyn DirectiveProvider>,
    sink: Arc<dyn OutputSink>,
    budget: FdBudget,
    pipe_capacity: usize,
    metrics: Arc<BuildMetrics>,
}

impl Orchestrator {
    pub fn new(registry: ExtensionRegistry, sink: Arc<dyn OutputSink>) -> Self {
        Self {
            registry,
            directives: Arc::new(HeaderDirectives),
            sink,
            budget: FdBudget::default(),
            pipe_capacity: DEFAULT_PIPE_CAPACITY,
            metrics: Arc::new(BuildMetrics::new()),
        }
    }

    /// Orchestrator writing to the configured output directory
    pub fn from_config(config: &Config) -> Result<Self, BuildError> {
        let registry = ExtensionRegistry::from_rules(&config.handler_rules())?;
        let sink = Arc::new(FsSink::new(&config.build.output_dir));

        let mut orchestrator = Self::new(registry, sink)
            .with_budget(FdBudget::new(config.limits.fd_limit))
            .with_pipe_capacity(config.pipe_capacity());
        if !config.directives.enabled {
            orchestrator = orchestrator.with_directives(Arc::new(NoDirectives));
        }
        Ok(orchestrator)
    }

    pub fn with_directives(mut self, directives: Arc<dyn DirectiveProvider>) -> Self {
        self.directives = directives;
        self
    }

    pub fn with_budget(mut self, budget: FdBudget) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_pipe_capacity(mut self, capacity: usize) -> Self {
        self.pipe_capacity = capacity.max(1);
        self
    }

    pub fn registry(&self) -> &ExtensionRegistry {
        &self.registry
    }

    pub fn metrics(&self) -> &BuildMetrics {
        &self.metrics
    }

    /// Scan, configure and write everything under `input_dirs`
    pub async fn run(&self, input_dirs: &[PathBuf]) -> Result<BuildReport, BuildError> {
        let sources = self.scan(input_dirs).await?;
        let graph = self.configure(sources).await?;
        self.write(graph).await
    }

    /// Describe every root chain without executing anything
    pub async fn plan(&self, input_dirs: &[PathBuf]) -> Result<Vec<PlannedOutput>, BuildError> {
        let sources = self.scan(input_dirs).await?;
        let graph = self.configure(sources).await?;

        Ok(graph
            .roots()
            .into_iter()
            .filter_map(|id| {
                let chain = graph.chain(id);
                let source = chain.source()?;
                Some(PlannedOutput {
                    source: source.meta().file_name(),
                    output: chain.planned_meta()?.file_name(),
                    steps: DisplaySteps(chain.steps()).to_string(),
                })
            })
            .collect())
    }

    async fn scan(&self, input_dirs: &[PathBuf]) -> Result<Vec<SourceFile>, BuildError> {
        let dirs = input_dirs.to_vec();
        let sources = tokio::task::spawn_blocking(move || scan_dirs(&dirs)).await??;
        info!(files = sources.len(), dirs = input_dirs.len(), "Scanned sources");
        Ok(sources)
    }

    /// Build a chain per source, wire up the inclusion graph from the
    /// files' directives, and merge included chains into their parents
    pub async fn configure(&self, sources: Vec<SourceFile>) -> Result<ChainGraph, BuildError> {
        let builder = ChainBuilder::new(&self.registry);
        let mut graph = ChainGraph::new();
        let mut index = NameIndex::new();

        for source in sources {
            let steps = builder.build(source.ext());
            debug!(file = %source.meta(), chain = %DisplaySteps(&steps), "Built chain");
            let id = graph.add(HandlerChain::for_source(source.clone(), steps));
            index.insert(&source, id);
        }

        let ids: Vec<ChainId> = graph.ids().collect();
        for id in ids {
            let Some(source) = graph.chain(id).source().cloned() else {
                continue;
            };
            self.include_directives(&mut graph, &index, id, &source).await?;
        }

        graph.merge_all()?;
        Ok(graph)
    }

    async fn include_directives(
        &self,
        graph: &mut ChainGraph,
        index: &NameIndex<ChainId>,
        id: ChainId,
        source: &SourceFile,
    ) -> Result<(), BuildError> {
        let mut self_included = false;

        for include in self.directives.includes(source).await? {
            let child = match include {
                Include::SelfContent => id,
                Include::File(reference) => {
                    index
                        .resolve(&reference)
                        .ok_or_else(|| BuildError::UnresolvedInclude {
                            file: source.path().to_path_buf(),
                            reference,
                        })?
                }
            };
            self_included |= child == id;
            graph.include(id, child);
        }

        // A file that never names itself contributes its content last
        if !self_included {
            graph.include(id, id);
        }
        Ok(())
    }

    /// Execute every root chain in order and write its output
    pub async fn write(&self, graph: ChainGraph) -> Result<BuildReport, BuildError> {
        let graph = Arc::new(graph);
        let executor = Executor::new(graph.clone(), self.budget.clone(), self.sink.clone())
            .with_pipe_capacity(self.pipe_capacity)
            .with_metrics(self.metrics.clone());

        let mut outputs = Vec::new();
        for id in graph.roots() {
            let label = graph
                .chain(id)
                .source()
                .map(|source| source.meta().file_name())
                .unwrap_or_else(|| id.to_string());

            let meta = executor
                .write(id)
                .await
                .map_err(|source| BuildError::Pipeline {
                    file: label.clone(),
                    source,
                })?;
            info!(source = %label, output = %meta, "Processed");
            outputs.push(meta);
        }

        let metrics = self.metrics.snapshot();
        info!(
            outputs = outputs.len(),
            chains = metrics.chains_executed,
            forks = metrics.forks_completed,
            concatenations = metrics.concatenations,
            bytes = metrics.bytes_written,
            fd_waits = metrics.fd_waits,
            "Build finished"
        );
        Ok(BuildReport { outputs, metrics })
    }
}
