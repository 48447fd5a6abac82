//! Streaming execution of merged handler chains
//!
//! Every step of a chain runs as its own task. Stages are connected by
//! [`pipe`]s, so a stage only waits for as many bytes as it needs, and a
//! failing stage closes its output with the error instead of a clean EOF.
//! The first error of a run is kept in a shared slot and becomes the result
//! of the whole chain; the errors it causes further down are ignored.

use bytes::BytesMut;
use std::future::Future;
use std::io::{self, Cursor};
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinSet;
use tracing::debug;

use super::chain::{ConcatMode, Concatenation, Fork, Step};
use super::graph::{ChainGraph, ChainId};
use super::pipe::{PipeWriter, pipe};
use super::sink::OutputSink;
use crate::fd_budget::{FdBudget, FdBudgetError, FdPermit};
use crate::handlers::{AssetMeta, Handler, HandlerError, RegisteredHandler};
use crate::observability::BuildMetrics;

/// Per-stage pipe capacity when none is configured
pub const DEFAULT_PIPE_CAPACITY: usize = 64 * 1024;

const TEE_CHUNK: usize = 8 * 1024;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
type StageReader = Box<dyn AsyncRead + Send + Unpin>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to read source {path}: {source}")]
    Source {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("handler `{handler}` failed: {source}")]
    Handler {
        handler: String,
        #[source]
        source: HandlerError,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("unknown chain {0}")]
    UnknownChain(ChainId),

    #[error("chain {0} has no source file")]
    MissingSource(ChainId),

    #[error("stage aborted: {0}")]
    StageAborted(String),

    #[error(transparent)]
    FdBudget(#[from] FdBudgetError),
}

/// First error recorded by any stage of one run
#[derive(Clone, Default)]
struct FailureSlot(Arc<Mutex<Option<PipelineError>>>);

impl FailureSlot {
    fn record(&self, error: PipelineError) {
        let mut slot = self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if slot.is_none() {
            debug!(error = %error, "Stage failed");
            *slot = Some(error);
        }
    }

    fn take(&self) -> Option<PipelineError> {
        self.0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }
}

/// Close `output` according to a stage's result. Errors are recorded
/// before the stream is failed so the consumer's induced error loses.
async fn close(output: PipeWriter, result: Result<(), PipelineError>, failure: &FailureSlot) {
    match result {
        Ok(()) => {
            if let Err(err) = output.finish().await {
                failure.record(err.into());
            }
        }
        Err(err) => {
            let message = err.to_string();
            failure.record(err);
            output.fail(message);
        }
    }
}

/// Copy `input` to both writers chunk by chunk
async fn tee(
    input: &mut StageReader,
    main: &mut PipeWriter,
    branch: &mut PipeWriter,
) -> io::Result<()> {
    let mut chunk = BytesMut::with_capacity(TEE_CHUNK);
    loop {
        chunk.clear();
        if input.read_buf(&mut chunk).await? == 0 {
            return Ok(());
        }
        main.write_all(&chunk).await?;
        branch.write_all(&chunk).await?;
    }
}

/// Runs chains from a [`ChainGraph`] against an [`OutputSink`]
#[derive(Clone)]
pub struct Executor {
    graph: Arc<ChainGraph>,
    budget: FdBudget,
    sink: Arc<dyn OutputSink>,
    pipe_capacity: usize,
    metrics: Arc<BuildMetrics>,
}

impl Executor {
    pub fn new(graph: Arc<ChainGraph>, budget: FdBudget, sink: Arc<dyn OutputSink>) -> Self {
        Self {
            graph,
            budget,
            sink,
            pipe_capacity: DEFAULT_PIPE_CAPACITY,
            metrics: Arc::new(BuildMetrics::new()),
        }
    }

    pub fn with_pipe_capacity(mut self, capacity: usize) -> Self {
        self.pipe_capacity = capacity.max(1);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<BuildMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn graph(&self) -> &ChainGraph {
        &self.graph
    }

    pub fn budget(&self) -> &FdBudget {
        &self.budget
    }

    pub fn metrics(&self) -> &BuildMetrics {
        &self.metrics
    }

    /// Execute chain `id` and write its output to the sink under the
    /// chain's final name
    pub async fn write(&self, id: ChainId) -> Result<AssetMeta, PipelineError> {
        let chain = self.graph.get(id).ok_or(PipelineError::UnknownChain(id))?;
        let planned = chain.planned_meta().ok_or(PipelineError::MissingSource(id))?;

        let mut out = self.sink.open(&planned).await?;
        let (meta, bytes) = self.run(id, &mut *out).await?;
        out.shutdown().await?;

        self.metrics.bytes_written(bytes);
        debug!(chain = %id, output = %meta, bytes, "Chain written");
        Ok(meta)
    }

    /// Execute chain `id`, streaming its final output into `dest`.
    ///
    /// Returns the asset's name and extensions after every step. All stages
    /// have finished by the time this returns, on success and on failure.
    pub async fn execute(
        &self,
        id: ChainId,
        dest: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<AssetMeta, PipelineError> {
        self.run(id, dest).await.map(|(meta, _)| meta)
    }

    fn run<'a>(
        &'a self,
        id: ChainId,
        dest: &'a mut (dyn AsyncWrite + Send + Unpin),
    ) -> BoxFuture<'a, Result<(AssetMeta, u64), PipelineError>> {
        Box::pin(async move {
            let chain = self.graph.get(id).ok_or(PipelineError::UnknownChain(id))?;
            let source = chain.source().ok_or(PipelineError::MissingSource(id))?;

            let failure = FailureSlot::default();
            let mut stages = JoinSet::new();

            let (writer, reader) = pipe(self.pipe_capacity);
            stages.spawn(self.clone().source_stage(
                source.path().to_path_buf(),
                writer,
                failure.clone(),
            ));
            let (mut reader, meta) = self.wire(
                chain.steps(),
                Box::new(reader),
                source.meta(),
                &failure,
                &mut stages,
            );

            let mut written = 0;
            match tokio::io::copy(&mut reader, &mut *dest).await {
                Ok(bytes) => {
                    written = bytes;
                    if let Err(err) = dest.flush().await {
                        failure.record(err.into());
                    }
                }
                Err(err) => failure.record(err.into()),
            }
            drop(reader);

            while let Some(joined) = stages.join_next().await {
                if let Err(err) = joined {
                    failure.record(PipelineError::StageAborted(err.to_string()));
                }
            }

            if let Some(err) = failure.take() {
                return Err(err);
            }
            self.metrics.chain_executed();
            Ok((meta, written))
        })
    }

    /// Execute chain `id` into memory
    fn collect(&self, id: ChainId) -> BoxFuture<'_, Result<Vec<u8>, PipelineError>> {
        Box::pin(async move {
            let mut buffer = Vec::new();
            self.run(id, &mut buffer).await?;
            Ok(buffer)
        })
    }

    /// Spawn one stage per step, each reading the previous stage's output.
    /// Returns the last stage's output and the metadata after all steps.
    fn wire(
        &self,
        steps: &[Step],
        mut reader: StageReader,
        mut meta: AssetMeta,
        failure: &FailureSlot,
        stages: &mut JoinSet<()>,
    ) -> (StageReader, AssetMeta) {
        for step in steps {
            let (writer, next) = pipe(self.pipe_capacity);
            debug!(step = %step, asset = %meta, "Spawning stage");
            match step {
                Step::Handler(registered) => {
                    stages.spawn(self.clone().handler_stage(
                        registered.clone(),
                        meta.clone(),
                        reader,
                        writer,
                        failure.clone(),
                    ));
                    registered.handler.rename(&mut meta);
                }
                Step::Fork(fork) => {
                    stages.spawn(self.clone().fork_stage(
                        fork.clone(),
                        meta.clone(),
                        reader,
                        writer,
                        failure.clone(),
                    ));
                }
                Step::Concat(concat) => {
                    stages.spawn(self.clone().concat_stage(
                        concat.clone(),
                        reader,
                        writer,
                        failure.clone(),
                    ));
                }
            }
            reader = Box::new(next);
        }
        (reader, meta)
    }

    /// One permit for opening a file: immediately if possible, otherwise
    /// wait until another stage releases one
    async fn open_permit(&self) -> Result<FdPermit, PipelineError> {
        if let Some(permit) = self.budget.try_acquire(1) {
            return Ok(permit);
        }
        self.metrics.fd_wait();
        debug!(held = self.budget.held(), "Waiting for a file descriptor permit");
        Ok(self.budget.acquire().await?)
    }

    /// Reserve the descriptors a handler asks for. When they are not
    /// available the input is read into memory first and the handler runs
    /// under a single permit.
    async fn reserve_fds(
        &self,
        handler: &dyn Handler,
        input: &mut StageReader,
    ) -> Result<Option<FdPermit>, PipelineError> {
        let needed = handler.required_fds();
        if needed == 0 {
            return Ok(None);
        }
        if let Some(permit) = self.budget.try_acquire(needed) {
            return Ok(Some(permit));
        }

        self.metrics.input_materialized();
        debug!(handler = handler.name(), needed, "Descriptors unavailable, materializing input");
        let mut buffer = Vec::new();
        input.read_to_end(&mut buffer).await?;
        *input = Box::new(Cursor::new(buffer));

        Ok(Some(self.budget.acquire().await?))
    }

    async fn source_stage(self, path: PathBuf, mut output: PipeWriter, failure: FailureSlot) {
        let result = async {
            let _permit = self.open_permit().await?;
            let source_error = |source| PipelineError::Source {
                path: path.clone(),
                source,
            };
            let mut file = tokio::fs::File::open(&path).await.map_err(source_error)?;
            tokio::io::copy(&mut file, &mut output)
                .await
                .map_err(source_error)?;
            Ok(())
        }
        .await;
        close(output, result, &failure).await;
    }

    async fn handler_stage(
        self,
        registered: RegisteredHandler,
        meta: AssetMeta,
        mut input: StageReader,
        mut output: PipeWriter,
        failure: FailureSlot,
    ) {
        let handler = registered.handler;
        let result = async {
            let _permit = self.reserve_fds(handler.as_ref(), &mut input).await?;
            handler
                .handle(&mut *input, &mut output, &meta)
                .await
                .map_err(|source| PipelineError::Handler {
                    handler: handler.name().to_string(),
                    source,
                })
        }
        .await;
        close(output, result, &failure).await;
        drop(input);
    }

    /// Duplicate the stream into a branch that runs `fork.steps` and is
    /// written to the sink; the main stream continues unchanged
    async fn fork_stage(
        self,
        fork: Fork,
        meta: AssetMeta,
        mut input: StageReader,
        mut output: PipeWriter,
        failure: FailureSlot,
    ) {
        let (mut branch_writer, branch_reader) = pipe(self.pipe_capacity);
        let mut branch_stages = JoinSet::new();
        let (branch_tail, branch_meta) = self.wire(
            &fork.steps,
            Box::new(branch_reader),
            meta,
            &failure,
            &mut branch_stages,
        );

        let duplicate = async {
            let result = tee(&mut input, &mut output, &mut branch_writer).await;
            match result {
                Ok(()) => {
                    close(output, Ok(()), &failure).await;
                    close(branch_writer, Ok(()), &failure).await;
                }
                Err(err) => {
                    let message = err.to_string();
                    close(output, Err(err.into()), &failure).await;
                    branch_writer.fail(message);
                }
            }
            drop(input);
        };
        let ((), written) = tokio::join!(
            duplicate,
            self.write_branch(branch_tail, branch_meta, &failure)
        );

        while let Some(joined) = branch_stages.join_next().await {
            if let Err(err) = joined {
                failure.record(PipelineError::StageAborted(err.to_string()));
            }
        }
        if written {
            self.metrics.fork_completed();
        }
    }

    /// Drain a fork branch into the sink; returns whether it completed
    async fn write_branch(
        &self,
        mut reader: StageReader,
        meta: AssetMeta,
        failure: &FailureSlot,
    ) -> bool {
        let result = async {
            let mut out = self.sink.open(&meta).await?;
            let bytes = tokio::io::copy(&mut reader, &mut out).await?;
            out.shutdown().await?;
            self.metrics.bytes_written(bytes);
            debug!(output = %meta, bytes, "Fork branch written");
            Ok::<_, PipelineError>(())
        }
        .await;

        match result {
            Ok(()) => true,
            Err(err) => {
                failure.record(err);
                false
            }
        }
    }

    /// Join the parent's stream with the child's full output. The side that
    /// is emitted second is materialized while the first one streams.
    async fn concat_stage(
        self,
        concat: Concatenation,
        mut input: StageReader,
        mut output: PipeWriter,
        failure: FailureSlot,
    ) {
        let result = async {
            match concat.mode {
                ConcatMode::Append => {
                    let (streamed, child) = tokio::join!(
                        tokio::io::copy(&mut input, &mut output),
                        self.collect(concat.child)
                    );
                    streamed?;
                    output.write_all(&child?).await?;
                }
                ConcatMode::Prepend => {
                    let mut parent = Vec::new();
                    let (own, child) = tokio::join!(
                        input.read_to_end(&mut parent),
                        self.run(concat.child, &mut output)
                    );
                    child?;
                    own?;
                    output.write_all(&parent).await?;
                }
            }
            Ok::<_, PipelineError>(())
        }
        .await;

        if result.is_ok() {
            self.metrics.concatenated();
            debug!(child = %concat.child, mode = %concat.mode, ext = %concat.ext, "Concatenated");
        }
        close(output, result, &failure).await;
        drop(input);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::builtin::{CopyHandler, GzipHandler};
    use crate::handlers::{ExtensionRegistry, HandlerOptions, StageInput, StageOutput};
    use crate::pipeline::chain::ChainBuilder;
    use crate::pipeline::graph::HandlerChain;
    use crate::pipeline::sink::{MemorySink, SinkWriter};
    use crate::source::SourceFile;
    use async_compression::tokio::bufread::GzipDecoder;
    use async_trait::async_trait;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    /// Upper-cases its input, standing in for a compiler
    struct UppercaseHandler;

    #[async_trait]
    impl Handler for UppercaseHandler {
        fn name(&self) -> &str {
            "upper"
        }

        fn output_ext(&self) -> &str {
            "js"
        }

        async fn handle(
            &self,
            input: StageInput<'_>,
            output: StageOutput<'_>,
            _meta: &AssetMeta,
        ) -> Result<(), HandlerError> {
            let mut text = Vec::new();
            input.read_to_end(&mut text).await?;
            output.write_all(&text.to_ascii_uppercase()).await?;
            Ok(())
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl Handler for FailingHandler {
        fn name(&self) -> &str {
            "fail"
        }

        fn output_ext(&self) -> &str {
            "js"
        }

        async fn handle(
            &self,
            input: StageInput<'_>,
            output: StageOutput<'_>,
            _meta: &AssetMeta,
        ) -> Result<(), HandlerError> {
            let mut head = [0u8; 4];
            input.read_exact(&mut head).await?;
            output.write_all(&head).await?;
            Err(HandlerError::InvalidInput("unexpected token".to_string()))
        }
    }

    /// Claims more descriptors than the tests' budgets hold
    struct HungryHandler;

    #[async_trait]
    impl Handler for HungryHandler {
        fn name(&self) -> &str {
            "hungry"
        }

        fn output_ext(&self) -> &str {
            "txt"
        }

        fn required_fds(&self) -> usize {
            3
        }

        async fn handle(
            &self,
            input: StageInput<'_>,
            output: StageOutput<'_>,
            _meta: &AssetMeta,
        ) -> Result<(), HandlerError> {
            tokio::io::copy(input, output).await?;
            Ok(())
        }
    }

    /// Records how many permits are held while it runs
    struct ReservingHandler {
        budget: FdBudget,
        held: Arc<Mutex<Option<usize>>>,
    }

    #[async_trait]
    impl Handler for ReservingHandler {
        fn name(&self) -> &str {
            "reserving"
        }

        fn output_ext(&self) -> &str {
            "txt"
        }

        fn required_fds(&self) -> usize {
            3
        }

        async fn handle(
            &self,
            input: StageInput<'_>,
            output: StageOutput<'_>,
            _meta: &AssetMeta,
        ) -> Result<(), HandlerError> {
            *self.held.lock().unwrap() = Some(self.budget.held());
            tokio::io::copy(input, output).await?;
            Ok(())
        }
    }

    /// Refuses to open compressed outputs
    #[derive(Clone, Default)]
    struct NoGzipSink {
        inner: MemorySink,
    }

    #[async_trait]
    impl OutputSink for NoGzipSink {
        async fn open(&self, meta: &AssetMeta) -> io::Result<SinkWriter> {
            if meta.file_name().ends_with(".gz") {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only"));
            }
            self.inner.open(meta).await
        }
    }

    fn source(dir: &Path, file: &str, content: &str) -> SourceFile {
        let path = dir.join(file);
        fs::write(&path, content).unwrap();
        SourceFile::from_relative(dir, &path).unwrap()
    }

    fn add_source(graph: &mut ChainGraph, registry: &ExtensionRegistry, file: SourceFile) -> ChainId {
        let steps = ChainBuilder::new(registry).build(file.ext());
        graph.add(HandlerChain::for_source(file, steps))
    }

    fn executor(graph: ChainGraph, budget: FdBudget, sink: &MemorySink) -> Executor {
        Executor::new(Arc::new(graph), budget, Arc::new(sink.clone())).with_pipe_capacity(16)
    }

    #[tokio::test]
    async fn test_fork_branches_see_identical_input() {
        let temp_dir = TempDir::new().unwrap();
        let mut registry = ExtensionRegistry::new();
        registry.register("x", "y", Arc::new(CopyHandler::new("y")), HandlerOptions::FORK);
        registry.register("x", "z", Arc::new(CopyHandler::new("z")), HandlerOptions::FORK);

        let content = "fork me ".repeat(100);
        let mut graph = ChainGraph::new();
        let id = add_source(&mut graph, &registry, source(temp_dir.path(), "data.x", &content));

        let sink = MemorySink::new();
        let executor = executor(graph, FdBudget::default(), &sink);
        let meta = executor.write(id).await.unwrap();

        assert_eq!(meta.file_name(), "data.x");
        assert_eq!(sink.file_names(), vec!["data.x", "data.y", "data.z"]);
        for name in ["data.x", "data.y", "data.z"] {
            assert_eq!(sink.get(name).unwrap(), content.as_bytes(), "{name}");
        }
        assert_eq!(executor.metrics().snapshot().forks_completed, 2);
        assert_eq!(executor.budget().held(), 0);
    }

    #[tokio::test]
    async fn test_compile_then_gzip_fork() {
        let temp_dir = TempDir::new().unwrap();
        let mut registry = ExtensionRegistry::new();
        registry.register("coffee", "js", Arc::new(UppercaseHandler), HandlerOptions::FLOW);
        registry.register("*", "gz", Arc::new(GzipHandler::new("gz")), HandlerOptions::FORK);

        let mut graph = ChainGraph::new();
        let id = add_source(
            &mut graph,
            &registry,
            source(temp_dir.path(), "app.coffee", "square = (x) -> x * x\n"),
        );

        let sink = MemorySink::new();
        let executor = executor(graph, FdBudget::default(), &sink);
        let meta = executor.write(id).await.unwrap();

        assert_eq!(meta.file_name(), "app.js");
        assert_eq!(sink.file_names(), vec!["app.js", "app.js.gz"]);

        let js = sink.get("app.js").unwrap();
        assert_eq!(js, b"SQUARE = (X) -> X * X\n");

        let compressed = sink.get("app.js.gz").unwrap();
        let mut plain = Vec::new();
        GzipDecoder::new(&compressed[..])
            .read_to_end(&mut plain)
            .await
            .unwrap();
        assert_eq!(plain, js);
    }

    async fn concatenated(order: &[&str]) -> Vec<u8> {
        let temp_dir = TempDir::new().unwrap();
        let registry = ExtensionRegistry::new();
        let mut graph = ChainGraph::new();
        let main = add_source(&mut graph, &registry, source(temp_dir.path(), "main.js", "MAIN;"));
        let first = add_source(&mut graph, &registry, source(temp_dir.path(), "a.js", "A;"));
        let second = add_source(&mut graph, &registry, source(temp_dir.path(), "b.js", "B;"));

        for entry in order {
            let id = match *entry {
                "a" => first,
                "b" => second,
                _ => main,
            };
            graph.include(main, id);
        }
        graph.merge_all().unwrap();
        assert_eq!(graph.roots(), vec![main]);

        let sink = MemorySink::new();
        executor(graph, FdBudget::new(2), &sink)
            .write(main)
            .await
            .unwrap();
        sink.get("main.js").unwrap()
    }

    #[tokio::test]
    async fn test_concatenation_append() {
        assert_eq!(concatenated(&["self", "a", "b"]).await, b"MAIN;A;B;");
    }

    #[tokio::test]
    async fn test_concatenation_prepend() {
        assert_eq!(concatenated(&["a", "b", "self"]).await, b"A;B;MAIN;");
    }

    #[tokio::test]
    async fn test_concatenation_around_self() {
        assert_eq!(concatenated(&["a", "self", "b"]).await, b"A;MAIN;B;");
    }

    #[tokio::test]
    async fn test_handler_failure_fails_chain() {
        let temp_dir = TempDir::new().unwrap();
        let mut registry = ExtensionRegistry::new();
        registry.register("coffee", "js", Arc::new(FailingHandler), HandlerOptions::FLOW);
        registry.register("js", "min", Arc::new(CopyHandler::new("min")), HandlerOptions::FLOW);

        let mut graph = ChainGraph::new();
        let id = add_source(
            &mut graph,
            &registry,
            source(temp_dir.path(), "broken.coffee", "this is not coffee"),
        );

        let sink = MemorySink::new();
        let executor = executor(graph, FdBudget::new(1), &sink);
        let err = executor.write(id).await.unwrap_err();

        match err {
            PipelineError::Handler { handler, source } => {
                assert_eq!(handler, "fail");
                assert!(matches!(source, HandlerError::InvalidInput(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(executor.budget().held(), 0);
        assert_eq!(executor.metrics().snapshot().chains_executed, 0);
    }

    #[tokio::test]
    async fn test_missing_source_file() {
        let registry = ExtensionRegistry::new();
        let mut graph = ChainGraph::new();
        let gone = SourceFile::new("/nonexistent/app.js", "app", vec!["js".to_string()]);
        let id = add_source(&mut graph, &registry, gone);

        let mut out = Vec::new();
        let executor = executor(graph, FdBudget::default(), &MemorySink::new());
        let err = executor.execute(id, &mut out).await.unwrap_err();
        assert!(matches!(err, PipelineError::Source { .. }));
    }

    #[tokio::test]
    async fn test_unavailable_descriptors_materialize_input() {
        let temp_dir = TempDir::new().unwrap();
        let mut registry = ExtensionRegistry::new();
        registry.register("md", "txt", Arc::new(HungryHandler), HandlerOptions::FLOW);

        let mut graph = ChainGraph::new();
        let id = add_source(&mut graph, &registry, source(temp_dir.path(), "notes.md", "# notes"));

        let mut out = Vec::new();
        let executor = executor(graph, FdBudget::new(2), &MemorySink::new());
        let meta = executor.execute(id, &mut out).await.unwrap();

        assert_eq!(out, b"# notes");
        assert_eq!(meta.file_name(), "notes.txt");
        assert_eq!(executor.metrics().snapshot().materialized_inputs, 1);
        assert_eq!(executor.budget().held(), 0);
    }

    #[tokio::test]
    async fn test_source_waits_for_permit() {
        let temp_dir = TempDir::new().unwrap();
        let registry = ExtensionRegistry::new();
        let mut graph = ChainGraph::new();
        let id = add_source(&mut graph, &registry, source(temp_dir.path(), "site.css", "p{}"));

        let budget = FdBudget::new(1);
        let held = budget.try_acquire(1).unwrap();
        let sink = MemorySink::new();
        let executor = executor(graph, budget, &sink);

        let running = {
            let executor = executor.clone();
            tokio::spawn(async move { executor.write(id).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!running.is_finished());

        held.release();
        running.await.unwrap().unwrap();
        assert_eq!(sink.get("site.css").unwrap(), b"p{}");
        assert_eq!(executor.metrics().snapshot().fd_waits, 1);
    }

    #[tokio::test]
    async fn test_failed_fork_branch_fails_chain() {
        let temp_dir = TempDir::new().unwrap();
        let mut registry = ExtensionRegistry::new();
        registry.register("*", "gz", Arc::new(GzipHandler::new("gz")), HandlerOptions::FORK);

        let mut graph = ChainGraph::new();
        let id = add_source(
            &mut graph,
            &registry,
            source(temp_dir.path(), "site.css", &"p { margin: 0 }\n".repeat(50)),
        );

        let sink = NoGzipSink::default();
        let executor = Executor::new(Arc::new(graph), FdBudget::new(2), Arc::new(sink.clone()))
            .with_pipe_capacity(16);
        let err = executor.write(id).await.unwrap_err();

        match err {
            PipelineError::Io(err) => assert_eq!(err.kind(), io::ErrorKind::PermissionDenied),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(executor.budget().held(), 0);
        assert_eq!(executor.metrics().snapshot().forks_completed, 0);
        assert_eq!(executor.metrics().snapshot().chains_executed, 0);
    }

    #[tokio::test]
    async fn test_reserved_descriptors_held_while_handling() {
        let temp_dir = TempDir::new().unwrap();
        let budget = FdBudget::new(10);
        let held = Arc::new(Mutex::new(None));
        let mut registry = ExtensionRegistry::new();
        registry.register(
            "md",
            "txt",
            Arc::new(ReservingHandler {
                budget: budget.clone(),
                held: held.clone(),
            }),
            HandlerOptions::FLOW,
        );

        let mut graph = ChainGraph::new();
        let id = add_source(&mut graph, &registry, source(temp_dir.path(), "notes.md", "# notes"));

        let mut out = Vec::new();
        let executor = executor(graph, budget, &MemorySink::new());
        executor.execute(id, &mut out).await.unwrap();

        assert_eq!(out, b"# notes");
        // Three reserved, plus the source's permit if it is still reading
        let during = held.lock().unwrap().unwrap();
        assert!((3..=4).contains(&during), "held {during}");
        assert_eq!(executor.metrics().snapshot().materialized_inputs, 0);
        assert_eq!(executor.budget().held(), 0);
    }
}
