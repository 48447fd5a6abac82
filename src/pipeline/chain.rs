//! Per-extension handler chains
//!
//! A chain is the ordered list of [`Step`]s applied to one file's stream.
//! [`ChainBuilder`] derives it from the [`ExtensionRegistry`]: the first
//! Flow registration for an extension extends the chain in place, every
//! other registration becomes a fork step that tees the stream into an
//! independent branch.

use std::fmt;
use std::sync::Arc;

use super::graph::ChainId;
use crate::handlers::{
    AssetMeta, DefaultHandler, ExtensionRegistry, Handler, HandlerOptions, InputMode,
    RegisteredHandler,
};

/// Whether a child's content lands before or after the parent's own
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcatMode {
    Prepend,
    Append,
}

impl fmt::Display for ConcatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConcatMode::Prepend => f.write_str("prepend"),
            ConcatMode::Append => f.write_str("append"),
        }
    }
}

/// Fork point: duplicates the stream into `steps` while the original
/// continues through the outer chain unchanged
#[derive(Clone)]
pub struct Fork {
    pub steps: Vec<Step>,
    /// Extension of the stream at the fork point
    pub ext: String,
}

/// Concatenation point inserted by the merge engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Concatenation {
    pub child: ChainId,
    pub mode: ConcatMode,
    /// Extension shared by the parent's stream and the child's output
    pub ext: String,
    /// Index of the child in the parent's declared inclusion order
    pub position: usize,
}

/// One step of a handler chain
#[derive(Clone)]
pub enum Step {
    Handler(RegisteredHandler),
    Fork(Fork),
    Concat(Concatenation),
}

impl Step {
    pub fn handler(handler: Arc<dyn Handler>, options: HandlerOptions) -> Self {
        Step::Handler(RegisteredHandler { handler, options })
    }

    /// Pass-through step for an extension nothing is registered for
    pub fn pass_through(ext: &str) -> Self {
        Step::handler(Arc::new(DefaultHandler::new(ext)), HandlerOptions::FLOW)
    }

    pub fn output_ext(&self) -> &str {
        match self {
            Step::Handler(registered) => registered.handler.output_ext(),
            Step::Fork(fork) => &fork.ext,
            Step::Concat(concat) => &concat.ext,
        }
    }

    /// Apply this step's renaming to the asset metadata. Forks and
    /// concatenations leave the main stream's name untouched.
    pub fn rename(&self, meta: &mut AssetMeta) {
        if let Step::Handler(registered) = self {
            registered.handler.rename(meta);
        }
    }

    pub fn is_concat(&self) -> bool {
        matches!(self, Step::Concat(_))
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Handler(registered) => write!(
                f,
                "{}({})",
                registered.handler.name(),
                registered.handler.output_ext()
            ),
            Step::Fork(fork) => write!(f, "fork[{}]", DisplaySteps(&fork.steps)),
            Step::Concat(concat) => write!(
                f,
                "concat({}, {}, {})",
                concat.child, concat.mode, concat.ext
            ),
        }
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Formats a step list as `a(b) -> fork[gzip(gz)] -> ...`
pub struct DisplaySteps<'a>(pub &'a [Step]);

impl fmt::Display for DisplaySteps<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, step) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" -> ")?;
            }
            write!(f, "{step}")?;
        }
        Ok(())
    }
}

/// Fold every step's renaming over `meta`, in chain order
pub fn plan_meta(steps: &[Step], mut meta: AssetMeta) -> AssetMeta {
    for step in steps {
        step.rename(&mut meta);
    }
    meta
}

/// Builds handler chains from an [`ExtensionRegistry`]
pub struct ChainBuilder<'a> {
    registry: &'a ExtensionRegistry,
}

impl<'a> ChainBuilder<'a> {
    pub fn new(registry: &'a ExtensionRegistry) -> Self {
        Self { registry }
    }

    /// Build the chain for a file with extension `in_ext`. Never empty: an
    /// extension without handlers gets a single pass-through step.
    pub fn build(&self, in_ext: &str) -> Vec<Step> {
        let mut steps = Vec::new();
        self.extend(&mut steps, in_ext, &mut Vec::new());
        if steps.is_empty() {
            steps.push(Step::pass_through(in_ext));
        }
        steps
    }

    /// Append the steps reachable from `in_ext`. `path` holds the
    /// registrations (matched key, output ext) already applied on the way
    /// here; each is applied at most once per path, which ends recursion
    /// through identity and wildcard registrations.
    fn extend(&self, steps: &mut Vec<Step>, in_ext: &str, path: &mut Vec<(String, String)>) {
        let Some((key, handlers)) = self.registry.lookup(in_ext) else {
            return;
        };

        let mut flow: Option<(&String, &RegisteredHandler)> = None;
        for (out_ext, registered) in handlers {
            let applied = (key.to_string(), out_ext.clone());
            if path.contains(&applied) {
                continue;
            }

            if registered.options.input_mode == InputMode::Flow && flow.is_none() {
                flow = Some((out_ext, registered));
                continue;
            }

            path.push(applied);
            let mut branch = vec![Step::Handler(registered.clone())];
            self.extend(&mut branch, out_ext, path);
            path.pop();

            steps.push(Step::Fork(Fork {
                steps: branch,
                ext: in_ext.to_string(),
            }));
        }

        if let Some((out_ext, registered)) = flow {
            path.push((key.to_string(), out_ext.clone()));
            steps.push(Step::Handler(registered.clone()));
            self.extend(steps, out_ext, path);
            path.pop();
        }
    }
}
