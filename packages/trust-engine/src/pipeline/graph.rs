//! Analyzer dependency graph.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use crate::error::{PipelineError, Result};
use crate::traits::analyzer::Analyzer;

/// Validated set of analyzers, in registration order.
///
/// Built once at orchestrator construction; every job reuses it.
#[derive(Clone)]
pub struct AnalyzerGraph {
    analyzers: Vec<Arc<dyn Analyzer>>,
    index: HashMap<String, usize>,
}

impl std::fmt::Debug for AnalyzerGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalyzerGraph")
            .field("analyzers", &self.names().collect::<Vec<_>>())
            .finish()
    }
}

impl AnalyzerGraph {
    /// Validate names and dependencies.
    ///
    /// Duplicate names, unknown dependencies, self-dependencies and cycles
    /// are configuration errors.
    pub fn new(analyzers: Vec<Arc<dyn Analyzer>>) -> Result<Self> {
        let mut index = HashMap::new();
        for (i, analyzer) in analyzers.iter().enumerate() {
            if index.insert(analyzer.name().to_string(), i).is_some() {
                return Err(PipelineError::Config(format!(
                    "duplicate analyzer name '{}'",
                    analyzer.name()
                )));
            }
        }

        for analyzer in &analyzers {
            for dep in &analyzer.spec().depends_on {
                if !index.contains_key(dep) {
                    return Err(PipelineError::Config(format!(
                        "analyzer '{}' depends on unknown analyzer '{dep}'",
                        analyzer.name()
                    )));
                }
            }
        }

        let graph = Self { analyzers, index };
        graph.check_acyclic()?;
        Ok(graph)
    }

    /// Kahn's algorithm; anything left over sits on a cycle.
    fn check_acyclic(&self) -> Result<()> {
        let mut remaining: BTreeMap<&str, usize> = self
            .analyzers
            .iter()
            .map(|a| (a.name(), a.spec().depends_on.len()))
            .collect();
        let mut ready: Vec<&str> = remaining
            .iter()
            .filter(|(_, deps)| **deps == 0)
            .map(|(name, _)| *name)
            .collect();
        let mut settled = HashSet::new();

        while let Some(name) = ready.pop() {
            settled.insert(name);
            for dependent in self.dependents_of(name) {
                if let Some(deps) = remaining.get_mut(dependent) {
                    *deps -= 1;
                    if *deps == 0 {
                        ready.push(dependent);
                    }
                }
            }
        }

        if settled.len() != self.analyzers.len() {
            let cyclic: Vec<_> = remaining
                .keys()
                .filter(|name| !settled.contains(*name))
                .copied()
                .collect();
            return Err(PipelineError::Config(format!(
                "analyzer dependency cycle among: {}",
                cyclic.join(", ")
            )));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.analyzers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.analyzers.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.analyzers.iter().map(|a| a.name())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Analyzer>> {
        self.index.get(name).map(|i| &self.analyzers[*i])
    }

    pub fn all(&self) -> &[Arc<dyn Analyzer>] {
        &self.analyzers
    }

    /// Analyzers with no dependencies; dispatched as soon as content exists.
    pub fn independent(&self) -> impl Iterator<Item = &Arc<dyn Analyzer>> {
        self.analyzers.iter().filter(|a| !a.spec().is_dependent())
    }

    pub fn dependent(&self) -> impl Iterator<Item = &Arc<dyn Analyzer>> {
        self.analyzers.iter().filter(|a| a.spec().is_dependent())
    }

    /// Analyzers that list `name` directly in `depends_on`.
    pub fn dependents_of<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.analyzers
            .iter()
            .filter(move |a| a.spec().depends_on.iter().any(|d| d == name))
            .map(|a| a.name())
    }
}
