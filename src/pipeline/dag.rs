use crate::common::error::{EtlError, Result};
use crate::pipeline::steps::PipelineStep;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// A validated set of steps, held in dependency order
pub struct Dag {
    dag_id: String,
    steps: Vec<Arc<dyn PipelineStep>>,
}

impl Dag {
    /// Checks names are unique, predecessors exist and there is no cycle
    pub fn new(dag_id: impl Into<String>, steps: Vec<Arc<dyn PipelineStep>>) -> Result<Self> {
        let dag_id = dag_id.into();
        let nodes: Vec<(&'static str, Vec<&'static str>)> = steps
            .iter()
            .map(|s| (s.step_name(), s.dependencies()))
            .collect();
        let order = topological_sort(&nodes)?;

        let mut by_name: HashMap<&str, Arc<dyn PipelineStep>> =
            steps.into_iter().map(|s| (s.step_name(), s)).collect();
        let steps = order
            .iter()
            .filter_map(|name| by_name.remove(name))
            .collect();
        Ok(Self { dag_id, steps })
    }

    pub fn dag_id(&self) -> &str {
        &self.dag_id
    }

    /// Steps in topological order
    pub fn steps(&self) -> &[Arc<dyn PipelineStep>] {
        &self.steps
    }

    pub fn step(&self, name: &str) -> Option<&Arc<dyn PipelineStep>> {
        self.steps.iter().find(|s| s.step_name() == name)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Every step that transitively depends on `name`, in topological order
    pub fn descendants(&self, name: &str) -> Vec<&'static str> {
        let mut affected: HashSet<&str> = HashSet::from([name]);
        let mut out = Vec::new();
        for step in &self.steps {
            if step.dependencies().iter().any(|d| affected.contains(d)) {
                affected.insert(step.step_name());
                out.push(step.step_name());
            }
        }
        out
    }
}

/// Kahn's algorithm. Ties keep declaration order so the result is stable.
pub fn topological_sort(nodes: &[(&'static str, Vec<&'static str>)]) -> Result<Vec<&'static str>> {
    let mut seen = HashSet::new();
    for (name, _) in nodes {
        if !seen.insert(*name) {
            return Err(EtlError::Dag(format!("duplicate step name '{name}'")));
        }
    }

    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&'static str>> = HashMap::new();
    for (name, deps) in nodes {
        for dep in deps {
            if !seen.contains(dep) {
                return Err(EtlError::Dag(format!(
                    "step '{name}' depends on unknown step '{dep}'"
                )));
            }
            dependents.entry(*dep).or_default().push(*name);
        }
        in_degree.insert(*name, deps.len());
    }

    let mut queue: VecDeque<&'static str> = nodes
        .iter()
        .filter(|(_, deps)| deps.is_empty())
        .map(|(name, _)| *name)
        .collect();
    let mut order = Vec::with_capacity(nodes.len());
    while let Some(name) = queue.pop_front() {
        order.push(name);
        for next in dependents.get(name).map(Vec::as_slice).unwrap_or_default() {
            if let Some(degree) = in_degree.get_mut(next) {
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(*next);
                }
            }
        }
    }

    if order.len() != nodes.len() {
        let stuck: Vec<&str> = nodes
            .iter()
            .map(|(name, _)| *name)
            .filter(|name| !order.contains(name))
            .collect();
        return Err(EtlError::Dag(format!(
            "dependency cycle among steps: {}",
            stuck.join(", ")
        )));
    }
    Ok(order)
}
