//! Step flow graphs, validated at construction.
//!
//! A [`StepFlow`] is a directed graph of steps with exactly one entry and at
//! least one terminal. Steps are stored in an arena and reference successors
//! by index, so branching flows never form ownership cycles. A flow with an
//! unknown target, an unreachable step, a cycle, or no terminal step is
//! rejected before it can run.

use std::collections::HashMap;
use std::collections::VecDeque;

use super::step::{AnswerRequirement, NextStep, Step};
use super::FlowError;

/// Successor resolution with step ids replaced by arena indices.
#[derive(Debug, Clone)]
pub(crate) enum ResolvedNext {
    Terminal,
    Fixed(usize),
    Branch {
        arms: Vec<(Vec<AnswerRequirement>, usize)>,
        otherwise: usize,
    },
}

impl ResolvedNext {
    fn successors(&self) -> Vec<usize> {
        match self {
            ResolvedNext::Terminal => Vec::new(),
            ResolvedNext::Fixed(to) => vec![*to],
            ResolvedNext::Branch { arms, otherwise } => {
                let mut out: Vec<usize> = arms.iter().map(|(_, to)| *to).collect();
                out.push(*otherwise);
                out
            }
        }
    }
}

/// An ordered/branching sequence of steps completed as one user-facing flow
/// (onboarding, sign-up). Immutable once built.
#[derive(Debug, Clone)]
pub struct StepFlow {
    id: String,
    steps: Vec<Step>,
    next: Vec<ResolvedNext>,
    entry: usize,
}

impl StepFlow {
    /// Build and validate a flow.
    ///
    /// `steps` pairs each step with its successor rule; `entry_id` names the
    /// single entry step.
    ///
    /// # Errors
    /// - `DuplicateStep` if two steps share an id
    /// - `UnknownStep` if `entry_id` or any successor target is absent
    /// - `UnreachableStep` if a step cannot be reached from the entry
    /// - `CycleDetected` if a step is its own transitive successor
    /// - `NoTerminalStep` if no step ends the flow
    pub fn new(
        id: impl Into<String>,
        entry_id: &str,
        steps: Vec<(Step, NextStep)>,
    ) -> Result<Self, FlowError> {
        let id = id.into();

        let mut index: HashMap<String, usize> = HashMap::with_capacity(steps.len());
        for (i, (step, _)) in steps.iter().enumerate() {
            if index.insert(step.id().to_string(), i).is_some() {
                return Err(FlowError::DuplicateStep {
                    step: step.id().to_string(),
                });
            }
        }

        let entry = *index
            .get(entry_id)
            .ok_or_else(|| FlowError::UnknownStep {
                step: entry_id.to_string(),
            })?;

        let resolve = |from: &Step, target: &str| -> Result<usize, FlowError> {
            index.get(target).copied().ok_or_else(|| FlowError::UnknownStep {
                step: format!("{} (referenced from {})", target, from.id()),
            })
        };

        let mut next = Vec::with_capacity(steps.len());
        let mut has_terminal = false;
        for (step, rule) in &steps {
            let resolved = match rule {
                NextStep::Terminal => {
                    has_terminal = true;
                    ResolvedNext::Terminal
                }
                NextStep::Fixed { to } => ResolvedNext::Fixed(resolve(step, to)?),
                NextStep::Branch { arms, otherwise } => ResolvedNext::Branch {
                    arms: arms
                        .iter()
                        .map(|arm| Ok((arm.requirements.clone(), resolve(step, &arm.to)?)))
                        .collect::<Result<Vec<_>, FlowError>>()?,
                    otherwise: resolve(step, otherwise)?,
                },
            };
            next.push(resolved);
        }

        if !has_terminal {
            return Err(FlowError::NoTerminalStep { flow: id });
        }

        let flow = Self {
            id,
            steps: steps.into_iter().map(|(step, _)| step).collect(),
            next,
            entry,
        };
        flow.check_reachability()?;
        flow.check_acyclic()?;
        Ok(flow)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub(crate) fn entry(&self) -> usize {
        self.entry
    }

    pub(crate) fn step(&self, idx: usize) -> &Step {
        &self.steps[idx]
    }

    pub(crate) fn next_of(&self, idx: usize) -> &ResolvedNext {
        &self.next[idx]
    }

    fn check_reachability(&self) -> Result<(), FlowError> {
        let mut seen = vec![false; self.steps.len()];
        let mut queue = VecDeque::from([self.entry]);
        seen[self.entry] = true;
        while let Some(i) = queue.pop_front() {
            for succ in self.next[i].successors() {
                if !seen[succ] {
                    seen[succ] = true;
                    queue.push_back(succ);
                }
            }
        }
        match seen.iter().position(|&reached| !reached) {
            None => Ok(()),
            Some(i) => Err(FlowError::UnreachableStep {
                step: self.steps[i].id().to_string(),
            }),
        }
    }

    fn check_acyclic(&self) -> Result<(), FlowError> {
        // Iterative DFS with an explicit on-path marker.
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            White,
            Grey,
            Black,
        }
        let mut marks = vec![Mark::White; self.steps.len()];
        let mut stack: Vec<(usize, usize)> = vec![(self.entry, 0)];
        marks[self.entry] = Mark::Grey;

        while let Some(top) = stack.last_mut() {
            let (node, edge) = *top;
            let succs = self.next[node].successors();
            if edge < succs.len() {
                top.1 += 1;
                let target = succs[edge];
                match marks[target] {
                    Mark::Grey => {
                        return Err(FlowError::CycleDetected {
                            step: self.steps[target].id().to_string(),
                        })
                    }
                    Mark::White => {
                        marks[target] = Mark::Grey;
                        stack.push((target, 0));
                    }
                    Mark::Black => {}
                }
            } else {
                marks[node] = Mark::Black;
                stack.pop();
            }
        }
        Ok(())
    }
}
