//! Tree-of-Thoughts reasoning (spec §4.5): a scored, branching search over
//! partial reasoning states.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::message::Message;
use crate::model::{ChatOptions, ChatProvider};

/// A node in the reasoning tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningNode {
    /// Unique id within the tree (index into `ReasoningTree::nodes`).
    pub id: usize,
    /// Partial reasoning state (free text).
    pub state: String,
    /// Score in `[0, 1]`.
    pub score: f64,
    /// Depth from the root (root is depth 0).
    pub depth: usize,
    /// Child node ids.
    pub children: Vec<usize>,
}

/// A Tree-of-Thoughts search tree. Acyclic by construction: nodes are only
/// ever appended, and `children` only ever references later ids.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReasoningTree {
    /// Flat node storage; index 0 is the root once the tree is non-empty.
    pub nodes: Vec<ReasoningNode>,
}

impl ReasoningTree {
    /// Create a tree with a single root node at depth 0.
    #[must_use]
    pub fn with_root(state: impl Into<String>, score: f64) -> Self {
        Self {
            nodes: vec![ReasoningNode {
                id: 0,
                state: state.into(),
                score,
                depth: 0,
                children: Vec::new(),
            }],
        }
    }

    /// Append a child under `parent_id`, returning the new node's id.
    pub fn add_child(&mut self, parent_id: usize, state: String, score: f64) -> usize {
        let depth = self.nodes[parent_id].depth + 1;
        let id = self.nodes.len();
        self.nodes.push(ReasoningNode {
            id,
            state,
            score,
            depth,
            children: Vec::new(),
        });
        self.nodes[parent_id].children.push(id);
        id
    }

    /// The highest-scored node in the whole tree (used when `max_depth` is hit
    /// with no node crossing the acceptance threshold).
    #[must_use]
    pub fn best_node(&self) -> Option<&ReasoningNode> {
        self.nodes
            .iter()
            .max_by(|a, b| a.score.total_cmp(&b.score))
    }

    fn leaves(&self) -> impl Iterator<Item = &ReasoningNode> {
        self.nodes.iter().filter(|n| n.children.is_empty())
    }
}

/// How the frontier of candidate nodes is explored (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExplorationStrategy {
    /// Priority queue ordered by descending score; expand the best frontier node.
    #[default]
    BestFirst,
    /// At each depth, keep only the top `beam_width` nodes by score.
    BeamSearch,
    /// Expand the most recently added frontier node (LIFO).
    DepthFirst,
}

/// ToT knobs (spec §6).
#[derive(Debug, Clone, Copy)]
pub struct TreeConfig {
    /// Maximum depth any node may reach.
    pub max_depth: usize,
    /// Maximum children requested per expansion.
    pub max_branching: usize,
    /// Beam width, used only by [`ExplorationStrategy::BeamSearch`].
    pub beam_width: usize,
    /// Frontier exploration order.
    pub strategy: ExplorationStrategy,
    /// A node at or above this score becomes the accepted final answer.
    pub acceptance_threshold: f64,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            max_depth: 5,
            max_branching: 3,
            beam_width: 3,
            strategy: ExplorationStrategy::BestFirst,
            acceptance_threshold: 0.9,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Candidate {
    state: String,
    score: f64,
}

/// Request `max_branching` candidate continuations for `node` from the model.
async fn expand_node(
    provider: &dyn ChatProvider,
    goal: &str,
    node: &ReasoningNode,
    config: &TreeConfig,
) -> Result<Vec<Candidate>> {
    let prompt = format!(
        "Goal: {goal}\nCurrent partial reasoning (depth {}):\n{}\n\n\
         Propose up to {} distinct continuations. Respond with a JSON array of \
         objects: [{{\"state\": str, \"score\": number in [0,1]}}, ...].",
        node.depth, node.state, config.max_branching
    );
    let response = provider
        .generate(vec![Message::user(prompt)], ChatOptions::default())
        .await?;
    let mut candidates: Vec<Candidate> =
        serde_json::from_str(&response.message.content).unwrap_or_default();
    candidates.truncate(config.max_branching);
    Ok(candidates)
}

/// Outcome of a tree search.
pub enum TreeOutcome {
    /// A node crossed the acceptance threshold; this is its state.
    Accepted(String),
    /// `max_depth` was reached or the frontier emptied; this is the best leaf/node found.
    BestEffort(String),
}

/// Run a full Tree-of-Thoughts search to termination (spec §4.5).
///
/// This drives the whole expansion loop itself (rather than one step at a
/// time) since the frontier bookkeeping differs meaningfully across the three
/// [`ExplorationStrategy`] variants and the turn loop only needs the final
/// accepted/best-effort state, not intermediate frontiers.
pub async fn search(
    provider: &dyn ChatProvider,
    goal: &str,
    config: &TreeConfig,
) -> Result<(ReasoningTree, TreeOutcome)> {
    let mut tree = ReasoningTree::with_root(goal.to_owned(), 0.0);
    let mut frontier: Vec<usize> = vec![0];

    loop {
        if frontier.is_empty() {
            let best = tree.best_node().map_or_else(String::new, |n| n.state.clone());
            return Ok((tree, TreeOutcome::BestEffort(best)));
        }

        let next_id = match config.strategy {
            ExplorationStrategy::BestFirst => {
                let (pos, _) = frontier
                    .iter()
                    .enumerate()
                    .max_by(|(_, &a), (_, &b)| tree.nodes[a].score.total_cmp(&tree.nodes[b].score))
                    .expect("frontier non-empty");
                frontier.remove(pos)
            }
            ExplorationStrategy::DepthFirst => frontier.pop().expect("frontier non-empty"),
            ExplorationStrategy::BeamSearch => {
                frontier.sort_by(|&a, &b| tree.nodes[b].score.total_cmp(&tree.nodes[a].score));
                frontier.truncate(config.beam_width.max(1));
                frontier.remove(0)
            }
        };

        if tree.nodes[next_id].score >= config.acceptance_threshold {
            return Ok((
                tree.clone(),
                TreeOutcome::Accepted(tree.nodes[next_id].state.clone()),
            ));
        }

        if tree.nodes[next_id].depth >= config.max_depth {
            continue;
        }

        let candidates = expand_node(provider, goal, &tree.nodes[next_id], config).await?;
        for candidate in candidates {
            let child_id = tree.add_child(next_id, candidate.state, candidate.score.clamp(0.0, 1.0));
            if tree.nodes[child_id].score >= config.acceptance_threshold {
                return Ok((
                    tree.clone(),
                    TreeOutcome::Accepted(tree.nodes[child_id].state.clone()),
                ));
            }
            if tree.nodes[child_id].depth < config.max_depth {
                frontier.push(child_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tree_best_node_picks_max_score() {
        let mut tree = ReasoningTree::with_root("root", 0.1);
        tree.add_child(0, "a".into(), 0.4);
        tree.add_child(0, "b".into(), 0.9);
        assert_eq!(tree.best_node().unwrap().state, "b");
    }

    #[test]
    fn tree_acyclic_children_reference_later_ids() {
        let mut tree = ReasoningTree::with_root("root", 0.0);
        let child = tree.add_child(0, "child".into(), 0.5);
        assert!(tree.nodes[0].children.contains(&child));
        assert_eq!(tree.nodes[child].depth, 1);
    }

    #[test]
    fn leaves_have_no_children() {
        let mut tree = ReasoningTree::with_root("root", 0.0);
        tree.add_child(0, "a".into(), 0.5);
        assert_eq!(tree.leaves().count(), 1);
    }
}
