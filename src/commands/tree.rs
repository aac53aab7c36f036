//! # Tree Command Implementation
//!
//! This module implements the `tree` subcommand, which resolves the inputs
//! and displays the reference graph as a tree: primaries as roots,
//! discovered dependencies beneath the references that pulled them in.
//!
//! Shared dependencies appear once per parent; a node already shown on the
//! current branch is cut off with a cycle marker rather than recursed into.

use anyhow::Result;
use clap::Args;
use ptree::{print_tree, TreeItem};
use std::collections::HashSet;
use std::path::PathBuf;

use refsolve::config;
use refsolve::decisions::NullBackend;
use refsolve::output::ColorMode;
use refsolve::resolver::{GraphNode, ResolverEngine};
use refsolve::suggestions;

/// Status glyphs appended to each node label.
struct Markers {
    resolved: &'static str,
    unresolved: &'static str,
}

impl Markers {
    fn for_mode(color: ColorMode) -> Self {
        if color.enabled() {
            Markers {
                resolved: "✓",
                unresolved: "✗",
            }
        } else {
            Markers {
                resolved: "[ok]",
                unresolved: "[unresolved]",
            }
        }
    }
}

/// Display the resolved reference graph as a tree
#[derive(Args, Debug)]
pub struct TreeArgs {
    /// Path to the inputs file describing primaries and search paths.
    #[arg(
        short = 'i',
        long,
        value_name = "FILE",
        default_value = "refsolve.yaml",
        env = "REFSOLVE_INPUTS"
    )]
    pub inputs: PathBuf,

    /// Maximum depth to display (unlimited when omitted)
    #[arg(long, value_name = "DEPTH")]
    pub max_depth: Option<usize>,
}

/// Execute the `tree` command.
pub fn execute(args: TreeArgs, color: ColorMode) -> Result<()> {
    let config = config::from_file(&args.inputs).map_err(|e| match e {
        refsolve::error::Error::Inputs { ref path, .. } if !path.exists() => {
            suggestions::inputs_not_found(path)
        }
        other => anyhow::Error::new(other),
    })?;
    if config.primary_assemblies.is_empty() && config.primary_files.is_empty() {
        return Err(suggestions::no_primaries(&args.inputs));
    }

    let engine = ResolverEngine::with_defaults(config, Box::new(NullBackend));
    let report = engine.resolve()?;
    let markers = Markers::for_mode(color);

    let max_depth = args.max_depth.unwrap_or(usize::MAX);
    for (index, node) in report.graph.iter().enumerate() {
        if !node.is_primary {
            continue;
        }
        let mut on_branch = HashSet::new();
        let tree = build_tree_node(
            &report.graph,
            index,
            &markers,
            max_depth,
            0,
            &mut on_branch,
        );
        print_tree(&tree).map_err(|e| anyhow::anyhow!("Failed to display tree: {}", e))?;
    }
    Ok(())
}

fn build_tree_node(
    graph: &[GraphNode],
    index: usize,
    markers: &Markers,
    max_depth: usize,
    depth: usize,
    on_branch: &mut HashSet<usize>,
) -> TreeNode {
    let node = &graph[index];
    let status = if node.resolved {
        markers.resolved
    } else {
        markers.unresolved
    };
    let label = format!("{} {}", node.identity, status);

    if depth >= max_depth {
        return TreeNode {
            label,
            children: Vec::new(),
        };
    }

    on_branch.insert(index);
    let children = node
        .children
        .iter()
        .map(|&child| {
            if on_branch.contains(&child) {
                TreeNode {
                    label: format!("{} (cycle)", graph[child].identity),
                    children: Vec::new(),
                }
            } else {
                build_tree_node(graph, child, markers, max_depth, depth + 1, on_branch)
            }
        })
        .collect();
    on_branch.remove(&index);

    TreeNode { label, children }
}

/// Tree node structure for ptree visualization
#[derive(Clone)]
struct TreeNode {
    label: String,
    children: Vec<TreeNode>,
}

impl TreeItem for TreeNode {
    type Child = TreeNode;

    fn write_self<W: std::io::Write>(
        &self,
        f: &mut W,
        _style: &ptree::Style,
    ) -> std::io::Result<()> {
        write!(f, "{}", self.label)
    }

    fn children(&self) -> std::borrow::Cow<'_, [Self::Child]> {
        std::borrow::Cow::Borrowed(&self.children)
    }
}
