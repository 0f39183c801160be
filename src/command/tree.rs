//! The command tree.
//!
//! Space-separated declaration keys such as `"task get"` become nested
//! namespaces with a leaf at the end. A path can be a leaf or a namespace,
//! never both.

use indexmap::IndexMap;
use thiserror::Error;

use super::CommandDef;

/// Errors raised while building the tree.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    /// A path is declared both as a command and as a namespace.
    #[error("ambiguous command '{path}': conflicts with '{conflict}'")]
    Ambiguous { path: String, conflict: String },

    /// The declaration key has no segments.
    #[error("invalid command path '{0}'")]
    InvalidPath(String),
}

/// An invocable command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafCommand {
    /// Segments from the root
    pub path: Vec<String>,

    pub definition: CommandDef,
}

impl LeafCommand {
    /// The action path this leaf dispatches to.
    pub fn action_path(&self) -> String {
        self.path.join(" ")
    }
}

/// A node of the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandTreeNode {
    Leaf(LeafCommand),
    Namespace(IndexMap<String, CommandTreeNode>),
}

impl CommandTreeNode {
    fn first_leaf(&self) -> Option<&LeafCommand> {
        match self {
            Self::Leaf(leaf) => Some(leaf),
            Self::Namespace(children) => children.values().find_map(Self::first_leaf),
        }
    }

    fn collect_leaves<'a>(&'a self, leaves: &mut Vec<&'a LeafCommand>) {
        match self {
            Self::Leaf(leaf) => leaves.push(leaf),
            Self::Namespace(children) => {
                for child in children.values() {
                    child.collect_leaves(leaves);
                }
            }
        }
    }
}

/// Split a declaration key into segments.
pub fn split_path(key: &str) -> Result<Vec<String>, CommandError> {
    let segments: Vec<String> = key.split_whitespace().map(str::to_string).collect();
    if segments.is_empty() {
        return Err(CommandError::InvalidPath(key.to_string()));
    }
    Ok(segments)
}

/// Normalise a declaration key (`"task  get "` becomes `"task get"`).
pub fn normalize_path(key: &str) -> String {
    key.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Top-level commands and namespaces, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandTree {
    root: IndexMap<String, CommandTreeNode>,
}

impl CommandTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a tree from declarations. Redeclaring a path replaces it.
    pub fn build<'a, I>(declarations: I) -> Result<Self, CommandError>
    where
        I: IntoIterator<Item = (&'a String, &'a CommandDef)>,
    {
        let mut tree = Self::new();
        for (key, definition) in declarations {
            tree.insert(key, definition.clone())?;
        }
        Ok(tree)
    }

    /// Insert one declaration.
    pub fn insert(&mut self, key: &str, definition: CommandDef) -> Result<(), CommandError> {
        let segments = split_path(key)?;
        let Some((last, parents)) = segments.split_last() else {
            return Err(CommandError::InvalidPath(key.to_string()));
        };

        let mut children = &mut self.root;
        for segment in parents {
            let node = children
                .entry(segment.clone())
                .or_insert_with(|| CommandTreeNode::Namespace(IndexMap::new()));
            children = match node {
                CommandTreeNode::Namespace(next) => next,
                CommandTreeNode::Leaf(leaf) => {
                    return Err(CommandError::Ambiguous {
                        path: segments.join(" "),
                        conflict: leaf.action_path(),
                    })
                }
            };
        }

        match children.get_mut(last) {
            Some(CommandTreeNode::Leaf(existing)) => {
                tracing::debug!(command = %segments.join(" "), "Command redeclared");
                existing.definition = definition;
            }
            Some(namespace @ CommandTreeNode::Namespace(_)) => {
                let conflict = namespace
                    .first_leaf()
                    .map_or_else(|| segments.join(" "), LeafCommand::action_path);
                return Err(CommandError::Ambiguous { path: segments.join(" "), conflict });
            }
            None => {
                children.insert(
                    last.clone(),
                    CommandTreeNode::Leaf(LeafCommand { path: segments.clone(), definition }),
                );
            }
        }
        Ok(())
    }

    /// Top-level nodes.
    pub fn children(&self) -> &IndexMap<String, CommandTreeNode> {
        &self.root
    }

    /// Node at the given path.
    pub fn find(&self, path: &str) -> Option<&CommandTreeNode> {
        let mut segments = path.split_whitespace();
        let mut node = self.root.get(segments.next()?)?;
        for segment in segments {
            match node {
                CommandTreeNode::Namespace(children) => node = children.get(segment)?,
                CommandTreeNode::Leaf(_) => return None,
            }
        }
        Some(node)
    }

    /// Leaf at the given path.
    pub fn leaf(&self, path: &str) -> Option<&LeafCommand> {
        match self.find(path)? {
            CommandTreeNode::Leaf(leaf) => Some(leaf),
            CommandTreeNode::Namespace(_) => None,
        }
    }

    /// All leaves, depth first in declaration order.
    pub fn leaves(&self) -> Vec<&LeafCommand> {
        let mut leaves = Vec::new();
        for node in self.root.values() {
            node.collect_leaves(&mut leaves);
        }
        leaves
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn declarations(keys: &[&str]) -> IndexMap<String, CommandDef> {
        keys.iter()
            .map(|key| ((*key).to_string(), CommandDef::new().with_description(*key)))
            .collect()
    }

    #[test]
    fn test_nested_namespaces() {
        let tree = CommandTree::build(&declarations(&["init", "task get", "task list"])).unwrap();

        assert!(matches!(tree.find("init"), Some(CommandTreeNode::Leaf(_))));
        assert!(matches!(tree.find("task"), Some(CommandTreeNode::Namespace(_))));
        let leaf = tree.leaf("task get").unwrap();
        assert_eq!(leaf.path, vec!["task", "get"]);
        assert_eq!(leaf.definition.description.as_deref(), Some("task get"));
        assert!(tree.find("task get more").is_none());
    }

    #[test]
    fn test_leaves_rejoin_to_keys() {
        let keys = ["init", "task get", "task list", "repo clone", "plugin configure", "sync"];
        let tree = CommandTree::build(&declarations(&keys)).unwrap();

        let mut rejoined: Vec<String> = tree.leaves().iter().map(|l| l.action_path()).collect();
        let mut expected: Vec<String> = keys.iter().map(|k| (*k).to_string()).collect();
        rejoined.sort();
        expected.sort();
        assert_eq!(rejoined, expected);
    }

    #[test]
    fn test_leaf_then_namespace_is_ambiguous() {
        let err = CommandTree::build(&declarations(&["task", "task get"])).unwrap_err();
        assert_eq!(
            err,
            CommandError::Ambiguous { path: "task get".to_string(), conflict: "task".to_string() }
        );
    }

    #[test]
    fn test_namespace_then_leaf_is_ambiguous() {
        let err = CommandTree::build(&declarations(&["task get", "task"])).unwrap_err();
        assert_eq!(
            err,
            CommandError::Ambiguous { path: "task".to_string(), conflict: "task get".to_string() }
        );
    }

    #[test]
    fn test_redeclaration_replaces() {
        let mut tree = CommandTree::new();
        tree.insert("task get", CommandDef::new().with_description("first")).unwrap();
        tree.insert("task  get", CommandDef::new().with_description("second")).unwrap();

        assert_eq!(tree.leaves().len(), 1);
        assert_eq!(
            tree.leaf("task get").unwrap().definition.description.as_deref(),
            Some("second")
        );
    }

    #[test]
    fn test_empty_path_is_invalid() {
        let mut tree = CommandTree::new();
        assert_eq!(
            tree.insert("   ", CommandDef::new()),
            Err(CommandError::InvalidPath("   ".to_string()))
        );
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("  task   get "), "task get");
    }
}
