use serde::Serialize;
use std::{collections::BTreeMap, fmt};

///
/// ErrorTree
///
/// Route-keyed aggregation of validation failures. Leaves are plain
/// messages; children group failures under an entity or field route so a
/// whole build can be reported in one deterministic tree.
///

#[derive(Clone, Debug, Default, Serialize)]
pub struct ErrorTree {
    errors: Vec<String>,
    children: BTreeMap<String, ErrorTree>,
}

impl ErrorTree {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a failure at the current route.
    pub fn add(&mut self, err: impl ToString) {
        self.errors.push(err.to_string());
    }

    /// Add a failure under a child route, creating the route if needed.
    pub fn add_at(&mut self, route: &str, err: impl ToString) {
        self.children.entry(route.to_string()).or_default().add(err);
    }

    /// Merge a subtree under a child route.
    pub fn merge_at(&mut self, route: &str, subtree: Self) {
        if subtree.is_empty() {
            return;
        }
        let child = self.children.entry(route.to_string()).or_default();
        child.errors.extend(subtree.errors);
        for (route, tree) in subtree.children {
            child.merge_at(&route, tree);
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty() && self.children.values().all(Self::is_empty)
    }

    /// Total number of leaf failures.
    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.len() + self.children.values().map(Self::len).sum::<usize>()
    }

    /// Collapse into a `Result`, keeping the tree only when it holds failures.
    pub fn result(self) -> Result<(), Self> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }

    fn fmt_indented(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        for err in &self.errors {
            writeln!(f, "{:indent$}{err}", "", indent = indent)?;
        }
        for (route, child) in &self.children {
            if child.is_empty() {
                continue;
            }
            writeln!(f, "{:indent$}{route}:", "", indent = indent)?;
            child.fmt_indented(f, indent + 2)?;
        }
        Ok(())
    }
}

impl fmt::Display for ErrorTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_indented(f, 0)
    }
}

impl std::error::Error for ErrorTree {}

///
/// err!
/// Push a formatted failure onto an ErrorTree.
///

#[macro_export]
macro_rules! err {
    ($errs:expr, $($arg:tt)*) => {
        $errs.add(format!($($arg)*))
    };
}
