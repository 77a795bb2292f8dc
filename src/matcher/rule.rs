use super::{PathMatcher, ROOT_SELECTOR};
use crate::operation::{Operation, OperationKind};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{fmt, sync::Arc};

/// One or more dotted paths registered for a single query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RulePaths {
    /// A single path.
    One(String),
    /// Multiple paths, all of which have to match.
    Many(Vec<String>),
}

impl RulePaths {
    /// The registered paths as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[String] {
        match self {
            Self::One(path) => std::slice::from_ref(path),
            Self::Many(paths) => paths,
        }
    }
}

impl From<&str> for RulePaths {
    fn from(path: &str) -> Self {
        Self::One(path.to_owned())
    }
}

impl From<String> for RulePaths {
    fn from(path: String) -> Self {
        Self::One(path)
    }
}

impl<S: Into<String>> From<Vec<S>> for RulePaths {
    fn from(paths: Vec<S>) -> Self {
        Self::Many(paths.into_iter().map(Into::into).collect())
    }
}

impl<S: Into<String>, const N: usize> From<[S; N]> for RulePaths {
    fn from(paths: [S; N]) -> Self {
        Self::Many(paths.into_iter().map(Into::into).collect())
    }
}

/// A success rule path was registered without the leading root selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingRootSelector {
    query: String,
    index: usize,
    path: String,
}

impl MissingRootSelector {
    /// Name of the query the offending path was registered for.
    #[must_use]
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Position of the offending path within the rule of its query.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// The offending path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl fmt::Display for MissingRootSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "success rule of query \"{}\"[{}] should start with root selector \"{ROOT_SELECTOR}\": {}",
            self.query, self.index, self.path
        )
    }
}

impl std::error::Error for MissingRootSelector {}

/// Success predicate of a single query.
///
/// Satisfied only when every one of its paths resolves to a truthy value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuccessRule {
    matchers: Vec<PathMatcher>,
}

impl SuccessRule {
    /// Compile the rule registered for `query`.
    pub fn try_new(query: &str, paths: &[String]) -> Result<Self, MissingRootSelector> {
        let matchers = paths
            .iter()
            .enumerate()
            .map(|(index, path)| {
                if path.starts_with(ROOT_SELECTOR) {
                    Ok(PathMatcher::new(path))
                } else {
                    Err(MissingRootSelector {
                        query: query.to_owned(),
                        index,
                        path: path.clone(),
                    })
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { matchers })
    }

    /// The compiled path matchers of this rule.
    #[must_use]
    pub fn matchers(&self) -> &[PathMatcher] {
        &self.matchers
    }

    /// Returns true if all paths of this rule match the given data.
    ///
    /// Absent data behaves like `null`: it only satisfies a rule without paths.
    #[must_use]
    pub fn is_satisfied(&self, data: Option<&Value>) -> bool {
        let data = data.unwrap_or(&Value::Null);
        self.matchers.iter().all(|matcher| matcher.is_match(data))
    }
}

/// Success rules indexed by the top-level operation name of a query.
///
/// Cloning is cheap, the compiled rules are shared.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Arc<IndexMap<String, SuccessRule>>,
}

impl RuleSet {
    /// Compile all rules, failing on the first path without root selector.
    pub fn try_new<'a, I>(rules: I) -> Result<Self, MissingRootSelector>
    where
        I: IntoIterator<Item = (&'a String, &'a RulePaths)>,
    {
        let rules = rules
            .into_iter()
            .map(|(query, paths)| {
                SuccessRule::try_new(query, paths.as_slice()).map(|rule| (query.clone(), rule))
            })
            .collect::<Result<IndexMap<_, _>, _>>()?;
        Ok(Self {
            rules: Arc::new(rules),
        })
    }

    /// Get the rule registered for the given query name.
    #[must_use]
    pub fn get(&self, query: &str) -> Option<&SuccessRule> {
        self.rules.get(query)
    }

    /// Returns true if results of the given operation are evaluated
    /// against a rule, and so might be retried.
    #[must_use]
    pub fn covers(&self, operation: &Operation) -> bool {
        operation.kind() != OperationKind::Teardown
            && operation
                .document()
                .operation_name()
                .is_some_and(|name| self.rules.contains_key(name))
    }

    /// Number of registered rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns true if no rule is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
