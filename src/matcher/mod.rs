//! Path based success matching.
//!
//! A [`SuccessRule`] decides whether the data of a result is "good enough".
//! It is built from one or more dotted paths (e.g. `$.author.id`), each
//! compiled into a [`PathMatcher`], and is satisfied when all of them
//! resolve to a truthy value.

mod path;
#[doc(inline)]
pub use path::{PathMatcher, ROOT_SELECTOR, is_truthy};

mod rule;
#[doc(inline)]
pub use rule::{MissingRootSelector, RulePaths, RuleSet, SuccessRule};
