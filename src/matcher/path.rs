use serde_json::Value;

/// Root selector every success rule path has to start with.
pub const ROOT_SELECTOR: &str = "$.";

/// Resolves a dotted path such as `$.author.id` against a JSON value.
///
/// Segments index objects by key and arrays by (canonical) decimal index,
/// e.g. `$.0` resolves to the first element of an array. Resolution never
/// fails: a missing segment, a scalar in the middle of the path or a `null`
/// value all resolve to absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMatcher {
    segments: Vec<String>,
}

impl PathMatcher {
    /// Create a new [`PathMatcher`].
    ///
    /// A leading [`ROOT_SELECTOR`] is stripped if present.
    #[must_use]
    pub fn new(path: &str) -> Self {
        let path = path.strip_prefix(ROOT_SELECTOR).unwrap_or(path);
        Self {
            segments: path.split('.').map(ToOwned::to_owned).collect(),
        }
    }

    /// The path segments, root selector excluded.
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Resolve the path against `root`, returning `None` when absent.
    #[must_use]
    pub fn resolve<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        self.segments
            .iter()
            .try_fold(root, |value, segment| match value {
                Value::Object(map) => map.get(segment),
                Value::Array(items) => parse_index(segment).and_then(|idx| items.get(idx)),
                Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => None,
            })
            .filter(|value| !value.is_null())
    }

    /// Returns true if the path resolves to a truthy value.
    ///
    /// See [`is_truthy`] for what counts as truthy.
    #[must_use]
    pub fn is_match(&self, root: &Value) -> bool {
        self.resolve(root).is_some_and(is_truthy)
    }
}

/// Returns false for `null`, `false`, zero and the empty string,
/// true for any other value, including empty arrays and objects.
#[must_use]
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn parse_index(segment: &str) -> Option<usize> {
    if segment.is_empty()
        || !segment.bytes().all(|b| b.is_ascii_digit())
        || (segment.len() > 1 && segment.starts_with('0'))
    {
        return None;
    }
    segment.parse().ok()
}
