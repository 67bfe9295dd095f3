//! Request-scoped span tags carried through an OpenTelemetry [`Context`]
//!
//! Tags are attached once by the caller and read only when a span is emitted.
//! The map is shared behind an `Arc` and never mutated after attachment.

use opentelemetry::Context;
use std::collections::HashMap;
use std::sync::Arc;

/// Tags merged into every span created for operations issued with a context
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpanTags(Arc<HashMap<String, String>>);

impl SpanTags {
    #[must_use]
    pub fn new(tags: HashMap<String, String>) -> Self {
        Self(Arc::new(tags))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<HashMap<String, String>> for SpanTags {
    fn from(tags: HashMap<String, String>) -> Self {
        Self::new(tags)
    }
}

impl<K, V> FromIterator<(K, V)> for SpanTags
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::new(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Returns a copy of `cx` carrying `tags`
///
/// Tags attached this way replace any previously attached set.
#[must_use]
pub fn with_span_tags(cx: &Context, tags: impl Into<SpanTags>) -> Context {
    cx.with_value(tags.into())
}

/// The tags attached to `cx`, if any
#[must_use]
pub fn span_tags(cx: &Context) -> Option<&SpanTags> {
    cx.get::<SpanTags>()
}
