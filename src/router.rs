//! Radix-tree routing table.
//!
//! One [`matchit`] tree per HTTP method, O(path-length) lookup. Patterns
//! pass through to matchit untouched — parameter syntax (`{name}`),
//! conflict detection, and match semantics are entirely its concern.

use std::collections::HashMap;
use std::sync::Arc;

use matchit::Router as MatchitRouter;

use crate::handler::BoxedHandler;
use crate::method::Method;

/// The routing table. Owned exclusively by [`Server`](crate::Server);
/// populated during registration, read-only once requests flow.
pub(crate) struct Router {
    routes: HashMap<Method, MatchitRouter<BoxedHandler>>,
}

impl Router {
    pub(crate) fn new() -> Self {
        Self { routes: HashMap::new() }
    }

    /// Inserts a route. Whatever matchit reports for a malformed or
    /// conflicting pattern is surfaced as-is.
    pub(crate) fn register(&mut self, method: Method, path: &str, handler: BoxedHandler) {
        self.routes
            .entry(method)
            .or_default()
            .insert(path, handler)
            .unwrap_or_else(|e| panic!("invalid route `{path}`: {e}"));
    }

    pub(crate) fn lookup(
        &self,
        method: Method,
        path: &str,
    ) -> Option<(BoxedHandler, HashMap<String, String>)> {
        let tree = self.routes.get(&method)?;
        let matched = tree.at(path).ok()?;
        let handler = Arc::clone(matched.value);
        let params = matched.params.iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        Some((handler, params))
    }
}
