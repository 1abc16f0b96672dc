//! Segment tree the router matches paths against.

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::Method;

use super::handler::Handler;
use super::pattern::{Pattern, Segment};

#[derive(Debug, Clone)]
pub(crate) struct Endpoint {
    pub(crate) method: Method,
    pub(crate) handler: Handler,
    pub(crate) pattern: Arc<Pattern>,
}

/// One level of the tree. Each child kind is tried in order of specificity:
/// literal, then parameter, then greedy.
#[derive(Debug, Default)]
pub(crate) struct Node {
    literals: HashMap<String, Node>,
    param: Option<Box<Node>>,
    greedy: Vec<Endpoint>,
    endpoints: Vec<Endpoint>,
}

impl Node {
    /// Insert `endpoint` at the position its pattern describes.
    ///
    /// # Panics
    ///
    /// When a route with the same method and the same shape already exists.
    pub(crate) fn insert(&mut self, endpoint: Endpoint) {
        let pattern = endpoint.pattern.clone();
        let mut node = self;
        let mut slot = None;

        for segment in pattern.segments() {
            match segment {
                Segment::Literal(lit) => {
                    node = node.literals.entry(lit.clone()).or_default();
                }
                Segment::Param(_) => {
                    node = node.param.get_or_insert_with(Box::default);
                }
                Segment::Greedy(_) => {
                    slot = Some(&mut node.greedy);
                    break;
                }
            }
        }

        let slot = match slot {
            Some(slot) => slot,
            None => &mut node.endpoints,
        };

        if let Some(existing) = slot.iter().find(|e| e.method == endpoint.method) {
            panic!(
                "route {} {} conflicts with {} {}",
                endpoint.method, endpoint.pattern, existing.method, existing.pattern
            );
        }
        slot.push(endpoint);
    }

    /// Find the most specific endpoint list for `path` accepted by `accept`.
    ///
    /// Backtracks: a literal branch that matches the segment but leads
    /// nowhere acceptable falls back to the parameter branch, then to a
    /// greedy capture at this level.
    pub(crate) fn find(
        &self,
        path: &[&str],
        accept: &dyn Fn(&[Endpoint]) -> bool,
    ) -> Option<&[Endpoint]> {
        let Some((head, rest)) = path.split_first() else {
            if accept(&self.endpoints) {
                return Some(&self.endpoints);
            }
            return accept(&self.greedy).then_some(self.greedy.as_slice());
        };

        if let Some(found) = self
            .literals
            .get(*head)
            .and_then(|child| child.find(rest, accept))
        {
            return Some(found);
        }

        if !head.is_empty()
            && let Some(found) = self.param.as_ref().and_then(|child| child.find(rest, accept))
        {
            return Some(found);
        }

        accept(&self.greedy).then_some(self.greedy.as_slice())
    }
}
