//! Merging scope stages into one ordered view per request.
//!
//! Each scope contributes its per-phase lists. The lists are concatenated in
//! scope order (server, adapter, service, endpoint) and stable-sorted by
//! weight, highest first. Ties therefore run in scope order, then in
//! registration order.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use switchyard_core::stage::{Caller, ErrorHandler, Finalizer, PostRequest, PreRequest, Weighted};
use switchyard_core::{Context, ExecutionStage, Interceptor, Phase};
use uuid::Uuid;

/// The merged, sorted interceptors of every scope of one request.
#[derive(Debug, Default)]
pub struct MergedStage {
    phases: [Vec<Weighted>; 5],
}

impl MergedStage {
    /// Merges `stages`, given in scope order.
    pub fn merge<'a>(stages: impl IntoIterator<Item = &'a ExecutionStage>) -> Self {
        let mut phases: [Vec<Weighted>; 5] = Default::default();
        for stage in stages {
            for phase in Phase::ALL {
                phases[phase.index()].extend(stage.handlers(phase));
            }
        }
        for list in &mut phases {
            list.sort_by(|a, b| b.weight.cmp(&a.weight));
        }
        Self { phases }
    }

    /// The merged handlers of `phase`.
    pub fn handlers(&self, phase: Phase) -> &[Weighted] {
        &self.phases[phase.index()]
    }

    /// Handler names of `phase`, in run order.
    pub fn names(&self, phase: Phase) -> Vec<&'static str> {
        self.handlers(phase)
            .iter()
            .map(|w| w.interceptor.name())
            .collect()
    }

    pub(crate) fn pre_requests(&self) -> impl Iterator<Item = &dyn PreRequest> {
        self.handlers(Phase::PreRequest)
            .iter()
            .filter_map(|w| match &w.interceptor {
                Interceptor::PreRequest(h) => Some(h.as_ref()),
                _ => None,
            })
    }

    pub(crate) fn callers(&self) -> Vec<&dyn Caller> {
        self.handlers(Phase::Calling)
            .iter()
            .filter_map(|w| match &w.interceptor {
                Interceptor::Caller(h) => Some(h.as_ref()),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn post_requests(&self) -> impl Iterator<Item = &dyn PostRequest> {
        self.handlers(Phase::PostRequest)
            .iter()
            .filter_map(|w| match &w.interceptor {
                Interceptor::PostRequest(h) => Some(h.as_ref()),
                _ => None,
            })
    }

    pub(crate) fn error_handlers(&self) -> impl Iterator<Item = &dyn ErrorHandler> {
        self.handlers(Phase::OnError)
            .iter()
            .filter_map(|w| match &w.interceptor {
                Interceptor::OnError(h) => Some(h.as_ref()),
                _ => None,
            })
    }

    pub(crate) fn finalizers(&self) -> impl Iterator<Item = &dyn Finalizer> {
        self.handlers(Phase::Finalize)
            .iter()
            .filter_map(|w| match &w.interceptor {
                Interceptor::Finalize(h) => Some(h.as_ref()),
                _ => None,
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ScopeKey {
    adapter: String,
    service: Option<String>,
    endpoint: Option<Uuid>,
}

/// Memoized merged stages, keyed by scope combination.
///
/// An entry is reused while the sum of its scopes' generation counters is
/// unchanged; any registration on one of those scopes invalidates it.
#[derive(Debug, Default)]
pub struct StageCache {
    entries: RwLock<HashMap<ScopeKey, (u64, Arc<MergedStage>)>>,
}

impl StageCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the merged stage for the scopes of `ctx`.
    pub fn merged(&self, ctx: &Context) -> Arc<MergedStage> {
        let stages = ctx.stages();
        let fingerprint: u64 = stages.iter().map(|s| s.generation()).sum();
        let key = ScopeKey {
            adapter: ctx.adapter().name().to_string(),
            service: ctx.service().map(|s| s.name().to_string()),
            endpoint: ctx.endpoint().map(|e| e.id()),
        };

        if let Some((seen, merged)) = self.entries.read().get(&key) {
            if *seen == fingerprint {
                return Arc::clone(merged);
            }
        }

        let merged = Arc::new(MergedStage::merge(stages));
        tracing::trace!(?key, fingerprint, "merged execution stages");
        self.entries
            .write()
            .insert(key, (fingerprint, Arc::clone(&merged)));
        merged
    }

    /// Number of memoized scope combinations.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns `true` if nothing is memoized.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use switchyard_core::stage::FnPreRequest;
    use switchyard_core::{RpcResult, Scope};

    fn pre(name: &'static str) -> FnPreRequest<impl Fn(&mut Context) -> RpcResult<Option<switchyard_core::ExecutionResult>>> {
        FnPreRequest::new(name, |_ctx: &mut Context| Ok(None))
    }

    #[test]
    fn test_stable_weight_order() {
        let stage = ExecutionStage::new();
        stage.add_pre_request(pre("h1"), 10).unwrap();
        stage.add_pre_request(pre("h2"), 10).unwrap();
        stage.add_pre_request(pre("h3"), 5).unwrap();
        let merged = MergedStage::merge([&stage]);
        assert_eq!(merged.names(Phase::PreRequest), ["h1", "h2", "h3"]);
    }

    #[test]
    fn test_ties_follow_scope_order() {
        let server = ExecutionStage::new();
        let endpoint = ExecutionStage::new();
        endpoint.add_pre_request(pre("endpoint"), 1).unwrap();
        server.add_pre_request(pre("server"), 1).unwrap();
        server.add_pre_request(pre("heavy"), 50).unwrap();
        let merged = MergedStage::merge([&server, &endpoint]);
        assert_eq!(merged.names(Phase::PreRequest), ["heavy", "server", "endpoint"]);
    }

    #[test]
    fn test_cache_invalidated_by_registration() {
        let server = Arc::new(Scope::new("server"));
        let adapter = Arc::new(Scope::new("http"));
        let ctx = Context::new(Arc::clone(&server), Arc::clone(&adapter));
        let cache = StageCache::new();

        let first = cache.merged(&ctx);
        let again = cache.merged(&ctx);
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(cache.len(), 1);

        adapter.stage().add_pre_request(pre("late"), 0).unwrap();
        let refreshed = cache.merged(&ctx);
        assert!(!Arc::ptr_eq(&first, &refreshed));
        assert_eq!(refreshed.names(Phase::PreRequest), ["late"]);
    }

    proptest! {
        #[test]
        fn prop_merge_is_sorted_and_stable(weights in proptest::collection::vec(-5i32..5, 0..24)) {
            const NAMES: [&str; 24] = [
                "a", "b", "c", "d", "e", "f", "g", "h", "i", "j", "k", "l",
                "m", "n", "o", "p", "q", "r", "s", "t", "u", "v", "w", "x",
            ];
            let stage = ExecutionStage::new();
            for (i, w) in weights.iter().enumerate() {
                stage.add_pre_request(pre(NAMES[i]), *w).unwrap();
            }
            let merged = MergedStage::merge([&stage]);
            let got = merged.handlers(Phase::PreRequest);
            prop_assert_eq!(got.len(), weights.len());
            for pair in got.windows(2) {
                prop_assert!(pair[0].weight >= pair[1].weight);
                if pair[0].weight == pair[1].weight {
                    let i = NAMES.iter().position(|n| *n == pair[0].interceptor.name());
                    let j = NAMES.iter().position(|n| *n == pair[1].interceptor.name());
                    prop_assert!(i < j);
                }
            }
        }
    }
}
