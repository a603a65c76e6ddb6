//! Composition of the gateway middleware chain.
//!
//! axum runs the most recently added layer first, so a chain is applied to a
//! router in reverse of the order its stages should see the request.

use std::sync::Arc;

use axum::{middleware::from_fn_with_state, Router};

use crate::middleware;
use crate::recorder;
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    RequestId,
    /// Category, operation, acl, indices and the request body snapshot.
    Classify,
    Recorder,
    Authenticate,
    RateLimit,
    /// Sources, referers, indices, category, operation, acl, expiry.
    Authorize,
    SourceFilter,
}

/// Fixed order of the authenticated gateway chain.
pub const GATEWAY_CHAIN: &[Stage] = &[
    Stage::RequestId,
    Stage::Classify,
    Stage::Recorder,
    Stage::Authenticate,
    Stage::RateLimit,
    Stage::Authorize,
    Stage::SourceFilter,
];

impl Stage {
    fn layer(self, router: Router<Arc<AppState>>, state: &Arc<AppState>) -> Router<Arc<AppState>> {
        let state = state.clone();
        match self {
            Stage::RequestId => router.layer(from_fn_with_state(state, middleware::request_id)),
            Stage::Classify => router.layer(from_fn_with_state(state, middleware::classify)),
            Stage::Recorder => router.layer(from_fn_with_state(state, recorder::record)),
            Stage::Authenticate => {
                router.layer(from_fn_with_state(state, middleware::authenticate))
            }
            Stage::RateLimit => router.layer(from_fn_with_state(state, middleware::rate_limit)),
            Stage::Authorize => router.layer(from_fn_with_state(state, middleware::authorize)),
            Stage::SourceFilter => {
                router.layer(from_fn_with_state(state, middleware::source_filter))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Composition {
    /// Requests pass `stages[0]` first; responses unwind in reverse.
    Fifo,
    /// Requests pass the last stage first.
    Lifo,
    Single,
}

#[derive(Debug, Clone)]
pub struct Chain {
    stages: Vec<Stage>,
    composition: Composition,
}

impl Chain {
    pub fn fifo(stages: &[Stage]) -> Self {
        Self {
            stages: stages.to_vec(),
            composition: Composition::Fifo,
        }
    }

    pub fn lifo(stages: &[Stage]) -> Self {
        Self {
            stages: stages.to_vec(),
            composition: Composition::Lifo,
        }
    }

    pub fn single(stage: Stage) -> Self {
        Self {
            stages: vec![stage],
            composition: Composition::Single,
        }
    }

    pub fn gateway() -> Self {
        Self::fifo(GATEWAY_CHAIN)
    }

    pub fn composition(&self) -> Composition {
        self.composition
    }

    /// Stages in the order an inbound request visits them.
    pub fn request_order(&self) -> Vec<Stage> {
        match self.composition {
            Composition::Fifo | Composition::Single => self.stages.clone(),
            Composition::Lifo => self.stages.iter().rev().copied().collect(),
        }
    }

    /// Wrap every route (and the fallback) of `router` in the chain.
    pub fn wrap(
        &self,
        router: Router<Arc<AppState>>,
        state: &Arc<AppState>,
    ) -> Router<Arc<AppState>> {
        self.request_order()
            .into_iter()
            .rev()
            .fold(router, |router, stage| stage.layer(router, state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_order() {
        let stages = [Stage::RequestId, Stage::Classify, Stage::Authenticate];
        assert_eq!(Chain::fifo(&stages).request_order(), stages.to_vec());
        assert_eq!(
            Chain::lifo(&stages).request_order(),
            vec![Stage::Authenticate, Stage::Classify, Stage::RequestId]
        );
        assert_eq!(
            Chain::single(Stage::Recorder).request_order(),
            vec![Stage::Recorder]
        );
    }

    #[test]
    fn test_gateway_chain_authenticates_before_authorizing() {
        let order = Chain::gateway().request_order();
        let pos = |s: Stage| order.iter().position(|x| *x == s).unwrap();
        assert_eq!(order[0], Stage::RequestId);
        assert!(pos(Stage::Classify) < pos(Stage::Recorder));
        assert!(pos(Stage::Recorder) < pos(Stage::Authenticate));
        assert!(pos(Stage::Authenticate) < pos(Stage::RateLimit));
        assert!(pos(Stage::RateLimit) < pos(Stage::Authorize));
    }
}
