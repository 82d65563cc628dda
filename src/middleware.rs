//! Tower middleware that runs the guard in front of a service.
//!
//! The layer knows nothing about the host's transport: a caller-supplied
//! extractor pulls a [`RequestIdentity`] out of each request (returning `None`
//! to exempt it), and a [`Verdict::Block`] surfaces as a typed error for the
//! host to translate into its 403-equivalent. The middleware itself never
//! writes a response.

use crate::error::GuardError;
use crate::guard::{RateGuard, Verdict};
use crate::identity::RequestIdentity;
use crate::store::RecordStore;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tower_layer::Layer;
use tower_service::Service;

/// Error type of a guarded service.
#[derive(Debug, thiserror::Error)]
pub enum GuardServiceError<E> {
    /// The guard blocked the request; respond 403 and advertise `retry_after`.
    #[error("request blocked by flood guard; retry after {retry_after:?}")]
    Blocked {
        /// Time until the client's block expires.
        retry_after: Duration,
    },
    /// The guard itself failed; the host picks fail-open or fail-closed.
    #[error("flood guard failure")]
    Guard(#[source] GuardError),
    /// The inner service failed.
    #[error(transparent)]
    Inner(E),
}

/// A layer that evaluates every request against a [`RateGuard`].
pub struct GuardLayer<S, F> {
    guard: Arc<RateGuard<S>>,
    extract: Arc<F>,
}

impl<S, F> GuardLayer<S, F> {
    /// Wrap `guard`, identifying requests with `extract`.
    pub fn new(guard: RateGuard<S>, extract: F) -> Self {
        Self { guard: Arc::new(guard), extract: Arc::new(extract) }
    }
}

impl<S, F> Clone for GuardLayer<S, F> {
    fn clone(&self) -> Self {
        Self { guard: Arc::clone(&self.guard), extract: Arc::clone(&self.extract) }
    }
}

impl<Svc, S, F> Layer<Svc> for GuardLayer<S, F> {
    type Service = GuardedService<Svc, S, F>;

    fn layer(&self, service: Svc) -> Self::Service {
        GuardedService {
            inner: service,
            guard: Arc::clone(&self.guard),
            extract: Arc::clone(&self.extract),
        }
    }
}

/// Middleware service produced by [`GuardLayer`].
pub struct GuardedService<Svc, S, F> {
    inner: Svc,
    guard: Arc<RateGuard<S>>,
    extract: Arc<F>,
}

impl<Svc: Clone, S, F> Clone for GuardedService<Svc, S, F> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            guard: Arc::clone(&self.guard),
            extract: Arc::clone(&self.extract),
        }
    }
}

impl<Svc, S, F, Req> Service<Req> for GuardedService<Svc, S, F>
where
    Svc: Service<Req> + Clone + Send + 'static,
    Svc::Future: Send + 'static,
    Svc::Error: std::error::Error + Send + Sync + 'static,
    S: RecordStore + Send + Sync + 'static,
    F: Fn(&Req) -> Option<RequestIdentity> + Send + Sync + 'static,
    Req: Send + 'static,
{
    type Response = Svc::Response;
    type Error = GuardServiceError<Svc::Error>;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(GuardServiceError::Inner)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let identity = (self.extract)(&req);
        let guard = Arc::clone(&self.guard);
        let mut inner = self.inner.clone();

        Box::pin(async move {
            // Requests the extractor declines bypass the guard entirely.
            let Some(identity) = identity else {
                return inner.call(req).await.map_err(GuardServiceError::Inner);
            };
            match guard.evaluate(&identity).await {
                Ok(Verdict::Allow { .. }) => {
                    inner.call(req).await.map_err(GuardServiceError::Inner)
                }
                Ok(Verdict::Block { retry_after }) => {
                    Err(GuardServiceError::Blocked { retry_after })
                }
                Err(e) => Err(GuardServiceError::Guard(e)),
            }
        })
    }
}
