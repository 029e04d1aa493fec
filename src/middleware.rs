//! Middleware seam
//!
//! A minimal onion model: a [`Middleware`] wraps the rest of the stack,
//! which it sees as a single downstream [`Handler`]. The host framework
//! adapts its own pipeline onto these traits; [`run_stack`] composes a
//! stack directly, which is also how the integration tests drive the core.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::Context;
use crate::errors::Error;

/// Boxed future used for the boxed-closure seams (serializer chains, verify
/// callbacks) that cannot be expressed through `async-trait`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A terminal request handler — downstream of all middleware.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, ctx: &mut Context) -> Result<(), Error>;
}

/// A middleware: runs against the context and decides whether to invoke the
/// downstream handler.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn call(&self, ctx: &mut Context, next: &dyn Handler) -> Result<(), Error>;
}

/// A handler that does nothing. Useful as the tail of a stack whose
/// responses are produced entirely by middleware.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

#[async_trait]
impl Handler for NoopHandler {
    async fn call(&self, _ctx: &mut Context) -> Result<(), Error> {
        Ok(())
    }
}

/// Adapter turning a plain function into a [`Handler`].
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F> Handler for FnHandler<F>
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, Result<(), Error>> + Send + Sync,
{
    async fn call(&self, ctx: &mut Context) -> Result<(), Error> {
        (self.0)(ctx).await
    }
}

struct StackHandler<'s> {
    rest: &'s [Arc<dyn Middleware>],
    tail: &'s dyn Handler,
}

#[async_trait]
impl Handler for StackHandler<'_> {
    async fn call(&self, ctx: &mut Context) -> Result<(), Error> {
        match self.rest.split_first() {
            Some((head, rest)) => {
                let next = StackHandler {
                    rest,
                    tail: self.tail,
                };
                head.call(ctx, &next).await
            }
            None => self.tail.call(ctx).await,
        }
    }
}

/// Run `ctx` through `middlewares` in order, ending at `tail`.
///
/// # Errors
///
/// Propagates the first error produced by any middleware or the tail.
pub async fn run_stack(
    middlewares: &[Arc<dyn Middleware>],
    tail: &dyn Handler,
    ctx: &mut Context,
) -> Result<(), Error> {
    let stack = StackHandler {
        rest: middlewares,
        tail,
    };
    stack.call(ctx).await
}
