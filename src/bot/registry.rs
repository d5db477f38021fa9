use std::{
    collections::HashMap,
    future::Future,
    pin::Pin,
    sync::{Arc, PoisonError, RwLock},
};

use super::{dispatcher::HandlerResult, parser::Invocation};

/* Registry maps command tokens to handlers.
 * The whole mapping is swapped at once behind a lock, so a lookup always sees either
 * the old mapping or the new one, never a mix of both.
 */

/* Types */
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;
pub type HandlerFn<M> = Arc<dyn Fn(Invocation<M>) -> HandlerFuture + Send + Sync>;
pub type Mapping<M> = HashMap<String, HandlerFn<M>>;

// Wraps an async closure into a HandlerFn.
pub fn handler<M, F, Fut>(f: F) -> HandlerFn<M>
where
    M: 'static,
    F: Fn(Invocation<M>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(move |invocation| -> HandlerFuture { Box::pin(f(invocation)) })
}

pub struct Registry<M> {
    mapping: RwLock<Arc<Mapping<M>>>,
}

impl<M> Registry<M> {
    pub fn new(mapping: Mapping<M>) -> Self {
        Registry {
            mapping: RwLock::new(Arc::new(mapping)),
        }
    }

    // Replaces the whole mapping.
    pub fn set(&self, mapping: Mapping<M>) {
        let mut current = self.mapping.write().unwrap_or_else(PoisonError::into_inner);
        *current = Arc::new(mapping);
    }

    pub fn lookup(&self, token: &str) -> Option<HandlerFn<M>> {
        self.snapshot().get(token).cloned()
    }

    // Registered tokens, sorted.
    pub fn tokens(&self) -> Vec<String> {
        let mut tokens: Vec<String> = self.snapshot().keys().cloned().collect();
        tokens.sort();
        tokens
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Arc<Mapping<M>> {
        let current = self.mapping.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&current)
    }
}

impl<M> Default for Registry<M> {
    fn default() -> Self {
        Registry::new(Mapping::new())
    }
}
