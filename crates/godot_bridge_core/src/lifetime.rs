//! Cancellable scopes with cascading termination.
//!
//! A [`LifetimeDefinition`] owns a scope and is the only thing that can end it. [`Lifetime`]
//! handles are cheap clones used to observe the scope, register cleanup, and derive child
//! scopes. Terminating a scope synchronously terminates its children and runs everything
//! registered against it, most recent first. A terminated scope never becomes alive again.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;

type Action = Box<dyn FnOnce() + Send + 'static>;

struct Inner {
    name: String,
    token: CancellationToken,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    terminated: bool,
    actions: Vec<Action>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn terminate(&self) {
        let actions = {
            let mut state = self.state();
            if state.terminated {
                return;
            }
            state.terminated = true;
            std::mem::take(&mut state.actions)
        };

        self.token.cancel();
        tracing::trace!(lifetime = %self.name, actions = actions.len(), "terminating lifetime");

        for action in actions.into_iter().rev() {
            action();
        }
    }
}

#[derive(Clone)]
pub struct Lifetime {
    inner: Arc<Inner>,
}

impl Lifetime {
    fn with_token(name: String, token: CancellationToken) -> Self {
        Self {
            inner: Arc::new(Inner {
                name,
                token,
                state: Mutex::new(State::default()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn is_alive(&self) -> bool {
        !self.inner.token.is_cancelled()
    }

    /// Registers `action` to run when this lifetime terminates. Runs it right away when the
    /// lifetime has already terminated.
    pub fn on_termination(&self, action: impl FnOnce() + Send + 'static) {
        {
            let mut state = self.inner.state();
            if !state.terminated && self.is_alive() {
                state.actions.push(Box::new(action));
                return;
            }
        }
        action();
    }

    /// Creates a nested scope that ends no later than this one.
    pub fn define_child(&self, name: impl Into<String>) -> LifetimeDefinition {
        let child = Lifetime::with_token(name.into(), self.inner.token.child_token());

        let weak = Arc::downgrade(&child.inner);
        self.on_termination(move || {
            if let Some(inner) = weak.upgrade() {
                inner.terminate();
            }
        });

        LifetimeDefinition { lifetime: child }
    }

    /// Resolves once the lifetime has terminated.
    pub async fn cancelled(&self) {
        self.inner.token.cancelled().await
    }
}

impl fmt::Debug for Lifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifetime")
            .field("name", &self.inner.name)
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Owning side of a [`Lifetime`]. Dropping the definition terminates the scope.
#[derive(Debug)]
pub struct LifetimeDefinition {
    lifetime: Lifetime,
}

impl LifetimeDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            lifetime: Lifetime::with_token(name.into(), CancellationToken::new()),
        }
    }

    pub fn lifetime(&self) -> &Lifetime {
        &self.lifetime
    }

    pub fn terminate(&self) {
        self.lifetime.inner.terminate();
    }
}

impl Drop for LifetimeDefinition {
    fn drop(&mut self) {
        self.terminate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn recorder() -> (Arc<Mutex<Vec<&'static str>>>, impl Fn(&'static str) -> Action) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        let make = move |label: &'static str| -> Action {
            let sink = sink.clone();
            Box::new(move || sink.lock().unwrap().push(label))
        };
        (log, make)
    }

    #[test]
    fn test_terminate_runs_actions_in_reverse_registration_order() {
        let def = LifetimeDefinition::new("run");
        let (log, make) = recorder();
        def.lifetime().on_termination(make("first"));
        def.lifetime().on_termination(make("second"));

        assert!(def.lifetime().is_alive());
        def.terminate();

        assert!(!def.lifetime().is_alive());
        assert_eq!(*log.lock().unwrap(), vec!["second", "first"]);
    }

    #[test]
    fn test_terminate_is_idempotent() {
        let def = LifetimeDefinition::new("run");
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        def.lifetime().on_termination(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        def.terminate();
        def.terminate();

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_on_termination_after_terminate_runs_immediately() {
        let def = LifetimeDefinition::new("run");
        def.terminate();

        let (log, make) = recorder();
        def.lifetime().on_termination(make("late"));

        assert_eq!(*log.lock().unwrap(), vec!["late"]);
    }

    #[test]
    fn test_parent_termination_cascades_to_children() {
        let parent = LifetimeDefinition::new("run");
        let child = parent.lifetime().define_child("handshake");
        let grandchild = child.lifetime().define_child("request");
        let (log, make) = recorder();
        grandchild.lifetime().on_termination(make("grandchild"));
        child.lifetime().on_termination(make("child"));

        parent.terminate();

        assert!(!child.lifetime().is_alive());
        assert!(!grandchild.lifetime().is_alive());
        assert_eq!(*log.lock().unwrap(), vec!["child", "grandchild"]);
    }

    #[test]
    fn test_child_termination_leaves_parent_alive() {
        let parent = LifetimeDefinition::new("run");
        let child = parent.lifetime().define_child("handshake");

        child.terminate();

        assert!(!child.lifetime().is_alive());
        assert!(parent.lifetime().is_alive());
    }

    #[test]
    fn test_child_of_terminated_lifetime_is_born_terminated() {
        let parent = LifetimeDefinition::new("run");
        parent.terminate();

        let child = parent.lifetime().define_child("handshake");
        let (log, make) = recorder();
        child.lifetime().on_termination(make("child"));

        assert!(!child.lifetime().is_alive());
        assert_eq!(*log.lock().unwrap(), vec!["child"]);
    }

    #[test]
    fn test_dropping_definition_terminates() {
        let def = LifetimeDefinition::new("run");
        let lifetime = def.lifetime().clone();
        drop(def);
        assert!(!lifetime.is_alive());
    }

    #[tokio::test]
    async fn test_cancelled_resolves_on_termination_from_another_thread() {
        let parent = LifetimeDefinition::new("run");
        let child = parent.lifetime().define_child("handshake");
        let observed = child.lifetime().clone();

        let terminator = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            parent.terminate();
        });

        tokio::time::timeout(Duration::from_secs(5), observed.cancelled())
            .await
            .expect("child lifetime should be cancelled with its parent");
        terminator.join().unwrap();
        drop(child);
    }
}
