// ABOUTME: Opaque identity of the physical storage behind an adapter.
// ABOUTME: Two adapters compare equal exactly when they read and write the same backing area.

use std::any::Any;
use std::sync::Arc;

#[derive(Clone)]
enum Identity {
    /// A shared in-process allocation. The anchor keeps the address from
    /// being reused while any KeyArea still refers to it.
    Shared {
        addr: usize,
        _anchor: Arc<dyn Any + Send + Sync>,
    },
    /// A named location outside the process, such as a database file.
    Location(String),
}

/// Identifies the underlying storage of an adapter. Carries no behavior.
#[derive(Clone)]
pub struct KeyArea {
    identity: Identity,
}

impl KeyArea {
    /// Identity of a shared in-process allocation.
    pub fn shared<A: Any + Send + Sync>(area: &Arc<A>) -> Self {
        let anchor: Arc<dyn Any + Send + Sync> = Arc::clone(area) as Arc<dyn Any + Send + Sync>;
        Self {
            identity: Identity::Shared {
                addr: Arc::as_ptr(area) as *const () as usize,
                _anchor: anchor,
            },
        }
    }

    /// Identity of an external location, e.g. `sqlite:/var/lib/app/state.db`.
    pub fn location(name: impl Into<String>) -> Self {
        Self {
            identity: Identity::Location(name.into()),
        }
    }
}

impl PartialEq for KeyArea {
    fn eq(&self, other: &Self) -> bool {
        match (&self.identity, &other.identity) {
            (Identity::Shared { addr: a, .. }, Identity::Shared { addr: b, .. }) => a == b,
            (Identity::Location(a), Identity::Location(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for KeyArea {}

impl std::hash::Hash for KeyArea {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        match &self.identity {
            Identity::Shared { addr, .. } => {
                0u8.hash(state);
                addr.hash(state);
            }
            Identity::Location(name) => {
                1u8.hash(state);
                name.hash(state);
            }
        }
    }
}

impl std::fmt::Debug for KeyArea {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.identity {
            Identity::Shared { addr, .. } => write!(f, "KeyArea(shared@{addr:#x})"),
            Identity::Location(name) => write!(f, "KeyArea({name})"),
        }
    }
}
