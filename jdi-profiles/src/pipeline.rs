// Push-based event pipelines
//
// One producer pushes values with `process`; any number of consumers see
// each value by reference, in push order, on the pushing thread. Derived
// pipelines (`map`, `filter`, `filter_map`) only run their transform when
// they have a consumer. Closing any pipeline of a chain closes the whole
// chain and runs its close hooks before `close` returns.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use tokio::sync::mpsc;
use tracing::{trace, warn};

pub type ConsumerId = u64;

type Consumer<T> = Arc<dyn Fn(&T) + Send + Sync>;
type CloseHook = Box<dyn FnOnce() + Send>;

struct Shared<T> {
    consumers: RwLock<Vec<(ConsumerId, Consumer<T>)>>,
    close_hooks: Mutex<Vec<CloseHook>>,
    closed: AtomicBool,
    next_consumer: AtomicU64,
}

pub struct Pipeline<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Pipeline<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> fmt::Debug for Pipeline<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("consumers", &self.consumer_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<T> Default for Pipeline<T> {
    fn default() -> Self {
        Self {
            shared: Arc::new(Shared {
                consumers: RwLock::new(Vec::new()),
                close_hooks: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
                next_consumer: AtomicU64::new(1),
            }),
        }
    }
}

fn lock_hooks(hooks: &Mutex<Vec<CloseHook>>) -> MutexGuard<'_, Vec<CloseHook>> {
    hooks.lock().unwrap_or_else(|poisoned| {
        warn!("pipeline close hooks mutex was poisoned, recovering");
        poisoned.into_inner()
    })
}

impl<T> Pipeline<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn from_weak(weak: &Weak<Shared<T>>) -> Option<Self> {
        weak.upgrade().map(|shared| Self { shared })
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    pub fn consumer_count(&self) -> usize {
        self.shared
            .consumers
            .read()
            .map(|c| c.len())
            .unwrap_or_else(|poisoned| poisoned.into_inner().len())
    }

    pub fn has_consumers(&self) -> bool {
        self.consumer_count() > 0
    }

    /// Push a value to every consumer. Returns how many consumers saw it.
    pub fn process(&self, value: T) -> usize {
        if self.is_closed() {
            trace!("Dropping value pushed into closed pipeline");
            return 0;
        }

        // Snapshot so consumers may add or remove consumers while running
        let consumers: Vec<Consumer<T>> = {
            let guard = self
                .shared
                .consumers
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            guard.iter().map(|(_, c)| c.clone()).collect()
        };

        let mut delivered = 0;
        for consumer in &consumers {
            if self.is_closed() {
                break;
            }
            consumer(&value);
            delivered += 1;
        }

        delivered
    }

    /// Register a consumer invoked for every value pushed after this call
    pub fn foreach<F>(&self, consumer: F) -> ConsumerId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.shared.next_consumer.fetch_add(1, Ordering::SeqCst);
        if self.is_closed() {
            return id;
        }

        self.shared
            .consumers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((id, Arc::new(consumer)));
        id
    }

    pub fn remove_consumer(&self, id: ConsumerId) -> bool {
        let mut consumers = self
            .shared
            .consumers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = consumers.len();
        consumers.retain(|(cid, _)| *cid != id);
        consumers.len() != before
    }

    /// Run `hook` when the pipeline closes (immediately if it already has)
    pub fn on_close<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut hooks = lock_hooks(&self.shared.close_hooks);
            if !self.is_closed() {
                hooks.push(Box::new(hook));
                return;
            }
        }
        hook();
    }

    /// Close the pipeline. A push that starts after this returns delivers
    /// nothing; a push already running on another thread may still finish
    /// handing its value to the consumer it is calling. Consumers may close
    /// their own pipeline, so no lock is held while they run.
    pub fn close(&self) {
        let hooks = {
            let mut hooks = lock_hooks(&self.shared.close_hooks);
            if self.shared.closed.swap(true, Ordering::SeqCst) {
                return;
            }
            std::mem::take(&mut *hooks)
        };

        self.shared
            .consumers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();

        for hook in hooks {
            hook();
        }
    }
}

impl<T: Send + Sync + 'static> Pipeline<T> {
    /// Derived pipeline transforming and dropping values
    pub fn filter_map<U, F>(&self, f: F) -> Pipeline<U>
    where
        U: Send + Sync + 'static,
        F: Fn(&T) -> Option<U> + Send + Sync + 'static,
    {
        let child = Pipeline::<U>::new();

        let weak_child = Arc::downgrade(&child.shared);
        self.foreach(move |value| {
            let Some(child) = Pipeline::from_weak(&weak_child) else {
                return;
            };
            if !child.has_consumers() {
                return;
            }
            if let Some(mapped) = f(value) {
                child.process(mapped);
            }
        });

        let weak_child = Arc::downgrade(&child.shared);
        self.on_close(move || {
            if let Some(child) = Pipeline::from_weak(&weak_child) {
                child.close();
            }
        });

        let parent = self.clone();
        child.on_close(move || parent.close());

        child
    }

    pub fn map<U, F>(&self, f: F) -> Pipeline<U>
    where
        U: Send + Sync + 'static,
        F: Fn(&T) -> U + Send + Sync + 'static,
    {
        self.filter_map(move |value| Some(f(value)))
    }

    pub fn filter<F>(&self, predicate: F) -> Pipeline<T>
    where
        T: Clone,
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.filter_map(move |value| predicate(value).then(|| value.clone()))
    }

    /// Hand values off to an async consumer. The receiver ends when the
    /// pipeline closes.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<T>
    where
        T: Clone,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        self.foreach(move |value: &T| {
            // Receiver gone; nothing left to deliver to
            let _ = tx.send(value.clone());
        });
        rx
    }
}
