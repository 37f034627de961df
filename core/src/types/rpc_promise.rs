//! One-shot promise / keeper pairs for rpc-style results.
//!
//! `RpcPromise` has reference semantics and is cheap to clone but not
//! thread safe; `RpcThreadPromise` is the mutex-backed variant used when
//! the fulfilling side lives on another thread. Neither carries a timeout;
//! consumers poll `finished`.

use crate::error::{Error, Result};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
struct State<R, E> {
    result: Option<R>,
    error: Option<E>,
}

impl<R, E> Default for State<R, E> {
    fn default() -> Self {
        State {
            result: None,
            error: None,
        }
    }
}

impl<R, E> State<R, E> {
    fn finished(&self) -> bool {
        self.result.is_some() || self.error.is_some()
    }
}

/// The consumer side of a single-threaded promise.
pub struct RpcPromise<R, E = String> {
    poll: Rc<dyn Fn() -> State<R, E>>,
}

impl<R, E> Clone for RpcPromise<R, E> {
    fn clone(&self) -> Self {
        RpcPromise {
            poll: self.poll.clone(),
        }
    }
}

/// The producer side; call `fulfill` or `fail` exactly once.
pub struct RpcPromiseKeeper<R, E = String> {
    state: Rc<RefCell<State<R, E>>>,
}

impl<R: Clone + 'static, E: Clone + 'static> RpcPromise<R, E> {
    pub fn create_pair() -> (RpcPromise<R, E>, RpcPromiseKeeper<R, E>) {
        let state = Rc::new(RefCell::new(State::default()));
        let poll_state = state.clone();
        (
            RpcPromise {
                poll: Rc::new(move || poll_state.borrow().clone()),
            },
            RpcPromiseKeeper { state },
        )
    }

    pub fn fulfilled(result: R) -> RpcPromise<R, E> {
        let state = State {
            result: Some(result),
            error: None,
        };
        RpcPromise {
            poll: Rc::new(move || state.clone()),
        }
    }

    pub fn failed(error: E) -> RpcPromise<R, E> {
        let state = State {
            result: None,
            error: Some(error),
        };
        RpcPromise {
            poll: Rc::new(move || state.clone()),
        }
    }

    pub fn finished(&self) -> bool {
        (self.poll)().finished()
    }

    pub fn succeeded(&self) -> bool {
        (self.poll)().result.is_some()
    }

    pub fn failed_state(&self) -> bool {
        (self.poll)().error.is_some()
    }

    pub fn result(&self) -> Option<R> {
        (self.poll)().result
    }

    pub fn error(&self) -> Option<E> {
        (self.poll)().error
    }

    /// Derives a promise that yields `f(result)` once this one resolves.
    /// Evaluation is lazy, at poll time, and cached.
    pub fn wrap<R2: Clone + 'static, F>(&self, f: F) -> RpcPromise<R2, E>
    where
        F: Fn(R) -> R2 + 'static,
    {
        let parent = self.poll.clone();
        let cache: Rc<RefCell<Option<State<R2, E>>>> = Rc::new(RefCell::new(None));
        RpcPromise {
            poll: Rc::new(move || {
                let mut cached = cache.borrow_mut();
                if cached.is_none() {
                    let upstream = parent();
                    if let Some(result) = upstream.result {
                        *cached = Some(State {
                            result: Some(f(result)),
                            error: None,
                        });
                    } else if let Some(error) = upstream.error {
                        *cached = Some(State {
                            result: None,
                            error: Some(error),
                        });
                    }
                }
                cached.clone().unwrap_or_default()
            }),
        }
    }
}

impl<R, E> RpcPromiseKeeper<R, E> {
    pub fn fulfill(&self, result: R) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if state.finished() {
            return Err(Error::Promise("fulfill called on finished promise".into()));
        }
        state.result = Some(result);
        Ok(())
    }

    pub fn fail(&self, error: E) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if state.finished() {
            return Err(Error::Promise("fail called on finished promise".into()));
        }
        state.error = Some(error);
        Ok(())
    }
}

/// Thread-safe promise; the keeper may resolve it from any thread.
pub struct RpcThreadPromise<R, E = String> {
    state: Arc<Mutex<State<R, E>>>,
}

impl<R, E> Clone for RpcThreadPromise<R, E> {
    fn clone(&self) -> Self {
        RpcThreadPromise {
            state: self.state.clone(),
        }
    }
}

pub struct RpcThreadPromiseKeeper<R, E = String> {
    state: Arc<Mutex<State<R, E>>>,
}

impl<R, E> Clone for RpcThreadPromiseKeeper<R, E> {
    fn clone(&self) -> Self {
        RpcThreadPromiseKeeper {
            state: self.state.clone(),
        }
    }
}

impl<R: Clone, E: Clone> RpcThreadPromise<R, E> {
    pub fn create_pair() -> (RpcThreadPromise<R, E>, RpcThreadPromiseKeeper<R, E>) {
        let state = Arc::new(Mutex::new(State::default()));
        (
            RpcThreadPromise {
                state: state.clone(),
            },
            RpcThreadPromiseKeeper { state },
        )
    }

    pub fn fulfilled(result: R) -> RpcThreadPromise<R, E> {
        RpcThreadPromise {
            state: Arc::new(Mutex::new(State {
                result: Some(result),
                error: None,
            })),
        }
    }

    pub fn failed(error: E) -> RpcThreadPromise<R, E> {
        RpcThreadPromise {
            state: Arc::new(Mutex::new(State {
                result: None,
                error: Some(error),
            })),
        }
    }

    pub fn finished(&self) -> bool {
        self.state.lock().unwrap().finished()
    }

    pub fn succeeded(&self) -> bool {
        self.state.lock().unwrap().result.is_some()
    }

    pub fn failed_state(&self) -> bool {
        self.state.lock().unwrap().error.is_some()
    }

    pub fn result(&self) -> Option<R> {
        self.state.lock().unwrap().result.clone()
    }

    pub fn error(&self) -> Option<E> {
        self.state.lock().unwrap().error.clone()
    }
}

impl<R, E> RpcThreadPromiseKeeper<R, E> {
    pub fn fulfill(&self, result: R) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.finished() {
            return Err(Error::Promise("fulfill called on finished promise".into()));
        }
        state.result = Some(result);
        Ok(())
    }

    pub fn fail(&self, error: E) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.finished() {
            return Err(Error::Promise("fail called on finished promise".into()));
        }
        state.error = Some(error);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fulfill_is_one_shot() {
        let (promise, keeper) = RpcPromise::<i32>::create_pair();
        assert!(!promise.finished());

        keeper.fulfill(7).unwrap();
        assert!(promise.succeeded());
        assert_eq!(promise.result(), Some(7));

        assert!(keeper.fulfill(8).is_err());
        assert!(keeper.fail("late".into()).is_err());
        assert_eq!(promise.result(), Some(7));
    }

    #[test]
    fn fail_is_one_shot() {
        let (promise, keeper) = RpcPromise::<i32>::create_pair();
        keeper.fail("broken".into()).unwrap();
        assert!(promise.failed_state());
        assert_eq!(promise.error(), Some("broken".into()));
        assert!(keeper.fulfill(1).is_err());
    }

    #[test]
    fn wrap_maps_results_and_propagates_errors() {
        let (promise, keeper) = RpcPromise::<i32>::create_pair();
        let doubled = promise.wrap(|v| v * 2);
        assert!(!doubled.finished());
        keeper.fulfill(21).unwrap();
        assert_eq!(doubled.result(), Some(42));

        let (promise, keeper) = RpcPromise::<i32>::create_pair();
        let wrapped = promise.wrap(|v| v + 1);
        keeper.fail("nope".into()).unwrap();
        assert_eq!(wrapped.error(), Some("nope".into()));
    }

    #[test]
    fn thread_promise_resolves_across_threads() {
        let (promise, keeper) = RpcThreadPromise::<String>::create_pair();
        let handle = std::thread::spawn(move || {
            keeper.fulfill("done".into()).unwrap();
        });
        handle.join().unwrap();
        assert_eq!(promise.result(), Some("done".into()));
        assert!(promise.finished());
    }
}
