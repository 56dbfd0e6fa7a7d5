// Copyright 2024-2026 GG-CORE Contributors
// SPDX-License-Identifier: Apache-2.0

//! Process-wide backend initialization and teardown.

use parking_lot::{RwLock, RwLockUpgradableReadGuard, RwLockWriteGuard};
use tracing::{error, info};

use super::{Backend, BackendError};

/// Constructor invoked on first use.
pub type BackendFactory<B> = Box<dyn Fn() -> Result<B, BackendError> + Send + Sync>;

/// Observable lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Ready,
    /// Initialization failed; every later call reports the backend unavailable.
    Failed(String),
}

enum Slot<B> {
    Uninitialized,
    Ready(B),
    Failed(String),
}

/// Once-only initialization guard around a [`Backend`].
///
/// Concurrent first use from several session-creation paths initializes the
/// backend exactly once. Failure is sticky.
///
/// The backend is only reachable inside [`Self::with_backend`], which holds
/// a shared lock for the duration of the closure. [`Self::shutdown_with`]
/// takes the exclusive lock, so it waits for every in-flight user and no
/// reference to the old instance survives a release.
pub struct BackendLifecycle<B: Backend> {
    slot: RwLock<Slot<B>>,
    factory: BackendFactory<B>,
}

impl<B: Backend> BackendLifecycle<B> {
    pub fn new(factory: BackendFactory<B>) -> Self {
        Self { slot: RwLock::new(Slot::Uninitialized), factory }
    }

    /// Run `f` against the backend, initializing it on first use.
    ///
    /// `f` must not call back into this lifecycle.
    pub fn with_backend<R>(&self, f: impl FnOnce(&B) -> R) -> Result<R, BackendError> {
        {
            let slot = self.slot.read();
            match &*slot {
                Slot::Ready(backend) => return Ok(f(backend)),
                Slot::Failed(reason) => return Err(BackendError::Init(reason.clone())),
                Slot::Uninitialized => {}
            }
        }

        // Only one upgradable reader at a time: concurrent first users queue
        // here and the losers see `Ready` or `Failed` once it is their turn.
        let slot = self.slot.upgradable_read();
        let uninitialized = matches!(&*slot, Slot::Uninitialized);
        let slot = if uninitialized {
            let mut slot = RwLockUpgradableReadGuard::upgrade(slot);
            *slot = self.initialize();
            RwLockWriteGuard::downgrade(slot)
        } else {
            RwLockUpgradableReadGuard::downgrade(slot)
        };

        match &*slot {
            Slot::Ready(backend) => Ok(f(backend)),
            Slot::Failed(reason) => Err(BackendError::Init(reason.clone())),
            Slot::Uninitialized => Err(BackendError::Init("backend released during initialization".into())),
        }
    }

    /// Initialize the backend if needed.
    pub fn ensure_initialized(&self) -> Result<(), BackendError> {
        self.with_backend(|_| ())
    }

    fn initialize(&self) -> Slot<B> {
        match (self.factory)() {
            Ok(backend) => {
                info!(
                    backend = backend.name(),
                    gpu_offload = backend.supports_gpu_offload(),
                    "Inference backend initialized"
                );
                Slot::Ready(backend)
            }
            Err(e) => {
                error!(error = %e, "Inference backend initialization failed");
                Slot::Failed(failure_reason(e))
            }
        }
    }

    pub fn state(&self) -> LifecycleState {
        match &*self.slot.read() {
            Slot::Uninitialized => LifecycleState::Uninitialized,
            Slot::Ready(_) => LifecycleState::Ready,
            Slot::Failed(reason) => LifecycleState::Failed(reason.clone()),
        }
    }

    /// Release the backend. A later use starts over.
    ///
    /// A failed initialization stays failed.
    pub fn shutdown(&self) {
        self.shutdown_with(|| {});
    }

    /// Wait for in-flight users, run `release` while no new user can reach
    /// the backend, then drop it.
    pub fn shutdown_with(&self, release: impl FnOnce()) {
        let mut slot = self.slot.write();
        release();
        if let Slot::Ready(_) = &*slot {
            *slot = Slot::Uninitialized;
            info!("Inference backend released");
        }
    }
}

/// Failure message without the `Init` display prefix, which is added again
/// whenever the failure is reported.
fn failure_reason(e: BackendError) -> String {
    match e {
        BackendError::Init(reason) => reason,
        other => other.to_string(),
    }
}
