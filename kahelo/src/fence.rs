// Copyright 2026 the Kahelo Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Completion fences for scenes handed off to rasterizer threads.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Condvar, Mutex};

static NEXT_FENCE_ID: AtomicU32 = AtomicU32::new(0);

/// A counted completion signal attached to a submitted scene.
///
/// A fence is created unsignalled with a `rank` equal to the number of
/// rasterizer threads that will work on the scene. Each thread calls
/// [`Fence::signal`] exactly once when it has finished its share; the fence
/// becomes signalled when the count reaches the rank. Producers block on
/// [`Fence::wait`] to reclaim scene memory and on context teardown.
#[derive(Debug)]
pub struct Fence {
    id: u32,
    rank: u32,
    count: Mutex<u32>,
    signalled: Condvar,
}

impl Fence {
    /// Create an unsignalled fence expecting `rank` signals. A rank of zero
    /// is clamped to one so the fence can always be signalled.
    pub fn new(rank: u32) -> Self {
        let id = NEXT_FENCE_ID.fetch_add(1, Ordering::Relaxed);
        Self {
            id,
            rank: rank.max(1),
            count: Mutex::new(0),
            signalled: Condvar::new(),
        }
    }

    /// The fence id, for log correlation.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// The number of signals required for completion.
    pub fn rank(&self) -> u32 {
        self.rank
    }

    /// Record one worker's completion. The caller that raises the count to
    /// the rank wakes all waiters.
    pub fn signal(&self) {
        let mut count = self.count.lock().unwrap();
        debug_assert!(*count < self.rank);
        *count += 1;
        log::trace!("fence {}: signal {}/{}", self.id, *count, self.rank);
        if *count >= self.rank {
            self.signalled.notify_all();
        }
    }

    /// Whether every expected signal has arrived.
    pub fn is_signalled(&self) -> bool {
        *self.count.lock().unwrap() >= self.rank
    }

    /// Block until the fence is signalled.
    pub fn wait(&self) {
        let mut count = self.count.lock().unwrap();
        if *count < self.rank {
            log::debug!("waiting for fence {}", self.id);
            while *count < self.rank {
                count = self.signalled.wait(count).unwrap();
            }
        }
    }
}
