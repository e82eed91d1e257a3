// Copyright 2026 the Kahelo Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Query binning.
//!
//! Begin/end markers are binned into every tile so rasterizer threads can
//! bracket their per-tile counters; the engine itself keeps no results, only
//! the flat list of currently active queries and, on each query, the fence
//! of the last scene that contributed to it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Instant;

use static_assertions::assert_impl_all;

use crate::context::{BinningContext, SetupState};
use crate::fence::Fence;
use crate::scene::Cmd;
use crate::{Error, MAX_BINNED_QUERIES};

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Nanoseconds since the first timestamp request in this process.
fn monotonic_nanos() -> u64 {
    EPOCH.get_or_init(Instant::now).elapsed().as_nanos() as u64
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum QueryKind {
    OcclusionCounter,
    OcclusionPredicate,
    PipelineStatistics,
    TimeElapsed,
    Timestamp,
}

impl QueryKind {
    /// Binned kinds get begin/end markers in every tile and occupy a slot
    /// in the active list. Timestamps only bin their end marker.
    pub fn is_binned(self) -> bool {
        !matches!(self, Self::Timestamp)
    }
}

/// A producer-created query object, shared with scenes that reference it.
#[derive(Debug)]
pub struct Query {
    kind: QueryKind,
    fence: Mutex<Option<Arc<Fence>>>,
    timestamp: AtomicU64,
}

assert_impl_all!(Query: Send, Sync);

impl Query {
    pub fn new(kind: QueryKind) -> Self {
        Self {
            kind,
            fence: Mutex::new(None),
            timestamp: AtomicU64::new(0),
        }
    }

    pub fn kind(&self) -> QueryKind {
        self.kind
    }

    /// The fence of the last scene that contributed to this query. Results
    /// are complete once that fence signals.
    pub fn fence(&self) -> Option<Arc<Fence>> {
        self.fence.lock().unwrap().clone()
    }

    pub(crate) fn set_fence(&self, fence: Arc<Fence>) {
        *self.fence.lock().unwrap() = Some(fence);
    }

    /// Timestamp value, for [`QueryKind::Timestamp`] queries stamped
    /// without any tile work.
    pub fn timestamp_nanos(&self) -> u64 {
        self.timestamp.load(Ordering::Acquire)
    }

    pub(crate) fn stamp_now(&self) {
        self.timestamp.store(monotonic_nanos(), Ordering::Release);
    }
}

impl BinningContext {
    /// Start a query. Binned kinds are marked in every tile of the current
    /// scene and re-marked in every later scene until [`Self::end_query`].
    pub fn begin_query(&mut self, query: &Arc<Query>) -> Result<(), Error> {
        self.set_scene_state(SetupState::Active, "begin query")?;
        if !query.kind().is_binned() {
            return Ok(());
        }
        if self.active_queries.len() >= MAX_BINNED_QUERIES {
            log::warn!(
                "dropping {:?} query: {} queries already active",
                query.kind(),
                self.active_queries.len()
            );
            return Ok(());
        }
        self.active_queries.push(query.clone());
        if let Some(scene) = self.scene.as_mut() {
            if scene.bin_everywhere(Cmd::BeginQuery(query.clone())).is_err() {
                // The restarted scene re-bins begin markers for the whole
                // active list, this query included.
                self.flush_and_restart("begin query")?;
            }
        }
        Ok(())
    }

    /// Finish a query: bin its end marker, record the scene fence on it,
    /// and drop it from the active list.
    pub fn end_query(&mut self, query: &Arc<Query>) -> Result<(), Error> {
        self.set_scene_state(SetupState::Active, "end query")?;
        if self.try_bin_end_query(query).is_err() {
            self.flush_and_restart("end query")?;
            if self.try_bin_end_query(query).is_err() {
                log::warn!("dropping {:?} query end marker: scene full", query.kind());
            }
        }
        if let Some(scene) = self.scene.as_ref() {
            if let Some(fence) = scene.fence() {
                query.set_fence(fence.clone());
            }
            // With no tiles there is no consumer task to do the stamping.
            if query.kind() == QueryKind::Timestamp && scene.tile_count() == 0 {
                query.stamp_now();
            }
        }
        if query.kind().is_binned() {
            if let Some(i) = self
                .active_queries
                .iter()
                .position(|active| Arc::ptr_eq(active, query))
            {
                self.active_queries.swap_remove(i);
            } else {
                log::warn!("end_query without matching begin_query");
            }
        }
        Ok(())
    }

    fn try_bin_end_query(&mut self, query: &Arc<Query>) -> Result<(), crate::arena::SceneFull> {
        match self.scene.as_mut() {
            Some(scene) => scene.bin_everywhere(Cmd::EndQuery(query.clone())),
            None => Ok(()),
        }
    }
}
