// Copyright 2026 the Kahelo Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A bounded pool of reusable scenes.
//!
//! The slot count is the bound: at most `max_scenes` scenes exist at once,
//! split between the producer's loan, idle spares, and scenes in flight on
//! consumer threads. When everything is in flight, acquisition blocks on a
//! fence, which is the engine's backpressure against a producer outrunning
//! the rasterizer.

use std::sync::Arc;

use crate::scene::Scene;

#[derive(Debug)]
enum Slot {
    /// Empty scene, ready to hand out.
    Idle(Box<Scene>),
    /// Loaned to the producer for binning.
    Loaned,
    /// Sealed and visible to consumer threads.
    InFlight(Arc<Scene>),
}

#[derive(Debug)]
pub(crate) struct ScenePool {
    slots: Vec<Slot>,
    max_scenes: usize,
    scene_budget: usize,
    next_id: u32,
}

impl ScenePool {
    pub fn new(max_scenes: usize, scene_budget: usize) -> Self {
        Self {
            slots: Vec::new(),
            max_scenes: max_scenes.max(1),
            scene_budget,
            next_id: 0,
        }
    }

    fn fresh_scene(&mut self) -> Box<Scene> {
        let id = self.next_id;
        self.next_id += 1;
        Box::new(Scene::new(id, self.scene_budget))
    }

    /// Get an empty scene the consumer side is guaranteed to be done with.
    /// Blocks when every slot is in flight and unsignalled.
    pub fn acquire(&mut self) -> Box<Scene> {
        for slot in &mut self.slots {
            if matches!(slot, Slot::Idle(_)) {
                let Slot::Idle(scene) = std::mem::replace(slot, Slot::Loaned) else {
                    unreachable!()
                };
                return scene;
            }
        }
        // No spare. Reclaim a finished in-flight scene if there is one.
        for i in 0..self.slots.len() {
            let done = match &self.slots[i] {
                Slot::InFlight(scene) => scene.fence().map_or(true, |f| f.is_signalled()),
                _ => continue,
            };
            if done {
                return self.reclaim(i);
            }
        }
        if self.slots.len() < self.max_scenes {
            self.slots.push(Slot::Loaned);
            log::debug!("scene pool: grown to {} slots", self.slots.len());
            return self.fresh_scene();
        }
        // All scenes busy: block on the oldest in-flight fence.
        for i in 0..self.slots.len() {
            let fence = match &self.slots[i] {
                Slot::InFlight(scene) => scene.fence().cloned(),
                _ => continue,
            };
            if let Some(fence) = fence {
                log::debug!("scene pool exhausted, waiting for fence {}", fence.id());
                fence.wait();
            }
            return self.reclaim(i);
        }
        // Single producer, so at capacity with no loan outstanding every
        // slot is in flight; reaching here means acquire was called while a
        // scene was already loaned out.
        unreachable!("scene pool has no reclaimable slot");
    }

    /// Take the scene out of an in-flight slot and make it empty again. If
    /// a consumer still holds the handle past its fence, the allocation is
    /// abandoned to it and the slot restarts with a fresh scene.
    fn reclaim(&mut self, i: usize) -> Box<Scene> {
        let Slot::InFlight(arc) = std::mem::replace(&mut self.slots[i], Slot::Loaned) else {
            unreachable!()
        };
        match Arc::try_unwrap(arc) {
            Ok(mut scene) => {
                log::trace!("scene pool: reusing scene {}", scene.id());
                scene.reset();
                Box::new(scene)
            }
            Err(_still_shared) => self.fresh_scene(),
        }
    }

    /// Return the producer's loan unused (activation failed or teardown).
    pub fn release(&mut self, mut scene: Box<Scene>) {
        scene.reset();
        for slot in &mut self.slots {
            if matches!(slot, Slot::Loaned) {
                *slot = Slot::Idle(scene);
                return;
            }
        }
        debug_assert!(false, "release without a loaned slot");
    }

    /// Move the producer's loan into the in-flight state at submission.
    pub fn deposit(&mut self, scene: Arc<Scene>) {
        for slot in &mut self.slots {
            if matches!(slot, Slot::Loaned) {
                *slot = Slot::InFlight(scene);
                return;
            }
        }
        debug_assert!(false, "deposit without a loaned slot");
    }

    /// In-flight scenes, for resource-reference scans.
    pub fn in_flight(&self) -> impl Iterator<Item = &Arc<Scene>> {
        self.slots.iter().filter_map(|slot| match slot {
            Slot::InFlight(scene) => Some(scene),
            _ => None,
        })
    }

    /// Block until every in-flight scene has completed.
    pub fn wait_all(&self) {
        for scene in self.in_flight() {
            if let Some(fence) = scene.fence() {
                fence.wait();
            }
        }
    }

    #[cfg(test)]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }
}
