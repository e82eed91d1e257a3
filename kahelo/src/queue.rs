// Copyright 2026 the Kahelo Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The producer-to-consumer handoff point.
//!
//! One mutex-guarded FIFO carries sealed scenes to the rasterizer threads.
//! Consumers either poll with [`SceneQueue::try_take`] or park in
//! [`SceneQueue::take`]; [`SceneQueue::close`] drains waiters so consumer
//! loops can exit.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

use static_assertions::assert_impl_all;

use crate::scene::Scene;

#[derive(Debug, Default)]
struct QueueState {
    scenes: VecDeque<Arc<Scene>>,
    closed: bool,
}

/// A mutex-guarded FIFO of sealed scenes.
#[derive(Debug, Default)]
pub struct SceneQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
}

assert_impl_all!(SceneQueue: Send, Sync);

impl SceneQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a sealed scene. Scenes submitted after [`SceneQueue::close`]
    /// are dropped, since no consumer will ever take them.
    pub fn submit(&self, scene: Arc<Scene>) {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            log::warn!("scene {} submitted to a closed queue", scene.id());
            return;
        }
        log::trace!("queueing scene {}", scene.id());
        state.scenes.push_back(scene);
        self.ready.notify_one();
    }

    /// Dequeue without blocking.
    pub fn try_take(&self) -> Option<Arc<Scene>> {
        self.state.lock().unwrap().scenes.pop_front()
    }

    /// Dequeue, blocking until a scene arrives. Returns `None` once the
    /// queue is closed and drained.
    pub fn take(&self) -> Option<Arc<Scene>> {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(scene) = state.scenes.pop_front() {
                return Some(scene);
            }
            if state.closed {
                return None;
            }
            state = self.ready.wait(state).unwrap();
        }
    }

    /// Mark the queue closed and wake every parked consumer.
    pub fn close(&self) {
        self.state.lock().unwrap().closed = true;
        self.ready.notify_all();
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fb::Framebuffer;

    fn sealed_scene(id: u32) -> Arc<Scene> {
        let mut scene = Scene::new(id, 1 << 16);
        scene.begin_binning(&Framebuffer::new(64, 64), false);
        Arc::new(scene)
    }

    #[test]
    fn fifo_order() {
        let queue = SceneQueue::new();
        queue.submit(sealed_scene(1));
        queue.submit(sealed_scene(2));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.try_take().unwrap().id(), 1);
        assert_eq!(queue.try_take().unwrap().id(), 2);
        assert!(queue.try_take().is_none());
    }

    #[test]
    fn close_wakes_blocked_consumer() {
        let queue = Arc::new(SceneQueue::new());
        let consumer = {
            let queue = queue.clone();
            std::thread::spawn(move || queue.take())
        };
        // Give the consumer a chance to park, then close.
        std::thread::sleep(std::time::Duration::from_millis(10));
        queue.close();
        assert!(consumer.join().unwrap().is_none());
    }

    #[test]
    fn take_delivers_then_drains_on_close() {
        let queue = Arc::new(SceneQueue::new());
        queue.submit(sealed_scene(5));
        queue.close();
        assert_eq!(queue.take().unwrap().id(), 5);
        assert!(queue.take().is_none());
        // Submissions after close are discarded.
        queue.submit(sealed_scene(6));
        assert!(queue.is_empty());
    }
}
