// Copyright 2026 the Kahelo Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Query binning across scenes.

use std::sync::Arc;
use std::time::Duration;

use kahelo::query::{Query, QueryKind};
use kahelo::scene::Cmd;
use kahelo::{BinningContext, BinningOptions, SceneQueue, MAX_BINNED_QUERIES};

use crate::util::{drain, draw_tri, get_ctx};

#[test]
fn query_markers_bracket_every_tile() {
    let (mut ctx, queue) = get_ctx(128, 128);
    let query = Arc::new(Query::new(QueryKind::OcclusionCounter));
    ctx.begin_query(&query).unwrap();
    assert_eq!(ctx.active_query_count(), 1);
    draw_tri(&mut ctx, (0.0, 0.0), (40.0, 0.0), (0.0, 40.0)).unwrap();
    ctx.end_query(&query).unwrap();
    assert_eq!(ctx.active_query_count(), 0);
    ctx.flush("frame end").unwrap();

    let scenes = drain(&queue);
    let scene = &scenes[0];
    for y in 0..2 {
        for x in 0..2 {
            let cmds = scene.tile(x, y);
            assert!(
                matches!(cmds.first(), Some(Cmd::BeginQuery(_))),
                "tile ({x}, {y})"
            );
            assert!(
                matches!(cmds.last(), Some(Cmd::EndQuery(_))),
                "tile ({x}, {y})"
            );
        }
    }
    // The triangle only sits between the markers where it was binned.
    assert_eq!(scene.tile(0, 0).len(), 3);
    assert_eq!(scene.tile(1, 1).len(), 2);
}

#[test]
fn query_spanning_scenes_is_rebinned() {
    let (mut ctx, queue) = get_ctx(64, 64);
    let query = Arc::new(Query::new(QueryKind::OcclusionCounter));
    ctx.begin_query(&query).unwrap();
    draw_tri(&mut ctx, (0.0, 0.0), (40.0, 0.0), (0.0, 40.0)).unwrap();
    ctx.flush("mid frame").unwrap();
    draw_tri(&mut ctx, (8.0, 8.0), (48.0, 8.0), (8.0, 48.0)).unwrap();
    ctx.end_query(&query).unwrap();
    ctx.flush("frame end").unwrap();

    let scenes = drain(&queue);
    assert_eq!(scenes.len(), 2);
    // The first scene was sealed with the query still open.
    assert_eq!(scenes[0].queries().len(), 1);
    assert!(Arc::ptr_eq(&scenes[0].queries()[0], &query));
    assert!(!scenes[0]
        .tile(0, 0)
        .iter()
        .any(|cmd| matches!(cmd, Cmd::EndQuery(_))));
    // The second re-opens it ahead of any work and closes it.
    let cmds = scenes[1].tile(0, 0);
    assert!(matches!(cmds.first(), Some(Cmd::BeginQuery(_))));
    assert!(matches!(cmds.last(), Some(Cmd::EndQuery(_))));
    assert!(scenes[1].queries().is_empty());
    // Results are complete with the last contributing scene's fence.
    let fence = query.fence().unwrap();
    assert!(Arc::ptr_eq(&fence, scenes[1].fence().unwrap()));
    assert!(fence.is_signalled());
}

#[test]
fn timestamp_without_tiles_stamps_immediately() {
    let queue = Arc::new(SceneQueue::new());
    // No framebuffer bound: zero tiles, so no consumer will run the
    // marker.
    let mut ctx = BinningContext::new(BinningOptions::default(), queue.clone());
    let first = Arc::new(Query::new(QueryKind::Timestamp));
    ctx.end_query(&first).unwrap();
    std::thread::sleep(Duration::from_millis(2));
    let second = Arc::new(Query::new(QueryKind::Timestamp));
    ctx.end_query(&second).unwrap();
    assert!(second.timestamp_nanos() > first.timestamp_nanos());

    ctx.flush("frame end").unwrap();
    let scenes = drain(&queue);
    assert_eq!(scenes[0].tile_count(), 0);
}

#[test]
fn timestamp_with_tiles_defers_to_the_consumer() {
    let (mut ctx, queue) = get_ctx(64, 64);
    let query = Arc::new(Query::new(QueryKind::Timestamp));
    ctx.end_query(&query).unwrap();
    assert_eq!(query.timestamp_nanos(), 0);
    ctx.flush("frame end").unwrap();

    let scenes = drain(&queue);
    let cmds = scenes[0].tile(0, 0);
    assert_eq!(cmds.len(), 1);
    assert!(matches!(cmds[0], Cmd::EndQuery(_)));
}

#[test]
fn active_query_list_is_bounded() {
    let (mut ctx, queue) = get_ctx(64, 64);
    let queries: Vec<_> = (0..MAX_BINNED_QUERIES + 1)
        .map(|_| Arc::new(Query::new(QueryKind::OcclusionCounter)))
        .collect();
    for query in &queries {
        ctx.begin_query(query).unwrap();
    }
    // Begins past the slot bound are dropped, not an error.
    assert_eq!(ctx.active_query_count(), MAX_BINNED_QUERIES);
    for query in &queries {
        ctx.end_query(query).unwrap();
    }
    assert_eq!(ctx.active_query_count(), 0);
    ctx.flush("frame end").unwrap();
    drop(drain(&queue));
}
