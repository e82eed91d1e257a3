// Copyright 2026 the Kahelo Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Whole-frame binning: per-tile command streams as a consumer sees them.

use crate::util::{drain, draw_tri, get_ctx, quad, vert};
use kahelo::arena::Span;
use kahelo::clear::ClearFlags;
use kahelo::fb::Rect;
use kahelo::scene::Cmd;
use kahelo::state::{RasterizerState, VertexLayout};

fn state_span(cmd: &Cmd) -> Span {
    match cmd {
        Cmd::Point(p) | Cmd::Line(p) | Cmd::Triangle(p) => p.state,
        Cmd::Rect(r) => r.state,
        other => panic!("command has no stored state: {other:?}"),
    }
}

#[test]
fn frame_commands_follow_tile_coverage() {
    let (mut ctx, queue) = get_ctx(256, 192);
    ctx.clear([0.0, 0.0, 0.0, 1.0], 0.0, 0, ClearFlags::color(0))
        .unwrap();
    // One triangle in the top-left tile, one spanning the bottom-right
    // four.
    draw_tri(&mut ctx, (4.0, 4.0), (20.0, 4.0), (4.0, 20.0)).unwrap();
    draw_tri(&mut ctx, (140.0, 70.0), (250.0, 70.0), (140.0, 185.0)).unwrap();
    ctx.flush("frame end").unwrap();

    let scenes = drain(&queue);
    assert_eq!(scenes.len(), 1);
    let scene = &scenes[0];
    assert_eq!(scene.tiles(), (4, 3));
    for y in 0..3 {
        for x in 0..4 {
            let cmds = scene.tile(x, y);
            // The coalesced clear replays ahead of every draw.
            assert!(
                matches!(cmds.first(), Some(Cmd::ClearColor(_))),
                "tile ({x}, {y})"
            );
            let covered = (x, y) == (0, 0) || (x >= 2 && y >= 1);
            assert_eq!(cmds.len(), 1 + usize::from(covered), "tile ({x}, {y})");
        }
    }
    assert_eq!(scene.command_count(), 12 + 1 + 4);

    let Cmd::Triangle(tri) = &scene.tile(3, 2)[1] else {
        panic!("expected a triangle");
    };
    assert_eq!(tri.bbox, Rect::new(140, 70, 249, 184));
}

#[test]
fn mixed_primitives_share_one_capture_until_state_changes() {
    let (mut ctx, queue) = get_ctx(64, 64);
    ctx.draw_point(&vert(8.0, 8.0)).unwrap();
    ctx.draw_line(&vert(10.0, 10.0), &vert(30.0, 10.0)).unwrap();
    draw_tri(&mut ctx, (2.0, 2.0), (30.0, 2.0), (2.0, 30.0)).unwrap();
    let q = quad(40.0, 40.0, 60.0, 56.0);
    assert!(ctx
        .draw_rect([&q[0], &q[1], &q[2], &q[3], &q[4], &q[5]])
        .unwrap());
    // A fragment-state change forces a fresh capture for what follows.
    ctx.set_alpha_ref_value(0.5);
    draw_tri(&mut ctx, (2.0, 2.0), (30.0, 2.0), (2.0, 30.0)).unwrap();
    ctx.flush("frame end").unwrap();

    let scenes = drain(&queue);
    let cmds = scenes[0].tile(0, 0);
    assert_eq!(cmds.len(), 5);
    assert!(matches!(cmds[0], Cmd::Point(_)));
    assert!(matches!(cmds[1], Cmd::Line(_)));
    assert!(matches!(cmds[2], Cmd::Triangle(_)));
    assert!(matches!(cmds[3], Cmd::Rect(_)));
    assert!(matches!(cmds[4], Cmd::Triangle(_)));

    let first = state_span(&cmds[0]);
    for cmd in &cmds[1..4] {
        assert_eq!(state_span(cmd), first);
    }
    assert_ne!(state_span(&cmds[4]), first);

    let Cmd::Rect(rect) = &cmds[3] else {
        unreachable!()
    };
    assert_eq!(rect.rect, Rect::new(40, 40, 59, 55));
}

#[test]
fn vertex_attributes_are_copied_into_the_scene() {
    let (mut ctx, queue) = get_ctx(64, 64);
    ctx.set_vertex_layout(VertexLayout {
        num_attrs: 2,
        point_size_attr: None,
    });
    let v0 = [[0.0, 0.0, 0.0, 1.0], [0.25, 0.5, 0.75, 1.0]];
    let v1 = [[40.0, 0.0, 0.0, 1.0], [0.1, 0.2, 0.3, 0.4]];
    let v2 = [[0.0, 40.0, 0.0, 1.0], [0.9, 0.8, 0.7, 0.6]];
    ctx.draw_triangle(&v0, &v1, &v2).unwrap();
    ctx.flush("frame end").unwrap();

    let scenes = drain(&queue);
    let Cmd::Triangle(tri) = &scenes[0].tile(0, 0)[0] else {
        panic!("expected a triangle");
    };
    let attrs = scenes[0].arena().f32s(tri.verts);
    assert_eq!(attrs.len(), 3 * 2 * 4);
    assert_eq!(&attrs[..8], &[0.0, 0.0, 0.0, 1.0, 0.25, 0.5, 0.75, 1.0]);
    assert_eq!(&attrs[8..16], &[40.0, 0.0, 0.0, 1.0, 0.1, 0.2, 0.3, 0.4]);
    assert_eq!(&attrs[16..], &[0.0, 40.0, 0.0, 1.0, 0.9, 0.8, 0.7, 0.6]);
}

#[test]
fn wide_line_crosses_tile_boundaries() {
    let (mut ctx, queue) = get_ctx(128, 64);
    ctx.bind_rasterizer_state(RasterizerState {
        line_width: 4.0,
        ..Default::default()
    });
    ctx.draw_line(&vert(60.0, 32.0), &vert(68.0, 32.0)).unwrap();
    ctx.flush("frame end").unwrap();

    let scenes = drain(&queue);
    let scene = &scenes[0];
    assert_eq!(scene.tiles(), (2, 1));
    let (left, right) = (scene.tile(0, 0), scene.tile(1, 0));
    assert_eq!(left.len(), 1);
    assert_eq!(right.len(), 1);
    let (Cmd::Line(a), Cmd::Line(b)) = (&left[0], &right[0]) else {
        panic!("expected lines in both tiles");
    };
    assert_eq!(a.bbox, Rect::new(58, 30, 69, 33));
    // Both tiles reference the same vertex copy.
    assert_eq!(a.verts, b.verts);
    assert_eq!(
        scene.arena().f32s(a.verts),
        &[60.0, 32.0, 0.0, 1.0, 68.0, 32.0, 0.0, 1.0]
    );
}
