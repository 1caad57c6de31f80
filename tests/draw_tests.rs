//! Draw Phase Tests
//!
//! Tests for:
//! - Draw order across interleaved features after sorting
//! - Deferred command lists: batching, single submission, state restore
//! - Immediate fallback when deferred recording is unavailable
//! - Missing (view, stage) pairs
//! - Resource group binding and pipeline state finalization

mod common;

use std::sync::Arc;

use glam::Vec3;

use common::{Harness, effect};
use prism::errors::RenderError;
use prism::renderer::backend::{
    CommandList, HeadlessBackend, HeadlessCommandList, RecordedCommand, RenderTargetState, Viewport,
};
use prism::renderer::effect::{
    Effect, EffectBytecode, EffectConstantBuffer, EffectReflection, EffectResourceBinding, ResourceClass,
};
use prism::renderer::feature::effect::RENDER_TARGET_EXTENSIONS;
use prism::renderer::object::BoundingBox;
use prism::renderer::pipeline::TransparentPipelineProcessor;
use prism::renderer::stage::{RenderOutputDescription, RenderTargetExtension};
use prism::renderer::{
    BackToFrontSortMode, DrawDispatch, MeshRenderFeature, MeshRenderObject, ParameterKey, RenderContext,
    RenderDrawContext, RenderObject, RenderStage, RenderSystemSettings, RootEffectRenderFeature,
    SimpleGroupToRenderStageSelector,
};

#[derive(Debug, Default)]
struct SpriteObject;

fn depth_sorted_scene(harness: &mut Harness, count: usize) -> usize {
    let main = harness
        .system
        .add_render_stage(RenderStage::new("Main", "Main").with_sort_mode(Arc::new(BackToFrontSortMode)))
        .unwrap();

    let mut meshes = MeshRenderFeature::new();
    meshes.add_render_stage_selector(SimpleGroupToRenderStageSelector::new(main, "MeshEffect"));
    harness.system.add_render_feature(Box::new(meshes)).unwrap();

    let mut sprites = RootEffectRenderFeature::<()>::with_hooks::<SpriteObject>("SpriteRenderFeature", ());
    sprites.add_render_stage_selector(SimpleGroupToRenderStageSelector::new(main, "SpriteEffect"));
    harness.system.add_render_feature(Box::new(sprites)).unwrap();

    for i in 0..count {
        let object = if i % 2 == 0 {
            RenderObject::new(MeshRenderObject::default())
        } else {
            RenderObject::new(SpriteObject)
        };
        let depth = 1.0 + i as f32;
        harness.system.add_render_object(
            object.with_bounding_box(BoundingBox::from_center(Vec3::new(0.0, 0.0, -depth), Vec3::splat(0.5))),
        );
    }
    main
}

/// Object creation indices, farthest first.
fn expected_order(harness: &Harness) -> Vec<u64> {
    let mut objects: Vec<_> = harness.system.objects().values().collect();
    objects.sort_by(|a, b| a.bounding_box.center().z.total_cmp(&b.bounding_box.center().z));
    objects.iter().map(|object| object.index()).collect()
}

// ============================================================================
// Immediate Recording
// ============================================================================

#[test]
fn interleaved_features_draw_in_sorted_order() {
    let mut harness = Harness::new();
    let main = depth_sorted_scene(&mut harness, 9);

    let draws = harness.frame(RenderContext::new(), &[main]);
    let order: Vec<u64> = draws.iter().map(|draw| draw.object_index).collect();
    assert_eq!(order, expected_order(&harness));
    assert!(draws.iter().all(|draw| draw.view == 0 && draw.render_stage == main));
}

#[test]
fn empty_stage_records_nothing() {
    let mut harness = Harness::new();
    let main = harness.system.add_render_stage(RenderStage::new("Main", "Main")).unwrap();
    harness.system.add_render_feature(Box::new(MeshRenderFeature::new())).unwrap();

    harness.prepare_frame(RenderContext::new(), &[main]);
    let list = harness.draw_frame(RenderContext::new(), &[main]);
    assert!(list.commands().is_empty());
}

#[test]
fn missing_view_stage_is_an_error() {
    let mut harness = Harness::new();
    let main = harness.system.add_render_stage(RenderStage::new("Main", "Main")).unwrap();
    let shadow = harness
        .system
        .add_render_stage(RenderStage::new("Shadow", "ShadowMapCaster"))
        .unwrap();
    harness.prepare_frame(RenderContext::new(), &[main]);

    let mut list = HeadlessCommandList::new();
    let mut ctx = RenderDrawContext::new(RenderContext::new(), &mut list);
    assert!(matches!(
        harness.system.draw(&mut ctx, 0, shadow),
        Err(RenderError::MissingRenderViewStage { view: 0, stage }) if stage == shadow
    ));
    assert!(matches!(
        harness.system.draw(&mut ctx, 4, main),
        Err(RenderError::MissingRenderViewStage { view: 4, .. })
    ));
    assert!(harness.system.draw(&mut ctx, 0, main).is_ok());
}

// ============================================================================
// Deferred Recording
// ============================================================================

fn deferred_harness(dispatch: DrawDispatch, backend_deferred: bool) -> Harness {
    let settings = RenderSystemSettings {
        dispatch,
        max_draw_batches: Some(3),
        ..RenderSystemSettings::default()
    };
    Harness::with(HeadlessBackend::with_deferred(backend_deferred), settings)
}

fn draw_with_viewport(harness: &mut Harness, main: usize) -> (HeadlessCommandList, RenderTargetState) {
    let context = RenderContext::new();
    harness.prepare_frame(context, &[main]);

    let mut list = HeadlessCommandList::new();
    list.set_viewports(&[Viewport::new(320.0, 240.0)]);
    let state = list.render_target_state();
    {
        let mut ctx = RenderDrawContext::new(context, &mut list);
        harness.system.draw(&mut ctx, 0, main).unwrap();
    }
    (list, state)
}

#[test]
fn deferred_draws_are_batched_into_one_submission() {
    let mut harness = deferred_harness(DrawDispatch::Auto, true);
    let main = depth_sorted_scene(&mut harness, 10);
    let (list, state) = draw_with_viewport(&mut harness, main);

    let submissions = harness.backend.take_submissions();
    assert_eq!(submissions.len(), 1);
    let lists = &submissions[0];
    // Main list first, then one worker list per batch.
    assert_eq!(lists.len(), 4);
    assert!(
        lists[0]
            .commands
            .iter()
            .any(|command| matches!(command, RecordedCommand::SetViewports(_)))
    );
    assert_eq!(lists[0].draws().count(), 0);

    for worker in &lists[1..] {
        assert_eq!(worker.commands[0], RecordedCommand::Reset);
        assert_eq!(worker.commands[1], RecordedCommand::ClearState);
        assert_eq!(
            worker.commands[3],
            RecordedCommand::SetViewports(state.viewports.to_vec())
        );
    }

    let batched: Vec<u64> = lists[1..]
        .iter()
        .flat_map(|worker| worker.draws().map(|draw| draw.object_index))
        .collect();
    assert_eq!(batched, expected_order(&harness));
    assert_eq!(
        lists[1..].iter().map(|worker| worker.draws().count()).collect::<Vec<_>>(),
        vec![3, 3, 4]
    );

    // The caller's list is reopened with its output state.
    assert_eq!(list.commands()[0], RecordedCommand::Reset);
    assert_eq!(list.render_target_state(), state);
    assert_eq!(list.draws().count(), 0);
}

#[test]
fn worker_command_lists_are_pooled() {
    let mut harness = deferred_harness(DrawDispatch::Deferred, true);
    let main = depth_sorted_scene(&mut harness, 12);

    draw_with_viewport(&mut harness, main);
    let created = harness.backend.stats().command_lists;
    assert!((1..=3).contains(&created));

    draw_with_viewport(&mut harness, main);
    draw_with_viewport(&mut harness, main);
    assert!(harness.backend.stats().command_lists <= 3);
    assert_eq!(harness.backend.take_submissions().len(), 3);
}

#[test]
fn immediate_recording_without_deferred_support() {
    let mut harness = deferred_harness(DrawDispatch::Deferred, false);
    let main = depth_sorted_scene(&mut harness, 6);
    let (list, _) = draw_with_viewport(&mut harness, main);

    assert!(harness.backend.submissions().is_empty());
    assert_eq!(list.draws().count(), 6);
    assert_eq!(harness.backend.stats().command_lists, 0);
}

#[test]
fn immediate_dispatch_overrides_backend_support() {
    let mut harness = deferred_harness(DrawDispatch::Immediate, true);
    let main = depth_sorted_scene(&mut harness, 6);
    let (list, _) = draw_with_viewport(&mut harness, main);

    assert!(harness.backend.submissions().is_empty());
    let order: Vec<u64> = list.draws().map(|draw| draw.object_index).collect();
    assert_eq!(order, expected_order(&harness));
}

// ============================================================================
// Resources & Pipeline States
// ============================================================================

fn resource_effect() -> Arc<Effect> {
    let binding = |name: &str, set: &str| EffectResourceBinding::new(ParameterKey::new(name), ResourceClass::ConstantBuffer, set);
    let buffer = |name: &str, size: u32| EffectConstantBuffer {
        name: name.into(),
        size,
        members: Vec::new(),
    };
    Arc::new(Effect::new(
        "MeshEffect",
        EffectBytecode {
            hash: 0xC0FFEE,
            reflection: EffectReflection {
                resource_bindings: vec![
                    binding("Draw.World", "PerDraw"),
                    binding("View.Camera", "PerView"),
                    binding("Frame.Globals", "PerFrame"),
                ],
                constant_buffers: vec![buffer("PerDraw", 64), buffer("PerView", 128), buffer("PerFrame", 16)],
            },
        },
    ))
}

fn resource_groups_of(list: &HeadlessCommandList) -> Vec<Vec<Option<u64>>> {
    list.commands()
        .iter()
        .filter_map(|command| match command {
            RecordedCommand::SetResourceGroups(groups) => Some(groups.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn frame_and_view_groups_are_shared_draw_groups_are_not() {
    let mut harness = Harness::new();
    let main = harness.system.add_render_stage(RenderStage::new("Main", "Main")).unwrap();
    let mut meshes = MeshRenderFeature::new();
    meshes.add_render_stage_selector(SimpleGroupToRenderStageSelector::new(main, "MeshEffect"));
    harness.system.add_render_feature(Box::new(meshes)).unwrap();
    harness.compiler.provide("MeshEffect", resource_effect());

    harness.system.add_render_object(RenderObject::new(MeshRenderObject::default()));
    harness.system.add_render_object(RenderObject::new(MeshRenderObject::default()));

    let context = RenderContext::new();
    harness.prepare_frame(context, &[main]);
    let list = harness.draw_frame(context, &[main]);

    let groups = resource_groups_of(&list);
    assert_eq!(groups.len(), 2);
    for bound in &groups {
        assert_eq!(bound.len(), 3);
        assert!(bound.iter().all(Option::is_some));
    }
    assert_eq!(groups[0][0], groups[1][0], "PerFrame is shared");
    assert_eq!(groups[0][1], groups[1][1], "PerView is shared");
    assert_ne!(groups[0][2], groups[1][2], "PerDraw is per node");

    let feature = harness.system.feature::<MeshRenderFeature>(0).unwrap();
    assert_eq!(feature.used_frame_layouts().len(), 1);
    assert_eq!(feature.effect_object_nodes().len(), 2);
    assert_eq!(harness.system.views()[0].features[0].layouts.items().len(), 1);

    let stats = harness.system.allocator().last_flush();
    assert_eq!(stats.prepared_groups, 4);
}

#[test]
fn pipeline_processors_shape_the_pipeline_state() -> anyhow::Result<()> {
    let mut harness = Harness::new();
    let output = RenderOutputDescription::new(wgpu::TextureFormat::Rgba16Float, Some(wgpu::TextureFormat::Depth32Float))
        .with_multisample_count(4);
    let transparent = harness
        .system
        .add_render_stage(RenderStage::new("Transparent", "Main").with_output(output))?;

    let mut meshes = MeshRenderFeature::new();
    meshes.add_render_stage_selector(SimpleGroupToRenderStageSelector::new(transparent, "MeshEffect"));
    meshes.add_pipeline_processor(TransparentPipelineProcessor::new(transparent));
    harness.system.add_render_feature(Box::new(meshes))?;
    let mesh = harness
        .system
        .add_render_object(RenderObject::new(MeshRenderObject::default()));

    assert_eq!(harness.frame(RenderContext::new(), &[transparent]).len(), 1);

    let feature = harness
        .system
        .feature::<MeshRenderFeature>(0)
        .ok_or_else(|| anyhow::anyhow!("mesh feature not registered"))?;
    let object = harness
        .system
        .object(mesh)
        .ok_or_else(|| anyhow::anyhow!("mesh object missing"))?;
    let pipeline = feature
        .render_effect(object, transparent)
        .and_then(|effect| effect.pipeline_state.clone())
        .ok_or_else(|| anyhow::anyhow!("no pipeline state after prepare"))?;
    assert_eq!(pipeline.description.blend_state, Some(wgpu::BlendState::ALPHA_BLENDING));
    assert!(!pipeline.description.depth_stencil_state.depth_write_enable);
    assert_eq!(pipeline.description.rasterizer_state.multisample_count, 4);
    assert_eq!(pipeline.description.output.render_target_formats.len(), 1);
    assert!(pipeline.description.effect_bytecode.is_some());
    assert!(pipeline.description.root_signature.is_some());
    Ok(())
}

#[test]
fn render_target_extensions_join_the_permutation_and_output() {
    let mut harness = Harness::new();
    let mut stage = RenderStage::new("Main", "Main").with_output(RenderOutputDescription::new(
        wgpu::TextureFormat::Rgba8Unorm,
        Some(wgpu::TextureFormat::Depth32Float),
    ));
    stage.add_render_target_extension(RenderTargetExtension {
        semantic: "Velocity".into(),
        format: wgpu::TextureFormat::Rg16Float,
        shader_class: "VelocityOutput".into(),
    });
    let main = harness.system.add_render_stage(stage).unwrap();

    let mut meshes = MeshRenderFeature::new();
    meshes.add_render_stage_selector(SimpleGroupToRenderStageSelector::new(main, "MeshEffect"));
    harness.system.add_render_feature(Box::new(meshes)).unwrap();
    let mesh = harness
        .system
        .add_render_object(RenderObject::new(MeshRenderObject::default()));

    assert_eq!(harness.frame(RenderContext::new(), &[main]).len(), 1);
    let parameters = harness.compiler.last_parameters().unwrap();
    assert!(parameters.contains(*RENDER_TARGET_EXTENSIONS));

    let feature = harness.system.feature::<MeshRenderFeature>(0).unwrap();
    let object = harness.system.object(mesh).unwrap();
    let pipeline = feature
        .render_effect(object, main)
        .and_then(|effect| effect.pipeline_state.clone())
        .unwrap();
    assert_eq!(
        pipeline.description.output.render_target_formats.as_slice(),
        &[wgpu::TextureFormat::Rgba8Unorm, wgpu::TextureFormat::Rg16Float]
    );
}

#[test]
fn identical_descriptions_share_a_pipeline_state() {
    let mut harness = Harness::new();
    let main = harness.system.add_render_stage(RenderStage::new("Main", "Main")).unwrap();
    let mut meshes = MeshRenderFeature::new();
    meshes.add_render_stage_selector(SimpleGroupToRenderStageSelector::new(main, "MeshEffect"));
    harness.system.add_render_feature(Box::new(meshes)).unwrap();
    let shared = effect("MeshEffect");
    harness.compiler.provide("MeshEffect", shared);

    for _ in 0..8 {
        harness
            .system
            .add_render_object(RenderObject::new(MeshRenderObject::default()));
    }
    assert_eq!(harness.frame(RenderContext::new(), &[main]).len(), 8);
    assert_eq!(harness.backend.stats().pipeline_states, 1);
    assert_eq!(harness.system.pipeline_cache().len(), 1);
}
