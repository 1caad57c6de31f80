//! Effect Permutation Tests
//!
//! Tests for:
//! - Compile-once reuse across frames and recompiles on permutation changes
//! - Skip then resume of an object whose material is loading
//! - Compile failure, retry gating and fallback rendering
//! - Asynchronous compiles with and without a fallback effect
//! - Hot-reload recompiles and the compiled-effect notification

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use common::{Harness, Script, effect};
use prism::renderer::effect::RenderEffectState;
use prism::renderer::parameters::ParameterCollection;
use prism::renderer::{
    MeshRenderFeature, MeshRenderObject, RenderContext, RenderObject, RenderObjectKey, RenderStage,
    SimpleGroupToRenderStageSelector,
};

const EFFECT: &str = "MeshEffect";

struct Scene {
    harness: Harness,
    main: usize,
    mesh: RenderObjectKey,
}

fn scene(configure: impl FnOnce(&mut MeshRenderFeature)) -> Scene {
    let mut harness = Harness::new();
    let main = harness
        .system
        .add_render_stage(RenderStage::new("Main", "Main"))
        .unwrap();

    let mut feature = MeshRenderFeature::new();
    feature.add_render_stage_selector(SimpleGroupToRenderStageSelector::new(main, EFFECT));
    configure(&mut feature);
    harness.system.add_render_feature(Box::new(feature)).unwrap();

    let mesh = harness
        .system
        .add_render_object(RenderObject::new(MeshRenderObject::default()));
    Scene { harness, main, mesh }
}

impl Scene {
    fn frame_at(&mut self, now: Instant) -> usize {
        self.harness.frame(RenderContext::at(now), &[self.main]).len()
    }

    fn state(&self) -> Option<RenderEffectState> {
        let feature = self.harness.system.feature::<MeshRenderFeature>(0)?;
        let object = self.harness.system.object(self.mesh)?;
        feature.render_effect(object, self.main).map(|effect| effect.state)
    }

    fn effect_id(&self) -> Option<prism::renderer::effect::EffectId> {
        let feature = self.harness.system.feature::<MeshRenderFeature>(0)?;
        let object = self.harness.system.object(self.mesh)?;
        feature
            .render_effect(object, self.main)?
            .effect
            .as_ref()
            .map(|effect| effect.id())
    }

    fn mesh_mut(&mut self) -> &mut MeshRenderObject {
        self.harness
            .system
            .object_mut(self.mesh)
            .and_then(RenderObject::data_mut::<MeshRenderObject>)
            .unwrap()
    }
}

fn with_fallback(fallback: &Arc<prism::renderer::Effect>) -> impl FnOnce(&mut MeshRenderFeature) {
    let fallback = fallback.clone();
    move |feature| {
        feature.set_compute_fallback_effect(move |_, _, _| Some((fallback.clone(), ParameterCollection::new())));
    }
}

// ============================================================================
// Steady State
// ============================================================================

#[test]
fn effect_compiles_once_and_is_reused() {
    let mut scene = scene(|_| {});
    let now = Instant::now();

    assert_eq!(scene.frame_at(now), 1);
    assert_eq!(scene.frame_at(now), 1);
    assert_eq!(scene.frame_at(now), 1);

    assert_eq!(scene.harness.compiler.loads(), 1);
    assert_eq!(scene.state(), Some(RenderEffectState::Normal));
    assert_eq!(scene.harness.backend.stats().pipeline_states, 1);
    assert_eq!(scene.harness.backend.stats().root_signatures, 1);
}

#[test]
fn permutation_change_requests_a_new_effect() {
    let mut scene = scene(|_| {});
    let now = Instant::now();

    scene.frame_at(now);
    let first = scene.effect_id();

    scene.mesh_mut().skinned = true;
    assert_eq!(scene.frame_at(now), 1);
    assert_eq!(scene.harness.compiler.loads(), 2);
    assert_ne!(scene.effect_id(), first);

    // Back to the first permutation: the compiler cache answers.
    scene.mesh_mut().skinned = false;
    scene.frame_at(now);
    assert_eq!(scene.harness.compiler.loads(), 3);
    assert_eq!(scene.effect_id(), first);
}

#[test]
fn material_hash_lands_in_the_upper_sort_key_bits() {
    let mut scene = scene(|_| {});
    scene.mesh_mut().material_hash = 0xBEEF;
    scene.frame_at(Instant::now());

    let object = scene.harness.system.object(scene.mesh).unwrap();
    assert_eq!(object.state_sort_key() >> 16, 0xBEEF);

    // The compiled effect owns the low half.
    let feature = scene.harness.system.feature::<MeshRenderFeature>(0).unwrap();
    let compiled = feature
        .render_effect(object, scene.main)
        .and_then(|effect| effect.effect.as_ref())
        .unwrap();
    assert_eq!(object.state_sort_key() & 0xFFFF, compiled.sort_hash() & 0xFFFF);
}

// ============================================================================
// Skip
// ============================================================================

#[test]
fn loading_material_skips_then_resumes() {
    let mut scene = scene(|_| {});
    let now = Instant::now();

    scene.mesh_mut().material_ready = false;
    assert_eq!(scene.frame_at(now), 0);
    assert_eq!(scene.state(), Some(RenderEffectState::Skip));
    assert!(scene.effect_id().is_none());
    assert_eq!(scene.harness.compiler.loads(), 0);

    scene.mesh_mut().material_ready = true;
    assert_eq!(scene.frame_at(now), 1);
    assert_eq!(scene.state(), Some(RenderEffectState::Normal));
    assert_eq!(scene.harness.compiler.loads(), 1);
}

#[test]
fn skipping_after_normal_forces_a_new_request() {
    let mut scene = scene(|_| {});
    let now = Instant::now();

    scene.frame_at(now);
    scene.mesh_mut().material_ready = false;
    assert_eq!(scene.frame_at(now), 0);

    scene.mesh_mut().material_ready = true;
    assert_eq!(scene.frame_at(now), 1);
    // Leaving Skip always requests the effect again.
    assert_eq!(scene.harness.compiler.loads(), 2);
}

// ============================================================================
// Failure & Retry
// ============================================================================

#[test]
fn failed_compile_waits_for_the_retry_interval() {
    let mut scene = scene(|_| {});
    scene.harness.compiler.script(EFFECT, Script::Fail);
    let start = Instant::now();

    assert_eq!(scene.frame_at(start), 0);
    assert_eq!(scene.state(), Some(RenderEffectState::Error));
    assert_eq!(scene.harness.compiler.loads(), 1);

    // Still inside the default 5 s interval: no new request.
    assert_eq!(scene.frame_at(start + Duration::from_secs(1)), 0);
    assert_eq!(scene.frame_at(start + Duration::from_secs(4)), 0);
    assert_eq!(scene.harness.compiler.loads(), 1);

    scene.harness.compiler.script(EFFECT, Script::Ready);
    assert_eq!(scene.frame_at(start + Duration::from_secs(6)), 1);
    assert_eq!(scene.harness.compiler.loads(), 2);
    assert_eq!(scene.state(), Some(RenderEffectState::Normal));
}

#[test]
fn failed_compile_renders_the_fallback() {
    let fallback = effect("FallbackEffect");
    let mut scene = scene(with_fallback(&fallback));
    scene.harness.compiler.script(EFFECT, Script::Fail);

    assert_eq!(scene.frame_at(Instant::now()), 1);
    assert_eq!(scene.state(), Some(RenderEffectState::Error));
    assert_eq!(scene.effect_id(), Some(fallback.id()));

    let feature = scene.harness.system.feature::<MeshRenderFeature>(0).unwrap();
    let object = scene.harness.system.object(scene.mesh).unwrap();
    let render_effect = feature.render_effect(object, scene.main).unwrap();
    assert!(render_effect.fallback_parameters.is_some());
    assert!(render_effect.reflection.as_ref().unwrap().fallback_layouts().is_some());
}

#[test]
fn retry_interval_is_configurable() {
    let mut scene = scene(|_| {});
    scene.harness.system.settings_mut().effect_retry_interval = Duration::from_millis(100);
    scene.harness.compiler.script(EFFECT, Script::Fail);
    let start = Instant::now();

    scene.frame_at(start);
    scene.frame_at(start + Duration::from_millis(50));
    assert_eq!(scene.harness.compiler.loads(), 1);

    scene.frame_at(start + Duration::from_millis(150));
    assert_eq!(scene.harness.compiler.loads(), 2);
    assert_eq!(scene.state(), Some(RenderEffectState::Error));
}

// ============================================================================
// Asynchronous Compiles
// ============================================================================

#[test]
fn pending_compile_renders_fallback_until_completed() {
    let fallback = effect("FallbackEffect");
    let mut scene = scene(with_fallback(&fallback));
    scene.harness.compiler.script(EFFECT, Script::Pending);
    let now = Instant::now();

    assert_eq!(scene.frame_at(now), 1);
    assert_eq!(scene.state(), Some(RenderEffectState::Compiling));
    assert_eq!(scene.effect_id(), Some(fallback.id()));

    // Not completed yet: polled, not requested again.
    assert_eq!(scene.frame_at(now), 1);
    assert_eq!(scene.harness.compiler.loads(), 1);
    assert_eq!(scene.state(), Some(RenderEffectState::Compiling));

    let compiled = effect(EFFECT);
    scene.harness.compiler.complete_all(&compiled);
    assert_eq!(scene.frame_at(now), 1);
    assert_eq!(scene.state(), Some(RenderEffectState::Normal));
    assert_eq!(scene.effect_id(), Some(compiled.id()));
    assert_eq!(scene.harness.compiler.loads(), 1);
}

#[test]
fn pending_compile_failure_enters_error() {
    let fallback = effect("FallbackEffect");
    let mut scene = scene(with_fallback(&fallback));
    scene.harness.compiler.script(EFFECT, Script::Pending);
    let now = Instant::now();

    scene.frame_at(now);
    scene.harness.compiler.fail_all();
    assert_eq!(scene.frame_at(now), 1);
    assert_eq!(scene.state(), Some(RenderEffectState::Error));
    assert_eq!(scene.effect_id(), Some(fallback.id()));
}

#[test]
fn pending_compile_without_fallback_is_waited_for() {
    let mut scene = scene(|_| {});
    scene
        .harness
        .compiler
        .script(EFFECT, Script::Background(Duration::from_millis(20)));

    assert_eq!(scene.frame_at(Instant::now()), 1);
    assert_eq!(scene.state(), Some(RenderEffectState::Normal));
    assert!(scene.effect_id().is_some());
}

// ============================================================================
// Hot Reload & Notifications
// ============================================================================

#[test]
fn source_change_triggers_a_recompile() {
    let mut scene = scene(|_| {});
    let now = Instant::now();

    scene.frame_at(now);
    let feature = scene.harness.system.feature::<MeshRenderFeature>(0).unwrap();
    let object = scene.harness.system.object(scene.mesh).unwrap();
    feature
        .render_effect(object, scene.main)
        .and_then(|effect| effect.effect.as_ref())
        .unwrap()
        .mark_source_changed();

    scene.frame_at(now);
    assert_eq!(scene.harness.compiler.loads(), 2);
}

#[test]
fn compiled_notification_fires_once_per_effect() {
    let notified = Arc::new(AtomicUsize::new(0));
    let counter = notified.clone();
    let mut scene = scene(move |feature| {
        feature.on_effect_compiled(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
    });
    let second = scene
        .harness
        .system
        .add_render_object(RenderObject::new(MeshRenderObject::default()));
    let now = Instant::now();

    assert_eq!(scene.frame_at(now), 2);
    scene.frame_at(now);
    assert_eq!(notified.load(Ordering::SeqCst), 1);

    scene
        .harness
        .system
        .object_mut(second)
        .and_then(RenderObject::data_mut::<MeshRenderObject>)
        .unwrap()
        .skinned = true;
    scene.frame_at(now);
    assert_eq!(notified.load(Ordering::SeqCst), 2);
}
