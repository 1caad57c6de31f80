//! Shared fixtures for the render system integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use prism::errors::EffectCompileError;
use prism::renderer::backend::{DrawCommand, HeadlessBackend, HeadlessCommandList};
use prism::renderer::effect::{Effect, EffectBytecode, EffectCompiler, EffectLoad, EffectReflection};
use prism::renderer::effect::compiler::{EffectCompletion, PendingEffect};
use prism::renderer::parameters::CompilerParameters;
use prism::renderer::{RenderContext, RenderDrawContext, RenderSystem, RenderSystemSettings, RenderView};

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ============================================================================
// Scripted Compiler
// ============================================================================

/// How the compiler answers requests for one effect name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    Ready,
    Fail,
    /// Pending until the test calls [`ScriptedCompiler::complete_all`].
    Pending,
    /// Pending, completed by a worker thread after the delay.
    Background(Duration),
}

/// Effect compiler answering from a per-name script. Ready effects are
/// cached by (name, parameters) like a real compiler would.
#[derive(Default)]
pub struct ScriptedCompiler {
    scripts: Mutex<FxHashMap<String, Script>>,
    cache: Mutex<FxHashMap<(String, u64), Arc<Effect>>>,
    provided: Mutex<FxHashMap<String, Arc<Effect>>>,
    last_parameters: Mutex<Option<CompilerParameters>>,
    completions: Mutex<Vec<EffectCompletion>>,
    loads: AtomicUsize,
}

impl ScriptedCompiler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, effect_name: &str, script: Script) {
        self.scripts.lock().insert(effect_name.to_string(), script);
    }

    /// Answers every ready request for `effect_name` with `effect`.
    pub fn provide(&self, effect_name: &str, effect: Arc<Effect>) {
        self.provided.lock().insert(effect_name.to_string(), effect);
    }

    pub fn last_parameters(&self) -> Option<CompilerParameters> {
        self.last_parameters.lock().clone()
    }

    /// Number of `load_effect` calls so far.
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn pending_count(&self) -> usize {
        self.completions.lock().len()
    }

    /// Completes every pending compile with `effect`.
    pub fn complete_all(&self, effect: &Arc<Effect>) {
        for completion in self.completions.lock().drain(..) {
            completion.complete(Ok(effect.clone()));
        }
    }

    pub fn fail_all(&self) {
        for completion in self.completions.lock().drain(..) {
            completion.complete(Err(EffectCompileError::Failed {
                effect: "scripted".into(),
                message: "scripted failure".into(),
            }));
        }
    }
}

impl EffectCompiler for ScriptedCompiler {
    fn load_effect(
        &self,
        effect_name: &str,
        parameters: &CompilerParameters,
    ) -> Result<EffectLoad, EffectCompileError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        *self.last_parameters.lock() = Some(parameters.clone());
        let script = self
            .scripts
            .lock()
            .get(effect_name)
            .copied()
            .unwrap_or(Script::Ready);

        match script {
            Script::Ready => {
                if let Some(effect) = self.provided.lock().get(effect_name) {
                    return Ok(EffectLoad::Ready(effect.clone()));
                }
                let key = (effect_name.to_string(), parameters.content_hash());
                let effect = self
                    .cache
                    .lock()
                    .entry(key)
                    .or_insert_with(|| effect(effect_name))
                    .clone();
                Ok(EffectLoad::Ready(effect))
            }
            Script::Fail => Err(EffectCompileError::Failed {
                effect: effect_name.to_string(),
                message: "scripted failure".into(),
            }),
            Script::Pending => {
                let (pending, completion) = PendingEffect::new(effect_name);
                self.completions.lock().push(completion);
                Ok(EffectLoad::Pending(pending))
            }
            Script::Background(delay) => {
                let (pending, completion) = PendingEffect::new(effect_name);
                let compiled = effect(effect_name);
                std::thread::spawn(move || {
                    std::thread::sleep(delay);
                    completion.complete(Ok(compiled));
                });
                Ok(EffectLoad::Pending(pending))
            }
        }
    }
}

/// Compiled effect without resources.
pub fn effect(name: &str) -> Arc<Effect> {
    Arc::new(Effect::new(
        name,
        EffectBytecode {
            hash: 0x5EED,
            reflection: EffectReflection::default(),
        },
    ))
}

// ============================================================================
// Frame Driver
// ============================================================================

pub struct Harness {
    pub backend: Arc<HeadlessBackend>,
    pub compiler: Arc<ScriptedCompiler>,
    pub system: RenderSystem,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(HeadlessBackend::new(), RenderSystemSettings::default())
    }

    pub fn with(backend: HeadlessBackend, settings: RenderSystemSettings) -> Self {
        init_logger();
        let backend = Arc::new(backend);
        let compiler = ScriptedCompiler::new();
        let system = RenderSystem::new(backend.clone(), compiler.clone(), settings);
        Self {
            backend,
            compiler,
            system,
        }
    }

    /// Runs Reset → Collect → Extract → Prepare with one view over `stages`.
    pub fn prepare_frame(&mut self, render_context: RenderContext, stages: &[usize]) {
        self.prepare_frame_with_view(render_context, RenderView::new().with_render_stages(stages.iter().copied()));
    }

    pub fn prepare_frame_with_view(&mut self, render_context: RenderContext, view: RenderView) {
        self.system.reset();
        self.system.add_view(view);
        self.system.collect(render_context);
        self.system.extract(render_context);
        self.system.prepare(render_context);
    }

    /// Draws every stage of view 0 into one command list and returns it.
    pub fn draw_frame(&mut self, render_context: RenderContext, stages: &[usize]) -> HeadlessCommandList {
        let mut command_list = HeadlessCommandList::new();
        {
            let mut ctx = RenderDrawContext::new(render_context, &mut command_list);
            for &stage in stages {
                self.system.draw(&mut ctx, 0, stage).expect("view stage is registered");
            }
        }
        self.system.flush(render_context);
        command_list
    }

    /// Full frame; returns the draws recorded on the main command list.
    pub fn frame(&mut self, render_context: RenderContext, stages: &[usize]) -> Vec<DrawCommand> {
        self.prepare_frame(render_context, stages);
        self.draw_frame(render_context, stages).draws().collect()
    }
}
