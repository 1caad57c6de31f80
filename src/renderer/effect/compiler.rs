//! Effect Compiler Interface
//!
//! The shader compiler is an external collaborator. It receives an effect
//! name plus the validated permutation parameters and either answers
//! immediately or hands back a [`PendingEffect`] that completes later.
//!
//! ```text
//!  load_effect(name, params)
//!        │
//!        ├── Ok(EffectLoad::Ready(effect))      → Normal
//!        ├── Ok(EffectLoad::Pending(pending))   → Compiling (poll each frame)
//!        └── Err(EffectCompileError)            → Error + fallback
//! ```
//!
//! A pending compile is completed through its [`EffectCompletion`], which
//! wraps the sending half of a `flume` channel. Dropping the completion
//! without sending faults the pending effect.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::errors::EffectCompileError;
use crate::renderer::effect::reflection::EffectReflection;
use crate::renderer::parameters::CompilerParameters;

static NEXT_EFFECT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a compiled effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EffectId(u64);

impl EffectId {
    #[inline]
    #[must_use]
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Compiled shader bytecode with its resource reflection.
#[derive(Debug, Clone)]
pub struct EffectBytecode {
    /// Content hash of the compiled program.
    pub hash: u64,
    pub reflection: EffectReflection,
}

/// A compiled effect. Identity (its [`EffectId`]) keys the per-feature
/// reflection cache.
#[derive(Debug)]
pub struct Effect {
    id: EffectId,
    name: Arc<str>,
    bytecode: Arc<EffectBytecode>,
    source_changed: AtomicBool,
}

impl Effect {
    pub fn new(name: impl Into<Arc<str>>, bytecode: EffectBytecode) -> Self {
        Self {
            id: EffectId(NEXT_EFFECT_ID.fetch_add(1, Ordering::Relaxed)),
            name: name.into(),
            bytecode: Arc::new(bytecode),
            source_changed: AtomicBool::new(false),
        }
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> EffectId {
        self.id
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    #[must_use]
    pub fn bytecode(&self) -> &Arc<EffectBytecode> {
        &self.bytecode
    }

    /// Hot-reload marker. Render effects using this effect recompile on
    /// their next validation.
    #[inline]
    #[must_use]
    pub fn source_changed(&self) -> bool {
        self.source_changed.load(Ordering::Acquire)
    }

    pub fn mark_source_changed(&self) {
        self.source_changed.store(true, Ordering::Release);
    }

    /// 32-bit hash used for state sorting.
    #[must_use]
    pub fn sort_hash(&self) -> u32 {
        let id = self.id.0;
        (id ^ (id >> 32)) as u32 ^ self.bytecode.hash as u32
    }
}

/// Result of a compile request.
#[derive(Debug)]
pub enum EffectLoad {
    Ready(Arc<Effect>),
    Pending(PendingEffect),
}

/// Shader compiler service.
pub trait EffectCompiler: Send + Sync {
    /// Requests the permutation `parameters` of `effect_name`.
    ///
    /// A synchronous `Err` is a hard compile failure. May be called from
    /// several worker threads at once.
    fn load_effect(
        &self,
        effect_name: &str,
        parameters: &CompilerParameters,
    ) -> Result<EffectLoad, EffectCompileError>;
}

// ─── Pending Effects ──────────────────────────────────────────────────────────

type CompileOutcome = Result<Arc<Effect>, EffectCompileError>;

struct PendingEffectInner {
    effect_name: Arc<str>,
    receiver: flume::Receiver<CompileOutcome>,
    outcome: Mutex<Option<CompileOutcome>>,
}

/// In-flight compilation. Clones observe the same outcome.
#[derive(Clone)]
pub struct PendingEffect {
    inner: Arc<PendingEffectInner>,
}

/// Completing half of a [`PendingEffect`].
pub struct EffectCompletion {
    sender: flume::Sender<CompileOutcome>,
}

impl PendingEffect {
    /// Creates a pending compile and the handle that completes it.
    pub fn new(effect_name: impl Into<Arc<str>>) -> (Self, EffectCompletion) {
        let (sender, receiver) = flume::bounded(1);
        let pending = Self {
            inner: Arc::new(PendingEffectInner {
                effect_name: effect_name.into(),
                receiver,
                outcome: Mutex::new(None),
            }),
        };
        (pending, EffectCompletion { sender })
    }

    /// Non-blocking poll.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.poll().is_some()
    }

    /// Outcome if the compile has finished.
    #[must_use]
    pub fn poll(&self) -> Option<CompileOutcome> {
        let mut outcome = self.inner.outcome.lock();
        if outcome.is_none() {
            *outcome = match self.inner.receiver.try_recv() {
                Ok(result) => Some(result),
                Err(flume::TryRecvError::Empty) => None,
                Err(flume::TryRecvError::Disconnected) => Some(Err(self.abandoned())),
            };
        }
        outcome.clone()
    }

    /// Blocks until the compile finishes.
    pub fn wait(&self) -> CompileOutcome {
        let mut outcome = self.inner.outcome.lock();
        if let Some(result) = outcome.as_ref() {
            return result.clone();
        }
        let result = self
            .inner
            .receiver
            .recv()
            .unwrap_or_else(|_| Err(self.abandoned()));
        *outcome = Some(result.clone());
        result
    }

    #[must_use]
    pub fn effect_name(&self) -> &str {
        &self.inner.effect_name
    }

    fn abandoned(&self) -> EffectCompileError {
        EffectCompileError::Abandoned {
            effect: self.inner.effect_name.to_string(),
        }
    }
}

impl std::fmt::Debug for PendingEffect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingEffect")
            .field("effect_name", &self.inner.effect_name)
            .field("completed", &self.inner.outcome.lock().is_some())
            .finish()
    }
}

impl EffectCompletion {
    pub fn complete(self, result: Result<Arc<Effect>, EffectCompileError>) {
        // The receiver lives as long as any render effect still tracks the
        // compile; nobody is left to notify otherwise.
        let _ = self.sender.send(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::effect::reflection::EffectReflection;

    fn effect(name: &str) -> Arc<Effect> {
        Arc::new(Effect::new(
            name,
            EffectBytecode {
                hash: 1,
                reflection: EffectReflection::default(),
            },
        ))
    }

    #[test]
    fn pending_effect_completes_once() {
        let (pending, completion) = PendingEffect::new("Test");
        assert!(!pending.is_completed());

        let compiled = effect("Test");
        completion.complete(Ok(compiled.clone()));

        let observer = pending.clone();
        assert!(pending.is_completed());
        let result = observer.poll().unwrap().unwrap();
        assert_eq!(result.id(), compiled.id());
    }

    #[test]
    fn dropped_completion_faults() {
        let (pending, completion) = PendingEffect::new("Test");
        drop(completion);
        assert!(matches!(
            pending.wait(),
            Err(EffectCompileError::Abandoned { .. })
        ));
    }

    #[test]
    fn wait_blocks_until_completed_from_another_thread() {
        let (pending, completion) = PendingEffect::new("Test");
        let compiled = effect("Test");
        let expected = compiled.id();
        let worker = std::thread::spawn(move || completion.complete(Ok(compiled)));
        let result = pending.wait().unwrap();
        worker.join().unwrap();
        assert_eq!(result.id(), expected);
    }

    #[test]
    fn effects_get_unique_ids() {
        assert_ne!(effect("A").id(), effect("A").id());
    }
}
