//! Evaluation errors.
//!
//! Every failure the engine can raise flows through [`RaiseError`] and
//! propagates with `?`; nothing inside the engine catches. Frames release
//! their resources as the stack unwinds (see `frame`), so a raise reaching
//! the host leaves no holds or API handles behind.
//!
//! Errors are also first-class values: [`RaiseError::reify`] builds an
//! error context carrying the kind word and a rendered message, which user
//! code can inspect and re-raise.

use mica_core::{Cell, ContextId, ContextType, CoreError, Heap, Kind};
use std::{error, fmt};

#[derive(Debug, Clone, PartialEq)]
pub enum RaiseError {
    /// A word reached resolution with no binding anywhere.
    UnboundWord { spelling: String },
    /// A relative word had no frame to resolve against, or the context it
    /// needed is no longer accessible.
    NoRelative { spelling: String },
    /// Write refused: protected cell or read-only series.
    Protected { spelling: String },
    /// A branch-taking construct received a value it cannot branch with.
    BadBranchType { kind: Kind },
    /// A path step picked with a value or picker no hook answers.
    BadPick { kind: Kind },
    /// A value was required and the variable held void.
    NeedNonVoid { spelling: String },
    /// A strict variadic application finished with feed residue.
    ApplyTooMany,
    /// Argument fulfillment hit a barrier or the end of input.
    MissingArgument {
        label: Option<String>,
        param: String,
    },
    /// An enfix operator wanted a finished left-hand side while the frame
    /// was still mid-argument.
    DeferredEnfix,
    /// Pool refill failed.
    OutOfMemory { live: u64, limit: usize },
    /// Evaluator recursion crossed the configured depth ceiling.
    StackOverflow { depth: usize },
    /// Two virtual-binding chains could not be merged.
    IncompatiblePatches,
    /// A halt was requested through the signal mask.
    Halted,
}

impl fmt::Display for RaiseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RaiseError::UnboundWord { spelling } => {
                write!(f, "{} word is not bound to a context", spelling)
            }
            RaiseError::NoRelative { spelling } => {
                write!(f, "{} is relative, but no frame is in effect", spelling)
            }
            RaiseError::Protected { spelling } => {
                write!(f, "{} is protected from modification", spelling)
            }
            RaiseError::BadBranchType { kind } => {
                write!(f, "{:?} is not a valid branch type", kind)
            }
            RaiseError::BadPick { kind } => {
                write!(f, "{:?} does not support picking here", kind)
            }
            RaiseError::NeedNonVoid { spelling } => {
                write!(f, "{} needs a value, but is void", spelling)
            }
            RaiseError::ApplyTooMany => {
                write!(f, "apply finished with arguments left over")
            }
            RaiseError::MissingArgument { label, param } => {
                let label = label.as_deref().unwrap_or("anonymous");
                write!(f, "{} is missing its {} argument", label, param)
            }
            RaiseError::DeferredEnfix => {
                write!(
                    f,
                    "deferred enfix reached while an argument was still pending"
                )
            }
            RaiseError::OutOfMemory { live, limit } => {
                write!(f, "out of memory ({} nodes live, limit {})", live, limit)
            }
            RaiseError::StackOverflow { depth } => {
                write!(f, "evaluator stack overflow at depth {}", depth)
            }
            RaiseError::IncompatiblePatches => {
                write!(f, "incompatible virtual bindings cannot merge")
            }
            RaiseError::Halted => write!(f, "halted by request"),
        }
    }
}

impl error::Error for RaiseError {}

impl From<CoreError> for RaiseError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::OutOfMemory { live, limit } => RaiseError::OutOfMemory { live, limit },
        }
    }
}

impl RaiseError {
    /// The kind word naming this error class.
    pub fn id(&self) -> &'static str {
        match self {
            RaiseError::UnboundWord { .. } => "unbound-word",
            RaiseError::NoRelative { .. } => "no-relative",
            RaiseError::Protected { .. } => "protected",
            RaiseError::BadBranchType { .. } => "bad-branch-type",
            RaiseError::BadPick { .. } => "bad-pick",
            RaiseError::NeedNonVoid { .. } => "need-non-void",
            RaiseError::ApplyTooMany => "apply-too-many",
            RaiseError::MissingArgument { .. } => "missing-argument",
            RaiseError::DeferredEnfix => "deferred-enfix",
            RaiseError::OutOfMemory { .. } => "out-of-memory",
            RaiseError::StackOverflow { .. } => "stack-overflow",
            RaiseError::IncompatiblePatches => "incompatible-patches",
            RaiseError::Halted => "halted",
        }
    }

    /// Reify into an error context: a first-class value with `id` and
    /// `message` fields that can be stored, inspected, and re-raised.
    pub fn reify(&self, heap: &mut Heap) -> Result<ContextId, CoreError> {
        let id_key = heap.intern("id")?;
        let message_key = heap.intern("message")?;
        let ctx = heap.make_context(ContextType::Error, vec![id_key, message_key])?;
        let id_word = heap.intern(self.id())?;
        *heap.var_mut(ctx, 1) = Cell::word(Kind::Word, id_word);
        let text = heap.alloc_text(&self.to_string())?;
        *heap.var_mut(ctx, 2) = Cell::series(Kind::Text, text, 0);
        Ok(ctx)
    }
}
