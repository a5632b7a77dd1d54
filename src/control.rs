// src/control.rs
//! Structured control flow over the three branch primitives.
//!
//! Every construct here compiles down to `place_label` / `branch` /
//! `branch_if(_not)`; none introduces new instructions. Bodies are ordinary
//! closures over the builder and run inline, so nesting is unbounded and
//! each construct's labels stay private to it.
//!
//! The `if` chain shares a single end label across every arm, so chains
//! collapse to one exit regardless of depth:
//!
//! ```text
//!     branch_if_not c0, L_false0
//!     <body 0>
//!     branch L_end
//! L_false0:
//!     branch_if_not c1, L_false1     ; elsif
//!     <body 1>
//!     branch L_end
//! L_false1:
//!     <else body>
//! L_end:
//! ```
//!
//! Dropping a chain or loop without calling its terminal `end` leaves the
//! end label unplaced, which [`FunctionBuilder::seal`] turns into a hard
//! [`BuildError::UnplacedLabel`] instead of silently emitting broken code.

use crate::errors::{BuildError, BuildResult};
use crate::function::{FunctionBuilder, Label};
use crate::ir::LabelId;
use crate::value::{Operand, Value};

/// Bookkeeping for one loop being built. Lives on a stack in the builder so
/// that `break_`/`redo` always address the lexically innermost loop.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LoopFrame {
    pub start: LabelId,
    pub done: LabelId,
    /// Where `redo` goes; initially the loop head, retargeted by
    /// `redo_from_here`.
    pub redo: LabelId,
}

/// An open `if`/`unless` chain. Created by [`FunctionBuilder::if_`] or
/// [`FunctionBuilder::unless`]; must be finished with [`IfBuilder::end`].
#[must_use = "an if chain must be finished with .end()"]
pub struct IfBuilder<'f> {
    f: &'f mut FunctionBuilder,
    end_label: Label,
}

/// An open `case` chain. `when` arms desugar to an equality `if`/`elsif`
/// chain against the scrutinee; first match wins.
#[must_use = "a case chain must be finished with .end()"]
pub struct CaseBuilder<'f> {
    f: &'f mut FunctionBuilder,
    value: Value,
    end_label: Option<Label>,
}

/// An open `while`/`until` loop, between its condition and its `end`.
#[must_use = "a loop must be finished with .end()"]
pub struct LoopBuilder<'f> {
    f: &'f mut FunctionBuilder,
    depth: usize,
}

impl FunctionBuilder {
    /// Open a conditional: execute `body` when `cond` is non-zero.
    pub fn if_(
        &mut self,
        cond: Value,
        body: impl FnOnce(&mut FunctionBuilder) -> BuildResult<()>,
    ) -> BuildResult<IfBuilder<'_>> {
        let end_label = self.new_label();
        self.if_arm(cond, end_label, false, body)?;
        Ok(IfBuilder { f: self, end_label })
    }

    /// Open an inverted conditional: execute `body` when `cond` is zero.
    pub fn unless(
        &mut self,
        cond: Value,
        body: impl FnOnce(&mut FunctionBuilder) -> BuildResult<()>,
    ) -> BuildResult<IfBuilder<'_>> {
        let end_label = self.new_label();
        self.if_arm(cond, end_label, true, body)?;
        Ok(IfBuilder { f: self, end_label })
    }

    /// Open a multi-way conditional over `value`.
    pub fn case(&mut self, value: Value) -> CaseBuilder<'_> {
        CaseBuilder {
            f: self,
            value,
            end_label: None,
        }
    }

    /// Open a loop that runs while `cond` is non-zero. The condition closure
    /// is emitted between the loop head and the exit test, so it re-executes
    /// (side effects included) on every iteration.
    pub fn while_(
        &mut self,
        cond: impl FnOnce(&mut FunctionBuilder) -> BuildResult<Value>,
    ) -> BuildResult<LoopBuilder<'_>> {
        self.loop_head(cond, false)
    }

    /// Open a loop that runs until `cond` becomes non-zero.
    pub fn until(
        &mut self,
        cond: impl FnOnce(&mut FunctionBuilder) -> BuildResult<Value>,
    ) -> BuildResult<LoopBuilder<'_>> {
        self.loop_head(cond, true)
    }

    /// Branch to the innermost loop's exit.
    pub fn break_(&mut self) -> BuildResult<()> {
        let frame = *self.loops.last().ok_or(BuildError::InvalidBreak)?;
        let label = self.reuse_label(frame.done);
        self.branch(label)
    }

    /// Branch to the innermost loop's redo target (the loop head, unless
    /// retargeted with [`FunctionBuilder::redo_from_here`]).
    pub fn redo(&mut self) -> BuildResult<()> {
        let frame = *self.loops.last().ok_or(BuildError::InvalidRedo)?;
        let label = self.reuse_label(frame.redo);
        self.branch(label)
    }

    /// Place a fresh label here and make it the innermost loop's redo
    /// target. Enclosing loops keep their own targets.
    pub fn redo_from_here(&mut self) -> BuildResult<()> {
        if self.loops.is_empty() {
            return Err(BuildError::InvalidRedo);
        }
        let label = self.new_label();
        self.place_label(label)?;
        if let Some(frame) = self.loops.last_mut() {
            frame.redo = label.id;
        }
        Ok(())
    }

    // One arm of an if/unless chain: test, body, jump to the shared end,
    // then land the false edge.
    fn if_arm(
        &mut self,
        cond: Value,
        end_label: Label,
        inverted: bool,
        body: impl FnOnce(&mut FunctionBuilder) -> BuildResult<()>,
    ) -> BuildResult<()> {
        let false_label = self.new_label();
        if inverted {
            self.branch_if(cond, false_label)?;
        } else {
            self.branch_if_not(cond, false_label)?;
        }
        body(self)?;
        self.branch(end_label)?;
        self.place_label(false_label)
    }

    fn loop_head(
        &mut self,
        cond: impl FnOnce(&mut FunctionBuilder) -> BuildResult<Value>,
        inverted: bool,
    ) -> BuildResult<LoopBuilder<'_>> {
        let start = self.new_label();
        let done = self.new_label();
        self.place_label(start)?;
        let c = cond(self)?;
        if inverted {
            self.branch_if(c, done)?;
        } else {
            self.branch_if_not(c, done)?;
        }
        self.loops.push(LoopFrame {
            start: start.id,
            done: done.id,
            redo: start.id,
        });
        let depth = self.loops.len();
        Ok(LoopBuilder { f: self, depth })
    }

    // Rehydrate a Label handle for an id we know belongs to this session.
    fn reuse_label(&self, id: LabelId) -> Label {
        Label {
            id,
            owner: self.token,
        }
    }
}

impl IfBuilder<'_> {
    /// Chain another arm tested only when every previous arm fell through.
    /// The condition is a closure because its instructions must be emitted
    /// after the previous arm's false edge lands.
    pub fn elsif(
        self,
        cond: impl FnOnce(&mut FunctionBuilder) -> BuildResult<Value>,
        body: impl FnOnce(&mut FunctionBuilder) -> BuildResult<()>,
    ) -> BuildResult<Self> {
        let c = cond(self.f)?;
        self.f.if_arm(c, self.end_label, false, body)?;
        Ok(self)
    }

    /// Chain an inverted arm (taken when its condition is zero).
    pub fn elsunless(
        self,
        cond: impl FnOnce(&mut FunctionBuilder) -> BuildResult<Value>,
        body: impl FnOnce(&mut FunctionBuilder) -> BuildResult<()>,
    ) -> BuildResult<Self> {
        let c = cond(self.f)?;
        self.f.if_arm(c, self.end_label, true, body)?;
        Ok(self)
    }

    /// The fallthrough arm.
    pub fn else_(
        self,
        body: impl FnOnce(&mut FunctionBuilder) -> BuildResult<()>,
    ) -> BuildResult<Self> {
        body(self.f)?;
        Ok(self)
    }

    /// Close the chain, landing the shared end label.
    pub fn end(self) -> BuildResult<()> {
        self.f.place_label(self.end_label)
    }
}

impl CaseBuilder<'_> {
    /// One arm: taken when the scrutinee equals `cmp`. Literals coerce to
    /// the scrutinee's type.
    pub fn when(
        mut self,
        cmp: impl Into<Operand>,
        body: impl FnOnce(&mut FunctionBuilder) -> BuildResult<()>,
    ) -> BuildResult<Self> {
        let cond = self.f.eq(self.value, cmp)?;
        let end_label = match self.end_label {
            Some(l) => l,
            None => {
                let l = self.f.new_label();
                self.end_label = Some(l);
                l
            }
        };
        self.f.if_arm(cond, end_label, false, body)?;
        Ok(self)
    }

    /// Fallthrough arm when no `when` matched. With zero `when` arms the
    /// body simply runs unconditionally.
    pub fn else_(
        self,
        body: impl FnOnce(&mut FunctionBuilder) -> BuildResult<()>,
    ) -> BuildResult<Self> {
        body(self.f)?;
        Ok(self)
    }

    /// Close the chain. Legal (and a no-op) with zero `when` arms.
    pub fn end(self) -> BuildResult<()> {
        match self.end_label {
            Some(l) => self.f.place_label(l),
            None => Ok(()),
        }
    }
}

impl LoopBuilder<'_> {
    /// Emit the loop body.
    pub fn do_(
        self,
        body: impl FnOnce(&mut FunctionBuilder) -> BuildResult<()>,
    ) -> BuildResult<Self> {
        body(self.f)?;
        Ok(self)
    }

    /// Close the loop: back-edge to the head, then land the exit label.
    pub fn end(self) -> BuildResult<()> {
        if self.f.loops.len() != self.depth {
            // An inner loop was opened inside this body and never ended;
            // popping here would wire its labels into the wrong loop.
            return Err(BuildError::scope_violation("loop end"));
        }
        let frame = self
            .f
            .loops
            .pop()
            .ok_or_else(|| BuildError::internal("loop frame missing at end"))?;
        let start = self.f.reuse_label(frame.start);
        let done = self.f.reuse_label(frame.done);
        self.f.branch(start)?;
        self.f.place_label(done)
    }
}
