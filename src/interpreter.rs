//! The fetch-decode-dispatch loop (§4.4).

use log::trace;

use crate::bytecode::Opcode;
use crate::context;
use crate::dispatch;
use crate::error::{BytecodePosition, Error, Result};
use crate::gc;
use crate::ids::{self, ObjectId};
use crate::memory::ObjectMemory;

/// Number of bytecode steps between GC sweeps. The collector only ever runs
/// between steps, never mid-bytecode (§4.6).
pub const DEFAULT_GC_INTERVAL: u32 = 10_000;

/// Outcome of a single `step()` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Continue,
    Halted,
}

/// Owns the object memory and the cached active-context state (§4.3's
/// "the interpreter keeps a cached active_context pointer plus a cached
/// pc... and bytecodes").
pub struct Interpreter {
    pub memory: ObjectMemory,
    active_context: ObjectId,
    pc: i32,
    gc_countdown: u32,
    gc_interval: u32,
    pub trace: bool,
}

fn read_i32_le(bytes: &[u8], at: usize) -> Result<i32> {
    let slice = bytes.get(at..at + 4).ok_or(Error::MalformedImage("truncated 4-byte immediate"))?;
    Ok(i32::from_le_bytes(slice.try_into().unwrap()))
}

impl Interpreter {
    #[must_use]
    pub fn new(memory: ObjectMemory, active_context: ObjectId) -> Result<Self> {
        let pc = context::pc(&memory, active_context)?;
        Ok(Self {
            memory,
            active_context,
            pc,
            gc_countdown: DEFAULT_GC_INTERVAL,
            gc_interval: DEFAULT_GC_INTERVAL,
            trace: false,
        })
    }

    #[must_use]
    pub fn with_gc_interval(mut self, interval: u32) -> Self {
        self.gc_interval = interval;
        self.gc_countdown = interval;
        self
    }

    #[must_use]
    pub fn active_context(&self) -> ObjectId {
        self.active_context
    }

    /// Writes the cached pc back into the outgoing context, then makes
    /// `new_ctx` active and caches its pc.
    fn switch_to(&mut self, new_ctx: ObjectId) -> Result<()> {
        context::set_pc(&mut self.memory, self.active_context, self.pc)?;
        self.active_context = new_ctx;
        self.pc = context::pc(&self.memory, new_ctx)?;
        Ok(())
    }

    fn pos(&self) -> BytecodePosition {
        BytecodePosition { context_id: self.active_context, pc: self.pc }
    }

    fn fetch(&self) -> Result<Option<u8>> {
        let bytecodes = context::bytecodes(&self.memory, self.active_context)?;
        if self.pc < 0 {
            return Err(Error::TypeError { reason: "pc went negative", at: self.pos() });
        }
        Ok(bytecodes.get(self.pc as usize).copied())
    }

    /// Runs until the active context's bytecodes are exhausted with no
    /// parent to return to, or a fatal error occurs.
    pub fn run(&mut self) -> Result<()> {
        loop {
            if self.step()? == StepOutcome::Halted {
                return Ok(());
            }
        }
    }

    pub fn step(&mut self) -> Result<StepOutcome> {
        if self.gc_countdown == 0 {
            trace!("interpreter: running gc before bytecode at {}", self.pos());
            self.active_context = gc::collect(&mut self.memory, self.active_context)?;
            self.gc_countdown = self.gc_interval;
        }

        let Some(opcode_byte) = self.fetch()? else {
            return self.end_of_block();
        };

        if self.trace {
            trace!("step {}: opcode {}", self.pos(), opcode_byte);
        }

        let opcode = Opcode::try_from(opcode_byte).map_err(|_| Error::UnknownBytecode {
            opcode: opcode_byte,
            at: self.pos(),
        })?;
        if opcode.is_reserved() {
            return Err(Error::UnknownBytecode { opcode: opcode_byte, at: self.pos() });
        }

        let outcome = self.dispatch(opcode)?;
        self.gc_countdown = self.gc_countdown.saturating_sub(1);
        Ok(outcome)
    }

    fn u8_operand(&self) -> Result<u8> {
        let bytecodes = context::bytecodes(&self.memory, self.active_context)?;
        bytecodes
            .get(self.pc as usize + 1)
            .copied()
            .ok_or(Error::MalformedImage("truncated 1-byte immediate"))
    }

    fn i32_operand(&self) -> Result<i32> {
        let bytecodes = context::bytecodes(&self.memory, self.active_context)?;
        read_i32_le(bytecodes, self.pc as usize + 1)
    }

    fn dispatch(&mut self, opcode: Opcode) -> Result<StepOutcome> {
        let ctx = self.active_context;
        match opcode {
            Opcode::PushSelf => {
                let rcvr = context::receiver(&self.memory, ctx)?;
                context::stack_push(&mut self.memory, ctx, rcvr)?;
                self.pc += 1;
            }
            Opcode::PushSuper => {
                let raw = dispatch::push_super_value(&self.memory, ctx)?;
                context::stack_push(&mut self.memory, ctx, raw)?;
                self.pc += 1;
            }
            Opcode::PushNil => {
                context::stack_push(&mut self.memory, ctx, ids::NIL_OBJECT)?;
                self.pc += 1;
            }
            Opcode::PushTrue => {
                context::stack_push(&mut self.memory, ctx, ids::TRUE_OBJECT)?;
                self.pc += 1;
            }
            Opcode::PushFalse => {
                context::stack_push(&mut self.memory, ctx, ids::FALSE_OBJECT)?;
                self.pc += 1;
            }
            Opcode::PushLiteral => {
                let n = self.u8_operand()? as usize;
                let literals_id = context::literals(&self.memory, ctx)?;
                let literal = self.memory.pointer_slot(literals_id, n, self.pos())?;
                let pushed = self.push_literal_value(literal)?;
                context::stack_push(&mut self.memory, ctx, pushed)?;
                self.pc += 2;
            }
            Opcode::PushArg => {
                let n = self.u8_operand()? as usize;
                let value = context::arg(&self.memory, ctx, n, self.pc)?;
                context::stack_push(&mut self.memory, ctx, value)?;
                self.pc += 2;
            }
            Opcode::PushTemp => {
                let n = self.u8_operand()? as usize;
                let value = context::temp(&self.memory, ctx, n, self.pc)?;
                context::stack_push(&mut self.memory, ctx, value)?;
                self.pc += 2;
            }
            Opcode::PushInstVar => {
                let n = self.u8_operand()? as usize;
                let rcvr = context::receiver(&self.memory, ctx)?;
                let value = context::instvar(&self.memory, rcvr, n, self.pos())?;
                context::stack_push(&mut self.memory, ctx, value)?;
                self.pc += 2;
            }
            Opcode::PushObjRef => {
                let id = self.i32_operand()? as u32;
                context::stack_push(&mut self.memory, ctx, id)?;
                self.pc += 5;
            }
            Opcode::Return => return self.do_return(),
            Opcode::Pop => {
                context::stack_pop(&mut self.memory, ctx, self.pc)?;
                self.pc += 1;
            }
            Opcode::PopIntoTemp => {
                let n = self.u8_operand()? as usize;
                let value = context::stack_pop(&mut self.memory, ctx, self.pc)?;
                context::set_temp(&mut self.memory, ctx, n, value, self.pc)?;
                self.pc += 2;
            }
            Opcode::PopIntoInstVar => {
                let n = self.u8_operand()? as usize;
                let value = context::stack_pop(&mut self.memory, ctx, self.pc)?;
                let rcvr = context::receiver(&self.memory, ctx)?;
                let pos = self.pos();
                context::set_instvar(&mut self.memory, rcvr, n, value, pos)?;
                self.pc += 2;
            }
            Opcode::Call => {
                let new_ctx = dispatch::call(&mut self.memory, ctx, self.pc)?;
                self.pc += 1;
                self.switch_to(new_ctx)?;
            }
            Opcode::Jump => {
                let target = self.i32_operand()?;
                self.pc = target;
            }
            Opcode::JumpIfTrue => {
                let target = self.i32_operand()?;
                let cond = context::stack_pop(&mut self.memory, ctx, self.pc)?;
                self.pc = if cond == ids::TRUE_OBJECT { target } else { self.pc + 5 };
            }
            Opcode::BecomeActiveContext => {
                let rcvr = context::receiver(&self.memory, ctx)?;
                if self.memory.class_of(rcvr)? != ids::BLOCK_CONTEXT_CLASS {
                    return Err(Error::TypeError {
                        reason: "BECOME_ACTIVE_CONTEXT receiver is not a block context",
                        at: self.pos(),
                    });
                }
                context::set_parent_context(&mut self.memory, rcvr, ctx)?;
                context::set_pc(&mut self.memory, rcvr, 0)?;
                self.pc += 1;
                self.switch_to(rcvr)?;
            }
            Opcode::AllocNew => {
                let rcvr = context::receiver(&self.memory, ctx)?;
                if self.memory.class_of(rcvr)? != ids::CLASS_CLASS {
                    return Err(Error::TypeError { reason: "ALLOC_NEW receiver is not a class", at: self.pos() });
                }
                let inst_var_names = self.memory.pointer_slot(rcvr, context::class_slot::INST_VAR_NAMES, self.pos())?;
                let n = self
                    .memory
                    .get(inst_var_names)?
                    .storage
                    .pointers()
                    .ok_or(Error::TypeError { reason: "instVarNames is not a collection", at: self.pos() })?
                    .len();
                let new_obj = context::allocate_instance(&mut self.memory, rcvr, n);
                context::stack_push(&mut self.memory, ctx, new_obj)?;
                self.pc += 1;
            }
            Opcode::AllocNewWithSize => {
                let rcvr = context::receiver(&self.memory, ctx)?;
                if self.memory.class_of(rcvr)? != ids::CLASS_CLASS {
                    return Err(Error::TypeError {
                        reason: "ALLOC_NEW_WITHSIZE receiver is not a class",
                        at: self.pos(),
                    });
                }
                let size_id = context::arg(&self.memory, ctx, 0, self.pc)?;
                let n = self.memory.unbox_integer(size_id, self.pos())?;
                if n < 0 {
                    return Err(Error::TypeError { reason: "negative ALLOC_NEW_WITHSIZE size", at: self.pos() });
                }
                let new_obj = context::allocate_instance(&mut self.memory, rcvr, n as usize);
                context::stack_push(&mut self.memory, ctx, new_obj)?;
                self.pc += 1;
            }
            Opcode::PrimAdd => {
                let rhs = context::stack_pop(&mut self.memory, ctx, self.pc)?;
                let lhs = context::stack_pop(&mut self.memory, ctx, self.pc)?;
                let a = self.memory.unbox_integer(lhs, self.pos())?;
                let b = self.memory.unbox_integer(rhs, self.pos())?;
                let result = self.memory.box_integer(a.wrapping_add(b));
                context::stack_push(&mut self.memory, ctx, result)?;
                self.pc += 1;
            }
            Opcode::PrimSub
            | Opcode::PrimMul
            | Opcode::PrimDiv
            | Opcode::PrimGt
            | Opcode::PrimLt
            | Opcode::PrimLe
            | Opcode::PrimGe => unreachable!("reserved opcodes are rejected before dispatch"),
        }
        Ok(StepOutcome::Continue)
    }

    /// `PUSH_LITERAL` on a block-context template allocates a freshly bound
    /// copy instead of pushing the template pointer directly (§4.4.1, §4.4.3).
    fn push_literal_value(&mut self, literal: ObjectId) -> Result<ObjectId> {
        if self.memory.class_of(literal)? == ids::BLOCK_CONTEXT_CLASS {
            context::copy_and_bind_block(&mut self.memory, literal, self.active_context)
        } else {
            Ok(literal)
        }
    }

    /// `RETURN` (§4.4.1): method contexts unwind to their parent; block
    /// contexts perform a non-local return to the home context's parent. A
    /// nil target means this was the outermost frame: there's nowhere left
    /// to unwind to, so the run halts cleanly instead of pushing onto nil.
    fn do_return(&mut self) -> Result<StepOutcome> {
        let ctx = self.active_context;
        let value = context::stack_pop(&mut self.memory, ctx, self.pc)?;
        let target = match context::kind_of(&self.memory, ctx)? {
            context::ContextKind::Method => context::parent_context(&self.memory, ctx)?,
            context::ContextKind::Block => {
                let home = context::home_context(&self.memory, ctx)?;
                context::parent_context(&self.memory, home)?
            }
        };
        if target == ids::NIL_OBJECT {
            return Ok(StepOutcome::Halted);
        }
        context::stack_push(&mut self.memory, target, value)?;
        self.switch_to(target)?;
        Ok(StepOutcome::Continue)
    }

    /// Synthetic `END_OF_BLOCK`: triggered when pc runs past a block
    /// context's bytecodes. Pops the block's own top-of-stack, switches to
    /// its parent, and pushes the value there.
    fn end_of_block(&mut self) -> Result<StepOutcome> {
        let ctx = self.active_context;
        if context::kind_of(&self.memory, ctx)? != context::ContextKind::Block {
            return Ok(StepOutcome::Halted);
        }
        let parent = context::parent_context(&self.memory, ctx)?;
        if parent == ids::NIL_OBJECT {
            return Ok(StepOutcome::Halted);
        }
        let value = context::stack_pop(&mut self.memory, ctx, self.pc)?;
        context::stack_push(&mut self.memory, parent, value)?;
        self.switch_to(parent)?;
        Ok(StepOutcome::Continue)
    }
}
