//! Fluent construction of decoded methods.
//!
//! [`MethodBuilder`] plays the part of the decoding layer: it assigns offsets, resolves labels
//! into branch targets and attaches the jump, try-entry, catch and handler attributes the
//! pipeline expects on decoded instructions.
//!
//! # Example
//!
//! ```rust
//! use dexscope::ir::{ArgType, ArithOp, IfCond, MethodBuilder, Operand};
//!
//! let mut b = MethodBuilder::new("count", ArgType::Int);
//! let r0 = b.reg(0);
//! b.const_int(r0.clone(), 5);
//! b.label("head");
//! b.if_zero(IfCond::Le, r0.clone(), "done");
//! b.arith(ArithOp::Sub, r0.clone(), r0.clone().into(), Operand::int(1));
//! b.goto("head");
//! b.label("done");
//! b.ret(Some(r0.into()));
//!
//! let method = b.build()?;
//! assert_eq!(method.instructions().len(), 5);
//! # Ok::<(), dexscope::Error>(())
//! ```

use std::collections::HashMap;

use crate::{
    ir::{
        ArgType, ArithOp, IfCond, InsnKind, Instruction, InvokeKind, Jump, Method, Operand,
        RegisterArg,
    },
    Error, Result,
};

enum Branch {
    Target(String),
    Cases(Vec<String>),
}

struct PendingInsn {
    insn: Instruction,
    branch: Option<Branch>,
}

struct PendingRegion {
    start: String,
    end: String,
    catches: Vec<(Option<String>, String)>,
}

/// Builds a [`Method`] instruction by instruction.
pub struct MethodBuilder {
    name: String,
    return_type: ArgType,
    arguments: Vec<RegisterArg>,
    insns: Vec<PendingInsn>,
    labels: HashMap<String, usize>,
    regions: Vec<PendingRegion>,
}

impl MethodBuilder {
    /// Starts a method with the given name and return type.
    pub fn new(name: impl Into<String>, return_type: ArgType) -> Self {
        MethodBuilder {
            name: name.into(),
            return_type,
            arguments: Vec::new(),
            insns: Vec::new(),
            labels: HashMap::new(),
            regions: Vec::new(),
        }
    }

    /// Returns the first version of register `reg`.
    #[must_use]
    pub fn reg(&self, reg: u16) -> RegisterArg {
        RegisterArg::new(reg, 0)
    }

    /// Returns version `version` of register `reg`.
    #[must_use]
    pub fn var(&self, reg: u16, version: u32) -> RegisterArg {
        RegisterArg::new(reg, version)
    }

    /// Declares `reg` as a method argument and returns it.
    pub fn argument(&mut self, reg: u16, ty: ArgType) -> RegisterArg {
        let arg = RegisterArg::typed(reg, 0, ty);
        self.arguments.push(arg.clone());
        arg
    }

    /// Binds `name` to the next emitted instruction.
    pub fn label(&mut self, name: &str) -> &mut Self {
        self.labels.insert(name.to_string(), self.insns.len());
        self
    }

    /// Offset the next emitted instruction will get.
    #[must_use]
    pub fn next_offset(&self) -> u32 {
        offset_of(self.insns.len())
    }

    /// Emits an instruction that does not branch.
    pub fn emit(&mut self, insn: Instruction) -> &mut Self {
        self.insns.push(PendingInsn { insn, branch: None });
        self
    }

    /// `nop`
    pub fn nop(&mut self) -> &mut Self {
        self.emit(Instruction::new(InsnKind::Nop, vec![], None))
    }

    /// `dst = value`
    pub fn const_int(&mut self, dst: RegisterArg, value: i64) -> &mut Self {
        self.emit(Instruction::new(
            InsnKind::Const,
            vec![Operand::int(value)],
            Some(dst),
        ))
    }

    /// `dst = src`
    pub fn move_reg(&mut self, dst: RegisterArg, src: RegisterArg) -> &mut Self {
        self.emit(Instruction::new(InsnKind::Move, vec![src.into()], Some(dst)))
    }

    /// `dst = lhs op rhs`
    pub fn arith(&mut self, op: ArithOp, dst: RegisterArg, lhs: Operand, rhs: Operand) -> &mut Self {
        self.emit(Instruction::new(InsnKind::Arith(op), vec![lhs, rhs], Some(dst)))
    }

    /// Static call of `method`.
    pub fn invoke_static(
        &mut self,
        method: &str,
        args: Vec<Operand>,
        result: Option<RegisterArg>,
    ) -> &mut Self {
        self.emit(Instruction::new(
            InsnKind::Invoke {
                method: method.to_string(),
                kind: InvokeKind::Static,
            },
            args,
            result,
        ))
    }

    /// Virtual call of `method` on the receiver in `args[0]`.
    pub fn invoke_virtual(
        &mut self,
        method: &str,
        args: Vec<Operand>,
        result: Option<RegisterArg>,
    ) -> &mut Self {
        self.emit(Instruction::new(
            InsnKind::Invoke {
                method: method.to_string(),
                kind: InvokeKind::Virtual,
            },
            args,
            result,
        ))
    }

    /// `if lhs cond rhs goto target`
    pub fn if_cmp(&mut self, cond: IfCond, lhs: Operand, rhs: Operand, target: &str) -> &mut Self {
        self.branch(
            InsnKind::If { cond, target: 0 },
            vec![lhs, rhs],
            Branch::Target(target.to_string()),
        )
    }

    /// `if value cond 0 goto target`
    pub fn if_zero(&mut self, cond: IfCond, value: RegisterArg, target: &str) -> &mut Self {
        self.branch(
            InsnKind::If { cond, target: 0 },
            vec![value.into()],
            Branch::Target(target.to_string()),
        )
    }

    /// `goto target`
    pub fn goto(&mut self, target: &str) -> &mut Self {
        self.branch(
            InsnKind::Goto { target: 0 },
            vec![],
            Branch::Target(target.to_string()),
        )
    }

    /// `switch value`, jumping to `cases[i].1` when `value == cases[i].0`.
    pub fn switch(&mut self, value: RegisterArg, cases: &[(i32, &str)]) -> &mut Self {
        let keys = cases.iter().map(|(k, _)| *k).collect();
        let labels = cases.iter().map(|(_, l)| (*l).to_string()).collect();
        self.branch(
            InsnKind::Switch {
                keys,
                targets: Vec::new(),
            },
            vec![value.into()],
            Branch::Cases(labels),
        )
    }

    /// `return` or `return value`
    pub fn ret(&mut self, value: Option<Operand>) -> &mut Self {
        self.emit(Instruction::new(
            InsnKind::Return,
            value.into_iter().collect(),
            None,
        ))
    }

    /// `throw value`
    pub fn throw(&mut self, value: RegisterArg) -> &mut Self {
        self.emit(Instruction::new(InsnKind::Throw, vec![value.into()], None))
    }

    /// `monitor-enter value`
    pub fn monitor_enter(&mut self, value: RegisterArg) -> &mut Self {
        self.emit(Instruction::new(
            InsnKind::MonitorEnter,
            vec![value.into()],
            None,
        ))
    }

    /// `monitor-exit value`
    pub fn monitor_exit(&mut self, value: RegisterArg) -> &mut Self {
        self.emit(Instruction::new(
            InsnKind::MonitorExit,
            vec![value.into()],
            None,
        ))
    }

    /// `dst = move-exception`
    pub fn move_exception(&mut self, dst: RegisterArg) -> &mut Self {
        self.emit(Instruction::new(InsnKind::MoveException, vec![], Some(dst)))
    }

    /// `dst = phi(args)`
    pub fn phi(&mut self, dst: RegisterArg, args: Vec<RegisterArg>) -> &mut Self {
        let args = args.into_iter().map(Operand::from).collect();
        self.emit(Instruction::new(InsnKind::Phi, args, Some(dst)))
    }

    /// Protects the instructions from label `start` up to, not including, label `end`.
    ///
    /// Each catch is a pair of an optional exception class (`None` catches everything) and the
    /// label of the handler's first instruction.
    pub fn try_region(
        &mut self,
        start: &str,
        end: &str,
        catches: &[(Option<&str>, &str)],
    ) -> &mut Self {
        self.regions.push(PendingRegion {
            start: start.to_string(),
            end: end.to_string(),
            catches: catches
                .iter()
                .map(|(ty, label)| (ty.map(str::to_string), (*label).to_string()))
                .collect(),
        });
        self
    }

    /// Resolves labels, attaches attributes and produces the method.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Structural`] for undefined labels and [`Error::MissingBlock`] for labels
    /// bound past the last instruction.
    pub fn build(self) -> Result<Method> {
        let MethodBuilder {
            name,
            return_type,
            arguments,
            insns,
            labels,
            regions,
        } = self;
        let count = insns.len();
        let resolve = |label: &str| -> Result<usize> {
            let index = *labels
                .get(label)
                .ok_or_else(|| structural_error!("Undefined label '{}'", label))?;
            if index >= count {
                return Err(Error::MissingBlock {
                    offset: offset_of(index),
                });
            }
            Ok(index)
        };

        let mut out: Vec<Instruction> = Vec::with_capacity(count);
        let mut jumps: Vec<(usize, usize)> = Vec::new();
        for (index, pending) in insns.into_iter().enumerate() {
            let mut insn = pending.insn.at(offset_of(index));
            match pending.branch {
                None => {}
                Some(Branch::Target(label)) => {
                    let dest = resolve(&label)?;
                    match insn.kind_mut() {
                        InsnKind::If { target, .. } => {
                            *target = offset_of(dest);
                            if index + 1 < count {
                                jumps.push((index, index + 1));
                            }
                        }
                        InsnKind::Goto { target } => *target = offset_of(dest),
                        _ => {}
                    }
                    jumps.push((index, dest));
                }
                Some(Branch::Cases(cases)) => {
                    let mut resolved = Vec::with_capacity(cases.len());
                    for label in &cases {
                        let dest = resolve(label)?;
                        resolved.push(offset_of(dest));
                        jumps.push((index, dest));
                    }
                    if index + 1 < count {
                        jumps.push((index, index + 1));
                    }
                    if let InsnKind::Switch { targets, .. } = insn.kind_mut() {
                        *targets = resolved;
                    }
                }
            }
            out.push(insn);
        }

        for (src, dest) in jumps {
            let jump = Jump {
                src: offset_of(src),
                dest: offset_of(dest),
            };
            for index in [src, dest] {
                let attrs = out[index].attrs_mut();
                if !attrs.jumps.contains(&jump) {
                    attrs.jumps.push(jump);
                }
            }
        }

        let mut method = Method::new(name, return_type, Vec::new());
        method.set_arguments(arguments);
        for region in regions {
            let start = resolve(&region.start)?;
            let end = labels
                .get(&region.end)
                .copied()
                .ok_or_else(|| structural_error!("Undefined label '{}'", region.end))?;
            let try_block = method.add_try_block();
            for insn in out.iter_mut().take(end).skip(start) {
                insn.attrs_mut().catch = Some(try_block);
            }
            out[start].attrs_mut().try_entry = true;
            for (catch_type, label) in region.catches {
                let index = resolve(&label)?;
                let handler = method.add_handler(try_block, offset_of(index), catch_type)?;
                out[index].attrs_mut().handler = Some(handler);
            }
        }

        method.instructions = out;
        Ok(method)
    }

    fn branch(&mut self, kind: InsnKind, args: Vec<Operand>, branch: Branch) -> &mut Self {
        self.insns.push(PendingInsn {
            insn: Instruction::new(kind, args, None),
            branch: Some(branch),
        });
        self
    }
}

fn offset_of(index: usize) -> u32 {
    u32::try_from(index).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::InsnType;

    #[test]
    fn test_builder_if_jumps_include_fallthrough() {
        let mut b = MethodBuilder::new("m", ArgType::Void);
        let r0 = b.reg(0);
        b.if_zero(IfCond::Eq, r0, "end");
        b.nop();
        b.label("end");
        b.ret(None);
        let method = b.build().unwrap();

        let insns = method.instructions();
        assert_eq!(insns[0].attrs().jumps, vec![Jump { src: 0, dest: 1 }, Jump { src: 0, dest: 2 }]);
        assert_eq!(insns[1].attrs().jumps, vec![Jump { src: 0, dest: 1 }]);
        assert_eq!(insns[2].attrs().jumps, vec![Jump { src: 0, dest: 2 }]);
        assert!(matches!(insns[0].kind(), InsnKind::If { target: 2, .. }));
    }

    #[test]
    fn test_builder_switch_targets() {
        let mut b = MethodBuilder::new("m", ArgType::Void);
        let r0 = b.reg(0);
        b.switch(r0, &[(1, "a"), (2, "b")]);
        b.ret(None);
        b.label("a");
        b.ret(None);
        b.label("b");
        b.ret(None);
        let method = b.build().unwrap();
        match method.instructions()[0].kind() {
            InsnKind::Switch { keys, targets } => {
                assert_eq!(keys, &vec![1, 2]);
                assert_eq!(targets, &vec![2, 3]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(method.instructions()[0].attrs().jumps.len(), 3);
    }

    #[test]
    fn test_builder_try_region_attributes() {
        let mut b = MethodBuilder::new("m", ArgType::Void);
        let r1 = b.reg(1);
        b.label("try");
        b.invoke_static("a", vec![], None);
        b.invoke_static("b", vec![], None);
        b.label("end");
        b.ret(None);
        b.label("handler");
        b.move_exception(r1.clone());
        b.throw(r1);
        b.try_region("try", "end", &[(None, "handler")]);
        let method = b.build().unwrap();

        let insns = method.instructions();
        assert!(insns[0].attrs().try_entry);
        assert!(insns[0].attrs().catch.is_some());
        assert!(insns[1].attrs().catch.is_some());
        assert!(insns[2].attrs().catch.is_none());
        assert!(insns[3].attrs().handler.is_some());
        assert_eq!(insns[3].insn_type(), InsnType::MoveException);
        assert_eq!(method.handlers().count(), 1);
        assert!(method.handlers().all(|h| h.is_catch_all() && h.handle_offset() == 3));
    }

    #[test]
    fn test_builder_undefined_label() {
        let mut b = MethodBuilder::new("m", ArgType::Void);
        b.goto("nowhere");
        assert!(matches!(b.build(), Err(Error::Structural { .. })));
    }

    #[test]
    fn test_builder_label_past_end() {
        let mut b = MethodBuilder::new("m", ArgType::Void);
        b.goto("end");
        b.label("end");
        assert_eq!(b.build().unwrap_err(), Error::MissingBlock { offset: 1 });
    }
}
