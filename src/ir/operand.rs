//! Instruction operands: literals, SSA register values and wrapped sub-instructions.

use std::fmt;

use crate::ir::{ArgType, Instruction};

/// Identity of one value in the per-method value-numbering scheme.
///
/// A register number alone is not enough once the decoder has renamed definitions; every
/// definition of a register gets its own `version`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId {
    /// Register number in the original bytecode
    pub reg: u16,
    /// Definition number of that register
    pub version: u32,
}

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}v{}", self.reg, self.version)
    }
}

/// A register read or written by an instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterArg {
    reg: u16,
    version: u32,
    ty: ArgType,
    name: Option<String>,
}

impl RegisterArg {
    /// Creates a register reference of unknown type.
    #[must_use]
    pub fn new(reg: u16, version: u32) -> Self {
        RegisterArg {
            reg,
            version,
            ty: ArgType::Unknown,
            name: None,
        }
    }

    /// Creates a register reference of a known type.
    #[must_use]
    pub fn typed(reg: u16, version: u32, ty: ArgType) -> Self {
        RegisterArg {
            reg,
            version,
            ty,
            name: None,
        }
    }

    /// The register number.
    #[must_use]
    pub fn reg(&self) -> u16 {
        self.reg
    }

    /// The value this register holds.
    #[must_use]
    pub fn var(&self) -> VarId {
        VarId {
            reg: self.reg,
            version: self.version,
        }
    }

    /// The known type.
    #[must_use]
    pub fn ty(&self) -> &ArgType {
        &self.ty
    }

    /// Overrides the type.
    pub fn set_type(&mut self, ty: ArgType) {
        self.ty = ty;
    }

    /// The variable name, if one was assigned.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Assigns a variable name.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = Some(name.into());
    }
}

impl fmt::Display for RegisterArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => f.write_str(name),
            None => write!(f, "r{}", self.reg),
        }
    }
}

/// One argument slot of an instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// An immediate value
    Literal {
        /// Raw bits of the value
        value: i64,
        /// Type of the value
        ty: ArgType,
    },
    /// A register read
    Register(RegisterArg),
    /// The value of an inlined instruction
    Wrapped(Box<Instruction>),
}

impl Operand {
    /// Creates an `int` literal.
    #[must_use]
    pub fn int(value: i64) -> Self {
        Operand::Literal {
            value,
            ty: ArgType::Int,
        }
    }

    /// Creates an unversioned register operand.
    #[must_use]
    pub fn reg(reg: u16) -> Self {
        Operand::Register(RegisterArg::new(reg, 0))
    }

    /// Returns the register if this is a register operand.
    #[must_use]
    pub fn as_register(&self) -> Option<&RegisterArg> {
        match self {
            Operand::Register(r) => Some(r),
            _ => None,
        }
    }

    /// Returns the inlined instruction if this is a wrapped operand.
    #[must_use]
    pub fn as_wrapped(&self) -> Option<&Instruction> {
        match self {
            Operand::Wrapped(insn) => Some(insn),
            _ => None,
        }
    }

    /// Returns `true` if this operand reads `var`, directly or inside a wrapped expression.
    #[must_use]
    pub fn uses(&self, var: VarId) -> bool {
        match self {
            Operand::Literal { .. } => false,
            Operand::Register(r) => r.var() == var,
            Operand::Wrapped(insn) => insn.args().iter().any(|a| a.uses(var)),
        }
    }
}

impl From<RegisterArg> for Operand {
    fn from(reg: RegisterArg) -> Self {
        Operand::Register(reg)
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Literal { value, ty } => match ty {
                ArgType::Boolean => write!(f, "{}", *value != 0),
                ArgType::Object(_) if *value == 0 => f.write_str("null"),
                _ => write!(f, "{value}"),
            },
            Operand::Register(r) => fmt::Display::fmt(r, f),
            Operand::Wrapped(insn) => insn.fmt_expr(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ArithOp, InsnKind};

    #[test]
    fn test_register_identity() {
        let a = RegisterArg::new(1, 0);
        let b = RegisterArg::typed(1, 1, ArgType::Int);
        assert_ne!(a.var(), b.var());
        assert_eq!(a.reg(), b.reg());
        assert_eq!(a.to_string(), "r1");
    }

    #[test]
    fn test_operand_uses_nested() {
        let r1 = RegisterArg::new(1, 0);
        let add = Instruction::new(
            InsnKind::Arith(ArithOp::Add),
            vec![Operand::Register(r1.clone()), Operand::int(1)],
            Some(RegisterArg::new(2, 0)),
        );
        let wrapped = Operand::Wrapped(Box::new(add));
        assert!(wrapped.uses(r1.var()));
        assert!(!wrapped.uses(RegisterArg::new(2, 0).var()));
        assert_eq!(wrapped.to_string(), "(r1 + 1)");
    }
}
