//! Decoded instructions and the per-instruction attributes supplied by the decoding layer.
//!
//! Instructions are a tagged union ([`InsnKind`]) with a payload-free discriminant
//! ([`InsnType`]) derived through `strum`. Every classification that the pipeline relies on
//! (block splitting, reorderability) is an exhaustive match over [`InsnType`], so adding a new
//! kind forces a decision at each of those points.

use std::fmt;

use strum::EnumDiscriminants;

use crate::ir::{ArgType, HandlerId, Operand, RegisterArg, TryBlockId, VarId};

/// Comparison performed by an `IF` instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IfCond {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `>=`
    Ge,
    /// `>`
    Gt,
    /// `<=`
    Le,
}

impl IfCond {
    /// The source-level operator.
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            IfCond::Eq => "==",
            IfCond::Ne => "!=",
            IfCond::Lt => "<",
            IfCond::Ge => ">=",
            IfCond::Gt => ">",
            IfCond::Le => "<=",
        }
    }
}

/// Binary arithmetic and bitwise operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Rem,
    /// `&`
    And,
    /// `|`
    Or,
    /// `^`
    Xor,
    /// `<<`
    Shl,
    /// `>>`
    Shr,
    /// `>>>`
    Ushr,
}

impl ArithOp {
    /// The source-level operator.
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
            ArithOp::Rem => "%",
            ArithOp::And => "&",
            ArithOp::Or => "|",
            ArithOp::Xor => "^",
            ArithOp::Shl => "<<",
            ArithOp::Shr => ">>",
            ArithOp::Ushr => ">>>",
        }
    }
}

/// Dispatch flavour of an `INVOKE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvokeKind {
    /// Static call, no receiver
    Static,
    /// Virtual call, first argument is the receiver
    Virtual,
    /// Direct (constructor / private) call, first argument is the receiver
    Direct,
    /// Interface call, first argument is the receiver
    Interface,
    /// Superclass call, first argument is the receiver
    Super,
}

/// The operation performed by an instruction.
///
/// Branch targets are bytecode offsets. The edges derived from them are carried separately as
/// [`Jump`] attributes.
#[derive(Debug, Clone, PartialEq, EnumDiscriminants)]
#[strum_discriminants(name(InsnType), derive(Hash, strum::Display, strum::EnumIter))]
#[strum_discriminants(doc = "Fieldless discriminant of [`InsnKind`].")]
pub enum InsnKind {
    /// No operation
    Nop,
    /// Load the literal in `args[0]`
    Const,
    /// Load a string constant
    ConstString(String),
    /// Load a class literal
    ConstClass(String),
    /// Copy `args[0]`
    Move,
    /// `args[0] op args[1]`
    Arith(ArithOp),
    /// `-args[0]`
    Neg,
    /// Primitive conversion of `args[0]`
    Cast(ArgType),
    /// Three-way compare of `args[0]` and `args[1]`
    Cmp,
    /// Conditional branch comparing `args[0]` with `args[1]` (or zero)
    If {
        /// Comparison operator
        cond: IfCond,
        /// Branch target offset
        target: u32,
    },
    /// Unconditional branch
    Goto {
        /// Branch target offset
        target: u32,
    },
    /// Multi-way branch on `args[0]`, falling through on no match
    Switch {
        /// Case keys
        keys: Vec<i32>,
        /// Case target offsets, parallel to `keys`
        targets: Vec<u32>,
    },
    /// Method return, with the value in `args[0]` for non-void methods
    Return,
    /// Throw `args[0]`
    Throw,
    /// Acquire the monitor of `args[0]`
    MonitorEnter,
    /// Release the monitor of `args[0]`
    MonitorExit,
    /// Bind the in-flight exception to the result register
    MoveException,
    /// Method call
    Invoke {
        /// Called method name
        method: String,
        /// Dispatch flavour
        kind: InvokeKind,
    },
    /// Read field of the object in `args[0]`
    InstanceGet(String),
    /// Write `args[1]` into the field of the object in `args[0]`
    InstancePut(String),
    /// Read a static field
    StaticGet(String),
    /// Write `args[0]` into a static field
    StaticPut(String),
    /// `args[0][args[1]]`
    ArrayGet,
    /// `args[0][args[1]] = args[2]`
    ArrayPut,
    /// `args[0].length`
    ArrayLength,
    /// Allocate an instance of a class
    NewInstance(String),
    /// Allocate an array of `args[0]` elements
    NewArray(ArgType),
    /// Allocate and fill an array from the arguments
    FilledNewArray(ArgType),
    /// Fill the array in `args[0]` from a data table
    FillArray,
    /// Checked reference cast
    CheckCast(ArgType),
    /// Type test
    InstanceOf(ArgType),
    /// String concatenation of all arguments
    StrConcat,
    /// SSA join of the arguments
    Phi,
}

/// A control transfer from one instruction offset to another.
///
/// The decoding layer attaches the same jump to both the source and the destination
/// instruction. Conditional branches and switches also carry a jump to their fallthrough
/// successor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Jump {
    /// Offset of the branching instruction
    pub src: u32,
    /// Offset of the target instruction
    pub dest: u32,
}

/// Attributes attached to an instruction by the decoding layer and by exception wiring.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsnAttrs {
    /// Jumps this instruction is the source or destination of
    pub jumps: Vec<Jump>,
    /// First instruction of a protected region
    pub try_entry: bool,
    /// Protected region covering this instruction
    pub catch: Option<TryBlockId>,
    /// Handler whose code starts at this instruction
    pub handler: Option<HandlerId>,
}

/// One decoded operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    kind: InsnKind,
    offset: Option<u32>,
    args: Vec<Operand>,
    result: Option<RegisterArg>,
    attrs: InsnAttrs,
}

impl Instruction {
    /// Creates a synthesized instruction without an offset.
    #[must_use]
    pub fn new(kind: InsnKind, args: Vec<Operand>, result: Option<RegisterArg>) -> Self {
        Instruction {
            kind,
            offset: None,
            args,
            result,
            attrs: InsnAttrs::default(),
        }
    }

    /// Sets the bytecode offset, builder style.
    #[must_use]
    pub fn at(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    /// The operation.
    #[must_use]
    pub fn kind(&self) -> &InsnKind {
        &self.kind
    }

    pub(crate) fn kind_mut(&mut self) -> &mut InsnKind {
        &mut self.kind
    }

    /// The payload-free kind tag.
    #[must_use]
    pub fn insn_type(&self) -> InsnType {
        InsnType::from(&self.kind)
    }

    /// Offset in the original stream, `None` for synthesized instructions.
    #[must_use]
    pub fn offset(&self) -> Option<u32> {
        self.offset
    }

    /// The argument operands.
    #[must_use]
    pub fn args(&self) -> &[Operand] {
        &self.args
    }

    /// Mutable access to the argument operands.
    pub fn args_mut(&mut self) -> &mut Vec<Operand> {
        &mut self.args
    }

    /// The written register, if any.
    #[must_use]
    pub fn result(&self) -> Option<&RegisterArg> {
        self.result.as_ref()
    }

    /// Mutable access to the written register.
    pub fn result_mut(&mut self) -> Option<&mut RegisterArg> {
        self.result.as_mut()
    }

    /// Attributes of this instruction.
    #[must_use]
    pub fn attrs(&self) -> &InsnAttrs {
        &self.attrs
    }

    /// Mutable access to the attributes.
    pub fn attrs_mut(&mut self) -> &mut InsnAttrs {
        &mut self.attrs
    }

    /// Returns `true` if this instruction may move across its neighbours without changing
    /// observable behaviour. Every instruction wrapped in its operands must be reorderable too.
    #[must_use]
    pub fn can_reorder(&self) -> bool {
        let reorderable = match self.insn_type() {
            InsnType::Const
            | InsnType::ConstString
            | InsnType::ConstClass
            | InsnType::Cast
            | InsnType::Move
            | InsnType::Arith
            | InsnType::Neg
            | InsnType::Cmp
            | InsnType::CheckCast
            | InsnType::InstanceOf
            | InsnType::FillArray
            | InsnType::FilledNewArray
            | InsnType::NewArray
            | InsnType::StrConcat
            | InsnType::MoveException => true,
            InsnType::Nop
            | InsnType::If
            | InsnType::Goto
            | InsnType::Switch
            | InsnType::Return
            | InsnType::Throw
            | InsnType::MonitorEnter
            | InsnType::MonitorExit
            | InsnType::Invoke
            | InsnType::InstanceGet
            | InsnType::InstancePut
            | InsnType::StaticGet
            | InsnType::StaticPut
            | InsnType::ArrayGet
            | InsnType::ArrayPut
            | InsnType::ArrayLength
            | InsnType::NewInstance
            | InsnType::Phi => false,
        };
        reorderable
            && self
                .args
                .iter()
                .all(|arg| arg.as_wrapped().is_none_or(Instruction::can_reorder))
    }

    /// Returns `true` if this instruction, or any instruction wrapped in its operands, reads
    /// `var`.
    #[must_use]
    pub fn uses(&self, var: VarId) -> bool {
        self.args.iter().any(|a| a.uses(var))
    }

    /// Returns `true` if any register read by this instruction tree belongs to `reg`.
    #[must_use]
    pub fn reads_register(&self, reg: u16) -> bool {
        let mut found = false;
        self.visit_registers(&mut |r| found |= r.reg() == reg);
        found
    }

    /// Calls `f` for every register read in this instruction tree, depth first.
    pub fn visit_registers(&self, f: &mut impl FnMut(&RegisterArg)) {
        for arg in &self.args {
            match arg {
                Operand::Register(r) => f(r),
                Operand::Wrapped(inner) => inner.visit_registers(f),
                Operand::Literal { .. } => {}
            }
        }
    }

    /// Copy of this instruction for a synthesized block: same kind, operands and result, no
    /// offset and no attributes.
    #[must_use]
    pub fn duplicate(&self) -> Self {
        Instruction::new(self.kind.clone(), self.args.clone(), self.result.clone())
    }

    /// Writes this instruction as an expression, without the result assignment.
    pub(crate) fn fmt_expr(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let arg = |i: usize| {
            self.args
                .get(i)
                .map_or_else(|| "?".to_string(), ToString::to_string)
        };
        let list = |from: usize| {
            self.args
                .iter()
                .skip(from)
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        };

        match &self.kind {
            InsnKind::Nop => f.write_str("nop"),
            InsnKind::Const | InsnKind::Move => f.write_str(&arg(0)),
            InsnKind::ConstString(s) => write!(f, "{s:?}"),
            InsnKind::ConstClass(c) => write!(f, "{c}.class"),
            InsnKind::Arith(op) => write!(f, "({} {} {})", arg(0), op.symbol(), arg(1)),
            InsnKind::Neg => write!(f, "-{}", arg(0)),
            InsnKind::Cast(ty) | InsnKind::CheckCast(ty) => write!(f, "(({ty}) {})", arg(0)),
            InsnKind::Cmp => write!(f, "cmp({}, {})", arg(0), arg(1)),
            InsnKind::If { cond, target } => {
                let rhs = if self.args.len() > 1 {
                    arg(1)
                } else {
                    "0".to_string()
                };
                write!(f, "if {} {} {rhs} goto {target:#x}", arg(0), cond.symbol())
            }
            InsnKind::Goto { target } => write!(f, "goto {target:#x}"),
            InsnKind::Switch { keys, .. } => write!(f, "switch {} ({} cases)", arg(0), keys.len()),
            InsnKind::Return if self.args.is_empty() => f.write_str("return"),
            InsnKind::Return => write!(f, "return {}", arg(0)),
            InsnKind::Throw => write!(f, "throw {}", arg(0)),
            InsnKind::MonitorEnter => write!(f, "monitor-enter({})", arg(0)),
            InsnKind::MonitorExit => write!(f, "monitor-exit({})", arg(0)),
            InsnKind::MoveException => f.write_str("move-exception"),
            InsnKind::Invoke {
                method,
                kind: InvokeKind::Static,
            } => write!(f, "{method}({})", list(0)),
            InsnKind::Invoke { method, .. } => write!(f, "{}.{method}({})", arg(0), list(1)),
            InsnKind::InstanceGet(field) => write!(f, "{}.{field}", arg(0)),
            InsnKind::InstancePut(field) => write!(f, "{}.{field} = {}", arg(0), arg(1)),
            InsnKind::StaticGet(field) => f.write_str(field),
            InsnKind::StaticPut(field) => write!(f, "{field} = {}", arg(0)),
            InsnKind::ArrayGet => write!(f, "{}[{}]", arg(0), arg(1)),
            InsnKind::ArrayPut => write!(f, "{}[{}] = {}", arg(0), arg(1), arg(2)),
            InsnKind::ArrayLength => write!(f, "{}.length", arg(0)),
            InsnKind::NewInstance(class) => write!(f, "new {class}"),
            InsnKind::NewArray(elem) => write!(f, "new {elem}[{}]", arg(0)),
            InsnKind::FilledNewArray(elem) => write!(f, "new {elem}[]{{{}}}", list(0)),
            InsnKind::FillArray => write!(f, "fill-array {}", arg(0)),
            InsnKind::InstanceOf(ty) => write!(f, "({} instanceof {ty})", arg(0)),
            InsnKind::StrConcat => {
                let parts: Vec<String> = self.args.iter().map(ToString::to_string).collect();
                f.write_str(&parts.join(" + "))
            }
            InsnKind::Phi => write!(f, "phi({})", list(0)),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(result) = &self.result {
            write!(f, "{result} = ")?;
        }
        self.fmt_expr(f)
    }
}
