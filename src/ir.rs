/// Intermediate representation for parsed JVM classes and methods.
#[derive(Clone, Debug)]
pub(crate) struct Class {
    pub(crate) name: String,
    pub(crate) access_flags: u16,
    pub(crate) super_name: Option<String>,
    pub(crate) interfaces: Vec<String>,
    pub(crate) fields: Vec<Field>,
    pub(crate) methods: Vec<Method>,
    /// Raw class file bytes, handed to an external decompiler on demand.
    pub(crate) bytes: Vec<u8>,
}

/// Field declared by a class.
#[derive(Clone, Debug)]
pub(crate) struct Field {
    pub(crate) name: String,
    pub(crate) descriptor: String,
    pub(crate) access_flags: u16,
}

/// Intermediate representation for a method and its bytecode.
///
/// Abstract and native methods carry no instructions.
#[derive(Clone, Debug)]
pub(crate) struct Method {
    pub(crate) name: String,
    pub(crate) descriptor: String,
    pub(crate) access_flags: u16,
    pub(crate) instructions: Vec<Instruction>,
    pub(crate) calls: Vec<CallSite>,
}

impl Method {
    pub(crate) fn has_code(&self) -> bool {
        !self.instructions.is_empty()
    }
}

/// Bytecode instruction with its decoded operand.
#[derive(Clone, Debug)]
pub(crate) struct Instruction {
    pub(crate) offset: u32,
    pub(crate) opcode: u8,
    pub(crate) operand: Operand,
}

/// Operand shapes rendered in disassembly listings.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum Operand {
    None,
    Int(i32),
    Local(u16),
    Increment { index: u16, delta: i16 },
    Branch(i64),
    Member(MemberRef),
    Type(String),
    String(String),
    Constant(u16),
}

/// Constant pool reference to a field or method.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct MemberRef {
    pub(crate) owner: String,
    pub(crate) name: String,
    pub(crate) descriptor: String,
}

/// Call site extracted from bytecode.
#[derive(Clone, Debug)]
pub(crate) struct CallSite {
    pub(crate) owner: String,
    pub(crate) name: String,
    pub(crate) descriptor: String,
    pub(crate) kind: CallKind,
    pub(crate) offset: u32,
}

/// Call opcode classification used by CHA.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub(crate) enum CallKind {
    Virtual,
    Interface,
    Special,
    Static,
}
