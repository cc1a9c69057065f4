//! The CPython-family opcode set this core understands.
//!
//! Mirrors the CPython 3 `opcode` module's instruction semantics.
//! Only the opcodes the abstract interpreter and code generator have
//! explicit cases for are listed; anything else decodes fine but makes
//! `AbstractInterpreter::interpret` report the function as unsupported.

/// One bytecode instruction's opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Nop = 0,
    PopTop = 1,
    RotTwo = 2,
    RotThree = 3,
    DupTop = 4,

    // ===== Constants / names =====
    LoadConst = 10,
    LoadFast = 11,
    StoreFast = 12,
    DeleteFast = 13,
    LoadName = 14,
    StoreName = 15,
    DeleteName = 16,
    LoadGlobal = 17,
    StoreGlobal = 18,
    DeleteGlobal = 19,
    LoadAttr = 20,
    StoreAttr = 21,
    DeleteAttr = 22,
    LoadMethod = 23,
    LoadDeref = 24,
    StoreDeref = 25,
    LoadClassderef = 26,
    LoadBuildClass = 27,
    LoadAssertionError = 28,

    // ===== Unary =====
    UnaryPositive = 30,
    UnaryNegative = 31,
    UnaryNot = 32,
    UnaryInvert = 33,

    // ===== Binary / inplace =====
    BinaryAdd = 40,
    BinarySubtract = 41,
    BinaryMultiply = 42,
    BinaryTrueDivide = 43,
    BinaryFloorDivide = 44,
    BinaryModulo = 45,
    BinaryPower = 46,
    BinaryMatrixMultiply = 47,
    BinaryLshift = 48,
    BinaryRshift = 49,
    BinaryAnd = 50,
    BinaryOr = 51,
    BinaryXor = 52,
    BinarySubscr = 53,
    InplaceAdd = 54,
    InplaceSubtract = 55,
    InplaceMultiply = 56,
    InplaceTrueDivide = 57,
    InplaceFloorDivide = 58,
    InplaceModulo = 59,
    InplacePower = 60,
    InplaceLshift = 61,
    InplaceRshift = 62,
    InplaceAnd = 63,
    InplaceOr = 64,
    InplaceXor = 65,
    StoreSubscr = 66,
    DeleteSubscr = 67,

    // ===== Comparisons =====
    CompareOp = 70,
    IsOp = 71,
    ContainsOp = 72,
    JumpIfNotExcMatch = 73,

    // ===== Collections =====
    BuildTuple = 80,
    BuildList = 81,
    BuildSet = 82,
    BuildMap = 83,
    BuildString = 84,
    BuildSlice = 85,
    ListToTuple = 86,
    ListExtend = 87,
    SetUpdate = 88,
    DictUpdate = 89,
    DictMerge = 90,
    UnpackSequence = 91,
    UnpackEx = 92,
    FormatValue = 93,

    // ===== Control flow =====
    ReturnValue = 100,
    RaiseVarargs = 101,
    JumpForward = 102,
    JumpAbsolute = 103,
    PopJumpIfFalse = 104,
    PopJumpIfTrue = 105,
    JumpIfFalseOrPop = 106,
    JumpIfTrueOrPop = 107,
    ForIter = 108,
    GetIter = 109,
    SetupFinally = 110,
    PopBlock = 111,
    PopExcept = 112,
    Reraise = 113,
    SetupAnnotations = 114,
    WithExceptStart = 115,

    // ===== Calls / functions =====
    CallFunction = 120,
    CallFunctionKw = 121,
    CallFunctionEx = 122,
    CallMethod = 123,
    MakeFunction = 124,
    PrintExpr = 125,

    // ===== Imports =====
    ImportName = 130,
    ImportFrom = 131,
    ImportStar = 132,

    // ===== Unsupported (rejected by preprocessing) =====
    YieldValue = 140,
    YieldFrom = 141,
    GetAwaitable = 142,
    GetAiter = 143,
    GetAnext = 144,
    BeforeAsyncWith = 145,
    SetupWith = 146,
    SetupAsyncWith = 147,

    // ===== EXTENDED_ARG prefix =====
    ExtendedArg = 255,
}

impl Opcode {
    /// Decode a raw opcode byte, if it is one this core recognizes.
    pub fn from_u8(byte: u8) -> Option<Opcode> {
        use Opcode::*;
        Some(match byte {
            0 => Nop,
            1 => PopTop,
            2 => RotTwo,
            3 => RotThree,
            4 => DupTop,
            10 => LoadConst,
            11 => LoadFast,
            12 => StoreFast,
            13 => DeleteFast,
            14 => LoadName,
            15 => StoreName,
            16 => DeleteName,
            17 => LoadGlobal,
            18 => StoreGlobal,
            19 => DeleteGlobal,
            20 => LoadAttr,
            21 => StoreAttr,
            22 => DeleteAttr,
            23 => LoadMethod,
            24 => LoadDeref,
            25 => StoreDeref,
            26 => LoadClassderef,
            27 => LoadBuildClass,
            28 => LoadAssertionError,
            30 => UnaryPositive,
            31 => UnaryNegative,
            32 => UnaryNot,
            33 => UnaryInvert,
            40 => BinaryAdd,
            41 => BinarySubtract,
            42 => BinaryMultiply,
            43 => BinaryTrueDivide,
            44 => BinaryFloorDivide,
            45 => BinaryModulo,
            46 => BinaryPower,
            47 => BinaryMatrixMultiply,
            48 => BinaryLshift,
            49 => BinaryRshift,
            50 => BinaryAnd,
            51 => BinaryOr,
            52 => BinaryXor,
            53 => BinarySubscr,
            54 => InplaceAdd,
            55 => InplaceSubtract,
            56 => InplaceMultiply,
            57 => InplaceTrueDivide,
            58 => InplaceFloorDivide,
            59 => InplaceModulo,
            60 => InplacePower,
            61 => InplaceLshift,
            62 => InplaceRshift,
            63 => InplaceAnd,
            64 => InplaceOr,
            65 => InplaceXor,
            66 => StoreSubscr,
            67 => DeleteSubscr,
            70 => CompareOp,
            71 => IsOp,
            72 => ContainsOp,
            73 => JumpIfNotExcMatch,
            80 => BuildTuple,
            81 => BuildList,
            82 => BuildSet,
            83 => BuildMap,
            84 => BuildString,
            85 => BuildSlice,
            86 => ListToTuple,
            87 => ListExtend,
            88 => SetUpdate,
            89 => DictUpdate,
            90 => DictMerge,
            91 => UnpackSequence,
            92 => UnpackEx,
            93 => FormatValue,
            100 => ReturnValue,
            101 => RaiseVarargs,
            102 => JumpForward,
            103 => JumpAbsolute,
            104 => PopJumpIfFalse,
            105 => PopJumpIfTrue,
            106 => JumpIfFalseOrPop,
            107 => JumpIfTrueOrPop,
            108 => ForIter,
            109 => GetIter,
            110 => SetupFinally,
            111 => PopBlock,
            112 => PopExcept,
            113 => Reraise,
            114 => SetupAnnotations,
            115 => WithExceptStart,
            120 => CallFunction,
            121 => CallFunctionKw,
            122 => CallFunctionEx,
            123 => CallMethod,
            124 => MakeFunction,
            125 => PrintExpr,
            130 => ImportName,
            131 => ImportFrom,
            132 => ImportStar,
            140 => YieldValue,
            141 => YieldFrom,
            142 => GetAwaitable,
            143 => GetAiter,
            144 => GetAnext,
            145 => BeforeAsyncWith,
            146 => SetupWith,
            147 => SetupAsyncWith,
            255 => ExtendedArg,
            _ => return None,
        })
    }

    /// Whether this opcode unconditionally takes the analysis out of scope
    /// (coroutines, generators, `with`, the yield family).
    pub fn is_unsupported_construct(self) -> bool {
        matches!(
            self,
            Opcode::YieldValue
                | Opcode::YieldFrom
                | Opcode::GetAwaitable
                | Opcode::GetAiter
                | Opcode::GetAnext
                | Opcode::BeforeAsyncWith
                | Opcode::SetupWith
                | Opcode::SetupAsyncWith
        )
    }

    /// True for opcodes that unconditionally end a basic block (no fallthrough).
    pub fn is_terminator(self) -> bool {
        matches!(
            self,
            Opcode::ReturnValue
                | Opcode::RaiseVarargs
                | Opcode::JumpForward
                | Opcode::JumpAbsolute
                | Opcode::Reraise
        )
    }
}
