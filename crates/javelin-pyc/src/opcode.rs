//! Opcodes CPython 3.4 (`Lib/opcode.py`).
//!
//! Un opcode `>= HAVE_ARGUMENT` est suivi d'un argument 16 bits little-endian.

/// Premier opcode prenant un argument.
pub const HAVE_ARGUMENT: u8 = 90;

/// Opérateurs de `COMPARE_OP`, indexés par l'argument.
pub const COMPARE_OPS: [&str; 12] =
    ["<", "<=", "==", "!=", ">", ">=", "in", "not in", "is", "is not", "exception match", "BAD"];

/// Adressage d'un saut.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpKind {
    /// Cible = offset de l'instruction suivante + argument.
    Relative,
    /// Cible = argument.
    Absolute,
}

macro_rules! opcodes {
    ($($variant:ident = $byte:literal => $name:literal),* $(,)?) => {
        /// Un opcode CPython 3.4.
        #[allow(missing_docs)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(u8)]
        pub enum Opcode {
            $($variant = $byte,)*
        }

        impl Opcode {
            /// Tous les opcodes, par valeur croissante.
            pub const ALL: &'static [Opcode] = &[$(Opcode::$variant,)*];

            /// Opcode d'un octet (`None` si inconnu).
            pub const fn from_byte(byte: u8) -> Option<Self> {
                match byte {
                    $($byte => Some(Opcode::$variant),)*
                    _ => None,
                }
            }

            /// Nom CPython (`"LOAD_CONST"`).
            pub const fn name(self) -> &'static str {
                match self {
                    $(Opcode::$variant => $name,)*
                }
            }

            /// Opcode d'après son nom CPython.
            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $($name => Some(Opcode::$variant),)*
                    _ => None,
                }
            }
        }
    };
}

opcodes! {
    PopTop = 1 => "POP_TOP",
    RotTwo = 2 => "ROT_TWO",
    RotThree = 3 => "ROT_THREE",
    DupTop = 4 => "DUP_TOP",
    DupTopTwo = 5 => "DUP_TOP_TWO",
    Nop = 9 => "NOP",
    UnaryPositive = 10 => "UNARY_POSITIVE",
    UnaryNegative = 11 => "UNARY_NEGATIVE",
    UnaryNot = 12 => "UNARY_NOT",
    UnaryInvert = 15 => "UNARY_INVERT",
    BinaryPower = 19 => "BINARY_POWER",
    BinaryMultiply = 20 => "BINARY_MULTIPLY",
    BinaryModulo = 22 => "BINARY_MODULO",
    BinaryAdd = 23 => "BINARY_ADD",
    BinarySubtract = 24 => "BINARY_SUBTRACT",
    BinarySubscr = 25 => "BINARY_SUBSCR",
    BinaryFloorDivide = 26 => "BINARY_FLOOR_DIVIDE",
    BinaryTrueDivide = 27 => "BINARY_TRUE_DIVIDE",
    InplaceFloorDivide = 28 => "INPLACE_FLOOR_DIVIDE",
    InplaceTrueDivide = 29 => "INPLACE_TRUE_DIVIDE",
    StoreMap = 54 => "STORE_MAP",
    InplaceAdd = 55 => "INPLACE_ADD",
    InplaceSubtract = 56 => "INPLACE_SUBTRACT",
    InplaceMultiply = 57 => "INPLACE_MULTIPLY",
    InplaceModulo = 59 => "INPLACE_MODULO",
    StoreSubscr = 60 => "STORE_SUBSCR",
    DeleteSubscr = 61 => "DELETE_SUBSCR",
    BinaryLshift = 62 => "BINARY_LSHIFT",
    BinaryRshift = 63 => "BINARY_RSHIFT",
    BinaryAnd = 64 => "BINARY_AND",
    BinaryXor = 65 => "BINARY_XOR",
    BinaryOr = 66 => "BINARY_OR",
    InplacePower = 67 => "INPLACE_POWER",
    GetIter = 68 => "GET_ITER",
    PrintExpr = 70 => "PRINT_EXPR",
    LoadBuildClass = 71 => "LOAD_BUILD_CLASS",
    YieldFrom = 72 => "YIELD_FROM",
    InplaceLshift = 75 => "INPLACE_LSHIFT",
    InplaceRshift = 76 => "INPLACE_RSHIFT",
    InplaceAnd = 77 => "INPLACE_AND",
    InplaceXor = 78 => "INPLACE_XOR",
    InplaceOr = 79 => "INPLACE_OR",
    BreakLoop = 80 => "BREAK_LOOP",
    WithCleanup = 81 => "WITH_CLEANUP",
    ReturnValue = 83 => "RETURN_VALUE",
    ImportStar = 84 => "IMPORT_STAR",
    YieldValue = 86 => "YIELD_VALUE",
    PopBlock = 87 => "POP_BLOCK",
    EndFinally = 88 => "END_FINALLY",
    PopExcept = 89 => "POP_EXCEPT",
    StoreName = 90 => "STORE_NAME",
    DeleteName = 91 => "DELETE_NAME",
    UnpackSequence = 92 => "UNPACK_SEQUENCE",
    ForIter = 93 => "FOR_ITER",
    UnpackEx = 94 => "UNPACK_EX",
    StoreAttr = 95 => "STORE_ATTR",
    DeleteAttr = 96 => "DELETE_ATTR",
    StoreGlobal = 97 => "STORE_GLOBAL",
    DeleteGlobal = 98 => "DELETE_GLOBAL",
    LoadConst = 100 => "LOAD_CONST",
    LoadName = 101 => "LOAD_NAME",
    BuildTuple = 102 => "BUILD_TUPLE",
    BuildList = 103 => "BUILD_LIST",
    BuildSet = 104 => "BUILD_SET",
    BuildMap = 105 => "BUILD_MAP",
    LoadAttr = 106 => "LOAD_ATTR",
    CompareOp = 107 => "COMPARE_OP",
    ImportName = 108 => "IMPORT_NAME",
    ImportFrom = 109 => "IMPORT_FROM",
    JumpForward = 110 => "JUMP_FORWARD",
    JumpIfFalseOrPop = 111 => "JUMP_IF_FALSE_OR_POP",
    JumpIfTrueOrPop = 112 => "JUMP_IF_TRUE_OR_POP",
    JumpAbsolute = 113 => "JUMP_ABSOLUTE",
    PopJumpIfFalse = 114 => "POP_JUMP_IF_FALSE",
    PopJumpIfTrue = 115 => "POP_JUMP_IF_TRUE",
    LoadGlobal = 116 => "LOAD_GLOBAL",
    ContinueLoop = 119 => "CONTINUE_LOOP",
    SetupLoop = 120 => "SETUP_LOOP",
    SetupExcept = 121 => "SETUP_EXCEPT",
    SetupFinally = 122 => "SETUP_FINALLY",
    LoadFast = 124 => "LOAD_FAST",
    StoreFast = 125 => "STORE_FAST",
    DeleteFast = 126 => "DELETE_FAST",
    RaiseVarargs = 130 => "RAISE_VARARGS",
    CallFunction = 131 => "CALL_FUNCTION",
    MakeFunction = 132 => "MAKE_FUNCTION",
    BuildSlice = 133 => "BUILD_SLICE",
    MakeClosure = 134 => "MAKE_CLOSURE",
    LoadClosure = 135 => "LOAD_CLOSURE",
    LoadDeref = 136 => "LOAD_DEREF",
    StoreDeref = 137 => "STORE_DEREF",
    DeleteDeref = 138 => "DELETE_DEREF",
    CallFunctionVar = 140 => "CALL_FUNCTION_VAR",
    CallFunctionKw = 141 => "CALL_FUNCTION_KW",
    CallFunctionVarKw = 142 => "CALL_FUNCTION_VAR_KW",
    SetupWith = 143 => "SETUP_WITH",
    ExtendedArg = 144 => "EXTENDED_ARG",
    ListAppend = 145 => "LIST_APPEND",
    SetAdd = 146 => "SET_ADD",
    MapAdd = 147 => "MAP_ADD",
    LoadClassderef = 148 => "LOAD_CLASSDEREF",
}

/// Nombre de valeurs dépilées par un appel : positionnels + 2 × nommés.
const fn call_args(arg: u32) -> i32 { (arg & 0xFF) as i32 + 2 * ((arg >> 8) & 0xFF) as i32 }

impl Opcode {
    /// Octet de l'opcode.
    pub const fn byte(self) -> u8 { self as u8 }

    /// Vrai si l'opcode est suivi d'un argument.
    pub const fn has_arg(self) -> bool { self as u8 >= HAVE_ARGUMENT }

    /// Adressage si l'opcode est un saut.
    pub const fn jump(self) -> Option<JumpKind> {
        use Opcode::*;
        match self {
            JumpForward | ForIter | SetupLoop | SetupExcept | SetupFinally | SetupWith => Some(JumpKind::Relative),
            JumpAbsolute | PopJumpIfFalse | PopJumpIfTrue | JumpIfFalseOrPop | JumpIfTrueOrPop | ContinueLoop => {
                Some(JumpKind::Absolute)
            }
            _ => None,
        }
    }

    /// Argument indexant `co_names`.
    pub const fn uses_name(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            StoreName | DeleteName | StoreAttr | DeleteAttr | StoreGlobal | DeleteGlobal | LoadName | LoadAttr
                | ImportName | ImportFrom | LoadGlobal
        )
    }

    /// Argument indexant `co_varnames`.
    pub const fn uses_local(self) -> bool { matches!(self, Opcode::LoadFast | Opcode::StoreFast | Opcode::DeleteFast) }

    /// Ouvre un bloc (`SETUP_*`).
    pub const fn is_setup(self) -> bool {
        matches!(self, Opcode::SetupLoop | Opcode::SetupExcept | Opcode::SetupFinally | Opcode::SetupWith)
    }

    /// L'exécution ne continue jamais à l'instruction suivante.
    pub const fn is_terminal(self) -> bool {
        use Opcode::*;
        matches!(self, ReturnValue | RaiseVarargs | JumpForward | JumpAbsolute | BreakLoop | ContinueLoop)
    }

    /// Effet sur la pile (modèle CPython 3.4, chemin sans saut).
    pub const fn stack_effect(self, arg: u32) -> i32 {
        use Opcode::*;
        match self {
            PopTop => -1,
            RotTwo | RotThree | Nop | ExtendedArg => 0,
            DupTop => 1,
            DupTopTwo => 2,
            UnaryPositive | UnaryNegative | UnaryNot | UnaryInvert | GetIter => 0,
            ListAppend | SetAdd => -1,
            MapAdd => -2,
            BinaryPower | BinaryMultiply | BinaryModulo | BinaryAdd | BinarySubtract | BinarySubscr
            | BinaryFloorDivide | BinaryTrueDivide | BinaryLshift | BinaryRshift | BinaryAnd | BinaryXor
            | BinaryOr | InplaceFloorDivide | InplaceTrueDivide | InplaceAdd | InplaceSubtract
            | InplaceMultiply | InplaceModulo | InplacePower | InplaceLshift | InplaceRshift | InplaceAnd
            | InplaceXor | InplaceOr => -1,
            StoreSubscr => -3,
            StoreMap | DeleteSubscr => -2,
            PrintExpr => -1,
            LoadBuildClass => 1,
            BreakLoop | ContinueLoop => 0,
            SetupWith => 7,
            WithCleanup => -1,
            ReturnValue | ImportStar => -1,
            YieldValue => 0,
            YieldFrom => -1,
            PopBlock | PopExcept => 0,
            EndFinally => -1,
            StoreName => -1,
            DeleteName => 0,
            UnpackSequence => arg as i32 - 1,
            UnpackEx => (arg & 0xFF) as i32 + (arg >> 8) as i32,
            ForIter => 1,
            StoreAttr => -2,
            DeleteAttr => -1,
            StoreGlobal => -1,
            DeleteGlobal => 0,
            LoadConst | LoadName | LoadGlobal | LoadFast | LoadClosure | LoadDeref | LoadClassderef => 1,
            BuildTuple | BuildList | BuildSet => 1 - arg as i32,
            BuildMap => 1,
            LoadAttr => 0,
            CompareOp => -1,
            ImportName => -1,
            ImportFrom => 1,
            JumpForward | JumpIfFalseOrPop | JumpIfTrueOrPop | JumpAbsolute => 0,
            PopJumpIfFalse | PopJumpIfTrue => -1,
            SetupLoop => 0,
            SetupExcept | SetupFinally => 6,
            StoreFast | StoreDeref => -1,
            DeleteFast | DeleteDeref => 0,
            RaiseVarargs => -(arg as i32),
            CallFunction => -call_args(arg),
            CallFunctionVar | CallFunctionKw => -call_args(arg) - 1,
            CallFunctionVarKw => -call_args(arg) - 2,
            MakeFunction => -1 - call_args(arg) - ((arg >> 16) & 0xFFFF) as i32,
            MakeClosure => -2 - call_args(arg) - ((arg >> 16) & 0xFFFF) as i32,
            BuildSlice => {
                if arg == 3 {
                    -2
                } else {
                    -1
                }
            }
        }
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(self.name()) }
}
