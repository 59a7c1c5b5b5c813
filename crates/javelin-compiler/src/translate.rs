//! Traduction d'une routine CPython en attribut `Code`.
//!
//! Une valeur Python occupe un mot de pile JVM : la profondeur suivie par le
//! `CodeBuilder` est la profondeur Python, sauf dans les régions protégées.
//! À l'entrée d'une région, la pile physique est déversée dans des locaux
//! (le *spill*) : le handler JVM démarre pile vide, puis recharge le spill et
//! empile les valeurs d'exception attendues par le bytecode source. Le
//! `POP_BLOCK` recharge le spill sur le chemin normal.
//!
//! Un `return` sous un `finally`/`with` range la valeur dans un local, saute
//! au handler avec le marqueur `RETURNING`, et le `END_FINALLY` de ce handler
//! poursuit le retour.
//!
//! Non traduits : générateurs, fermetures, classes, appels étoilés,
//! `import *`, `break`/`continue` traversant un `finally`.

use std::collections::HashMap;

use javelin_classfile::{opcodes::op, verify::check_code, ClassFileError, Code, CodeBuilder, ConstantPool, InvokeKind, Label};
use javelin_pyc::{decode, CodeObject, Instruction, Opcode, PyConst};
use tracing::{debug, trace};

use crate::{
    blocks::{BlockKind, BlockTree, Protection},
    error::TranslateError,
    runtime::{self, builtins, types},
};

/// Genre de routine : fixe la signature et l'origine des locaux.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutineKind {
    /// Corps du module : `module()O`, `co_varnames[i]` dans le local `i`.
    Module,
    /// Fonction : `([O)O`, argument `i` copié dans le local `i + 1`.
    Function,
}

/// Une routine à traduire.
#[derive(Debug, Clone)]
pub struct Routine<'a> {
    /// Objet code source.
    pub code: &'a CodeObject,
    /// Signature visée.
    pub kind: RoutineKind,
    /// Méthode de la classe portant chaque constante code, par index dans `co_consts`.
    pub nested: HashMap<usize, String>,
}

/// Traduit une routine ; la table des constantes est celle de la classe hôte.
pub fn translate(
    routine: &Routine<'_>,
    class_name: &str,
    pool: &mut ConstantPool,
    emit_lines: bool,
) -> Result<Code, TranslateError> {
    let code = routine.code;
    let insns =
        decode(&code.code).map_err(|source| TranslateError::Decode { routine: code.name.clone(), source })?;
    let tree = BlockTree::build(insns).map_err(|m| TranslateError::Malformed {
        routine: code.name.clone(),
        offset: m.offset,
        opcode: m.opcode,
        reason: m.reason,
    })?;

    let mut t = Translator::new(routine, class_name, pool, tree);
    t.run()?;
    let fault = |e| locate(&code.name, 0, Opcode::Nop, Fault::Code(e));
    let mut out = t.cb.finish(t.pool, emit_lines).map_err(fault)?;
    // max_stack exact : profondeur atteinte par le flot, code mort exclu.
    out.max_stack = check_code(&out, t.pool).map_err(fault)?.max_depth;
    debug!(
        routine = %code.name,
        length = out.code.len(),
        max_stack = out.max_stack,
        max_locals = out.max_locals,
        handlers = out.exception_table.len(),
        "routine translated"
    );
    Ok(out)
}

/* ───────────────────────────── État ───────────────────────────── */

enum Fault {
    Code(ClassFileError),
    Unsupported(String),
    Constant(&'static str),
    Malformed(String),
    Stack(String),
}

impl From<ClassFileError> for Fault {
    fn from(e: ClassFileError) -> Self { Self::Code(e) }
}

type Emit<T = ()> = std::result::Result<T, Fault>;

fn malformed(reason: impl Into<String>) -> Fault { Fault::Malformed(reason.into()) }

fn locate(routine: &str, offset: u32, opcode: Opcode, fault: Fault) -> TranslateError {
    let routine = routine.to_owned();
    match fault {
        Fault::Unsupported(reason) => TranslateError::Unsupported { routine, offset, opcode, reason },
        Fault::Constant(type_name) => TranslateError::UnsupportedConstant { routine, offset, type_name },
        Fault::Malformed(reason) => TranslateError::Malformed { routine, offset, opcode, reason },
        Fault::Stack(reason) => TranslateError::Stack { routine, offset, opcode, reason },
        Fault::Code(e) if e.is_stack_discipline() => {
            TranslateError::Stack { routine, offset, opcode, reason: e.to_string() }
        }
        Fault::Code(source) if source.is_addressing() => TranslateError::Addressing { routine, source },
        Fault::Code(source) if source.is_constant_table() => TranslateError::ConstantTable { routine, source },
        Fault::Code(e) => TranslateError::Malformed { routine, offset, opcode, reason: e.to_string() },
    }
}

struct Scope {
    block: usize,
    kind: ScopeKind,
}

enum ScopeKind {
    /// `depth` : profondeur logique (spills compris) au `SETUP_LOOP`.
    Loop { exit: usize, depth: u32 },
    Protected {
        protection: Protection,
        handler: usize,
        spill: Vec<u16>,
        start: Label,
        entry: Label,
        returning: bool,
    },
    Handler { protection: Protection, returning: bool },
}

/// Handler dont la région protégée est close, pas encore atteint.
struct PendingHandler {
    protection: Protection,
    spill: Vec<u16>,
    entry: Label,
    guarded: bool,
    returning: bool,
}

struct Translator<'a> {
    code: &'a CodeObject,
    kind: RoutineKind,
    nested: &'a HashMap<usize, String>,
    class_name: &'a str,
    pool: &'a mut ConstantPool,
    tree: BlockTree,
    cb: CodeBuilder,
    lines: Vec<Option<u32>>,
    labels: Vec<Option<Label>>,
    depths: Vec<Option<u32>>,
    scopes: Vec<Scope>,
    handlers: HashMap<usize, PendingHandler>,
    scratch: Vec<u16>,
    ret_slot: Option<u16>,
    last_line: Option<u32>,
    live: bool,
    at: usize,
}

impl<'a> Translator<'a> {
    fn new(routine: &'a Routine<'a>, class_name: &'a str, pool: &'a mut ConstantPool, tree: BlockTree) -> Self {
        let n = tree.insns.len();
        let starts = routine.code.line_starts();
        let mut lines = Vec::with_capacity(n);
        let (mut k, mut line) = (0, None);
        for insn in &tree.insns {
            while k < starts.len() && starts[k].0 <= insn.offset {
                line = Some(starts[k].1);
                k += 1;
            }
            lines.push(line);
        }
        let params = match routine.kind {
            RoutineKind::Module => 0,
            RoutineKind::Function => 1,
        };
        Self {
            code: routine.code,
            kind: routine.kind,
            nested: &routine.nested,
            class_name,
            pool,
            tree,
            cb: CodeBuilder::new(params),
            lines,
            labels: vec![None; n],
            depths: vec![None; n],
            scopes: Vec::new(),
            handlers: HashMap::new(),
            scratch: Vec::new(),
            ret_slot: None,
            last_line: None,
            live: true,
            at: 0,
        }
    }

    fn run(&mut self) -> Result<(), TranslateError> {
        let code: &'a CodeObject = self.code;
        let name = code.name.as_str();
        let first = self.tree.insns.first().map_or((0, Opcode::Nop), |i| (i.offset, i.opcode));
        self.prologue().map_err(|f| locate(name, first.0, first.1, f))?;

        for idx in 0..self.tree.insns.len() {
            let insn = self.tree.insns[idx];
            self.at = idx;
            self.step(idx, insn).map_err(|f| locate(name, insn.offset, insn.opcode, f))?;
        }

        if self.live {
            let last = self.tree.insns.last().map_or((0, Opcode::Nop), |i| (i.offset, i.opcode));
            return Err(locate(name, last.0, last.1, malformed("control falls off the end of the routine")));
        }
        Ok(())
    }

    fn step(&mut self, idx: usize, insn: Instruction) -> Emit {
        let structural = insn.opcode.is_setup() || matches!(insn.opcode, Opcode::PopBlock | Opcode::EndFinally);
        if !self.enter(idx)? && !structural {
            return Ok(());
        }
        if self.live {
            if let Some(line) = self.lines[idx].filter(|&l| self.last_line != Some(l)) {
                self.cb.mark_line(line);
                self.last_line = Some(line);
            }
            trace!(offset = insn.offset, op = %insn.opcode, arg = insn.arg, depth = self.cb.depth(), "translate");
        }
        self.emit(idx, insn)
    }

    /* ───────────── prologue, labels, profondeurs ───────────── */

    fn prologue(&mut self) -> Emit {
        let code = self.code;
        let params = code.param_count() as usize;
        if self.kind == RoutineKind::Function && params > code.varnames.len() {
            return Err(malformed(format!("{params} parameters but {} local names", code.varnames.len())));
        }
        for j in 0..code.varnames.len() {
            let slot = self.local(j as u32)?;
            if self.kind == RoutineKind::Function && j < params {
                self.cb.load(0)?;
                self.push_int(j as u32)?;
                self.cb.op(op::AALOAD)?;
            } else {
                self.cb.op(op::ACONST_NULL)?;
            }
            self.cb.store(slot)?;
        }
        if self.tree.insns.iter().any(|i| matches!(i.opcode, Opcode::SetupFinally | Opcode::SetupWith)) {
            let ret = self.cb.alloc_local()?;
            self.cb.op(op::ACONST_NULL)?;
            self.cb.store(ret)?;
            self.ret_slot = Some(ret);
        }
        Ok(())
    }

    /// Ouvre un handler éventuel puis fusionne la profondeur ; `false` si code mort.
    fn enter(&mut self, idx: usize) -> Emit<bool> {
        if let Some(h) = self.handlers.remove(&idx) {
            self.open_handler(idx, h)?;
        }
        match (self.live, self.depths[idx]) {
            (true, Some(d)) if d != self.cb.depth() => {
                return Err(Fault::Stack(format!("stack depth {} meets depth {d} at a jump target", self.cb.depth())));
            }
            (true, _) => {}
            (false, Some(d)) => {
                self.cb.set_depth(d);
                self.live = true;
            }
            (false, None) => return Ok(false),
        }
        self.depths[idx] = Some(self.cb.depth());
        let label = self.label(idx);
        self.cb.bind(label)?;
        Ok(true)
    }

    fn open_handler(&mut self, idx: usize, h: PendingHandler) -> Emit {
        let block = self.tree.handler_at(idx).ok_or_else(|| malformed("handler block missing"))?;
        if h.guarded {
            let expected = h.spill.len() as u32 + h.protection.handler_values();
            self.reach(idx, expected)?;
            if self.live {
                self.reach(idx, self.cb.depth())?;
                let body = self.label(idx);
                self.cb.branch(op::GOTO, body)?;
            }
            self.cb.bind(h.entry)?;
            self.cb.set_depth(1);
            self.invoke(InvokeKind::Static, runtime::BASE_EXCEPTION, runtime::FROM_THROWABLE)?;
            let tmp = self.scratch(0)?;
            self.cb.store(tmp)?;
            for &slot in &h.spill {
                self.cb.load(slot)?;
            }
            self.cb.load(tmp)?;
            if h.protection == Protection::Except {
                self.builtin(builtins::TRACEBACK_OF)?;
                self.cb.load(tmp)?;
                self.cb.load(tmp)?;
                self.builtin(builtins::TYPE_OF)?;
            }
            self.live = true;
        }
        self.scopes.push(Scope {
            block,
            kind: ScopeKind::Handler { protection: h.protection, returning: h.returning },
        });
        Ok(())
    }

    fn label(&mut self, idx: usize) -> Label {
        match self.labels[idx] {
            Some(l) => l,
            None => {
                let l = self.cb.new_label();
                self.labels[idx] = Some(l);
                l
            }
        }
    }

    /// Label d'une cible ; une cible arrière doit déjà être posée.
    fn jump_label(&mut self, target: usize) -> Emit<Label> {
        if target <= self.at && self.labels[target].and_then(|l| self.cb.label_pc(l)).is_none() {
            return Err(malformed("backward jump into unreachable code"));
        }
        Ok(self.label(target))
    }

    fn reach(&mut self, target: usize, depth: u32) -> Emit {
        match self.depths[target] {
            Some(d) if d != depth => Err(Fault::Stack(format!(
                "jump to offset {} with depth {depth}, expected {d}",
                self.tree.insns[target].offset
            ))),
            _ => {
                self.depths[target] = Some(depth);
                Ok(())
            }
        }
    }

    fn branch_to(&mut self, opcode: u8, target: usize) -> Emit {
        let label = self.jump_label(target)?;
        self.cb.branch(opcode, label)?;
        self.reach(target, self.cb.depth())
    }

    fn target(&self, idx: usize) -> Emit<usize> { self.tree.targets[idx].ok_or_else(|| malformed("jump without target")) }

    /// Mots déversés par les régions protégées actives.
    fn base(&self) -> u32 {
        self.scopes
            .iter()
            .map(|s| match &s.kind {
                ScopeKind::Protected { spill, .. } => spill.len() as u32,
                _ => 0,
            })
            .sum()
    }

    /// Mots déversés par les régions protégées actives qui contiennent `target`.
    fn kept_base(&self, target: usize) -> u32 {
        self.scopes
            .iter()
            .take_while(|s| self.tree.blocks[s.block].contains(target))
            .map(|s| match &s.kind {
                ScopeKind::Protected { spill, .. } => spill.len() as u32,
                _ => 0,
            })
            .sum()
    }

    fn scratch(&mut self, i: usize) -> Emit<u16> {
        while self.scratch.len() <= i {
            let slot = self.cb.alloc_local()?;
            self.scratch.push(slot);
        }
        Ok(self.scratch[i])
    }

    fn local(&self, arg: u32) -> Emit<u16> {
        if arg as usize >= self.code.varnames.len() {
            return Err(malformed(format!("local index {arg} out of range")));
        }
        let base = u32::from(self.kind == RoutineKind::Function);
        u16::try_from(arg + base).map_err(|_| Fault::Code(ClassFileError::TooManyLocals(arg + base)))
    }

    fn name(&self, arg: u32) -> Emit<&'a str> {
        let code: &'a CodeObject = self.code;
        code.names
            .get(arg as usize)
            .map(String::as_str)
            .ok_or_else(|| malformed(format!("name index {arg} out of range")))
    }

    /* ───────────── émission élémentaire ───────────── */

    fn op(&mut self, opcode: u8) -> Emit {
        self.cb.op(opcode)?;
        Ok(())
    }

    fn pops(&mut self, n: u32) -> Emit {
        for _ in 0..n {
            self.cb.op(op::POP)?;
        }
        Ok(())
    }

    fn push_int(&mut self, v: u32) -> Emit {
        let v = i32::try_from(v).map_err(|_| malformed(format!("integer operand {v} too large")))?;
        self.cb.push_int(self.pool, v)?;
        Ok(())
    }

    fn push_str(&mut self, s: &str) -> Emit {
        let index = self.pool.string(s)?;
        self.cb.ldc(index)?;
        Ok(())
    }

    fn invoke(&mut self, kind: InvokeKind, class: &str, (name, desc): (&str, &str)) -> Emit {
        self.cb.invoke(kind, self.pool, class, name, desc)?;
        Ok(())
    }

    fn builtin(&mut self, target: (&str, &str)) -> Emit { self.invoke(InvokeKind::Static, runtime::BUILTINS, target) }

    fn method(&mut self, name: &str, desc: &str) -> Emit {
        self.invoke(InvokeKind::Interface, runtime::OBJECT, (name, desc))
    }

    fn get_static(&mut self, class: &str, name: &str, desc: &str) -> Emit {
        self.cb.field(op::GETSTATIC, self.pool, class, name, desc)?;
        Ok(())
    }

    fn globals(&mut self) -> Emit {
        let class = self.class_name;
        self.get_static(class, runtime::DICT_FIELD, runtime::MAP_DESC)
    }

    fn new_dup(&mut self, class: &str) -> Emit {
        self.cb.type_insn(op::NEW, self.pool, class)?;
        self.op(op::DUP)
    }

    fn init(&mut self, class: &str, desc: &str) -> Emit { self.invoke(InvokeKind::Special, class, ("<init>", desc)) }

    /// Les `n` valeurs du sommet → un `Object[]`, ordre de pile conservé.
    fn collect(&mut self, n: u32) -> Emit {
        self.push_int(n)?;
        self.cb.type_insn(op::ANEWARRAY, self.pool, runtime::OBJECT)?;
        for i in (0..n).rev() {
            self.op(op::DUP_X1)?;
            self.op(op::SWAP)?;
            self.push_int(i)?;
            self.op(op::SWAP)?;
            self.op(op::AASTORE)?;
        }
        Ok(())
    }

    /// `Object[]` au sommet → instance de `class` construite dessus.
    fn construct(&mut self, class: &str) -> Emit {
        self.cb.type_insn(op::NEW, self.pool, class)?;
        self.op(op::DUP_X1)?;
        self.op(op::SWAP)?;
        self.init(class, runtime::ARRAY_INIT_DESC)
    }

    fn truth(&mut self) -> Emit { self.method("toBoolean", "()Z") }

    fn negate(&mut self) -> Emit {
        self.op(op::ICONST_1)?;
        self.op(op::IXOR)?;
        self.invoke(InvokeKind::Static, types::BOOL, runtime::BOOL_VALUE_OF)
    }

    fn pop_excepts(&mut self, n: usize) -> Emit {
        for _ in 0..n {
            self.builtin(builtins::POP_EXCEPT)?;
        }
        Ok(())
    }

    /* ───────────── instructions ───────────── */

    fn emit(&mut self, idx: usize, insn: Instruction) -> Emit {
        use Opcode::*;
        let arg = insn.arg();
        if let Some(name) = runtime::binary_method(insn.opcode) {
            return self.method(name, runtime::BINARY_DESC);
        }
        if let Some(name) = runtime::unary_method(insn.opcode) {
            return self.method(name, runtime::UNARY_DESC);
        }
        match insn.opcode {
            Nop => {}
            PopTop => self.op(op::POP)?,
            RotTwo => self.op(op::SWAP)?,
            RotThree => {
                self.op(op::DUP_X2)?;
                self.op(op::POP)?;
            }
            DupTop => self.op(op::DUP)?,
            DupTopTwo => self.op(op::DUP2)?,
            UnaryNot => {
                self.truth()?;
                self.negate()?;
            }
            GetIter => self.method("__iter__", runtime::UNARY_DESC)?,

            LoadConst => self.load_const(arg as usize)?,
            LoadName | LoadGlobal => {
                let name = self.name(arg)?;
                self.globals()?;
                self.push_str(name)?;
                self.builtin(builtins::LOAD_GLOBAL)?;
            }
            StoreName | StoreGlobal => {
                let name = self.name(arg)?;
                self.globals()?;
                self.push_str(name)?;
                self.builtin(builtins::STORE_GLOBAL)?;
            }
            DeleteName | DeleteGlobal => {
                let name = self.name(arg)?;
                self.globals()?;
                self.push_str(name)?;
                self.builtin(builtins::DELETE_GLOBAL)?;
            }
            LoadFast => {
                let slot = self.local(arg)?;
                self.cb.load(slot)?;
            }
            StoreFast => {
                let slot = self.local(arg)?;
                self.cb.store(slot)?;
            }
            DeleteFast => {
                let slot = self.local(arg)?;
                self.op(op::ACONST_NULL)?;
                self.cb.store(slot)?;
            }
            LoadAttr => {
                let name = self.name(arg)?;
                self.push_str(name)?;
                self.method("__getattribute__", "(Ljava/lang/String;)Lorg/python/Object;")?;
            }
            StoreAttr => {
                let name = self.name(arg)?;
                self.op(op::SWAP)?;
                self.push_str(name)?;
                self.op(op::SWAP)?;
                self.method("__setattr__", "(Ljava/lang/String;Lorg/python/Object;)V")?;
            }
            DeleteAttr => {
                let name = self.name(arg)?;
                self.push_str(name)?;
                self.method("__delattr__", "(Ljava/lang/String;)V")?;
            }
            StoreSubscr => self.builtin(builtins::SET_ITEM)?,
            DeleteSubscr => self.method("__delitem__", "(Lorg/python/Object;)V")?,
            CompareOp => self.compare(arg)?,

            BuildTuple => {
                self.collect(arg)?;
                self.construct(types::TUPLE)?;
            }
            BuildList => {
                self.collect(arg)?;
                self.construct(types::LIST)?;
            }
            BuildSet => {
                self.collect(arg)?;
                self.construct(types::SET)?;
            }
            BuildSlice => {
                if !matches!(arg, 2 | 3) {
                    return Err(malformed(format!("slice of {arg} values")));
                }
                self.collect(arg)?;
                self.construct(types::SLICE)?;
            }
            BuildMap => {
                self.new_dup(types::DICT)?;
                self.init(types::DICT, "()V")?;
            }
            StoreMap => self.builtin(builtins::STORE_MAP)?,
            UnpackSequence => {
                self.push_int(arg)?;
                self.builtin(builtins::UNPACK)?;
                for k in (0..arg).rev() {
                    self.op(op::DUP)?;
                    self.push_int(k)?;
                    self.op(op::AALOAD)?;
                    self.op(op::SWAP)?;
                }
                self.op(op::POP)?;
            }
            ListAppend | SetAdd => {
                if arg != 2 {
                    return Err(Fault::Unsupported(format!("{} below an iterator only, not at depth {arg}", insn.opcode)));
                }
                let v = self.scratch(0)?;
                self.cb.store(v)?;
                self.op(op::SWAP)?;
                self.op(op::DUP_X1)?;
                self.cb.load(v)?;
                self.builtin(if insn.opcode == ListAppend { builtins::LIST_APPEND } else { builtins::SET_ADD })?;
            }
            MapAdd => {
                if arg != 2 {
                    return Err(Fault::Unsupported(format!("MAP_ADD below an iterator only, not at depth {arg}")));
                }
                let (k, v) = (self.scratch(0)?, self.scratch(1)?);
                self.cb.store(k)?;
                self.cb.store(v)?;
                self.op(op::SWAP)?;
                self.op(op::DUP_X1)?;
                self.cb.load(v)?;
                self.cb.load(k)?;
                self.builtin(builtins::MAP_ADD)?;
            }

            CallFunction => self.call(arg)?,
            MakeFunction => self.make_function(arg)?,
            ImportName => {
                let name = self.name(arg)?;
                self.push_str(name)?;
                self.invoke(InvokeKind::Static, runtime::IMPORTLIB, runtime::IMPORT_NAME)?;
            }
            ImportFrom => {
                let name = self.name(arg)?;
                self.op(op::DUP)?;
                self.push_str(name)?;
                self.method("__getattribute__", "(Ljava/lang/String;)Lorg/python/Object;")?;
            }
            RaiseVarargs => {
                let helper = match arg {
                    0 => builtins::RERAISE_CURRENT,
                    1 => builtins::RAISE,
                    2 => builtins::RAISE_FROM,
                    _ => return Err(malformed(format!("raise with {arg} operands"))),
                };
                self.builtin(helper)?;
                self.op(op::ATHROW)?;
                self.live = false;
            }
            ReturnValue => self.return_value()?,

            JumpForward | JumpAbsolute => {
                let target = self.target(idx)?;
                let logical = self.base() + self.cb.depth();
                let depth = logical
                    .checked_sub(self.kept_base(target))
                    .ok_or_else(|| Fault::Stack("jump below a protected block's stack".into()))?;
                self.unwind_to(target, depth, false)?;
                self.live = false;
            }
            PopJumpIfFalse | PopJumpIfTrue | JumpIfFalseOrPop | JumpIfTrueOrPop => {
                let target = self.target(idx)?;
                self.conditional(insn.opcode, target)?;
            }
            ForIter => {
                let target = self.target(idx)?;
                self.for_iter(target)?;
            }
            BreakLoop => {
                let (exit, depth) = self
                    .scopes
                    .iter()
                    .rev()
                    .find_map(|s| match s.kind {
                        ScopeKind::Loop { exit, depth } => Some((exit, depth)),
                        _ => None,
                    })
                    .ok_or_else(|| malformed("BREAK_LOOP outside a loop"))?;
                let depth = depth
                    .checked_sub(self.kept_base(exit))
                    .ok_or_else(|| Fault::Stack("loop exit below a protected block's stack".into()))?;
                self.unwind_to(exit, depth, true)?;
                self.live = false;
            }
            ContinueLoop => {
                let target = self.target(idx)?;
                let depth = self.depths[target].ok_or_else(|| malformed("CONTINUE_LOOP into unreachable code"))?;
                self.unwind_to(target, depth, true)?;
                self.live = false;
            }

            SetupLoop | SetupExcept | SetupFinally | SetupWith => self.setup(idx, insn.opcode)?,
            PopBlock => self.pop_block()?,
            EndFinally => self.end_finally()?,
            PopExcept => self.builtin(builtins::POP_EXCEPT)?,
            WithCleanup => self.builtin(builtins::WITH_CLEANUP)?,

            YieldValue | YieldFrom => return Err(Fault::Unsupported("generators".into())),
            MakeClosure | LoadClosure | LoadDeref | StoreDeref | DeleteDeref | LoadClassderef => {
                return Err(Fault::Unsupported("closures and cell variables".into()));
            }
            CallFunctionVar | CallFunctionKw | CallFunctionVarKw => {
                return Err(Fault::Unsupported("star-argument calls".into()));
            }
            LoadBuildClass => return Err(Fault::Unsupported("class definitions".into())),
            ImportStar => return Err(Fault::Unsupported("star imports".into())),
            UnpackEx => return Err(Fault::Unsupported("starred unpacking".into())),
            PrintExpr => return Err(Fault::Unsupported("interactive expression printing".into())),
            other => return Err(Fault::Unsupported(format!("{other} outside the translated subset"))),
        }
        Ok(())
    }

    fn compare(&mut self, arg: u32) -> Emit {
        match arg {
            0..=5 => self.method(runtime::RICH_COMPARE[arg as usize], runtime::BINARY_DESC),
            6 | 7 => {
                self.op(op::SWAP)?;
                self.method("__contains__", runtime::BINARY_DESC)?;
                if arg == 7 {
                    self.truth()?;
                    self.negate()?;
                }
                Ok(())
            }
            8 => self.builtin(builtins::IS),
            9 => self.builtin(builtins::IS_NOT),
            10 => self.builtin(builtins::EXCEPTION_MATCHES),
            _ => Err(Fault::Unsupported(format!("comparison operator {arg}"))),
        }
    }

    fn call(&mut self, arg: u32) -> Emit {
        if arg >> 16 != 0 {
            return Err(malformed(format!("call argument {arg:#x}")));
        }
        let (positional, keywords) = (arg & 0xFF, (arg >> 8) & 0xFF);
        let kw = if keywords > 0 {
            self.collect(2 * keywords)?;
            let slot = self.scratch(0)?;
            self.cb.store(slot)?;
            Some(slot)
        } else {
            None
        };
        self.collect(positional)?;
        match kw {
            Some(slot) => self.cb.load(slot)?,
            None => self.op(op::ACONST_NULL)?,
        }
        self.method("__call__", runtime::CALL_DESC)
    }

    fn make_function(&mut self, arg: u32) -> Emit {
        if arg >> 8 != 0 {
            return Err(Fault::Unsupported("keyword-only defaults and annotations".into()));
        }
        let (qualname, code, defaults) = (self.scratch(0)?, self.scratch(1)?, self.scratch(2)?);
        self.cb.store(qualname)?;
        self.cb.store(code)?;
        self.collect(arg)?;
        self.cb.store(defaults)?;
        self.new_dup(types::FUNCTION)?;
        self.cb.load(code)?;
        self.cb.load(qualname)?;
        self.cb.load(defaults)?;
        self.init(types::FUNCTION, runtime::FUNCTION_INIT_DESC)
    }

    /* ───────────── constantes ───────────── */

    fn load_const(&mut self, index: usize) -> Emit {
        let code: &'a CodeObject = self.code;
        match code.consts.get(index) {
            Some(PyConst::Code(nested)) => self.push_code(index, nested),
            Some(value) => self.push_value(value),
            None => Err(malformed(format!("constant index {index} out of range"))),
        }
    }

    fn push_value(&mut self, value: &PyConst) -> Emit {
        match value {
            PyConst::None => self.get_static(types::NONE_TYPE, "NONE", runtime::OBJECT_DESC),
            PyConst::Bool(b) => self.get_static(types::BOOL, if *b { "TRUE" } else { "FALSE" }, runtime::OBJECT_DESC),
            PyConst::Ellipsis => self.get_static(types::ELLIPSIS, "ELLIPSIS", runtime::OBJECT_DESC),
            PyConst::Int(v) => {
                self.new_dup(types::INT)?;
                match v {
                    0 => self.op(op::LCONST_0)?,
                    1 => self.op(op::LCONST_1)?,
                    _ => {
                        let index = self.pool.long(*v)?;
                        self.cb.ldc2(index)?;
                    }
                }
                self.init(types::INT, "(J)V")
            }
            PyConst::Float(f) => {
                self.new_dup(types::FLOAT)?;
                let index = self.pool.double(*f)?;
                self.cb.ldc2(index)?;
                self.init(types::FLOAT, "(D)V")
            }
            PyConst::Str(s) => {
                self.new_dup(types::STR)?;
                self.push_str(s)?;
                self.init(types::STR, runtime::STRING_INIT_DESC)
            }
            PyConst::Bytes(bytes) => {
                let latin1: String = bytes.iter().map(|&b| char::from(b)).collect();
                self.new_dup(types::BYTES)?;
                self.push_str(&latin1)?;
                self.init(types::BYTES, runtime::STRING_INIT_DESC)
            }
            PyConst::Tuple(items) | PyConst::FrozenSet(items) => {
                for item in items {
                    self.push_value(item)?;
                }
                self.collect(items.len() as u32)?;
                self.construct(if matches!(value, PyConst::Tuple(_)) { types::TUPLE } else { types::FROZENSET })
            }
            other => Err(Fault::Constant(other.type_name())),
        }
    }

    fn push_code(&mut self, index: usize, code: &CodeObject) -> Emit {
        let nested: &'a HashMap<usize, String> = self.nested;
        let method = nested.get(&index).ok_or_else(|| malformed(format!("no method for code constant {index}")))?;
        self.new_dup(types::CODE)?;
        let class = self.pool.class(self.class_name)?;
        self.cb.ldc(class)?;
        self.push_str(method)?;
        self.push_str(&code.name)?;
        self.push_int(code.argcount)?;
        self.push_int(code.kwonlyargcount)?;
        self.push_int(code.flags.bits())?;
        self.push_str(&code.varnames.join(","))?;
        self.init(types::CODE, runtime::CODE_INIT_DESC)
    }

    /* ───────────── sauts et blocs ───────────── */

    fn conditional(&mut self, opcode: Opcode, target: usize) -> Emit {
        let leaves_protected = self.scopes.iter().any(|s| {
            matches!(s.kind, ScopeKind::Protected { .. }) && !self.tree.blocks[s.block].contains(target)
        });
        if leaves_protected {
            return Err(Fault::Unsupported("conditional jump out of a protected block".into()));
        }
        match opcode {
            Opcode::PopJumpIfFalse | Opcode::PopJumpIfTrue => {
                self.truth()?;
                self.branch_to(if opcode == Opcode::PopJumpIfFalse { op::IFEQ } else { op::IFNE }, target)
            }
            _ => {
                self.op(op::DUP)?;
                self.truth()?;
                self.branch_to(if opcode == Opcode::JumpIfFalseOrPop { op::IFEQ } else { op::IFNE }, target)?;
                self.op(op::POP)
            }
        }
    }

    fn for_iter(&mut self, target: usize) -> Emit {
        let depth = self.cb.depth();
        let next = self.cb.new_label();
        self.op(op::DUP)?;
        self.method("__next__", runtime::UNARY_DESC)?;
        self.op(op::DUP)?;
        self.cb.branch(op::IFNONNULL, next)?;
        self.op(op::POP)?;
        self.op(op::POP)?;
        self.branch_to(op::GOTO, target)?;
        self.cb.bind(next)?;
        self.cb.set_depth(depth + 1);
        Ok(())
    }

    /// Saut sortant éventuellement de blocs : la pile physique est ramenée à
    /// `depth` mots, rechargés depuis les spills des régions quittées.
    fn unwind_to(&mut self, target: usize, depth: u32, unwinding: bool) -> Emit {
        let keep = self.scopes.iter().take_while(|s| self.tree.blocks[s.block].contains(target)).count();
        let mut reload = Vec::new();
        let (mut crossed, mut excepts) = (false, 0);
        for s in &self.scopes[keep..] {
            match &s.kind {
                ScopeKind::Protected { protection, spill, .. } => {
                    if unwinding && *protection != Protection::Except {
                        return Err(Fault::Unsupported("break or continue through a finally or with block".into()));
                    }
                    reload.extend_from_slice(spill);
                    crossed = true;
                }
                ScopeKind::Handler { protection: Protection::Except, .. } => excepts += 1,
                _ => {}
            }
        }

        if crossed {
            if depth as usize > reload.len() {
                return Err(Fault::Unsupported("jump keeps values pushed inside a protected block".into()));
            }
            self.pops(self.cb.depth())?;
            for &slot in &reload[..depth as usize] {
                self.cb.load(slot)?;
            }
        } else {
            let extra = self
                .cb
                .depth()
                .checked_sub(depth)
                .ok_or_else(|| Fault::Stack(format!("jump needs {depth} values, {} on the stack", self.cb.depth())))?;
            self.pops(extra)?;
        }
        if unwinding {
            self.pop_excepts(excepts)?;
        }
        self.branch_to(op::GOTO, target)
    }

    fn setup(&mut self, idx: usize, opcode: Opcode) -> Emit {
        let target = self.target(idx)?;
        let block = self
            .tree
            .blocks
            .iter()
            .position(|b| {
                b.first == idx + 1
                    && b.parent == Some(self.tree.owner[idx])
                    && !matches!(b.kind, BlockKind::Handler { .. } | BlockKind::Routine)
            })
            .ok_or_else(|| malformed("setup without block"))?;

        let protection = match opcode {
            Opcode::SetupLoop => {
                if self.live {
                    self.reach(target, self.cb.depth())?;
                }
                let depth = self.base() + self.cb.depth();
                self.scopes.push(Scope { block, kind: ScopeKind::Loop { exit: target, depth } });
                return Ok(());
            }
            Opcode::SetupExcept => Protection::Except,
            Opcode::SetupFinally => Protection::Finally,
            _ => Protection::With,
        };

        let mut spill = Vec::new();
        let mut entered = None;
        if self.live {
            if protection == Protection::With {
                self.op(op::DUP)?;
                self.builtin(builtins::WITH_EXIT)?;
                self.op(op::SWAP)?;
                self.builtin(builtins::WITH_ENTER)?;
                let slot = self.scratch(0)?;
                self.cb.store(slot)?;
                entered = Some(slot);
            }
            let n = self.cb.depth();
            for _ in 0..n {
                spill.push(self.cb.alloc_local()?);
            }
            for &slot in spill.iter().rev() {
                self.cb.store(slot)?;
            }
            self.reach(target, n + protection.handler_values())?;
        }
        let start = self.cb.new_label();
        self.cb.bind(start)?;
        if let Some(slot) = entered {
            self.cb.load(slot)?;
        }
        let entry = self.cb.new_label();
        self.scopes.push(Scope {
            block,
            kind: ScopeKind::Protected { protection, handler: target, spill, start, entry, returning: false },
        });
        Ok(())
    }

    fn pop_block(&mut self) -> Emit {
        let scope = self.scopes.pop().ok_or_else(|| malformed("POP_BLOCK without block"))?;
        match scope.kind {
            ScopeKind::Loop { depth, .. } => {
                if self.live {
                    let keep = depth
                        .checked_sub(self.base())
                        .ok_or_else(|| Fault::Stack("loop block below a protected block's stack".into()))?;
                    let extra = self
                        .cb
                        .depth()
                        .checked_sub(keep)
                        .ok_or_else(|| Fault::Stack(format!("loop block needs {keep} values")))?;
                    self.pops(extra)?;
                }
            }
            ScopeKind::Protected { protection, handler, spill, start, entry, returning } => {
                let end = self.cb.new_label();
                self.cb.bind(end)?;
                let guarded = self.cb.label_pc(start) != self.cb.label_pc(end);
                if guarded {
                    let catch = match protection {
                        Protection::Except => self.pool.class(runtime::BASE_EXCEPTION)?,
                        Protection::Finally | Protection::With => 0,
                    };
                    self.cb.exception(start, end, entry, catch);
                }
                if self.live {
                    self.pops(self.cb.depth())?;
                    for &slot in &spill {
                        self.cb.load(slot)?;
                    }
                }
                self.handlers.insert(handler, PendingHandler { protection, spill, entry, guarded, returning });
            }
            ScopeKind::Handler { .. } => return Err(malformed("POP_BLOCK inside a handler")),
        }
        Ok(())
    }

    fn end_finally(&mut self) -> Emit {
        let scope = self.scopes.pop().ok_or_else(|| malformed("END_FINALLY outside a handler"))?;
        let ScopeKind::Handler { protection, returning } = scope.kind else {
            return Err(malformed("END_FINALLY outside a handler"));
        };
        if !self.live {
            return Ok(());
        }
        match protection {
            Protection::Except => {
                self.builtin(builtins::RERAISE)?;
                self.op(op::ATHROW)?;
                self.live = false;
            }
            Protection::Finally | Protection::With => {
                if returning {
                    let depth = self.cb.depth();
                    let resume = self.cb.new_label();
                    self.op(op::DUP)?;
                    self.get_static(runtime::BUILTINS, runtime::RETURNING.0, runtime::RETURNING.1)?;
                    self.cb.branch(op::IF_ACMPNE, resume)?;
                    self.op(op::POP)?;
                    self.resume_return()?;
                    self.cb.bind(resume)?;
                    self.cb.set_depth(depth);
                }
                self.builtin(builtins::END_FINALLY)?;
            }
        }
        Ok(())
    }

    fn innermost_finally(&self) -> Option<usize> {
        self.scopes.iter().rposition(|s| {
            matches!(s.kind, ScopeKind::Protected { protection: Protection::Finally | Protection::With, .. })
        })
    }

    fn except_handlers_above(&self, pos: usize) -> usize {
        self.scopes
            .iter()
            .skip(pos)
            .filter(|s| matches!(s.kind, ScopeKind::Handler { protection: Protection::Except, .. }))
            .count()
    }

    fn return_value(&mut self) -> Emit {
        match self.innermost_finally() {
            None => {
                self.pop_excepts(self.except_handlers_above(0))?;
                self.op(op::ARETURN)?;
            }
            Some(pos) => {
                let ret = self.ret_slot.ok_or_else(|| malformed("return slot missing"))?;
                self.cb.store(ret)?;
                self.return_through(pos)?;
            }
        }
        self.live = false;
        Ok(())
    }

    /// Suite d'un retour arrivé au `END_FINALLY` d'un handler.
    fn resume_return(&mut self) -> Emit {
        match self.innermost_finally() {
            None => {
                let ret = self.ret_slot.ok_or_else(|| malformed("return slot missing"))?;
                self.pop_excepts(self.except_handlers_above(0))?;
                self.cb.load(ret)?;
                self.op(op::ARETURN)
            }
            Some(pos) => self.return_through(pos),
        }
    }

    /// Vide la pile, recharge le spill du bloc `pos` et saute à son handler avec le marqueur.
    fn return_through(&mut self, pos: usize) -> Emit {
        let excepts = self.except_handlers_above(pos);
        let (handler, spill) = match &mut self.scopes[pos].kind {
            ScopeKind::Protected { handler, spill, returning, .. } => {
                *returning = true;
                (*handler, spill.clone())
            }
            _ => return Err(malformed("return target is not a protected block")),
        };
        self.pops(self.cb.depth())?;
        for &slot in &spill {
            self.cb.load(slot)?;
        }
        self.pop_excepts(excepts)?;
        self.get_static(runtime::BUILTINS, runtime::RETURNING.0, runtime::RETURNING.1)?;
        self.branch_to(op::GOTO, handler)
    }
}

/* ───────────────────────────── Tests ───────────────────────────── */

#[cfg(test)]
mod tests {
    use super::*;
    use javelin_classfile::disasm::disassemble_code;
    use javelin_pyc::asm::assemble;
    use pretty_assertions::assert_eq;

    const CLASS: &str = "python/demo/__init__";

    fn module(src: &str) -> Result<(Code, ConstantPool), TranslateError> {
        let code = assemble(src).unwrap();
        let nested = code
            .consts
            .iter()
            .enumerate()
            .filter(|(_, c)| matches!(c, PyConst::Code(_)))
            .map(|(i, _)| (i, format!("f${i}")))
            .collect();
        let mut pool = ConstantPool::new();
        let out = translate(&Routine { code: &code, kind: RoutineKind::Module, nested }, CLASS, &mut pool, true)?;
        Ok((out, pool))
    }

    fn verified(src: &str) -> (Code, String) {
        let (code, pool) = module(src).unwrap();
        let report = check_code(&code, &pool).unwrap();
        assert_eq!(report.max_depth, code.max_stack);
        let text = disassemble_code(&code, &pool).unwrap();
        (code, text)
    }

    #[test]
    fn straight_line_module() {
        let (code, text) = verified(
            "
.code <module>
.line 1
    LOAD_CONST 3
    STORE_NAME x
.line 2
    LOAD_NAME print
    LOAD_NAME x
    LOAD_CONST 4
    BINARY_ADD
    CALL_FUNCTION 1
    POP_TOP
    LOAD_CONST None
    RETURN_VALUE
.end
",
        );
        assert!(text.contains("org/python/Object.__add__"), "{text}");
        assert!(text.contains("org/python/Builtins.storeGlobal"), "{text}");
        assert!(text.contains("org/python/Object.__call__"), "{text}");
        assert!(code.exception_table.is_empty());
        let lines: Vec<u16> = code.line_numbers().iter().map(|l| l.line_number).collect();
        assert_eq!(lines, vec![1, 2]);
        assert_eq!(code.line_numbers()[0].start_pc, 0);
    }

    #[test]
    fn except_handler_gets_three_values() {
        let (code, text) = verified(
            "
.code <module>
    SETUP_EXCEPT handler
    LOAD_CONST 1
    LOAD_CONST 0
    BINARY_TRUE_DIVIDE
    POP_TOP
    POP_BLOCK
    JUMP_FORWARD done
handler:
    DUP_TOP
    LOAD_NAME ZeroDivisionError
    COMPARE_OP exception match
    POP_JUMP_IF_FALSE reraise
    POP_TOP
    POP_TOP
    POP_TOP
    LOAD_NAME print
    LOAD_CONST 'caught'
    CALL_FUNCTION 1
    POP_TOP
    POP_EXCEPT
    JUMP_FORWARD done
reraise:
    END_FINALLY
done:
    LOAD_CONST None
    RETURN_VALUE
.end
",
        );
        assert_eq!(code.exception_table.len(), 1);
        let entry = code.exception_table[0];
        assert!(entry.catch_type != 0);
        assert!(entry.start_pc < entry.end_pc && entry.end_pc <= entry.handler_pc);
        assert!(text.contains("fromThrowable"), "{text}");
        assert!(text.contains("exceptionMatches"), "{text}");
        assert!(text.contains("reraise"), "{text}");
        assert!(text.contains("popExcept"), "{text}");
    }

    #[test]
    fn return_through_finally_uses_the_marker() {
        let (code, text) = verified(
            "
.code <module>
.varnames x
    SETUP_FINALLY cleanup
    LOAD_CONST 1
    RETURN_VALUE
    POP_BLOCK
    LOAD_CONST None
cleanup:
    LOAD_CONST 2
    STORE_FAST x
    END_FINALLY
    LOAD_CONST None
    RETURN_VALUE
.end
",
        );
        assert_eq!(code.exception_table.len(), 1);
        assert_eq!(code.exception_table[0].catch_type, 0);
        assert!(text.contains("RETURNING"), "{text}");
        assert!(text.contains("if_acmpne"), "{text}");
        assert!(text.contains("endFinally"), "{text}");
    }

    #[test]
    fn loops_with_break_and_for_iter() {
        let (_, text) = verified(
            "
.code <module>
    SETUP_LOOP out
    LOAD_NAME range
    LOAD_CONST 3
    CALL_FUNCTION 1
    GET_ITER
top:
    FOR_ITER done
    STORE_NAME i
    LOAD_NAME i
    LOAD_CONST 1
    COMPARE_OP ==
    POP_JUMP_IF_FALSE top
    BREAK_LOOP
    JUMP_ABSOLUTE top
done:
    POP_BLOCK
out:
    LOAD_CONST None
    RETURN_VALUE
.end
",
        );
        assert!(text.contains("__next__"), "{text}");
        assert!(text.contains("ifnonnull"), "{text}");
    }

    #[test]
    fn with_block_spills_the_exit_callable() {
        let (code, text) = verified(
            "
.code <module>
    LOAD_NAME open
    SETUP_WITH cleanup
    STORE_NAME f
    LOAD_NAME f
    POP_TOP
    POP_BLOCK
    LOAD_CONST None
cleanup:
    WITH_CLEANUP
    END_FINALLY
    LOAD_CONST None
    RETURN_VALUE
.end
",
        );
        assert_eq!(code.exception_table.len(), 1);
        assert!(text.contains("withEnter") && text.contains("withCleanup"), "{text}");
    }

    #[test]
    fn functions_copy_arguments_into_locals() {
        let root = assemble(
            "
.code <module>
    LOAD_CONST @double
    LOAD_CONST 'double'
    MAKE_FUNCTION 0
    STORE_NAME double
    LOAD_CONST None
    RETURN_VALUE
.code double
.argcount 1
.varnames x y
    LOAD_FAST x
    LOAD_FAST x
    BINARY_ADD
    STORE_FAST y
    LOAD_FAST y
    RETURN_VALUE
.end
.end
",
        )
        .unwrap();
        let nested = root.nested().next().unwrap();
        let mut pool = ConstantPool::new();
        let routine = Routine { code: nested, kind: RoutineKind::Function, nested: HashMap::new() };
        let code = translate(&routine, CLASS, &mut pool, false).unwrap();
        assert_eq!(code.max_locals, 3);
        assert!(code.line_numbers().is_empty());
        check_code(&code, &pool).unwrap();

        let (_, text) = verified(
            "
.code <module>
    LOAD_CONST @double
    LOAD_CONST 'double'
    MAKE_FUNCTION 0
    STORE_NAME double
    LOAD_CONST None
    RETURN_VALUE
.code double
.argcount 1
    LOAD_FAST x
    RETURN_VALUE
.end
.end
",
        );
        assert!(text.contains("org/python/types/Code.<init>"), "{text}");
        assert!(text.contains("org/python/types/Function.<init>"), "{text}");
    }

    #[test]
    fn unsupported_opcode_is_located() {
        let err = module(".code <module>\n    LOAD_CONST None\n    YIELD_VALUE\n    RETURN_VALUE\n.end\n").unwrap_err();
        assert!(matches!(
            err,
            TranslateError::Unsupported { ref routine, offset: 3, opcode: Opcode::YieldValue, .. } if routine == "<module>"
        ), "{err}");
    }

    #[test]
    fn unsupported_constant_is_reported() {
        let err = module(".code <module>\n    LOAD_CONST 2j\n    RETURN_VALUE\n.end\n").unwrap_err();
        assert_eq!(
            err,
            TranslateError::UnsupportedConstant { routine: "<module>".into(), offset: 0, type_name: "complex" }
        );
    }

    #[test]
    fn inconsistent_depth_at_a_join() {
        let err = module(
            "
.code <module>
    LOAD_CONST 1
    POP_JUMP_IF_FALSE join
    LOAD_CONST 2
join:
    LOAD_CONST None
    RETURN_VALUE
.end
",
        )
        .unwrap_err();
        assert!(matches!(err, TranslateError::Stack { opcode: Opcode::LoadConst, .. }), "{err}");
    }

    #[test]
    fn falling_off_the_end_is_malformed() {
        let err = module(".code <module>\n    LOAD_CONST None\n    POP_TOP\n.end\n").unwrap_err();
        assert!(matches!(err, TranslateError::Malformed { opcode: Opcode::PopTop, .. }), "{err}");
    }

    #[test]
    fn dead_code_is_skipped() {
        let (code, _) = verified(
            "
.code <module>
    LOAD_CONST None
    RETURN_VALUE
    LOAD_NAME unreachable
    POP_TOP
.end
",
        );
        assert_eq!(code.code.len(), 4);
    }
}
