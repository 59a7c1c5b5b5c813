//! Assembleur `.pyasm` : texte → `CodeObject` CPython 3.4.
//!
//! ```text
//! ; commentaire
//! .code <module>
//! .filename hello.py
//! .line 1
//!     LOAD_CONST 3
//!     STORE_NAME x
//! .line 2
//!     LOAD_NAME print
//!     LOAD_NAME x
//!     LOAD_CONST 4
//!     BINARY_ADD
//!     CALL_FUNCTION 1
//!     POP_TOP
//!     LOAD_CONST None
//!     RETURN_VALUE
//! .end
//! ```
//!
//! Directives d'un bloc `.code NOM` … `.end` (imbricables) : `.filename`,
//! `.firstlineno`, `.argcount`, `.kwonlyargcount`, `.flags` (`A|B` ou nombre),
//! `.stacksize`, `.names`, `.varnames`, `.const <littéral>`, `.line N`.
//! Un bloc imbriqué devient une constante code du bloc parent, référencée par
//! `LOAD_CONST @NOM`.
//!
//! Opérandes : étiquette (`fin:` / `JUMP_FORWARD fin`) ou nombre pour les sauts,
//! littéral pour `LOAD_CONST`, identifiant pour les opcodes de noms et de
//! locaux, opérateur symbolique ou nombre pour `COMPARE_OP`, nombre sinon.

use std::collections::HashMap;

use tracing::debug;

use crate::{
    code::encode_lnotab,
    opcode::{JumpKind, COMPARE_OPS},
    CodeFlags, CodeObject, Opcode, PyConst, PycError, Result,
};

/// Assemble un source `.pyasm` contenant exactement un bloc racine.
pub fn assemble(source: &str) -> Result<CodeObject> {
    let mut stack: Vec<Block> = Vec::new();
    let mut root = None;

    for (idx, raw) in source.lines().enumerate() {
        let line_no = idx + 1;
        let line = strip_comment(raw).trim();
        if line.is_empty() {
            continue;
        }
        let (head, rest) = split_head(line);

        if head == ".code" {
            if root.is_some() {
                return Err(PycError::asm(line_no, "only one root .code block is allowed"));
            }
            let name = if rest.is_empty() { "<module>" } else { rest };
            let filename = stack.last().map_or_else(|| "<pyasm>".to_owned(), |b| b.filename.clone());
            stack.push(Block::new(name, filename, line_no));
            continue;
        }
        let Some(block) = stack.last_mut() else {
            return Err(PycError::asm(line_no, format!("`{head}` outside of a .code block")));
        };

        match head {
            ".end" => {
                let Some(done) = stack.pop() else {
                    return Err(PycError::asm(line_no, ".end without .code"));
                };
                let name = done.name.clone();
                let code = done.finish()?;
                match stack.last_mut() {
                    Some(parent) => parent.nested.push((name, code)),
                    None => root = Some(code),
                }
            }
            ".filename" => block.filename = unquote(rest).to_owned(),
            ".firstlineno" => block.firstlineno = Some(number(rest, line_no)?),
            ".argcount" => block.argcount = number(rest, line_no)?,
            ".kwonlyargcount" => block.kwonlyargcount = number(rest, line_no)?,
            ".stacksize" => block.stacksize = Some(number(rest, line_no)?),
            ".flags" => block.flags = Some(flags(rest, line_no)?),
            ".names" => {
                for n in rest.split_whitespace() {
                    intern(&mut block.names, n);
                }
            }
            ".varnames" => {
                for n in rest.split_whitespace() {
                    intern(&mut block.varnames, n);
                }
            }
            ".const" => match Literal::parse(rest, line_no)? {
                Literal::Value(v) => {
                    block.consts.push(v);
                }
                Literal::Code(_) => return Err(PycError::asm(line_no, ".const cannot reference a code block")),
            },
            ".line" => block.line = Some(number(rest, line_no)?),
            _ if head.starts_with('.') => return Err(PycError::asm(line_no, format!("unknown directive `{head}`"))),
            _ if head.ends_with(':') && rest.is_empty() => {
                let label = &head[..head.len() - 1];
                if block.labels.insert(label.to_owned(), block.items.len()).is_some() {
                    return Err(PycError::asm(line_no, format!("label `{label}` defined twice")));
                }
            }
            _ => {
                let opcode = Opcode::from_name(head)
                    .ok_or_else(|| PycError::asm(line_no, format!("unknown opcode `{head}`")))?;
                if opcode == Opcode::ExtendedArg {
                    return Err(PycError::asm(line_no, "EXTENDED_ARG is inserted automatically"));
                }
                let operand = Operand::parse(opcode, rest, line_no)?;
                block.items.push(Item { opcode, operand, src_line: line_no, py_line: block.line });
            }
        }
    }

    if let Some(open) = stack.last() {
        return Err(PycError::asm(open.src_line, format!("unterminated .code block `{}`", open.name)));
    }
    root.ok_or_else(|| PycError::asm(0, "no .code block"))
}

fn strip_comment(line: &str) -> &str {
    // `;` et `#` hors littéraux
    let mut quote = None;
    for (i, c) in line.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (None, '"' | '\'') => quote = Some(c),
            (None, ';' | '#') => return &line[..i],
            _ => {}
        }
    }
    line
}

fn split_head(line: &str) -> (&str, &str) {
    match line.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (line, ""),
    }
}

fn unquote(s: &str) -> &str { s.trim_matches(|c| c == '"' || c == '\'') }

fn number(s: &str, line: usize) -> Result<u32> {
    let parsed = match s.strip_prefix("0x") {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|_| PycError::asm(line, format!("expected a number, found `{s}`")))
}

fn flags(s: &str, line: usize) -> Result<CodeFlags> {
    if let Ok(bits) = number(s, line) {
        return Ok(CodeFlags::from_bits_retain(bits));
    }
    s.split('|').try_fold(CodeFlags::empty(), |acc, name| {
        CodeFlags::from_name(name.trim())
            .map(|f| acc | f)
            .ok_or_else(|| PycError::asm(line, format!("unknown flag `{}`", name.trim())))
    })
}

fn intern(list: &mut Vec<String>, name: &str) -> u32 {
    match list.iter().position(|n| n == name) {
        Some(i) => i as u32,
        None => {
            list.push(name.to_owned());
            list.len() as u32 - 1
        }
    }
}

/* ───────────────────────────── Blocs ───────────────────────────── */

#[derive(Debug)]
enum Operand {
    None,
    Raw(u32),
    Label(String),
    Const(Literal),
    Name(String),
    Local(String),
}

impl Operand {
    fn parse(opcode: Opcode, rest: &str, line: usize) -> Result<Self> {
        if !opcode.has_arg() {
            return if rest.is_empty() {
                Ok(Self::None)
            } else {
                Err(PycError::asm(line, format!("{opcode} takes no operand")))
            };
        }
        if rest.is_empty() {
            return Err(PycError::asm(line, format!("{opcode} needs an operand")));
        }
        Ok(match opcode {
            Opcode::LoadConst => Self::Const(Literal::parse(rest, line)?),
            Opcode::CompareOp => match COMPARE_OPS.iter().position(|&o| o == rest) {
                Some(i) => Self::Raw(i as u32),
                None => Self::Raw(number(rest, line)?),
            },
            op if op.uses_name() => Self::Name(rest.to_owned()),
            op if op.uses_local() => Self::Local(rest.to_owned()),
            op if op.jump().is_some() => match number(rest, line) {
                Ok(n) => Self::Raw(n),
                Err(_) => Self::Label(rest.to_owned()),
            },
            _ => Self::Raw(number(rest, line)?),
        })
    }
}

#[derive(Debug)]
struct Item {
    opcode: Opcode,
    operand: Operand,
    src_line: usize,
    py_line: Option<u32>,
}

#[derive(Debug)]
struct Block {
    name: String,
    filename: String,
    src_line: usize,
    firstlineno: Option<u32>,
    argcount: u32,
    kwonlyargcount: u32,
    flags: Option<CodeFlags>,
    stacksize: Option<u32>,
    names: Vec<String>,
    varnames: Vec<String>,
    consts: Vec<PyConst>,
    nested: Vec<(String, CodeObject)>,
    labels: HashMap<String, usize>,
    items: Vec<Item>,
    line: Option<u32>,
}

impl Block {
    fn new(name: &str, filename: String, src_line: usize) -> Self {
        Self {
            name: name.to_owned(),
            filename,
            src_line,
            firstlineno: None,
            argcount: 0,
            kwonlyargcount: 0,
            flags: None,
            stacksize: None,
            names: Vec::new(),
            varnames: Vec::new(),
            consts: Vec::new(),
            nested: Vec::new(),
            labels: HashMap::new(),
            items: Vec::new(),
            line: None,
        }
    }

    fn const_index(&mut self, literal: &Literal, placed: &mut HashMap<String, u32>, line: usize) -> Result<u32> {
        match literal {
            Literal::Value(v) => Ok(match self.consts.iter().position(|c| c.same_constant(v)) {
                Some(i) => i as u32,
                None => {
                    self.consts.push(v.clone());
                    self.consts.len() as u32 - 1
                }
            }),
            Literal::Code(name) => {
                if let Some(&i) = placed.get(name) {
                    return Ok(i);
                }
                let code = self
                    .nested
                    .iter()
                    .find(|(n, _)| n == name)
                    .map(|(_, c)| c.clone())
                    .ok_or_else(|| PycError::asm(line, format!("no nested code block named `{name}`")))?;
                self.consts.push(PyConst::Code(Box::new(code)));
                let i = self.consts.len() as u32 - 1;
                placed.insert(name.clone(), i);
                Ok(i)
            }
        }
    }

    fn finish(mut self) -> Result<CodeObject> {
        let items = std::mem::take(&mut self.items);
        let mut placed = HashMap::new();

        // arguments non liés aux sauts
        let mut args: Vec<Option<u32>> = Vec::with_capacity(items.len());
        for item in &items {
            args.push(match &item.operand {
                Operand::None => None,
                Operand::Raw(n) => Some(*n),
                Operand::Label(_) => Some(0),
                Operand::Const(lit) => Some(self.const_index(lit, &mut placed, item.src_line)?),
                Operand::Name(n) => Some(intern(&mut self.names, n)),
                Operand::Local(n) => Some(intern(&mut self.varnames, n)),
            });
        }
        for (name, code) in std::mem::take(&mut self.nested) {
            if !placed.contains_key(&name) {
                self.consts.push(PyConst::Code(Box::new(code)));
            }
        }

        // tailles stables : un argument > 0xFFFF ajoute un préfixe EXTENDED_ARG
        let mut extended = vec![false; items.len()];
        let offsets = loop {
            let mut offsets = Vec::with_capacity(items.len() + 1);
            let mut pc = 0u32;
            for (i, item) in items.iter().enumerate() {
                offsets.push(pc);
                pc += match (item.opcode.has_arg(), extended[i]) {
                    (false, _) => 1,
                    (true, false) => 3,
                    (true, true) => 6,
                };
            }
            offsets.push(pc);
            let mut changed = false;
            for (i, item) in items.iter().enumerate() {
                if let Operand::Label(label) = &item.operand {
                    let target = *self
                        .labels
                        .get(label)
                        .ok_or_else(|| PycError::asm(item.src_line, format!("unknown label `{label}`")))?;
                    let to = offsets[target];
                    let arg = match item.opcode.jump() {
                        Some(JumpKind::Relative) => to.checked_sub(offsets[i + 1]).ok_or_else(|| {
                            PycError::asm(item.src_line, format!("{} cannot jump backwards", item.opcode))
                        })?,
                        _ => to,
                    };
                    args[i] = Some(arg);
                }
                if args[i].is_some_and(|a| a > 0xFFFF) && !extended[i] {
                    extended[i] = true;
                    changed = true;
                }
            }
            if !changed {
                break offsets;
            }
        };

        let mut code = Vec::with_capacity(offsets[items.len()] as usize);
        let mut starts: Vec<(u32, u32)> = Vec::new();
        for (i, item) in items.iter().enumerate() {
            if let Some(l) = item.py_line {
                if starts.last().map_or(true, |&(_, last)| last != l) {
                    starts.push((offsets[i], l));
                }
            }
            if let Some(arg) = args[i] {
                if extended[i] {
                    code.push(Opcode::ExtendedArg.byte());
                    code.extend_from_slice(&((arg >> 16) as u16).to_le_bytes());
                }
                code.push(item.opcode.byte());
                code.extend_from_slice(&(arg as u16).to_le_bytes());
            } else {
                code.push(item.opcode.byte());
            }
        }

        let firstlineno = self.firstlineno.or(starts.first().map(|&(_, l)| l)).unwrap_or(1);
        let lnotab = encode_lnotab(firstlineno, &starts);
        let stacksize = match self.stacksize {
            Some(s) => s,
            None => estimate_stacksize(&items, &args, &offsets),
        };
        let flags = self.flags.unwrap_or(if self.name == "<module>" {
            CodeFlags::NOFREE
        } else {
            CodeFlags::OPTIMIZED | CodeFlags::NEWLOCALS | CodeFlags::NOFREE
        });
        debug!(name = %self.name, bytes = code.len(), consts = self.consts.len(), stacksize, "pyasm block assembled");
        Ok(CodeObject {
            argcount: self.argcount,
            kwonlyargcount: self.kwonlyargcount,
            nlocals: self.varnames.len() as u32,
            stacksize,
            flags,
            code,
            consts: self.consts,
            names: self.names,
            varnames: self.varnames,
            freevars: Vec::new(),
            cellvars: Vec::new(),
            filename: self.filename,
            name: self.name,
            firstlineno,
            lnotab,
        })
    }
}

/// Profondeur maximale estimée (passe avant, cibles en avant propagées).
fn estimate_stacksize(items: &[Item], args: &[Option<u32>], offsets: &[u32]) -> u32 {
    let mut at_target: HashMap<u32, i64> = HashMap::new();
    let (mut depth, mut max, mut live) = (0i64, 0i64, true);
    for (i, item) in items.iter().enumerate() {
        if let Some(&d) = at_target.get(&offsets[i]) {
            depth = if live { depth.max(d) } else { d };
            live = true;
        }
        if !live {
            continue;
        }
        let arg = args[i].unwrap_or(0);
        let op = item.opcode;
        let after = match op {
            Opcode::SetupExcept | Opcode::SetupFinally | Opcode::SetupLoop => depth,
            Opcode::SetupWith => depth + 1,
            _ => (depth + i64::from(op.stack_effect(arg))).max(0),
        };
        if let Some(kind) = op.jump() {
            let next = offsets[i + 1];
            let target = match kind {
                JumpKind::Relative => next + arg,
                JumpKind::Absolute => arg,
            };
            let jump_depth = match op {
                Opcode::ForIter => depth - 1,
                Opcode::SetupExcept | Opcode::SetupFinally => depth + 6,
                Opcode::SetupWith => depth + 7,
                Opcode::JumpIfFalseOrPop | Opcode::JumpIfTrueOrPop => depth,
                _ => after,
            }
            .max(0);
            max = max.max(jump_depth);
            if target > offsets[i] {
                let slot = at_target.entry(target).or_insert(jump_depth);
                *slot = (*slot).max(jump_depth);
            }
        }
        depth = after;
        max = max.max(depth);
        if op.is_terminal() {
            live = false;
        }
    }
    max as u32
}

/* ───────────────────────────── Littéraux ───────────────────────────── */

#[derive(Debug)]
enum Literal {
    Value(PyConst),
    Code(String),
}

impl Literal {
    fn parse(s: &str, line: usize) -> Result<Self> {
        if let Some(name) = s.strip_prefix('@') {
            return Ok(Self::Code(name.trim().to_owned()));
        }
        let mut p = LiteralParser { chars: s.chars().collect(), pos: 0, line };
        let value = p.value()?;
        p.skip_ws();
        if p.pos != p.chars.len() {
            return Err(PycError::asm(line, format!("trailing characters in literal `{s}`")));
        }
        Ok(Self::Value(value))
    }
}

struct LiteralParser {
    chars: Vec<char>,
    pos: usize,
    line: usize,
}

impl LiteralParser {
    fn err(&self, msg: impl Into<String>) -> PycError { PycError::asm(self.line, msg) }

    fn peek(&self) -> Option<char> { self.chars.get(self.pos).copied() }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn eat(&mut self, c: char) -> bool {
        self.skip_ws();
        if self.peek() == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn word(&mut self) -> String {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_alphanumeric() || matches!(c, '_' | '.' | '+' | '-')) {
            // `e-5` / `e+5` seulement après un chiffre ou un 'e'
            if matches!(self.peek(), Some('+' | '-')) && self.pos > start {
                let prev = self.chars[self.pos - 1];
                if prev != 'e' && prev != 'E' {
                    break;
                }
            }
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn items(&mut self, close: char) -> Result<Vec<PyConst>> {
        let mut out = Vec::new();
        loop {
            if self.eat(close) {
                return Ok(out);
            }
            out.push(self.value()?);
            if !self.eat(',') {
                if self.eat(close) {
                    return Ok(out);
                }
                return Err(self.err(format!("expected `,` or `{close}`")));
            }
        }
    }

    fn value(&mut self) -> Result<PyConst> {
        self.skip_ws();
        match self.peek() {
            Some('(') => {
                self.pos += 1;
                Ok(PyConst::Tuple(self.items(')')?))
            }
            Some('{') => {
                self.pos += 1;
                Ok(PyConst::FrozenSet(self.items('}')?))
            }
            Some('"' | '\'') => Ok(PyConst::Str(self.string()?)),
            Some('b') if matches!(self.chars.get(self.pos + 1), Some('"' | '\'')) => {
                self.pos += 1;
                let s = self.string()?;
                let bytes = s
                    .chars()
                    .map(|c| u8::try_from(u32::from(c)).map_err(|_| self.err("non-latin-1 character in bytes")))
                    .collect::<Result<Vec<u8>>>()?;
                Ok(PyConst::Bytes(bytes))
            }
            Some(_) => {
                let w = self.word();
                self.atom(&w)
            }
            None => Err(self.err("missing literal")),
        }
    }

    fn atom(&self, w: &str) -> Result<PyConst> {
        match w {
            "None" => return Ok(PyConst::None),
            "True" => return Ok(PyConst::Bool(true)),
            "False" => return Ok(PyConst::Bool(false)),
            "..." | "Ellipsis" => return Ok(PyConst::Ellipsis),
            "" => return Err(self.err("missing literal")),
            _ => {}
        }
        if let Some(imag) = w.strip_suffix('j') {
            let v: f64 = imag.parse().map_err(|_| self.err(format!("bad complex literal `{w}`")))?;
            return Ok(PyConst::Complex(0.0, v));
        }
        if let Ok(v) = w.parse::<i64>() {
            return Ok(PyConst::Int(v));
        }
        if w.contains(['.', 'e', 'E']) || matches!(w, "inf" | "-inf" | "nan") {
            if let Ok(v) = w.parse::<f64>() {
                return Ok(PyConst::Float(v));
            }
        }
        Err(self.err(format!("bad literal `{w}`")))
    }

    fn string(&mut self) -> Result<String> {
        let Some(quote) = self.peek() else { return Err(self.err("missing string")) };
        self.pos += 1;
        let mut out = String::new();
        loop {
            let c = self.peek().ok_or_else(|| self.err("unterminated string"))?;
            self.pos += 1;
            if c == quote {
                return Ok(out);
            }
            if c != '\\' {
                out.push(c);
                continue;
            }
            let e = self.peek().ok_or_else(|| self.err("incomplete escape"))?;
            self.pos += 1;
            match e {
                'n' => out.push('\n'),
                't' => out.push('\t'),
                'r' => out.push('\r'),
                '0' => out.push('\0'),
                '\\' | '"' | '\'' => out.push(e),
                'x' => out.push(self.hex_escape(2)?),
                'u' => out.push(self.hex_escape(4)?),
                other => return Err(self.err(format!("unknown escape `\\{other}`"))),
            }
        }
    }

    fn hex_escape(&mut self, n: usize) -> Result<char> {
        let digits: String = self.chars.get(self.pos..self.pos + n).ok_or_else(|| self.err("short escape"))?.iter().collect();
        self.pos += n;
        u32::from_str_radix(&digits, 16)
            .ok()
            .and_then(char::from_u32)
            .ok_or_else(|| self.err(format!("bad escape digits `{digits}`")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::decode;
    use pretty_assertions::assert_eq;

    const ADD: &str = "
; x = 3; print(x + 4)
.code <module>
.filename add.py
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
";

    #[test]
    fn assembles_straight_line_module() -> Result<()> {
        let code = assemble(ADD)?;
        assert_eq!(code.consts, vec![PyConst::Int(3), PyConst::Int(4), PyConst::None]);
        assert_eq!(code.names, vec!["x".to_owned(), "print".to_owned()]);
        assert_eq!(code.filename, "add.py");
        assert_eq!(code.line_starts(), vec![(0, 1), (6, 2)]);
        assert_eq!(code.stacksize, 3);
        assert_eq!(decode(&code.code)?.len(), 10);
        Ok(())
    }

    #[test]
    fn labels_resolve_for_both_addressing_modes() -> Result<()> {
        let code = assemble(
            ".code f
             .argcount 1
             .varnames n
             top:
                LOAD_FAST n
                POP_JUMP_IF_FALSE done
                JUMP_FORWARD done
                JUMP_ABSOLUTE top
             done:
                LOAD_CONST None
                RETURN_VALUE
             .end",
        )?;
        let insns = decode(&code.code)?;
        assert_eq!(insns[1].jump_target(), Some(12));
        assert_eq!(insns[2].jump_target(), Some(12));
        assert_eq!(insns[3].jump_target(), Some(0));
        assert_eq!(code.flags, CodeFlags::OPTIMIZED | CodeFlags::NEWLOCALS | CodeFlags::NOFREE);
        assert_eq!(code.nlocals, 1);
        Ok(())
    }

    #[test]
    fn nested_blocks_become_code_constants() -> Result<()> {
        let code = assemble(
            ".code <module>
               LOAD_CONST @double
               LOAD_CONST 'double'
               MAKE_FUNCTION 0
               STORE_NAME double
               LOAD_CONST None
               RETURN_VALUE
               .code double
                 .argcount 1
                 LOAD_FAST x
                 LOAD_FAST x
                 BINARY_ADD
                 RETURN_VALUE
               .end
             .end",
        )?;
        let nested: Vec<_> = code.nested().collect();
        assert_eq!(nested.len(), 1);
        assert_eq!(nested[0].varnames, vec!["x".to_owned()]);
        assert!(matches!(code.consts[0], PyConst::Code(_)));
        assert_eq!(code.consts[1], PyConst::Str("double".into()));
        Ok(())
    }

    #[test]
    fn literals() -> Result<()> {
        let lit = |s: &str| match Literal::parse(s, 1) {
            Ok(Literal::Value(v)) => v,
            other => panic!("{s}: {other:?}"),
        };
        assert_eq!(lit("-12"), PyConst::Int(-12));
        assert_eq!(lit("1.5e-3"), PyConst::Float(1.5e-3));
        assert_eq!(lit("2j"), PyConst::Complex(0.0, 2.0));
        assert_eq!(lit("'a\\n\"b'"), PyConst::Str("a\n\"b".into()));
        assert_eq!(lit("b'\\x00\\xff'"), PyConst::Bytes(vec![0, 255]));
        assert_eq!(lit("(1, 'x', (None,))"), PyConst::Tuple(vec![
            PyConst::Int(1),
            PyConst::Str("x".into()),
            PyConst::Tuple(vec![PyConst::None]),
        ]));
        assert_eq!(lit("{1, 2}"), PyConst::FrozenSet(vec![PyConst::Int(1), PyConst::Int(2)]));
        assert_eq!(lit("..."), PyConst::Ellipsis);
        Ok(())
    }

    #[test]
    fn compare_ops_and_errors_carry_lines() {
        let ok = assemble(".code m\n LOAD_NAME a\n LOAD_NAME b\n COMPARE_OP not in\n RETURN_VALUE\n.end");
        assert!(ok.is_ok_and(|c| c.code[6..9] == [107, 7, 0]));
        assert_eq!(
            assemble(".code m\n FROB 1\n.end").map(|_| ()),
            Err(PycError::asm(2, "unknown opcode `FROB`"))
        );
        assert!(matches!(assemble(".code m\n JUMP_FORWARD nowhere\n.end"), Err(PycError::Asm { line: 2, .. })));
        assert!(matches!(assemble(".code m\n POP_TOP\n"), Err(PycError::Asm { line: 1, .. })));
    }

    #[test]
    fn long_arguments_get_an_extended_prefix() -> Result<()> {
        let code = assemble(".code m\n JUMP_ABSOLUTE 70000\n.end")?;
        assert_eq!(code.code, vec![144, 1, 0, 113, 0x70, 0x11]);
        Ok(())
    }
}
