//! Arbre des blocs structurés d'une routine.
//!
//! `SETUP_LOOP` / `SETUP_EXCEPT` / `SETUP_FINALLY` / `SETUP_WITH` ouvrent un
//! bloc fermé par le `POP_BLOCK` correspondant ; la cible d'un `SETUP_*`
//! protecteur ouvre ensuite un bloc handler, fermé par son `END_FINALLY`.
//! L'instruction `SETUP_*` appartient au bloc parent, `POP_BLOCK` et
//! `END_FINALLY` au bloc qu'ils ferment.
//!
//! L'extraction est purement syntaxique : les instructions mortes comptent
//! aussi, l'imbrication doit rester correcte partout.

use std::fmt::{self, Write as _};

use javelin_pyc::{Instruction, Opcode};

/// Genre de protection d'un bloc `SETUP_*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protection {
    /// `SETUP_EXCEPT`
    Except,
    /// `SETUP_FINALLY`
    Finally,
    /// `SETUP_WITH`
    With,
}

impl Protection {
    /// Valeurs empilées à l'entrée du handler sur exception.
    pub const fn handler_values(self) -> u32 {
        match self {
            Self::Except => 3,
            Self::Finally | Self::With => 1,
        }
    }

    const fn label(self) -> &'static str {
        match self {
            Self::Except => "except",
            Self::Finally => "finally",
            Self::With => "with",
        }
    }
}

/// Nature d'un bloc. Les positions sont des index d'instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// Corps entier de la routine.
    Routine,
    /// `SETUP_LOOP` ; `exit` = cible du `SETUP_LOOP`.
    Loop {
        /// Sortie de boucle.
        exit: usize,
    },
    /// Région protégée ; `handler` = cible du `SETUP_*`.
    Protected {
        /// Genre de protection.
        protection: Protection,
        /// Début du handler.
        handler: usize,
    },
    /// Handler d'une région protégée, jusqu'à son `END_FINALLY`.
    Handler {
        /// Genre de protection.
        protection: Protection,
    },
}

/// Élément d'un bloc, dans l'ordre du code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Item {
    /// Instruction (index).
    Insn(usize),
    /// Bloc enfant (index dans `BlockTree::blocks`).
    Block(usize),
}

/// Un bloc : instructions `first..end` (index d'instruction).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Nature.
    pub kind: BlockKind,
    /// Bloc englobant (`None` pour la routine).
    pub parent: Option<usize>,
    /// Première instruction couverte.
    pub first: usize,
    /// Fin exclusive.
    pub end: usize,
    /// Contenu ordonné.
    pub items: Vec<Item>,
}

impl Block {
    /// Vrai si l'instruction `index` est dans le bloc.
    pub const fn contains(&self, index: usize) -> bool { self.first <= index && index < self.end }
}

/// Incohérence structurelle, située sur une instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Malformation {
    /// Offset source.
    pub offset: u32,
    /// Opcode.
    pub opcode: Opcode,
    /// Précision.
    pub reason: String,
}

/// Instructions d'une routine et leurs blocs.
#[derive(Debug, Clone)]
pub struct BlockTree {
    /// Instructions décodées.
    pub insns: Vec<Instruction>,
    /// Blocs ; l'index 0 est la routine.
    pub blocks: Vec<Block>,
    /// Index d'instruction visé par chaque saut.
    pub targets: Vec<Option<usize>>,
    /// Bloc le plus interne de chaque instruction.
    pub owner: Vec<usize>,
}

impl BlockTree {
    /// Extrait l'arbre des blocs.
    pub fn build(insns: Vec<Instruction>) -> Result<Self, Malformation> {
        let fail = |insn: &Instruction, reason: String| Malformation { offset: insn.offset, opcode: insn.opcode, reason };

        let mut targets = Vec::with_capacity(insns.len());
        for insn in &insns {
            let target = match insn.jump_target() {
                Some(offset) => Some(
                    insns
                        .binary_search_by_key(&offset, |i| i.offset)
                        .map_err(|_| fail(insn, format!("jump target {offset} is not an instruction start")))?,
                ),
                None if insn.opcode.jump().is_some() => {
                    return Err(fail(insn, "jump target overflows".into()));
                }
                None => None,
            };
            targets.push(target);
        }

        let n = insns.len();
        let mut blocks = vec![Block { kind: BlockKind::Routine, parent: None, first: 0, end: n, items: Vec::new() }];
        let mut owner = vec![0; n];
        let mut open = vec![0usize];
        // handlers en attente : (début, protection)
        let mut pending: Vec<(usize, Protection)> = Vec::new();

        for (i, insn) in insns.iter().enumerate() {
            while let Some(pos) = pending.iter().position(|&(start, _)| start == i) {
                let (_, protection) = pending.swap_remove(pos);
                let parent = current(&open);
                let id = push_block(&mut blocks, parent, BlockKind::Handler { protection }, i);
                open.push(id);
            }

            let here = current(&open);
            owner[i] = here;
            blocks[here].items.push(Item::Insn(i));

            match insn.opcode {
                Opcode::SetupLoop | Opcode::SetupExcept | Opcode::SetupFinally | Opcode::SetupWith => {
                    let Some(target) = targets[i] else {
                        return Err(fail(insn, "setup without target".into()));
                    };
                    if target <= i {
                        return Err(fail(insn, "setup target precedes its block".into()));
                    }
                    let kind = match insn.opcode {
                        Opcode::SetupLoop => BlockKind::Loop { exit: target },
                        Opcode::SetupExcept => {
                            BlockKind::Protected { protection: Protection::Except, handler: target }
                        }
                        Opcode::SetupFinally => {
                            BlockKind::Protected { protection: Protection::Finally, handler: target }
                        }
                        _ => BlockKind::Protected { protection: Protection::With, handler: target },
                    };
                    let id = push_block(&mut blocks, here, kind, i + 1);
                    open.push(id);
                }
                Opcode::PopBlock => {
                    let id = match blocks[here].kind {
                        BlockKind::Loop { .. } | BlockKind::Protected { .. } => here,
                        _ => return Err(fail(insn, "POP_BLOCK outside a loop or protected block".into())),
                    };
                    blocks[id].end = i + 1;
                    open.pop();
                    if let BlockKind::Protected { protection, handler } = blocks[id].kind {
                        if handler <= i {
                            return Err(fail(insn, "handler starts before the end of its protected block".into()));
                        }
                        pending.push((handler, protection));
                    }
                }
                Opcode::EndFinally => {
                    if !matches!(blocks[here].kind, BlockKind::Handler { .. }) {
                        return Err(fail(insn, "END_FINALLY outside a handler".into()));
                    }
                    blocks[here].end = i + 1;
                    open.pop();
                }
                _ => {}
            }
        }

        if open.len() > 1 || !pending.is_empty() {
            let last = insns.last().copied().unwrap_or(Instruction {
                offset: 0,
                size: 0,
                opcode: Opcode::Nop,
                arg: None,
            });
            return Err(fail(&last, format!("{} block(s) left open", open.len() - 1 + pending.len())));
        }

        Ok(Self { insns, blocks, targets, owner })
    }

    /// Chaîne des blocs englobant `index`, du plus interne à la routine.
    pub fn ancestors(&self, index: usize) -> impl Iterator<Item = usize> + '_ {
        let mut next = self.owner.get(index).copied();
        std::iter::from_fn(move || {
            let id = next?;
            next = self.blocks[id].parent;
            Some(id)
        })
    }

    /// Bloc handler commençant à `index`, s'il existe.
    pub fn handler_at(&self, index: usize) -> Option<usize> {
        self.blocks
            .iter()
            .position(|b| b.first == index && matches!(b.kind, BlockKind::Handler { .. }))
    }

    /// Rendu indenté, un bloc ou une instruction par ligne.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        self.dump_block(0, 0, &mut out);
        out
    }

    fn dump_block(&self, id: usize, indent: usize, out: &mut String) {
        let pad = "  ".repeat(indent);
        let offset = |i: usize| self.insns.get(i).map_or(0, |insn| insn.offset);
        let block = &self.blocks[id];
        let _ = match block.kind {
            BlockKind::Routine => writeln!(out, "{pad}routine"),
            BlockKind::Loop { exit } => writeln!(out, "{pad}loop exit=@{}", offset(exit)),
            BlockKind::Protected { protection, handler } => {
                writeln!(out, "{pad}protected {} handler=@{}", protection.label(), offset(handler))
            }
            BlockKind::Handler { protection } => writeln!(out, "{pad}handler {}", protection.label()),
        };
        for item in &block.items {
            match *item {
                Item::Insn(i) => {
                    let insn = &self.insns[i];
                    let _ = match insn.arg {
                        Some(arg) => writeln!(out, "{pad}  {:>5} {} {arg}", insn.offset, insn.opcode),
                        None => writeln!(out, "{pad}  {:>5} {}", insn.offset, insn.opcode),
                    };
                }
                Item::Block(child) => self.dump_block(child, indent + 1, out),
            }
        }
    }
}

impl fmt::Display for Malformation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}: {}", self.opcode, self.offset, self.reason)
    }
}

fn current(open: &[usize]) -> usize { open.last().copied().unwrap_or(0) }

fn push_block(blocks: &mut Vec<Block>, parent: usize, kind: BlockKind, first: usize) -> usize {
    let id = blocks.len();
    blocks.push(Block { kind, parent: Some(parent), first, end: first, items: Vec::new() });
    blocks[parent].items.push(Item::Block(id));
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use javelin_pyc::{asm::assemble, decode};
    use pretty_assertions::assert_eq;

    fn tree(src: &str) -> Result<BlockTree, Malformation> {
        let code = assemble(src).unwrap();
        BlockTree::build(decode(&code.code).unwrap())
    }

    const TRY_EXCEPT: &str = "
.code <module>
.names E
    SETUP_EXCEPT handler
    LOAD_CONST None
    POP_TOP
    POP_BLOCK
    JUMP_FORWARD done
handler:
    POP_TOP
    POP_TOP
    POP_TOP
    POP_EXCEPT
    JUMP_FORWARD done
    END_FINALLY
done:
    LOAD_CONST None
    RETURN_VALUE
.end
";

    #[test]
    fn try_except_nests_protected_then_handler() {
        let t = tree(TRY_EXCEPT).unwrap();
        assert_eq!(t.blocks.len(), 3);
        assert_eq!(t.blocks[1].kind, BlockKind::Protected { protection: Protection::Except, handler: 5 });
        assert_eq!((t.blocks[1].first, t.blocks[1].end), (1, 4));
        assert_eq!(t.blocks[2].kind, BlockKind::Handler { protection: Protection::Except });
        assert_eq!((t.blocks[2].first, t.blocks[2].end), (5, 11));
        assert_eq!(t.owner[0], 0);
        assert_eq!(t.owner[4], 0);
        assert_eq!(t.owner[10], 2);
        assert_eq!(t.handler_at(5), Some(2));
        assert_eq!(t.ancestors(2).collect::<Vec<_>>(), vec![1, 0]);
    }

    #[test]
    fn dump_indents_children() {
        let dump = tree(TRY_EXCEPT).unwrap().dump();
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines[0], "routine");
        assert_eq!(lines[1], "      0 SETUP_EXCEPT 8");
        assert_eq!(lines[2], "  protected except handler=@11");
        assert!(lines.contains(&"  handler except"));
    }

    #[test]
    fn loops_close_on_pop_block() {
        let t = tree(
            "
.code <module>
.names x
    SETUP_LOOP out
top:
    LOAD_NAME x
    POP_JUMP_IF_FALSE exit
    JUMP_ABSOLUTE top
exit:
    POP_BLOCK
out:
    LOAD_CONST None
    RETURN_VALUE
.end
",
        )
        .unwrap();
        assert_eq!(t.blocks[1].kind, BlockKind::Loop { exit: 5 });
        assert_eq!((t.blocks[1].first, t.blocks[1].end), (1, 5));
        assert_eq!(t.targets[3], Some(1));
    }

    #[test]
    fn unbalanced_blocks_are_malformed() {
        let stray = tree(".code <module>\n    POP_BLOCK\n    LOAD_CONST None\n    RETURN_VALUE\n.end\n").unwrap_err();
        assert_eq!(stray.opcode, Opcode::PopBlock);

        let open = tree(
            ".code <module>\n    SETUP_LOOP out\n    LOAD_CONST None\n    POP_TOP\nout:\n    LOAD_CONST None\n    RETURN_VALUE\n.end\n",
        )
        .unwrap_err();
        assert!(open.reason.contains("left open"), "{open}");

        let end = tree(".code <module>\n    LOAD_CONST None\n    END_FINALLY\n.end\n").unwrap_err();
        assert_eq!(end.opcode, Opcode::EndFinally);
    }
}
