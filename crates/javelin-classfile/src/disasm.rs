//! Rendu texte d'un class file, proche de `javap -c -l`.

use std::fmt::Write as _;

use crate::{
    class::{AttributeInfo, Code, Member},
    opcodes::{self, decode, Operand},
    ClassFile, ConstantPool, Result,
};

/// Désassemble une classe complète.
pub fn disassemble(class: &ClassFile) -> Result<String> {
    let pool = &class.constant_pool;
    let mut out = String::new();
    let _ = writeln!(out, "class {} extends {}", class.name()?, super_name(class)?);
    let _ = writeln!(out, "  version {}.{}", class.major_version, class.minor_version);
    if let Some(file) = class.source_file() {
        let _ = writeln!(out, "  source {file}");
    }
    for f in &class.fields {
        let _ = writeln!(out, "  field {}", signature(pool, f)?);
    }
    for m in &class.methods {
        let _ = writeln!(out);
        let _ = writeln!(out, "  method {} [{:?}]", signature(pool, m)?, m.access_flags);
        if let Some(code) = m.code() {
            out.push_str(&disassemble_code(code, pool)?);
        }
    }
    Ok(out)
}

fn super_name(class: &ClassFile) -> Result<&str> {
    if class.super_class == 0 {
        Ok("-")
    } else {
        class.constant_pool.class_name_at(class.super_class)
    }
}

fn signature(pool: &ConstantPool, m: &Member) -> Result<String> {
    Ok(format!("{}{}", pool.utf8_at(m.name_index)?, pool.utf8_at(m.descriptor_index)?))
}

/// Désassemble un attribut `Code` (instructions, exceptions, lignes).
pub fn disassemble_code(code: &Code, pool: &ConstantPool) -> Result<String> {
    let mut out = String::new();
    let _ = writeln!(out, "    stack={} locals={} length={}", code.max_stack, code.max_locals, code.code.len());
    for insn in decode(&code.code)? {
        let name = opcodes::name(insn.opcode);
        let prefix = if insn.wide { "wide " } else { "" };
        let operand = match &insn.operand {
            Operand::None => String::new(),
            Operand::Imm(v) => format!(" {v}"),
            Operand::Local(slot) => format!(" {slot}"),
            Operand::Const(i) => format!(" #{i}  // {}", pool.describe(*i)?),
            Operand::Target(t) => format!(" {t}"),
            Operand::Iinc { local, delta } => format!(" {local}, {delta}"),
            Operand::Interface { index, count } => format!(" #{index}, {count}  // {}", pool.describe(*index)?),
            Operand::MultiArray { index, dims } => format!(" #{index}, {dims}  // {}", pool.describe(*index)?),
            Operand::Switch { default, cases } => {
                let mut s = String::from(" {");
                for (key, target) in cases {
                    let _ = write!(s, " {key}: {target};");
                }
                let _ = write!(s, " default: {default} }}");
                s
            }
        };
        let _ = writeln!(out, "    {:>5}: {prefix}{name}{operand}", insn.pc);
    }
    if !code.exception_table.is_empty() {
        let _ = writeln!(out, "    exceptions:");
        for e in &code.exception_table {
            let catch = if e.catch_type == 0 { "any".to_owned() } else { pool.class_name_at(e.catch_type)?.to_owned() };
            let _ = writeln!(out, "      [{}, {}) -> {} {catch}", e.start_pc, e.end_pc, e.handler_pc);
        }
    }
    for a in &code.attributes {
        if let AttributeInfo::LineNumberTable(lines) = &a.info {
            let _ = writeln!(out, "    lines:");
            for l in lines {
                let _ = writeln!(out, "      line {}: {}", l.line_number, l.start_pc);
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{opcodes::op, ClassAccess, ClassBuilder, CodeBuilder, MemberAccess};

    #[test]
    fn listing_names_members_and_constants() -> Result<()> {
        let mut cb = ClassBuilder::new("demo/Hello", "java/lang/Object", ClassAccess::PUBLIC | ClassAccess::SUPER)?;
        let mut code = CodeBuilder::new(1);
        code.mark_line(7);
        let s = cb.pool().string("hi")?;
        code.ldc(s)?;
        code.op(op::ARETURN)?;
        let code = code.finish(cb.pool(), true)?;
        cb.add_method(MemberAccess::PUBLIC | MemberAccess::STATIC, "greet", "(Ljava/lang/Object;)Ljava/lang/Object;", code)?;
        cb.set_source_file("hello.py")?;
        let text = disassemble(&cb.build())?;
        assert!(text.contains("class demo/Hello extends java/lang/Object"), "{text}");
        assert!(text.contains("greet(Ljava/lang/Object;)Ljava/lang/Object;"));
        assert!(text.contains("ldc #"));
        assert!(text.contains("\"hi\""));
        assert!(text.contains("line 7: 0"));
        assert!(text.contains("source hello.py"));
        Ok(())
    }
}
