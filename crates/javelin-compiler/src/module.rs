//! Assemblage de la classe d'une unité.
//!
//! Une unité `a.b` devient la classe `<ns>/a/b/__init__` :
//! - champ statique `__dict__` (globals du module) ;
//! - `<clinit>` : crée le dictionnaire, y range `__name__` ;
//! - `main([String)V` : `sys.argv`, `__name__ = "__main__"`, corps du module ;
//! - `module()O` : corps traduit ;
//! - une méthode statique `nom$n` par objet code imbriqué (numérotation en profondeur).

use std::{collections::HashMap, path::Path};

use javelin_classfile::{
    opcodes::op, ClassAccess, ClassBuilder, ClassFile, CodeBuilder, InvokeKind, MemberAccess,
};
use javelin_pyc::{CodeObject, PyConst};
use tracing::debug;

use crate::{
    error::TranslateError,
    options::TranspileOptions,
    runtime::{self, builtins, types},
    translate::{translate, Routine, RoutineKind},
    transpiler::SourceUnit,
};

/// Nom interne de la classe d'une unité (`python` + `a.b` → `python/a/b/__init__`).
pub fn class_name(namespace: &str, unit: &str) -> String {
    let ns = namespace.trim_matches('/');
    let path = unit.replace('.', "/");
    if ns.is_empty() { format!("{path}/__init__") } else { format!("{ns}/{path}/__init__") }
}

struct Planned<'c> {
    method: String,
    code: &'c CodeObject,
    nested: HashMap<usize, String>,
}

/// Nomme les objets code imbriqués en profondeur ; rend la table de `code`.
fn plan<'c>(code: &'c CodeObject, counter: &mut usize, out: &mut Vec<Planned<'c>>) -> HashMap<usize, String> {
    let mut names = HashMap::new();
    for (index, constant) in code.consts.iter().enumerate() {
        if let PyConst::Code(inner) = constant {
            *counter += 1;
            let method = format!("{}${counter}", runtime::sanitize(&inner.name));
            let slot = out.len();
            out.push(Planned { method: method.clone(), code: inner, nested: HashMap::new() });
            out[slot].nested = plan(inner, counter, out);
            names.insert(index, method);
        }
    }
    names
}

/// Traduit une unité en class file complet.
pub fn build_module(unit: &SourceUnit, options: &TranspileOptions) -> Result<ClassFile, TranslateError> {
    let name = class_name(&options.namespace_path(), &unit.name);
    let mut class = ClassBuilder::new(&name, runtime::JAVA_OBJECT, ClassAccess::PUBLIC | ClassAccess::SUPER)?;
    let public_static = MemberAccess::PUBLIC | MemberAccess::STATIC;
    class.add_field(public_static, runtime::DICT_FIELD, runtime::MAP_DESC)?;

    let clinit = static_init(&mut class, &name, &unit.name)?;
    class.add_method(MemberAccess::STATIC, "<clinit>", "()V", clinit)?;
    let main = main_method(&mut class, &name)?;
    class.add_method(public_static, "main", runtime::MAIN_DESC, main)?;

    let mut planned = Vec::new();
    let top = plan(&unit.code, &mut 0, &mut planned);
    let body = Routine { code: &unit.code, kind: RoutineKind::Module, nested: top };
    let code = translate(&body, &name, class.pool(), options.emit_line_numbers)?;
    class.add_method(public_static, "module", runtime::MODULE_DESC, code)?;

    for p in planned {
        let routine = Routine { code: p.code, kind: RoutineKind::Function, nested: p.nested };
        let code = translate(&routine, &name, class.pool(), options.emit_line_numbers)?;
        class.add_method(public_static, &p.method, runtime::FUNCTION_DESC, code)?;
    }

    if options.emit_source_file {
        let file = Path::new(&unit.source_id)
            .file_name()
            .map_or_else(|| unit.source_id.clone(), |f| f.to_string_lossy().into_owned());
        class.set_source_file(&file)?;
    }
    debug!(unit = %unit.name, class = %name, "module assembled");
    Ok(class.build())
}

/// Empile `Str(text)`, le dictionnaire et la clé `__name__`, puis `storeGlobal`.
fn store_module_name(cb: &mut CodeBuilder, class: &mut ClassBuilder, this: &str, text: &str) -> Result<(), TranslateError> {
    let pool = class.pool();
    cb.type_insn(op::NEW, pool, types::STR)?;
    cb.op(op::DUP)?;
    let s = pool.string(text)?;
    cb.ldc(s)?;
    cb.invoke(InvokeKind::Special, pool, types::STR, "<init>", runtime::STRING_INIT_DESC)?;
    cb.field(op::GETSTATIC, pool, this, runtime::DICT_FIELD, runtime::MAP_DESC)?;
    let key = pool.string("__name__")?;
    cb.ldc(key)?;
    let (method, desc) = builtins::STORE_GLOBAL;
    cb.invoke(InvokeKind::Static, pool, runtime::BUILTINS, method, desc)?;
    Ok(())
}

fn static_init(class: &mut ClassBuilder, this: &str, unit: &str) -> Result<javelin_classfile::Code, TranslateError> {
    let mut cb = CodeBuilder::new(0);
    let pool = class.pool();
    cb.type_insn(op::NEW, pool, runtime::HASH_MAP)?;
    cb.op(op::DUP)?;
    cb.invoke(InvokeKind::Special, pool, runtime::HASH_MAP, "<init>", "()V")?;
    cb.field(op::PUTSTATIC, pool, this, runtime::DICT_FIELD, runtime::MAP_DESC)?;
    store_module_name(&mut cb, class, this, unit)?;
    cb.op(op::RETURN)?;
    Ok(cb.finish(class.pool(), false)?)
}

fn main_method(class: &mut ClassBuilder, this: &str) -> Result<javelin_classfile::Code, TranslateError> {
    let mut cb = CodeBuilder::new(1);
    cb.load(0)?;
    let (method, desc) = builtins::SET_ARGV;
    cb.invoke(InvokeKind::Static, class.pool(), runtime::BUILTINS, method, desc)?;
    store_module_name(&mut cb, class, this, "__main__")?;
    cb.invoke(InvokeKind::Static, class.pool(), this, "module", runtime::MODULE_DESC)?;
    cb.op(op::POP)?;
    cb.op(op::RETURN)?;
    Ok(cb.finish(class.pool(), false)?)
}
