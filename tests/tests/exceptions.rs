//! Routage des exceptions et équivalence des sorties normalisées.

use javelin_classfile::{
    opcodes::{decode, Operand},
    ClassFile, Code,
};
use javelin_compiler::runtime;
use javelin_harness::{cases::binary_cases, cleanse_java, cleanse_python, Suite};
use javelin_classfile::verify::check_class;
use javelin_tests::{translate, ADD, CAUGHT, DIVIDE_BY_ZERO, EXCEPT_AS, LOOP_IN_TRY, NESTED_TRY, WITH_RETURN};
use pretty_assertions::assert_eq;

fn module_code(class: &ClassFile) -> &Code { class.method("module").and_then(|m| m.code()).unwrap() }

#[test]
fn handler_region_covers_the_division() {
    let out = translate("caught", CAUGHT);
    let code = module_code(&out.class);
    assert_eq!(code.exception_table.len(), 1);
    let entry = code.exception_table[0];
    let catch = out.class.constant_pool.class_name_at(entry.catch_type).unwrap();
    assert_eq!(catch, runtime::BASE_EXCEPTION);

    let divide = out
        .class
        .constant_pool
        .iter()
        .find_map(|(i, _)| {
            let (_, name, _) = out.class.constant_pool.member_at(i).ok()?;
            (name == "__truediv__").then_some(i)
        })
        .expect("division method referenced");
    let call_pc = decode(&code.code)
        .unwrap()
        .into_iter()
        .find(|insn| match insn.operand {
            Operand::Const(i) | Operand::Interface { index: i, .. } => i == divide,
            _ => false,
        })
        .map(|insn| insn.pc)
        .expect("division call emitted");
    assert!(u32::from(entry.start_pc) <= call_pc && call_pc < u32::from(entry.end_pc));
    assert!(entry.handler_pc >= entry.end_pc);
}

#[test]
fn unprotected_code_has_no_handlers() {
    let out = translate("boom", DIVIDE_BY_ZERO);
    assert!(module_code(&out.class).exception_table.is_empty());
}

#[test]
fn inner_handlers_are_listed_first() {
    let out = translate("nested", NESTED_TRY);
    let table = &module_code(&out.class).exception_table;
    assert_eq!(table.len(), 2);
    for entry in table {
        assert_eq!(out.class.constant_pool.class_name_at(entry.catch_type).unwrap(), runtime::BASE_EXCEPTION);
    }
    let (inner, outer) = (table[0], table[1]);
    assert!(outer.start_pc <= inner.start_pc && inner.end_pc <= outer.end_pc, "{table:?}");
    assert!(inner.end_pc < outer.end_pc);
    assert!(inner.handler_pc < outer.handler_pc);
    // le handler interne est lui-même protégé par le try externe
    assert!(inner.handler_pc >= outer.start_pc && inner.handler_pc < outer.end_pc);
}

#[test]
fn named_exception_is_cleared_by_a_catch_all() {
    let out = translate("named", EXCEPT_AS);
    let table = &module_code(&out.class).exception_table;
    assert_eq!(table.len(), 2, "{table:?}");
    let (except, cleanup) = (table[0], table[1]);
    assert_eq!(out.class.constant_pool.class_name_at(except.catch_type).unwrap(), runtime::BASE_EXCEPTION);
    assert_eq!(cleanup.catch_type, 0);
    assert!(cleanup.start_pc >= except.handler_pc);
    assert!(cleanup.handler_pc > cleanup.start_pc);
}

#[test]
fn return_inside_with_runs_the_exit() {
    let out = translate("managed", WITH_RETURN);
    assert!(module_code(&out.class).exception_table.is_empty());
    let body = out.class.method("use$1").and_then(|m| m.code()).unwrap();
    assert_eq!(body.exception_table.len(), 1);
    assert_eq!(body.exception_table[0].catch_type, 0);
    check_class(&out.class).unwrap();
}

#[test]
fn loop_jumps_leave_the_protected_body() {
    let out = translate("looping", LOOP_IN_TRY);
    let code = module_code(&out.class);
    assert_eq!(code.exception_table.len(), 1);
    let entry = code.exception_table[0];
    // la boucle remonte avant la région : au moins un saut arrière sort de la plage
    let leaves = decode(&code.code).unwrap().into_iter().any(|insn| {
        let inside = u32::from(entry.start_pc) <= insn.pc && insn.pc < u32::from(entry.end_pc);
        inside && insn.targets().into_iter().any(|t| t < u32::from(entry.start_pc))
    });
    assert!(leaves, "{entry:?}");
    check_class(&out.class).unwrap();
}

#[test]
fn division_reports_normalize_to_the_same_text() {
    let python = concat!(
        "Traceback (most recent call last):\r\n",
        "  File \"test.py\", line 1, in <module>\r\n",
        "    print(1 / 0)\r\n",
        "ZeroDivisionError: division by zero\r\n",
    );
    let java = concat!(
        "Exception in thread \"main\" org.python.exceptions.ZeroDivisionError: division by zero\n",
        "\tat org.python.types.Int.__truediv__(Int.java:210)\n",
        "\tat python.test.__init__.module(test.py:1)\n",
    );
    let expected = "### EXCEPTION ###\nZeroDivisionError: division by zero\n    test.py:1\n";
    assert_eq!(cleanse_python(python).unwrap(), expected);
    assert_eq!(cleanse_java(java).unwrap(), expected);
}

/// Exécution réelle : `JAVELIN_RUNTIME` désigne le jar du runtime.
#[test]
#[ignore = "needs a JVM and the runtime jar in JAVELIN_RUNTIME"]
fn translated_addition_prints_seven() {
    let Ok(jar) = std::env::var("JAVELIN_RUNTIME") else { return };
    let suite = Suite::prebuilt().with_runtime(jar);
    let out = translate("test", ADD);
    let printed = suite.run(&[out], &[]).unwrap();
    assert_eq!(cleanse_java(&printed).unwrap(), "7\n");
}

/// Extraits générés comparés à CPython 3.4 (`JAVELIN_PYTHON`, `python3` par défaut).
#[test]
#[ignore = "needs a JVM, CPython 3.4 and the runtime jar in JAVELIN_RUNTIME"]
fn generated_operations_match_python() {
    let Ok(jar) = std::env::var("JAVELIN_RUNTIME") else { return };
    let python = std::env::var("JAVELIN_PYTHON").unwrap_or_else(|_| "python3".into());
    let suite = Suite::prebuilt().with_runtime(jar).with_python(python);
    suite.assert_code_execution("\n    x = 3\n    print(x + 4)\n    ", true, true).unwrap();
    suite.assert_code_execution("try:\n    1 / 0\nexcept ZeroDivisionError as e:\n    print(e)\n", true, true).unwrap();
    suite.assert_cases(&binary_cases(&["3"], ""), true, false).unwrap();
}
