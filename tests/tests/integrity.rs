//! Intégrité des attributs `Code` produits : pile, sauts, tables.

use std::collections::BTreeSet;

use javelin_classfile::{opcodes::decode, verify::check_class, ClassFile, Code};
use javelin_tests::{translate, PROGRAMS};

fn codes(class: &ClassFile) -> Vec<(String, &Code)> {
    class
        .methods
        .iter()
        .filter_map(|m| Some((class.member_name(m).ok()?.to_owned(), m.code()?)))
        .collect()
}

#[test]
fn declared_maximum_is_the_reached_depth() {
    for (name, src) in PROGRAMS {
        let out = translate(name, src);
        let reports = check_class(&out.class).unwrap_or_else(|e| panic!("{name}: {e}"));
        for (method, report) in reports {
            let code = out.class.method(&method).and_then(|m| m.code()).unwrap();
            assert_eq!(report.max_depth, code.max_stack, "{name}.{method}: {report:?}");
            assert!(report.reachable <= report.instructions);
        }
    }
}

#[test]
fn every_offset_lands_on_an_instruction() {
    for (name, src) in PROGRAMS {
        let out = translate(name, src);
        for (method, code) in codes(&out.class) {
            let insns = decode(&code.code).unwrap();
            let starts: BTreeSet<u32> = insns.iter().map(|i| i.pc).collect();
            let len = u32::try_from(code.code.len()).unwrap();
            for insn in &insns {
                for target in insn.targets() {
                    assert!(starts.contains(&target), "{name}.{method}: jump @{} -> {target}", insn.pc);
                }
            }
            for entry in &code.exception_table {
                assert!(entry.start_pc < entry.end_pc, "{name}.{method}: empty range {entry:?}");
                assert!(starts.contains(&u32::from(entry.start_pc)));
                assert!(u32::from(entry.end_pc) == len || starts.contains(&u32::from(entry.end_pc)));
                assert!(starts.contains(&u32::from(entry.handler_pc)));
            }
            for line in code.line_numbers() {
                assert!(starts.contains(&u32::from(line.start_pc)), "{name}.{method}: line {line:?}");
            }
        }
    }
}

#[test]
fn nested_routines_get_their_own_methods() {
    let out = translate("cleanup", javelin_tests::FINALLY_IN_FUNCTION);
    let names: BTreeSet<String> = codes(&out.class).into_iter().map(|(n, _)| n).collect();
    assert!(names.contains("first$1"), "{names:?}");
    let first = out.class.method("first$1").and_then(|m| m.code()).unwrap();
    assert_eq!(first.exception_table.len(), 1);
    assert_eq!(first.exception_table[0].catch_type, 0);
}
