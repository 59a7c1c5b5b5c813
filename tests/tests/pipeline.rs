//! Aller-retour lecture/écriture, déterminisme et échecs d'unité.

use javelin_classfile::ClassFile;
use javelin_compiler::{TranspileError, TranspileOptions, Transpiler};
use javelin_tests::{translate, translate_with, unit, ADD, PROGRAMS};
use pretty_assertions::assert_eq;

#[test]
fn every_module_reads_back_identically() {
    for (name, src) in PROGRAMS {
        let out = translate(name, src);
        let back = ClassFile::from_bytes(&out.bytes).unwrap();
        assert_eq!(back, out.class, "{name}");
        assert_eq!(back.to_bytes().unwrap(), out.bytes, "{name}");
        assert_eq!((back.major_version, back.minor_version), (49, 0));
    }
}

#[test]
fn translation_is_byte_for_byte_repeatable() {
    for (name, src) in PROGRAMS {
        let first = translate(name, src);
        let second = translate(name, src);
        assert_eq!(first.bytes, second.bytes, "{name}");
    }
}

#[test]
fn parallel_run_matches_serial_run() {
    let build = |parallel| {
        let mut t = Transpiler::new(TranspileOptions { parallel, ..TranspileOptions::default() });
        for (name, src) in PROGRAMS {
            t.add_unit(unit(name, src)).unwrap();
        }
        t.transpile().unwrap().into_iter().map(|o| (o.unit, o.bytes)).collect::<Vec<_>>()
    };
    assert_eq!(build(true), build(false));
}

#[test]
fn options_shape_the_attributes() {
    let full = translate("add", ADD);
    let bare = translate_with(
        "add",
        ADD,
        TranspileOptions { emit_line_numbers: false, emit_source_file: false, ..TranspileOptions::default() },
    );
    assert_eq!(full.class.source_file(), Some("add.py"));
    assert_eq!(bare.class.source_file(), None);
    let lines = |c: &ClassFile| c.method("module").and_then(|m| m.code()).map(|code| code.line_numbers().len());
    assert_eq!(lines(&full.class), Some(2));
    assert_eq!(lines(&bare.class), Some(0));
    assert!(bare.bytes.len() < full.bytes.len());
}

#[test]
fn unsupported_opcode_fails_the_whole_unit() {
    let mut t = Transpiler::new(TranspileOptions::default());
    t.add_unit(unit("ok", ADD)).unwrap();
    t.add_unit(unit("gen", ".code <module>\n    LOAD_CONST None\n    YIELD_VALUE\n    RETURN_VALUE\n.end\n"))
        .unwrap();
    let err = t.transpile().unwrap_err();
    let TranspileError::Unit { unit, source } = &err else { panic!("unexpected error: {err}") };
    assert_eq!(unit, "gen");
    assert_eq!(source.routine(), Some("<module>"));
    let text = err.to_string();
    assert!(text.contains("YIELD_VALUE") && text.contains("gen"), "{text}");
}
