//! Propriétés sur des modules arithmétiques générés.

use javelin_classfile::{verify::check_class, ClassFile};
use javelin_tests::translate;
use proptest::prelude::*;

const OPS: &[&str] = &["BINARY_ADD", "BINARY_SUBTRACT", "BINARY_MULTIPLY", "BINARY_MODULO"];

fn program(values: &[u32], ops: &[usize], nested: bool) -> String {
    let mut src = String::from(".code <module>\n.filename gen.py\n");
    for (line, v) in values.iter().enumerate() {
        src.push_str(&format!(".line {}\n    LOAD_CONST {v}\n", line + 1));
        if line > 0 {
            src.push_str(&format!("    {}\n", OPS[ops[line - 1] % OPS.len()]));
        }
    }
    src.push_str("    STORE_NAME result\n");
    if nested {
        src.push_str("    LOAD_NAME result\n    POP_JUMP_IF_FALSE skip\n    LOAD_NAME print\n    LOAD_NAME result\n    CALL_FUNCTION 1\n    POP_TOP\nskip:\n");
    }
    src.push_str("    LOAD_CONST None\n    RETURN_VALUE\n.end\n");
    src
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn generated_modules_verify_and_round_trip(
        values in prop::collection::vec(0u32..100_000, 1..24),
        ops in prop::collection::vec(0usize..4, 24),
        nested in any::<bool>(),
    ) {
        let src = program(&values, &ops, nested);
        let out = translate("gen", &src);

        let reports = check_class(&out.class).unwrap();
        for (method, report) in &reports {
            let code = out.class.method(method).and_then(|m| m.code()).unwrap();
            prop_assert_eq!(report.max_depth, code.max_stack);
        }
        let module = out.class.method("module").and_then(|m| m.code()).unwrap();
        prop_assert_eq!(module.line_numbers().len(), values.len());

        let back = ClassFile::from_bytes(&out.bytes).unwrap();
        prop_assert_eq!(&back, &out.class);
        prop_assert_eq!(translate("gen", &src).bytes, out.bytes);
    }
}
