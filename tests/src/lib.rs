//! Fixtures partagées des tests d'intégration : programmes `.pyasm` et
//! raccourcis de traduction.

#![allow(clippy::missing_panics_doc)]

use javelin_compiler::{SourceUnit, TranslatedUnit, TranspileOptions, Transpiler};
use javelin_pyc::asm::assemble;

/// `x = 3` puis `print(x + 4)`.
pub const ADD: &str = "
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

/// `print(1 / 0)` sans protection.
pub const DIVIDE_BY_ZERO: &str = "
.code <module>
.filename boom.py
.line 1
    LOAD_NAME print
    LOAD_CONST 1
    LOAD_CONST 0
    BINARY_TRUE_DIVIDE
    CALL_FUNCTION 1
    POP_TOP
    LOAD_CONST None
    RETURN_VALUE
.end
";

/// `try: 1 / 0` / `except ZeroDivisionError: print('caught')`.
pub const CAUGHT: &str = "
.code <module>
.filename caught.py
.line 1
    SETUP_EXCEPT handler
.line 2
    LOAD_CONST 1
    LOAD_CONST 0
    BINARY_TRUE_DIVIDE
    POP_TOP
    POP_BLOCK
    JUMP_FORWARD done
.line 3
handler:
    DUP_TOP
    LOAD_NAME ZeroDivisionError
    COMPARE_OP exception match
    POP_JUMP_IF_FALSE reraise
    POP_TOP
    POP_TOP
    POP_TOP
.line 4
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
";

/// Fonction dont le `return` traverse un `finally`, dans une boucle `for`.
pub const FINALLY_IN_FUNCTION: &str = "
.code <module>
.filename cleanup.py
    LOAD_CONST @first
    LOAD_CONST 'first'
    MAKE_FUNCTION 0
    STORE_NAME first
    SETUP_LOOP out
    LOAD_NAME range
    LOAD_CONST 3
    CALL_FUNCTION 1
    GET_ITER
top:
    FOR_ITER done
    STORE_NAME i
    LOAD_NAME print
    LOAD_NAME first
    LOAD_NAME i
    CALL_FUNCTION 1
    CALL_FUNCTION 1
    POP_TOP
    JUMP_ABSOLUTE top
done:
    POP_BLOCK
out:
    LOAD_CONST None
    RETURN_VALUE
.code first
.argcount 1
.varnames n
    SETUP_FINALLY cleanup
    LOAD_FAST n
    RETURN_VALUE
    POP_BLOCK
    LOAD_CONST None
cleanup:
    LOAD_GLOBAL print
    LOAD_CONST 'cleanup'
    CALL_FUNCTION 1
    POP_TOP
    END_FINALLY
    LOAD_CONST None
    RETURN_VALUE
.end
.end
";

/// `try` imbriqués : `ZeroDivisionError` dedans, `Exception` autour.
pub const NESTED_TRY: &str = "
.code <module>
.filename nested.py
.line 1
    SETUP_EXCEPT outer
.line 2
    SETUP_EXCEPT inner
.line 3
    LOAD_CONST 1
    LOAD_CONST 0
    BINARY_TRUE_DIVIDE
    POP_TOP
    POP_BLOCK
    JUMP_FORWARD inner_done
.line 4
inner:
    DUP_TOP
    LOAD_NAME ZeroDivisionError
    COMPARE_OP exception match
    POP_JUMP_IF_FALSE inner_reraise
    POP_TOP
    POP_TOP
    POP_TOP
.line 5
    LOAD_NAME print
    LOAD_CONST 'inner'
    CALL_FUNCTION 1
    POP_TOP
    POP_EXCEPT
    JUMP_FORWARD inner_done
inner_reraise:
    END_FINALLY
.line 6
inner_done:
    LOAD_NAME print
    LOAD_CONST 'after'
    CALL_FUNCTION 1
    POP_TOP
    POP_BLOCK
    JUMP_FORWARD done
.line 7
outer:
    DUP_TOP
    LOAD_NAME Exception
    COMPARE_OP exception match
    POP_JUMP_IF_FALSE outer_reraise
    POP_TOP
    POP_TOP
    POP_TOP
.line 8
    LOAD_NAME print
    LOAD_CONST 'outer'
    CALL_FUNCTION 1
    POP_TOP
    POP_EXCEPT
    JUMP_FORWARD done
outer_reraise:
    END_FINALLY
done:
    LOAD_CONST None
    RETURN_VALUE
.end
";

/// `except ZeroDivisionError as e: print(e)` : le nom est effacé par un `finally` interne.
pub const EXCEPT_AS: &str = "
.code <module>
.filename named.py
.line 1
    SETUP_EXCEPT handler
.line 2
    LOAD_CONST 1
    LOAD_CONST 0
    BINARY_TRUE_DIVIDE
    POP_TOP
    POP_BLOCK
    JUMP_FORWARD done
.line 3
handler:
    DUP_TOP
    LOAD_NAME ZeroDivisionError
    COMPARE_OP exception match
    POP_JUMP_IF_FALSE reraise
    POP_TOP
    STORE_NAME e
    POP_TOP
    SETUP_FINALLY cleanup
.line 4
    LOAD_NAME print
    LOAD_NAME e
    CALL_FUNCTION 1
    POP_TOP
    POP_BLOCK
    POP_EXCEPT
    LOAD_CONST None
cleanup:
    LOAD_CONST None
    STORE_NAME e
    DELETE_NAME e
    END_FINALLY
    JUMP_FORWARD done
reraise:
    END_FINALLY
done:
    LOAD_CONST None
    RETURN_VALUE
.end
";

/// `def use(ctx): with ctx as c: return c`, appelée une fois.
pub const WITH_RETURN: &str = "
.code <module>
.filename managed.py
    LOAD_CONST @use
    LOAD_CONST 'use'
    MAKE_FUNCTION 0
    STORE_NAME use
    LOAD_NAME print
    LOAD_NAME use
    LOAD_NAME open
    LOAD_CONST 'managed.py'
    CALL_FUNCTION 1
    CALL_FUNCTION 1
    CALL_FUNCTION 1
    POP_TOP
    LOAD_CONST None
    RETURN_VALUE
.code use
.argcount 1
.varnames ctx c
    LOAD_FAST ctx
    SETUP_WITH cleanup
    STORE_FAST c
    LOAD_FAST c
    RETURN_VALUE
    POP_BLOCK
    LOAD_CONST None
cleanup:
    WITH_CLEANUP
    END_FINALLY
    LOAD_CONST None
    RETURN_VALUE
.end
.end
";

/// Boucle `for` dont le corps est un `try` contenant `continue` et `break`.
pub const LOOP_IN_TRY: &str = "
.code <module>
.filename loop.py
    SETUP_LOOP out
    LOAD_NAME range
    LOAD_CONST 4
    CALL_FUNCTION 1
    GET_ITER
top:
    FOR_ITER done
    STORE_NAME i
    SETUP_EXCEPT handler
    LOAD_NAME i
    LOAD_CONST 1
    COMPARE_OP ==
    POP_JUMP_IF_FALSE not_one
    CONTINUE_LOOP top
not_one:
    LOAD_NAME i
    LOAD_CONST 3
    COMPARE_OP ==
    POP_JUMP_IF_FALSE not_three
    BREAK_LOOP
not_three:
    LOAD_NAME print
    LOAD_NAME i
    CALL_FUNCTION 1
    POP_TOP
    POP_BLOCK
    JUMP_FORWARD next
handler:
    DUP_TOP
    LOAD_NAME ZeroDivisionError
    COMPARE_OP exception match
    POP_JUMP_IF_FALSE reraise
    POP_TOP
    POP_TOP
    POP_TOP
    POP_EXCEPT
    JUMP_FORWARD next
reraise:
    END_FINALLY
next:
    JUMP_ABSOLUTE top
done:
    POP_BLOCK
out:
    LOAD_CONST None
    RETURN_VALUE
.end
";

/// Toutes les fixtures traduisibles, nommées.
pub const PROGRAMS: &[(&str, &str)] = &[
    ("add", ADD),
    ("boom", DIVIDE_BY_ZERO),
    ("caught", CAUGHT),
    ("cleanup", FINALLY_IN_FUNCTION),
    ("nested", NESTED_TRY),
    ("named", EXCEPT_AS),
    ("managed", WITH_RETURN),
    ("looping", LOOP_IN_TRY),
];

/// Unité `name` assemblée depuis `src`.
pub fn unit(name: &str, src: &str) -> SourceUnit {
    let code = assemble(src).expect("fixture assembles");
    SourceUnit::new(name, format!("{name}.py"), code)
}

/// Traduit une seule unité avec `options`.
pub fn translate_with(name: &str, src: &str, options: TranspileOptions) -> TranslatedUnit {
    let mut t = Transpiler::new(options);
    t.add_unit(unit(name, src)).expect("unit registered");
    t.transpile().expect("unit translates").remove(0)
}

/// Traduit une seule unité avec les options par défaut.
pub fn translate(name: &str, src: &str) -> TranslatedUnit { translate_with(name, src, TranspileOptions::default()) }
