//! Données d'échantillon et extraits d'opérations.
//!
//! Chaque générateur produit des `Case` : un nom stable (`add_int`), un
//! extrait Python prêt pour `adjust` et un message de contexte pour les
//! assertions.

/// Littéraux Python par type.
pub const SAMPLE_DATA: &[(&str, &[&str])] = &[
    ("bool", &["True", "False"]),
    ("bytes", &["b''", "b'This is another string of bytes'"]),
    ("dict", &["{}", "{'a': 1, 'c': 2.3456, 'd': 'another'}"]),
    ("float", &["2.3456", "0.0", "-3.14159"]),
    ("int", &["3", "0", "-5"]),
    ("list", &["[]", "[3, 4, 5]"]),
    ("set", &["set()", "{1, 2.3456, 'another'}"]),
    ("str", &["\"\"", "\"This is another string\""]),
    ("tuple", &["(1, 2.3456, 'another')"]),
    ("none", &["None"]),
];

/// Types écartés des tests de fonctions builtin.
pub const BUILTIN_EXCLUDED: &[&str] = &["set", "frozenset", "dict"];

/// Opérateurs unaires (`not` garde son espace).
pub const UNARY: &[(&str, &str)] = &[("positive", "+"), ("negative", "-"), ("not", "not "), ("invert", "~")];

/// Opérations binaires, écrites sur `x` et `y`.
pub const BINARY: &[(&str, &str)] = &[
    ("add", "x + y"),
    ("subtract", "x - y"),
    ("multiply", "x * y"),
    ("floor_divide", "x // y"),
    ("true_divide", "x / y"),
    ("modulo", "x % y"),
    ("power", "x ** y"),
    ("subscr", "x[y]"),
    ("lshift", "x << y"),
    ("rshift", "x >> y"),
    ("and", "x & y"),
    ("xor", "x ^ y"),
    ("or", "x | y"),
    ("lt", "x < y"),
    ("le", "x <= y"),
    ("gt", "x > y"),
    ("ge", "x >= y"),
    ("eq", "x == y"),
    ("ne", "x != y"),
];

/// Affectations augmentées.
pub const INPLACE: &[(&str, &str)] = &[
    ("add", "x += y"),
    ("subtract", "x -= y"),
    ("multiply", "x *= y"),
    ("floor_divide", "x //= y"),
    ("true_divide", "x /= y"),
    ("modulo", "x %= y"),
    ("power", "x **= y"),
    ("lshift", "x <<= y"),
    ("rshift", "x >>= y"),
    ("and", "x &= y"),
    ("xor", "x ^= y"),
    ("or", "x |= y"),
];

/// Un extrait généré.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Case {
    /// Nom du test (`add_int`, `positive`, `int_str`…).
    pub name: String,
    /// Source Python.
    pub source: String,
    /// Contexte affiché en cas d'échec.
    pub message: String,
}

fn samples(datatype: &str) -> &'static [&'static str] {
    SAMPLE_DATA.iter().find(|(name, _)| *name == datatype).map_or(&[], |(_, values)| *values)
}

/// `x = <valeur>` puis `print(<format><op>x)`, pour chaque opérateur et valeur.
pub fn unary_cases(values: &[&str], format: &str) -> Vec<Case> {
    let mut cases = Vec::new();
    for (name, op) in UNARY {
        for x in values {
            cases.push(Case {
                name: format!("unary_{name}"),
                source: format!("x = {x}\nprint({format}{op}x)\n"),
                message: format!("Error running {op}x with x={x}"),
            });
        }
    }
    cases
}

/// Chaque opération binaire de `x ∈ values` avec chaque `y` d'échantillon.
pub fn binary_cases(values: &[&str], format: &str) -> Vec<Case> {
    let mut cases = Vec::new();
    for (datatype, examples) in SAMPLE_DATA {
        for (name, op) in BINARY {
            for x in values {
                for y in *examples {
                    cases.push(Case {
                        name: format!("{name}_{datatype}"),
                        source: format!("x = {x}\ny = {y}\nprint({format}{op})\n"),
                        message: format!("Error running {op} with x={x} and y={y}"),
                    });
                }
            }
        }
    }
    cases
}

/// Comme `binary_cases`, avec l'affectation augmentée puis `print(x)`.
pub fn inplace_cases(values: &[&str], format: &str) -> Vec<Case> {
    let mut cases = Vec::new();
    for (datatype, examples) in SAMPLE_DATA {
        for (name, op) in INPLACE {
            for x in values {
                for y in *examples {
                    cases.push(Case {
                        name: format!("{name}_{datatype}"),
                        source: format!("x = {x}\ny = {y}\n{op}\nprint({format}x)\n"),
                        message: format!("Error running {op} with x={x} and y={y}"),
                    });
                }
            }
        }
    }
    cases
}

/// `f(x)` pour chaque fonction et chaque valeur des types admis.
pub fn builtin_cases(functions: &[&str], format: &str) -> Vec<Case> {
    let mut cases = Vec::new();
    for (datatype, examples) in SAMPLE_DATA.iter().filter(|(t, _)| !BUILTIN_EXCLUDED.contains(t)) {
        for f in functions {
            for x in *examples {
                cases.push(Case {
                    name: (*datatype).to_owned(),
                    source: format!("f = {f}\nx = {x}\nprint({format}f(x))\n"),
                    message: format!("Error running f(x) with f={f}, x={x}"),
                });
            }
        }
    }
    cases
}

/// `f(x, y)` sur le produit des types admis.
pub fn builtin_twoarg_cases(functions: &[&str], format: &str) -> Vec<Case> {
    let admitted: Vec<&str> =
        SAMPLE_DATA.iter().map(|(t, _)| *t).filter(|t| !BUILTIN_EXCLUDED.contains(t)).collect();
    let mut cases = Vec::new();
    for first in &admitted {
        for second in &admitted {
            for f in functions {
                for x in samples(first) {
                    for y in samples(second) {
                        cases.push(Case {
                            name: format!("{first}_{second}"),
                            source: format!("f = {f}\nx = {x}\ny = {y}\nprint({format}f(x, y))\n"),
                            message: format!("Error running f(x, y) with f={f}, x={x} and y={y}"),
                        });
                    }
                }
            }
        }
    }
    cases
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn unary_snippet_shape() {
        let cases = unary_cases(samples("int"), "");
        assert_eq!(cases.len(), 4 * 3);
        assert_eq!(cases[6].source, "x = 3\nprint(not x)\n");
        assert_eq!(cases[6].name, "unary_not");
    }

    #[test]
    fn binary_covers_every_sample() {
        let total: usize = SAMPLE_DATA.iter().map(|(_, v)| v.len()).sum();
        let cases = binary_cases(&["3"], "");
        assert_eq!(cases.len(), BINARY.len() * total);
        let first = &cases[0];
        assert_eq!(first.name, "add_bool");
        assert_eq!(first.source, "x = 3\ny = True\nprint(x + y)\n");
        assert_eq!(first.message, "Error running x + y with x=3 and y=True");
    }

    #[test]
    fn inplace_prints_the_target() {
        let cases = inplace_cases(&["[]"], "repr");
        assert!(cases.iter().all(|c| c.source.ends_with("print(reprx)\n")));
        assert!(!cases.iter().any(|c| c.name.starts_with("subscr") || c.name.starts_with("lt")));
    }

    #[test]
    fn builtins_skip_set_and_dict_samples() {
        let names: Vec<String> = builtin_cases(&["len"], "").into_iter().map(|c| c.name).collect();
        assert!(!names.iter().any(|n| n == "set" || n == "dict"));
        assert!(names.iter().any(|n| n == "tuple"));

        let pairs = builtin_twoarg_cases(&["max"], "");
        let kept: usize =
            SAMPLE_DATA.iter().filter(|(t, _)| !BUILTIN_EXCLUDED.contains(t)).map(|(_, v)| v.len()).sum();
        assert_eq!(pairs.len(), kept * kept);
        assert_eq!(pairs[0].source, "f = max\nx = True\ny = True\nprint(f(x, y))\n");
    }
}
