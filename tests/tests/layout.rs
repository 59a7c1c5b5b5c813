//! Disposition des classes écrites sur disque et chargement transitif.

use std::fs;

use javelin_compiler::{write_all, PathLoader, TranspileOptions, Transpiler};
use javelin_tests::{unit, ADD, CAUGHT};
use pretty_assertions::assert_eq;

#[test]
fn classes_land_under_the_namespace() {
    let dir = tempfile::tempdir().unwrap();
    let mut t = Transpiler::new(TranspileOptions { namespace: "org.demo".into(), ..TranspileOptions::default() });
    t.add_unit(unit("app", ADD)).unwrap();
    t.add_unit(unit("app.errors", CAUGHT)).unwrap();
    let outputs = t.transpile().unwrap();
    let written = write_all(dir.path(), &outputs).unwrap();

    let relative: Vec<String> = written
        .iter()
        .map(|p| p.strip_prefix(dir.path()).unwrap().to_string_lossy().replace('\\', "/"))
        .collect();
    assert_eq!(relative, vec!["org/demo/app/__init__.class", "org/demo/app/errors/__init__.class"]);
    for (out, path) in outputs.iter().zip(&written) {
        assert_eq!(fs::read(path).unwrap(), out.bytes);
    }
}

#[test]
fn loader_pulls_in_package_imports() {
    let src = tempfile::tempdir().unwrap();
    fs::create_dir_all(src.path().join("shapes")).unwrap();
    fs::write(src.path().join("shapes/__init__.pyasm"), ADD.replace("add.py", "shapes/__init__.py")).unwrap();
    fs::write(src.path().join("shapes/circle.pyasm"), CAUGHT).unwrap();

    let main = "
.code <module>
.filename main.py
    LOAD_CONST 0
    LOAD_CONST None
    IMPORT_NAME shapes.circle
    STORE_NAME shapes
    LOAD_CONST 0
    LOAD_CONST None
    IMPORT_NAME missing
    STORE_NAME missing
    LOAD_CONST None
    RETURN_VALUE
.end
";
    let loader = PathLoader::new([src.path().to_path_buf()]);
    let mut t = Transpiler::new(TranspileOptions::default());
    t.add_with_dependencies(unit("main", main), &loader).unwrap();
    let names: Vec<&str> = t.units().map(|u| u.name.as_str()).collect();
    assert_eq!(names, vec!["main", "shapes", "shapes.circle"]);

    let out = tempfile::tempdir().unwrap();
    let written = write_all(out.path(), &t.transpile().unwrap()).unwrap();
    assert_eq!(written.len(), 3);
    assert!(out.path().join("python/shapes/circle/__init__.class").is_file());
}
