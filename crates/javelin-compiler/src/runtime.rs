//! ABI du runtime Java visé par les classes produites.
//!
//! Toute valeur Python est une référence `org/python/Object` ; les
//! opérateurs passent par des méthodes d'interface (`__add__`, `toBoolean`...),
//! le reste par des statiques de `org/python/Builtins`.
//!
//! Contrats attendus du runtime :
//! - `__next__` rend `null` en fin d'itération (pas d'exception) ;
//! - `Builtins.withCleanup(exit, x)` traite `x == RETURNING` comme une sortie
//!   normale et rend `x` inchangé ; sur exception supprimée il rend `None` ;
//! - `Builtins.endFinally(x)` ignore `None` et relance une exception ;
//! - `reraise`, `raise`, `raiseFrom` et `reraiseCurrent` rendent l'exception à lever.

use javelin_pyc::Opcode;

/// Interface de toute valeur.
pub const OBJECT: &str = "org/python/Object";
/// Descripteur de champ d'une valeur.
pub const OBJECT_DESC: &str = "Lorg/python/Object;";
/// Statiques d'exécution.
pub const BUILTINS: &str = "org/python/Builtins";
/// Importeur.
pub const IMPORTLIB: &str = "org/python/ImportLib";
/// Racine des exceptions Python (sous-classe de `java/lang/RuntimeException`).
pub const BASE_EXCEPTION: &str = "org/python/exceptions/BaseException";

/// Dictionnaire global : champ statique de chaque classe de module.
pub const DICT_FIELD: &str = "__dict__";
/// Descripteur du dictionnaire global.
pub const MAP_DESC: &str = "Ljava/util/Map;";
/// Implémentation du dictionnaire global.
pub const HASH_MAP: &str = "java/util/HashMap";
/// Super-classe des classes de module.
pub const JAVA_OBJECT: &str = "java/lang/Object";

/// Types valeur du runtime.
pub mod types {
    /// `None` (champ `NONE`).
    pub const NONE_TYPE: &str = "org/python/types/NoneType";
    /// `bool` (champs `TRUE` / `FALSE`).
    pub const BOOL: &str = "org/python/types/Bool";
    /// `...` (champ `ELLIPSIS`).
    pub const ELLIPSIS: &str = "org/python/types/Ellipsis";
    /// `int` (`<init>(J)V`).
    pub const INT: &str = "org/python/types/Int";
    /// `float` (`<init>(D)V`).
    pub const FLOAT: &str = "org/python/types/Float";
    /// `str` (`<init>(Ljava/lang/String;)V`).
    pub const STR: &str = "org/python/types/Str";
    /// `bytes` (`<init>(Ljava/lang/String;)V`, un caractère latin-1 par octet).
    pub const BYTES: &str = "org/python/types/Bytes";
    /// `tuple`
    pub const TUPLE: &str = "org/python/types/Tuple";
    /// `list`
    pub const LIST: &str = "org/python/types/List";
    /// `set`
    pub const SET: &str = "org/python/types/Set";
    /// `frozenset`
    pub const FROZENSET: &str = "org/python/types/FrozenSet";
    /// `dict`
    pub const DICT: &str = "org/python/types/Dict";
    /// `slice`
    pub const SLICE: &str = "org/python/types/Slice";
    /// Objet code : désigne une méthode statique de la classe de module.
    pub const CODE: &str = "org/python/types/Code";
    /// Fonction (code + nom qualifié + défauts).
    pub const FUNCTION: &str = "org/python/types/Function";
}

/// `()O`
pub const UNARY_DESC: &str = "()Lorg/python/Object;";
/// `(O)O`
pub const BINARY_DESC: &str = "(Lorg/python/Object;)Lorg/python/Object;";
/// `(OO)O`
pub const BINARY_STATIC_DESC: &str = "(Lorg/python/Object;Lorg/python/Object;)Lorg/python/Object;";
/// `([O)V` : constructeur des conteneurs.
pub const ARRAY_INIT_DESC: &str = "([Lorg/python/Object;)V";
/// `([O[O)O` : appel avec positionnels et paires nom/valeur.
pub const CALL_DESC: &str = "([Lorg/python/Object;[Lorg/python/Object;)Lorg/python/Object;";
/// `([O)O` : signature des fonctions imbriquées.
pub const FUNCTION_DESC: &str = "([Lorg/python/Object;)Lorg/python/Object;";
/// `()O` : corps du module.
pub const MODULE_DESC: &str = "()Lorg/python/Object;";
/// Point d'entrée JVM.
pub const MAIN_DESC: &str = "([Ljava/lang/String;)V";
/// `Code(Class, method, name, argcount, kwonly, flags, varnames)`.
pub const CODE_INIT_DESC: &str =
    "(Ljava/lang/Class;Ljava/lang/String;Ljava/lang/String;IIILjava/lang/String;)V";
/// `Function(code, qualname, defaults)`.
pub const FUNCTION_INIT_DESC: &str = "(Lorg/python/Object;Lorg/python/Object;[Lorg/python/Object;)V";
/// `(String)V`
pub const STRING_INIT_DESC: &str = "(Ljava/lang/String;)V";

/// Statiques de `org/python/Builtins` : `(nom, descripteur)`.
pub mod builtins {
    /// Lecture d'un global (repli sur les builtins).
    pub const LOAD_GLOBAL: (&str, &str) =
        ("loadGlobal", "(Ljava/util/Map;Ljava/lang/String;)Lorg/python/Object;");
    /// Écriture d'un global : `(valeur, dict, nom)`.
    pub const STORE_GLOBAL: (&str, &str) =
        ("storeGlobal", "(Lorg/python/Object;Ljava/util/Map;Ljava/lang/String;)V");
    /// Suppression d'un global.
    pub const DELETE_GLOBAL: (&str, &str) = ("deleteGlobal", "(Ljava/util/Map;Ljava/lang/String;)V");
    /// `is`
    pub const IS: (&str, &str) = ("is", super::BINARY_STATIC_DESC);
    /// `is not`
    pub const IS_NOT: (&str, &str) = ("isNot", super::BINARY_STATIC_DESC);
    /// Filtrage d'un `except` : `(exception, type)`.
    pub const EXCEPTION_MATCHES: (&str, &str) = ("exceptionMatches", super::BINARY_STATIC_DESC);
    /// Dépaquetage en tableau de taille exacte.
    pub const UNPACK: (&str, &str) = ("unpack", "(Lorg/python/Object;I)[Lorg/python/Object;");
    /// `container[key] = value` : `(valeur, conteneur, clé)`.
    pub const SET_ITEM: (&str, &str) =
        ("setItem", "(Lorg/python/Object;Lorg/python/Object;Lorg/python/Object;)V");
    /// `STORE_MAP` : `(dict, valeur, clé)`, rend le dict.
    pub const STORE_MAP: (&str, &str) = (
        "storeMap",
        "(Lorg/python/Object;Lorg/python/Object;Lorg/python/Object;)Lorg/python/Object;",
    );
    /// `LIST_APPEND` : `(liste, valeur)`.
    pub const LIST_APPEND: (&str, &str) = ("listAppend", "(Lorg/python/Object;Lorg/python/Object;)V");
    /// `SET_ADD` : `(set, valeur)`.
    pub const SET_ADD: (&str, &str) = ("setAdd", "(Lorg/python/Object;Lorg/python/Object;)V");
    /// `MAP_ADD` : `(dict, valeur, clé)`.
    pub const MAP_ADD: (&str, &str) =
        ("mapAdd", "(Lorg/python/Object;Lorg/python/Object;Lorg/python/Object;)V");
    /// Méthode `__exit__` liée d'un gestionnaire de contexte.
    pub const WITH_EXIT: (&str, &str) = ("withExit", "(Lorg/python/Object;)Lorg/python/Object;");
    /// Appel de `__enter__`.
    pub const WITH_ENTER: (&str, &str) = ("withEnter", "(Lorg/python/Object;)Lorg/python/Object;");
    /// `WITH_CLEANUP` : `(exit, None|exception|RETURNING)`.
    pub const WITH_CLEANUP: (&str, &str) = ("withCleanup", super::BINARY_STATIC_DESC);
    /// Fin de `finally` : relance une exception, ignore `None`.
    pub const END_FINALLY: (&str, &str) = ("endFinally", "(Lorg/python/Object;)V");
    /// Relance depuis un handler `except` : `(traceback, valeur, type)`.
    pub const RERAISE: (&str, &str) = (
        "reraise",
        "(Lorg/python/Object;Lorg/python/Object;Lorg/python/Object;)Lorg/python/exceptions/BaseException;",
    );
    /// `raise exc`
    pub const RAISE: (&str, &str) = ("raise", "(Lorg/python/Object;)Lorg/python/exceptions/BaseException;");
    /// `raise exc from cause`
    pub const RAISE_FROM: (&str, &str) =
        ("raiseFrom", "(Lorg/python/Object;Lorg/python/Object;)Lorg/python/exceptions/BaseException;");
    /// `raise` nu.
    pub const RERAISE_CURRENT: (&str, &str) = ("reraiseCurrent", "()Lorg/python/exceptions/BaseException;");
    /// Restaure l'exception courante précédente.
    pub const POP_EXCEPT: (&str, &str) = ("popExcept", "()V");
    /// Traceback d'une exception.
    pub const TRACEBACK_OF: (&str, &str) = ("tracebackOf", "(Lorg/python/Object;)Lorg/python/Object;");
    /// Type d'une valeur.
    pub const TYPE_OF: (&str, &str) = ("typeOf", "(Lorg/python/Object;)Lorg/python/Object;");
    /// `sys.argv`
    pub const SET_ARGV: (&str, &str) = ("setArgv", "([Ljava/lang/String;)V");
}

/// Marqueur « retour en cours » traversant les `finally`.
pub const RETURNING: (&str, &str) = ("RETURNING", "Lorg/python/Object;");

/// Conversion d'un `Throwable` attrapé en exception Python.
pub const FROM_THROWABLE: (&str, &str) = ("fromThrowable", "(Ljava/lang/Throwable;)Lorg/python/Object;");

/// `ImportLib.importName(level, fromlist, name)`.
pub const IMPORT_NAME: (&str, &str) = (
    "importName",
    "(Lorg/python/Object;Lorg/python/Object;Ljava/lang/String;)Lorg/python/Object;",
);

/// Booléen JVM → `Bool`.
pub const BOOL_VALUE_OF: (&str, &str) = ("valueOf", "(Z)Lorg/python/Object;");

/// Méthode d'interface d'un opérateur binaire.
pub const fn binary_method(op: Opcode) -> Option<&'static str> {
    use Opcode::*;
    Some(match op {
        BinaryPower => "__pow__",
        BinaryMultiply => "__mul__",
        BinaryModulo => "__mod__",
        BinaryAdd => "__add__",
        BinarySubtract => "__sub__",
        BinarySubscr => "__getitem__",
        BinaryFloorDivide => "__floordiv__",
        BinaryTrueDivide => "__truediv__",
        BinaryLshift => "__lshift__",
        BinaryRshift => "__rshift__",
        BinaryAnd => "__and__",
        BinaryXor => "__xor__",
        BinaryOr => "__or__",
        InplacePower => "__ipow__",
        InplaceMultiply => "__imul__",
        InplaceModulo => "__imod__",
        InplaceAdd => "__iadd__",
        InplaceSubtract => "__isub__",
        InplaceFloorDivide => "__ifloordiv__",
        InplaceTrueDivide => "__itruediv__",
        InplaceLshift => "__ilshift__",
        InplaceRshift => "__irshift__",
        InplaceAnd => "__iand__",
        InplaceXor => "__ixor__",
        InplaceOr => "__ior__",
        _ => return None,
    })
}

/// Méthode d'interface d'un opérateur unaire (hors `not`).
pub const fn unary_method(op: Opcode) -> Option<&'static str> {
    match op {
        Opcode::UnaryPositive => Some("__pos__"),
        Opcode::UnaryNegative => Some("__neg__"),
        Opcode::UnaryInvert => Some("__invert__"),
        _ => None,
    }
}

/// Comparaisons riches `COMPARE_OP 0..=5`.
pub const RICH_COMPARE: [&str; 6] = ["__lt__", "__le__", "__eq__", "__ne__", "__gt__", "__ge__"];

/// Caractères hors `[A-Za-z0-9_]` remplacés par `_` (`<lambda>` → `_lambda_`).
pub fn sanitize(name: &str) -> String {
    name.chars().map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' }).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use javelin_classfile::descriptor::method_shape;

    #[test]
    fn descriptors_parse() {
        for (_, desc) in [
            builtins::LOAD_GLOBAL,
            builtins::STORE_GLOBAL,
            builtins::UNPACK,
            builtins::STORE_MAP,
            builtins::RERAISE,
            builtins::SET_ARGV,
            FROM_THROWABLE,
            IMPORT_NAME,
            BOOL_VALUE_OF,
        ] {
            assert!(method_shape(desc).is_ok(), "{desc}");
        }
        assert!(method_shape(CODE_INIT_DESC).is_ok());
        assert!(method_shape(CALL_DESC).is_ok());
    }

    #[test]
    fn operators_cover_binary_family() {
        assert_eq!(binary_method(Opcode::BinaryAdd), Some("__add__"));
        assert_eq!(binary_method(Opcode::InplaceOr), Some("__ior__"));
        assert_eq!(binary_method(Opcode::UnaryNot), None);
        assert_eq!(sanitize("<lambda>"), "_lambda_");
    }
}
