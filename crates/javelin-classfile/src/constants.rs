//! Table des constantes : dédupliquée, indexée, finalisable.
//!
//! Les entrées sont rangées dans l'ordre de première insertion. L'index 0 est
//! réservé et `Long`/`Double` occupent deux emplacements : la table garde donc
//! un vecteur d'emplacements (`None` pour les inutilisables) et une table de
//! recherche pour la déduplication.
//!
//! Deux façons d'insérer :
//! - les helpers typés (`utf8`, `class`, `method`, ...) insèrent d'abord leurs
//!   dépendances ; c'est ce qu'utilise la génération de code ;
//! - [`ConstantPool::insert`] prend une [`Constant`] déjà indexée et vérifie
//!   que chaque index référencé est résolu et du bon genre.

use std::collections::HashMap;

use crate::{mutf8, ClassFileError, Result};

/// Une entrée de la table, sous sa forme sérialisée (références par index).
///
/// Les flottants sont gardés en bits bruts : égalité et hachage restent
/// structurels (`-0.0` et `0.0` distincts, NaN conservés tels quels).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Constant {
    /// `CONSTANT_Utf8`
    Utf8(String),
    /// `CONSTANT_Integer`
    Integer(i32),
    /// `CONSTANT_Float` (bits)
    Float(u32),
    /// `CONSTANT_Long`
    Long(i64),
    /// `CONSTANT_Double` (bits)
    Double(u64),
    /// `CONSTANT_Class` → Utf8
    Class(u16),
    /// `CONSTANT_String` → Utf8
    String(u16),
    /// `CONSTANT_Fieldref`
    Fieldref {
        /// → Class
        class: u16,
        /// → NameAndType
        name_and_type: u16,
    },
    /// `CONSTANT_Methodref`
    Methodref {
        /// → Class
        class: u16,
        /// → NameAndType
        name_and_type: u16,
    },
    /// `CONSTANT_InterfaceMethodref`
    InterfaceMethodref {
        /// → Class
        class: u16,
        /// → NameAndType
        name_and_type: u16,
    },
    /// `CONSTANT_NameAndType`
    NameAndType {
        /// → Utf8
        name: u16,
        /// → Utf8
        descriptor: u16,
    },
}

impl Constant {
    /// Tag binaire.
    pub const fn tag(&self) -> u8 {
        match self {
            Self::Utf8(_) => 1,
            Self::Integer(_) => 3,
            Self::Float(_) => 4,
            Self::Long(_) => 5,
            Self::Double(_) => 6,
            Self::Class(_) => 7,
            Self::String(_) => 8,
            Self::Fieldref { .. } => 9,
            Self::Methodref { .. } => 10,
            Self::InterfaceMethodref { .. } => 11,
            Self::NameAndType { .. } => 12,
        }
    }

    /// Genre lisible, pour les erreurs et le désassemblage.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Utf8(_) => "Utf8",
            Self::Integer(_) => "Integer",
            Self::Float(_) => "Float",
            Self::Long(_) => "Long",
            Self::Double(_) => "Double",
            Self::Class(_) => "Class",
            Self::String(_) => "String",
            Self::Fieldref { .. } => "Fieldref",
            Self::Methodref { .. } => "Methodref",
            Self::InterfaceMethodref { .. } => "InterfaceMethodref",
            Self::NameAndType { .. } => "NameAndType",
        }
    }

    /// Emplacements occupés dans la table.
    pub const fn slots(&self) -> u16 {
        match self {
            Self::Long(_) | Self::Double(_) => 2,
            _ => 1,
        }
    }

    /// Couples `(index, genre attendu)` dont dépend l'entrée.
    fn references(&self) -> Vec<(u16, u8)> {
        match *self {
            Self::Class(n) | Self::String(n) => vec![(n, 1)],
            Self::Fieldref { class, name_and_type }
            | Self::Methodref { class, name_and_type }
            | Self::InterfaceMethodref { class, name_and_type } => {
                vec![(class, 7), (name_and_type, 12)]
            }
            Self::NameAndType { name, descriptor } => vec![(name, 1), (descriptor, 1)],
            _ => Vec::new(),
        }
    }
}

const fn kind_of_tag(tag: u8) -> &'static str {
    match tag {
        1 => "Utf8",
        7 => "Class",
        12 => "NameAndType",
        _ => "constant",
    }
}

/// Table des constantes d'un class file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstantPool {
    slots: Vec<Option<Constant>>,
    lookup: HashMap<Constant, u16>,
    finalized: bool,
}

impl Default for ConstantPool {
    fn default() -> Self { Self::new() }
}

impl ConstantPool {
    /// Table vide (emplacement 0 réservé).
    pub fn new() -> Self { Self { slots: vec![None], lookup: HashMap::new(), finalized: false } }

    /// `constant_pool_count` tel qu'écrit dans l'en-tête (emplacements + 1).
    pub fn count(&self) -> u16 {
        // slots.len() <= u16::MAX vérifié à chaque ajout
        u16::try_from(self.slots.len()).unwrap_or(u16::MAX)
    }

    /// Nombre d'entrées distinctes.
    pub fn len(&self) -> usize { self.slots.iter().filter(|s| s.is_some()).count() }

    /// Aucune entrée ?
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// `finalize` déjà appelé ?
    pub const fn is_finalized(&self) -> bool { self.finalized }

    /// Fige l'ordre des entrées ; toute insertion ultérieure échoue.
    pub fn finalize(&mut self) -> Vec<(u16, &Constant)> {
        self.finalized = true;
        self.iter().collect()
    }

    /// Parcourt `(index, entrée)` dans l'ordre de la table.
    pub fn iter(&self) -> impl Iterator<Item = (u16, &Constant)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.as_ref().map(|c| (i as u16, c)))
    }

    /// Entrée à `index`.
    pub fn get(&self, index: u16) -> Result<&Constant> {
        match self.slots.get(usize::from(index)) {
            Some(Some(c)) => Ok(c),
            Some(None) => Err(ClassFileError::UnresolvedConstant { index, expected: "usable" }),
            None => Err(ClassFileError::IndexOutOfRange { index, count: self.count() }),
        }
    }

    /// Index d'une entrée égale déjà présente.
    pub fn find(&self, constant: &Constant) -> Option<u16> { self.lookup.get(constant).copied() }

    /// Index d'une entrée Utf8 déjà présente.
    pub fn find_utf8(&self, s: &str) -> Option<u16> { self.find(&Constant::Utf8(s.to_owned())) }

    /* ───────────── insertion ───────────── */

    /// Insère une entrée déjà indexée. Idempotent ; échoue si la table est
    /// finalisée ou si un index référencé n'est pas une entrée résolue du
    /// genre attendu.
    pub fn insert(&mut self, constant: Constant) -> Result<u16> {
        if let Some(index) = self.find(&constant) {
            return Ok(index);
        }
        if self.finalized {
            return Err(ClassFileError::PoolFinalized(format!("{constant:?}")));
        }
        for (index, tag) in constant.references() {
            self.expect_tag(index, tag)?;
        }
        if let Constant::Utf8(s) = &constant {
            let len = mutf8::encode(s).len();
            if len > usize::from(u16::MAX) {
                return Err(ClassFileError::Utf8TooLong(len));
            }
        }
        let index = self.push_slot(constant.clone())?;
        self.lookup.insert(constant, index);
        Ok(index)
    }

    /// Ajoute une entrée telle que lue dans un fichier (sans déduplication ;
    /// références vérifiées ensuite par [`ConstantPool::check_references`]).
    pub fn push_raw(&mut self, constant: Constant) -> Result<u16> {
        if self.finalized {
            return Err(ClassFileError::PoolFinalized(format!("{constant:?}")));
        }
        let index = self.push_slot(constant.clone())?;
        self.lookup.entry(constant).or_insert(index);
        Ok(index)
    }

    /// Clôt une table remplie par `push_raw`.
    pub(crate) fn seal(&mut self) { self.finalized = true; }

    fn push_slot(&mut self, constant: Constant) -> Result<u16> {
        let index = self.count();
        let needed = self.slots.len() + usize::from(constant.slots());
        if needed > usize::from(u16::MAX) {
            return Err(ClassFileError::PoolOverflow);
        }
        let wide = constant.slots() == 2;
        self.slots.push(Some(constant));
        if wide {
            self.slots.push(None);
        }
        Ok(index)
    }

    fn expect_tag(&self, index: u16, tag: u8) -> Result<&Constant> {
        match self.slots.get(usize::from(index)) {
            Some(Some(c)) if c.tag() == tag => Ok(c),
            Some(_) => Err(ClassFileError::UnresolvedConstant { index, expected: kind_of_tag(tag) }),
            None => Err(ClassFileError::IndexOutOfRange { index, count: self.count() }),
        }
    }

    /// Vérifie toutes les références internes de la table.
    pub fn check_references(&self) -> Result<()> {
        for (_, c) in self.iter() {
            for (index, tag) in c.references() {
                self.expect_tag(index, tag)?;
            }
        }
        Ok(())
    }

    /* ───────────── typed helpers ───────────── */

    /// Entrée Utf8.
    pub fn utf8(&mut self, s: &str) -> Result<u16> { self.insert(Constant::Utf8(s.to_owned())) }

    /// Entrée Integer.
    pub fn integer(&mut self, v: i32) -> Result<u16> { self.insert(Constant::Integer(v)) }

    /// Entrée Float.
    pub fn float(&mut self, v: f32) -> Result<u16> { self.insert(Constant::Float(v.to_bits())) }

    /// Entrée Long (deux emplacements).
    pub fn long(&mut self, v: i64) -> Result<u16> { self.insert(Constant::Long(v)) }

    /// Entrée Double (deux emplacements).
    pub fn double(&mut self, v: f64) -> Result<u16> { self.insert(Constant::Double(v.to_bits())) }

    /// Entrée Class, par nom interne (`java/lang/Object`).
    pub fn class(&mut self, name: &str) -> Result<u16> {
        let n = self.utf8(name)?;
        self.insert(Constant::Class(n))
    }

    /// Entrée String.
    pub fn string(&mut self, s: &str) -> Result<u16> {
        let n = self.utf8(s)?;
        self.insert(Constant::String(n))
    }

    /// Entrée NameAndType.
    pub fn name_and_type(&mut self, name: &str, descriptor: &str) -> Result<u16> {
        let name = self.utf8(name)?;
        let descriptor = self.utf8(descriptor)?;
        self.insert(Constant::NameAndType { name, descriptor })
    }

    /// Entrée Fieldref.
    pub fn field(&mut self, class: &str, name: &str, descriptor: &str) -> Result<u16> {
        let class = self.class(class)?;
        let name_and_type = self.name_and_type(name, descriptor)?;
        self.insert(Constant::Fieldref { class, name_and_type })
    }

    /// Entrée Methodref.
    pub fn method(&mut self, class: &str, name: &str, descriptor: &str) -> Result<u16> {
        let class = self.class(class)?;
        let name_and_type = self.name_and_type(name, descriptor)?;
        self.insert(Constant::Methodref { class, name_and_type })
    }

    /// Entrée InterfaceMethodref.
    pub fn interface_method(&mut self, class: &str, name: &str, descriptor: &str) -> Result<u16> {
        let class = self.class(class)?;
        let name_and_type = self.name_and_type(name, descriptor)?;
        self.insert(Constant::InterfaceMethodref { class, name_and_type })
    }

    /* ───────────── typed lookups ───────────── */

    /// Texte d'une entrée Utf8.
    pub fn utf8_at(&self, index: u16) -> Result<&str> {
        match self.expect_tag(index, 1)? {
            Constant::Utf8(s) => Ok(s),
            _ => Err(ClassFileError::UnresolvedConstant { index, expected: "Utf8" }),
        }
    }

    /// Nom interne d'une entrée Class.
    pub fn class_name_at(&self, index: u16) -> Result<&str> {
        match self.expect_tag(index, 7)? {
            Constant::Class(n) => self.utf8_at(*n),
            _ => Err(ClassFileError::UnresolvedConstant { index, expected: "Class" }),
        }
    }

    /// `(classe, nom, descripteur)` d'une référence de champ ou de méthode.
    pub fn member_at(&self, index: u16) -> Result<(&str, &str, &str)> {
        match self.get(index)? {
            Constant::Fieldref { class, name_and_type }
            | Constant::Methodref { class, name_and_type }
            | Constant::InterfaceMethodref { class, name_and_type } => {
                let class = self.class_name_at(*class)?;
                let (name, descriptor) = self.name_and_type_at(*name_and_type)?;
                Ok((class, name, descriptor))
            }
            _ => Err(ClassFileError::UnresolvedConstant { index, expected: "member reference" }),
        }
    }

    /// `(nom, descripteur)` d'une entrée NameAndType.
    pub fn name_and_type_at(&self, index: u16) -> Result<(&str, &str)> {
        match self.expect_tag(index, 12)? {
            Constant::NameAndType { name, descriptor } => {
                Ok((self.utf8_at(*name)?, self.utf8_at(*descriptor)?))
            }
            _ => Err(ClassFileError::UnresolvedConstant { index, expected: "NameAndType" }),
        }
    }

    /// Rendu court d'une entrée (commentaires du désassemblage).
    pub fn describe(&self, index: u16) -> Result<String> {
        Ok(match self.get(index)? {
            Constant::Utf8(s) => s.clone(),
            Constant::Integer(v) => v.to_string(),
            Constant::Float(bits) => format!("{}f", f32::from_bits(*bits)),
            Constant::Long(v) => format!("{v}l"),
            Constant::Double(bits) => format!("{}d", f64::from_bits(*bits)),
            Constant::Class(_) => self.class_name_at(index)?.to_owned(),
            Constant::String(n) => format!("{:?}", self.utf8_at(*n)?),
            Constant::Fieldref { .. } | Constant::Methodref { .. } | Constant::InterfaceMethodref { .. } => {
                let (class, name, descriptor) = self.member_at(index)?;
                format!("{class}.{name}:{descriptor}")
            }
            Constant::NameAndType { .. } => {
                let (name, descriptor) = self.name_and_type_at(index)?;
                format!("{name}:{descriptor}")
            }
        })
    }
}

/* ───────────────────────────── Tests ───────────────────────────── */

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn dependencies_are_inserted_first() -> Result<()> {
        let mut pool = ConstantPool::new();
        let m = pool.method("java/lang/Object", "<init>", "()V")?;
        let order: Vec<&str> = pool.iter().map(|(_, c)| c.kind()).collect();
        assert_eq!(order, ["Utf8", "Class", "Utf8", "Utf8", "NameAndType", "Methodref"]);
        assert_eq!(m, 6);
        assert_eq!(pool.member_at(m)?, ("java/lang/Object", "<init>", "()V"));
        Ok(())
    }

    #[test]
    fn wide_entries_take_two_slots() -> Result<()> {
        let mut pool = ConstantPool::new();
        assert_eq!(pool.long(7)?, 1);
        assert_eq!(pool.utf8("x")?, 3);
        assert_eq!(pool.double(1.5)?, 4);
        assert_eq!(pool.count(), 6);
        assert!(matches!(pool.get(2), Err(ClassFileError::UnresolvedConstant { index: 2, .. })));
        Ok(())
    }

    #[test]
    fn late_insert_fails_but_lookup_still_works() -> Result<()> {
        let mut pool = ConstantPool::new();
        let s = pool.string("hello")?;
        let listed = pool.finalize().len();
        assert_eq!(listed, 2);
        // valeur égale déjà résolue : même index, rien ne change
        assert_eq!(pool.string("hello")?, s);
        assert!(matches!(pool.utf8("other"), Err(ClassFileError::PoolFinalized(_))));
        Ok(())
    }

    #[test]
    fn dangling_reference_is_rejected() {
        let mut pool = ConstantPool::new();
        let err = pool.insert(Constant::Class(9)).unwrap_err();
        assert!(err.is_constant_table() || matches!(err, ClassFileError::IndexOutOfRange { .. }));

        let mut pool = ConstantPool::new();
        let i = pool.integer(3).unwrap();
        let err = pool.insert(Constant::String(i)).unwrap_err();
        assert_eq!(err, ClassFileError::UnresolvedConstant { index: i, expected: "Utf8" });
    }

    #[test]
    fn float_identity_is_bitwise() -> Result<()> {
        let mut pool = ConstantPool::new();
        let a = pool.double(0.0)?;
        let b = pool.double(-0.0)?;
        assert_ne!(a, b);
        assert_eq!(pool.double(f64::NAN)?, pool.double(f64::NAN)?);
        Ok(())
    }

    proptest! {
        #[test]
        fn repeated_insertion_yields_one_entry(words in proptest::collection::vec("[a-z]{1,6}", 1..20), n in 1usize..8) {
            let mut pool = ConstantPool::new();
            let first: Vec<u16> = words.iter().map(|w| pool.string(w).unwrap()).collect();
            for _ in 0..n {
                for (w, idx) in words.iter().zip(&first) {
                    prop_assert_eq!(pool.string(w).unwrap(), *idx);
                }
            }
            let mut distinct = words.clone();
            distinct.sort();
            distinct.dedup();
            // un Utf8 + un String par mot distinct
            prop_assert_eq!(pool.len(), distinct.len() * 2);
        }
    }
}
