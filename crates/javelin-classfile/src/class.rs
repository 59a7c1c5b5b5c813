//! Modèle logique d'un class file.
//!
//! Les attributs gardent l'index de leur nom dans la table des constantes :
//! une relecture reproduit exactement les index écrits, y compris pour des
//! fichiers produits ailleurs.

use bitflags::bitflags;

use crate::{ConstantPool, Result, MAJOR_VERSION, MINOR_VERSION};

bitflags! {
    /// Drapeaux d'accès d'une classe.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ClassAccess: u16 {
        /// `ACC_PUBLIC`
        const PUBLIC = 0x0001;
        /// `ACC_FINAL`
        const FINAL = 0x0010;
        /// `ACC_SUPER`
        const SUPER = 0x0020;
        /// `ACC_INTERFACE`
        const INTERFACE = 0x0200;
        /// `ACC_ABSTRACT`
        const ABSTRACT = 0x0400;
        /// `ACC_SYNTHETIC`
        const SYNTHETIC = 0x1000;
        /// `ACC_ANNOTATION`
        const ANNOTATION = 0x2000;
        /// `ACC_ENUM`
        const ENUM = 0x4000;
    }
}

bitflags! {
    /// Drapeaux d'accès d'un champ ou d'une méthode.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MemberAccess: u16 {
        /// `ACC_PUBLIC`
        const PUBLIC = 0x0001;
        /// `ACC_PRIVATE`
        const PRIVATE = 0x0002;
        /// `ACC_PROTECTED`
        const PROTECTED = 0x0004;
        /// `ACC_STATIC`
        const STATIC = 0x0008;
        /// `ACC_FINAL`
        const FINAL = 0x0010;
        /// `ACC_SYNCHRONIZED`
        const SYNCHRONIZED = 0x0020;
        /// `ACC_VOLATILE` / `ACC_BRIDGE`
        const VOLATILE = 0x0040;
        /// `ACC_TRANSIENT` / `ACC_VARARGS`
        const TRANSIENT = 0x0080;
        /// `ACC_NATIVE`
        const NATIVE = 0x0100;
        /// `ACC_ABSTRACT`
        const ABSTRACT = 0x0400;
        /// `ACC_STRICT`
        const STRICT = 0x0800;
        /// `ACC_SYNTHETIC`
        const SYNTHETIC = 0x1000;
        /// `ACC_ENUM`
        const ENUM = 0x4000;
    }
}

/// Entrée de la table d'exceptions d'un `Code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionEntry {
    /// Début (inclus) de la plage protégée.
    pub start_pc: u16,
    /// Fin (exclue) de la plage protégée.
    pub end_pc: u16,
    /// Point d'entrée du handler.
    pub handler_pc: u16,
    /// Classe attrapée (0 = tout).
    pub catch_type: u16,
}

/// Entrée de `LineNumberTable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineNumber {
    /// Offset de la première instruction de la ligne.
    pub start_pc: u16,
    /// Ligne source.
    pub line_number: u16,
}

/// Attribut `Code` d'une méthode.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Code {
    /// Profondeur maximale de pile (mots).
    pub max_stack: u16,
    /// Nombre d'emplacements locaux.
    pub max_locals: u16,
    /// Octets d'instructions.
    pub code: Vec<u8>,
    /// Table d'exceptions, dans l'ordre de consultation.
    pub exception_table: Vec<ExceptionEntry>,
    /// Attributs imbriqués (LineNumberTable...).
    pub attributes: Vec<Attribute>,
}

impl Code {
    /// Table des lignes, si présente.
    pub fn line_numbers(&self) -> &[LineNumber] {
        self.attributes
            .iter()
            .find_map(|a| match &a.info {
                AttributeInfo::LineNumberTable(lines) => Some(lines.as_slice()),
                _ => None,
            })
            .unwrap_or(&[])
    }
}

/// Contenu d'un attribut.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeInfo {
    /// `Code`
    Code(Code),
    /// `LineNumberTable`
    LineNumberTable(Vec<LineNumber>),
    /// `SourceFile` → Utf8
    SourceFile(u16),
    /// `Exceptions` → Class*
    Exceptions(Vec<u16>),
    /// Tout autre attribut, conservé tel quel.
    Raw(Vec<u8>),
}

/// Attribut : index du nom + contenu.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// → Utf8 (nom de l'attribut)
    pub name_index: u16,
    /// Contenu décodé.
    pub info: AttributeInfo,
}

/// Champ ou méthode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    /// Drapeaux d'accès.
    pub access_flags: MemberAccess,
    /// → Utf8
    pub name_index: u16,
    /// → Utf8
    pub descriptor_index: u16,
    /// Attributs.
    pub attributes: Vec<Attribute>,
}

impl Member {
    /// Attribut `Code`, si présent.
    pub fn code(&self) -> Option<&Code> {
        self.attributes.iter().find_map(|a| match &a.info {
            AttributeInfo::Code(code) => Some(code),
            _ => None,
        })
    }
}

/// Un class file complet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassFile {
    /// Version mineure.
    pub minor_version: u16,
    /// Version majeure.
    pub major_version: u16,
    /// Table des constantes (finalisée).
    pub constant_pool: ConstantPool,
    /// Drapeaux d'accès.
    pub access_flags: ClassAccess,
    /// → Class
    pub this_class: u16,
    /// → Class (0 pour `java/lang/Object` seulement)
    pub super_class: u16,
    /// → Class*
    pub interfaces: Vec<u16>,
    /// Champs.
    pub fields: Vec<Member>,
    /// Méthodes.
    pub methods: Vec<Member>,
    /// Attributs de classe.
    pub attributes: Vec<Attribute>,
}

impl ClassFile {
    /// Nom interne de la classe.
    pub fn name(&self) -> Result<&str> { self.constant_pool.class_name_at(self.this_class) }

    /// Nom d'un membre.
    pub fn member_name(&self, member: &Member) -> Result<&str> {
        self.constant_pool.utf8_at(member.name_index)
    }

    /// Méthode par nom.
    pub fn method(&self, name: &str) -> Option<&Member> {
        self.methods
            .iter()
            .find(|m| self.constant_pool.utf8_at(m.name_index).is_ok_and(|n| n == name))
    }

    /// Nom du fichier source déclaré, si présent.
    pub fn source_file(&self) -> Option<&str> {
        self.attributes.iter().find_map(|a| match a.info {
            AttributeInfo::SourceFile(i) => self.constant_pool.utf8_at(i).ok(),
            _ => None,
        })
    }
}

/* ───────────────────────────── Construction ───────────────────────────── */

/// Construit un `ClassFile` en alimentant sa table des constantes.
#[derive(Debug)]
pub struct ClassBuilder {
    pool: ConstantPool,
    access_flags: ClassAccess,
    this_class: u16,
    super_class: u16,
    interfaces: Vec<u16>,
    fields: Vec<Member>,
    methods: Vec<Member>,
    attributes: Vec<Attribute>,
}

impl ClassBuilder {
    /// Nouvelle classe `name` héritant de `super_name`.
    pub fn new(name: &str, super_name: &str, access_flags: ClassAccess) -> Result<Self> {
        let mut pool = ConstantPool::new();
        let this_class = pool.class(name)?;
        let super_class = pool.class(super_name)?;
        Ok(Self {
            pool,
            access_flags,
            this_class,
            super_class,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            attributes: Vec::new(),
        })
    }

    /// Table des constantes en cours de construction.
    pub fn pool(&mut self) -> &mut ConstantPool { &mut self.pool }

    /// Déclare une interface implémentée.
    pub fn add_interface(&mut self, name: &str) -> Result<()> {
        let i = self.pool.class(name)?;
        self.interfaces.push(i);
        Ok(())
    }

    /// Ajoute un champ sans attribut.
    pub fn add_field(&mut self, access_flags: MemberAccess, name: &str, descriptor: &str) -> Result<()> {
        let name_index = self.pool.utf8(name)?;
        let descriptor_index = self.pool.utf8(descriptor)?;
        self.fields.push(Member { access_flags, name_index, descriptor_index, attributes: Vec::new() });
        Ok(())
    }

    /// Ajoute une méthode portant un attribut `Code`.
    pub fn add_method(
        &mut self,
        access_flags: MemberAccess,
        name: &str,
        descriptor: &str,
        code: Code,
    ) -> Result<()> {
        let name_index = self.pool.utf8(name)?;
        let descriptor_index = self.pool.utf8(descriptor)?;
        let code_name = self.pool.utf8("Code")?;
        self.methods.push(Member {
            access_flags,
            name_index,
            descriptor_index,
            attributes: vec![Attribute { name_index: code_name, info: AttributeInfo::Code(code) }],
        });
        Ok(())
    }

    /// Ajoute l'attribut `SourceFile`.
    pub fn set_source_file(&mut self, file: &str) -> Result<()> {
        let name_index = self.pool.utf8("SourceFile")?;
        let file = self.pool.utf8(file)?;
        self.attributes.retain(|a| !matches!(a.info, AttributeInfo::SourceFile(_)));
        self.attributes.push(Attribute { name_index, info: AttributeInfo::SourceFile(file) });
        Ok(())
    }

    /// Finalise la table des constantes et produit le class file.
    pub fn build(mut self) -> ClassFile {
        self.pool.finalize();
        ClassFile {
            minor_version: MINOR_VERSION,
            major_version: MAJOR_VERSION,
            constant_pool: self.pool,
            access_flags: self.access_flags,
            this_class: self.this_class,
            super_class: self.super_class,
            interfaces: self.interfaces,
            fields: self.fields,
            methods: self.methods,
            attributes: self.attributes,
        }
    }
}
