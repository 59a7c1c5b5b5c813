//! Relecture d'un class file, avec vérification stricte.
//!
//! Échoue sur : magic/version invalides, tag de constante inconnu, index hors
//! table ou du mauvais genre, longueur d'attribut incohérente, octets
//! résiduels.

use javelin_core::{ByteReader, CoreError};
use tracing::debug;

use crate::{
    class::{Attribute, AttributeInfo, ClassAccess, Code, ExceptionEntry, LineNumber, Member, MemberAccess},
    constants::Constant,
    mutf8, ClassFile, ClassFileError, ConstantPool, Result, MAGIC, MAX_READ_MAJOR, MIN_READ_MAJOR,
};

impl ClassFile {
    /// Reconstruit un `ClassFile` depuis ses octets.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(data);
        let magic = r.read_u32()?;
        if magic != MAGIC {
            return Err(ClassFileError::BadMagic(magic));
        }
        let minor_version = r.read_u16()?;
        let major_version = r.read_u16()?;
        if !(MIN_READ_MAJOR..=MAX_READ_MAJOR).contains(&major_version) {
            return Err(ClassFileError::UnsupportedVersion { major: major_version, minor: minor_version });
        }

        let constant_pool = read_pool(&mut r)?;
        let access_flags = ClassAccess::from_bits_retain(r.read_u16()?);
        let this_class = r.read_u16()?;
        constant_pool.class_name_at(this_class)?;
        let super_class = r.read_u16()?;
        if super_class != 0 {
            constant_pool.class_name_at(super_class)?;
        }
        let n = r.read_u16()?;
        let mut interfaces = Vec::with_capacity(usize::from(n));
        for _ in 0..n {
            let i = r.read_u16()?;
            constant_pool.class_name_at(i)?;
            interfaces.push(i);
        }
        let fields = read_members(&mut r, &constant_pool)?;
        let methods = read_members(&mut r, &constant_pool)?;
        let attributes = read_attributes(&mut r, &constant_pool)?;
        r.expect_end("class file")?;

        debug!(constants = constant_pool.len(), methods = methods.len(), "class file read");
        Ok(Self {
            minor_version,
            major_version,
            constant_pool,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        })
    }
}

fn read_pool(r: &mut ByteReader<'_>) -> Result<ConstantPool> {
    let count = r.read_u16()?;
    if count == 0 {
        return Err(CoreError::invalid_length("constant_pool_count", 0).into());
    }
    let mut pool = ConstantPool::new();
    while pool.count() < count {
        let index = pool.count();
        let tag = r.read_u8()?;
        let c = match tag {
            1 => {
                let len = r.read_u16()?;
                let bytes = r.read_bytes(usize::from(len))?;
                Constant::Utf8(mutf8::decode(bytes).ok_or(ClassFileError::BadUtf8(index))?)
            }
            3 => Constant::Integer(r.read_i32()?),
            4 => Constant::Float(r.read_u32()?),
            5 => Constant::Long(r.read_i64()?),
            6 => Constant::Double(r.read_i64()? as u64),
            7 => Constant::Class(r.read_u16()?),
            8 => Constant::String(r.read_u16()?),
            9 => Constant::Fieldref { class: r.read_u16()?, name_and_type: r.read_u16()? },
            10 => Constant::Methodref { class: r.read_u16()?, name_and_type: r.read_u16()? },
            11 => Constant::InterfaceMethodref { class: r.read_u16()?, name_and_type: r.read_u16()? },
            12 => Constant::NameAndType { name: r.read_u16()?, descriptor: r.read_u16()? },
            _ => return Err(ClassFileError::UnknownTag { tag, index }),
        };
        pool.push_raw(c)?;
    }
    // un Long/Double au dernier emplacement dépasse le compte déclaré
    if pool.count() != count {
        return Err(ClassFileError::LengthMismatch {
            section: "constant pool".into(),
            declared: u64::from(count),
            parsed: u64::from(pool.count()),
        });
    }
    pool.check_references()?;
    pool.seal();
    Ok(pool)
}

fn read_members(r: &mut ByteReader<'_>, pool: &ConstantPool) -> Result<Vec<Member>> {
    let n = r.read_u16()?;
    let mut out = Vec::with_capacity(usize::from(n));
    for _ in 0..n {
        let access_flags = MemberAccess::from_bits_retain(r.read_u16()?);
        let name_index = r.read_u16()?;
        pool.utf8_at(name_index)?;
        let descriptor_index = r.read_u16()?;
        pool.utf8_at(descriptor_index)?;
        let attributes = read_attributes(r, pool)?;
        out.push(Member { access_flags, name_index, descriptor_index, attributes });
    }
    Ok(out)
}

fn read_attributes(r: &mut ByteReader<'_>, pool: &ConstantPool) -> Result<Vec<Attribute>> {
    let n = r.read_u16()?;
    let mut out = Vec::with_capacity(usize::from(n));
    for _ in 0..n {
        let name_index = r.read_u16()?;
        let name = pool.utf8_at(name_index)?;
        let len = r.read_u32()? as usize;
        let mut body = r.sub_reader(len)?;
        let info = match name {
            "Code" => AttributeInfo::Code(read_code(&mut body, pool)?),
            "LineNumberTable" => {
                let n = body.read_u16()?;
                let mut lines = Vec::with_capacity(usize::from(n));
                for _ in 0..n {
                    lines.push(LineNumber { start_pc: body.read_u16()?, line_number: body.read_u16()? });
                }
                AttributeInfo::LineNumberTable(lines)
            }
            "SourceFile" => {
                let i = body.read_u16()?;
                pool.utf8_at(i)?;
                AttributeInfo::SourceFile(i)
            }
            "Exceptions" => {
                let n = body.read_u16()?;
                let mut classes = Vec::with_capacity(usize::from(n));
                for _ in 0..n {
                    let c = body.read_u16()?;
                    pool.class_name_at(c)?;
                    classes.push(c);
                }
                AttributeInfo::Exceptions(classes)
            }
            _ => AttributeInfo::Raw(body.read_bytes(len)?.to_vec()),
        };
        if !body.is_at_end() {
            return Err(ClassFileError::LengthMismatch {
                section: format!("attribute {name}").into(),
                declared: len as u64,
                parsed: body.offset() as u64,
            });
        }
        out.push(Attribute { name_index, info });
    }
    Ok(out)
}

fn read_code(r: &mut ByteReader<'_>, pool: &ConstantPool) -> Result<Code> {
    let max_stack = r.read_u16()?;
    let max_locals = r.read_u16()?;
    let len = r.read_u32()? as usize;
    if len == 0 || len > usize::from(u16::MAX) {
        return Err(CoreError::invalid_length("code", len).into());
    }
    let code = r.read_bytes(len)?.to_vec();
    let n = r.read_u16()?;
    let mut exception_table = Vec::with_capacity(usize::from(n));
    for _ in 0..n {
        let e = ExceptionEntry {
            start_pc: r.read_u16()?,
            end_pc: r.read_u16()?,
            handler_pc: r.read_u16()?,
            catch_type: r.read_u16()?,
        };
        if e.start_pc >= e.end_pc || usize::from(e.end_pc) > len || usize::from(e.handler_pc) >= len {
            return Err(ClassFileError::invalid_code(
                u32::from(e.start_pc),
                format!("malformed exception range {}..{} -> {}", e.start_pc, e.end_pc, e.handler_pc),
            ));
        }
        if e.catch_type != 0 {
            pool.class_name_at(e.catch_type)?;
        }
        exception_table.push(e);
    }
    let attributes = read_attributes(r, pool)?;
    for attr in &attributes {
        if let AttributeInfo::LineNumberTable(lines) = &attr.info {
            if let Some(l) = lines.iter().find(|l| usize::from(l.start_pc) >= len) {
                return Err(ClassFileError::invalid_code(
                    u32::from(l.start_pc),
                    format!("line {} starts past the end of the code ({len} bytes)", l.line_number),
                ));
            }
        }
    }
    Ok(Code { max_stack, max_locals, code, exception_table, attributes })
}

/* ───────────────────────────── Tests ───────────────────────────── */

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ClassBuilder, MemberAccess as MA};
    use pretty_assertions::assert_eq;

    fn sample() -> Result<ClassFile> {
        let mut cb = ClassBuilder::new("demo/Sample", "java/lang/Object", ClassAccess::PUBLIC | ClassAccess::SUPER)?;
        cb.add_field(MA::PUBLIC | MA::STATIC, "__dict__", "Ljava/util/Map;")?;
        let lnt = cb.pool().utf8("LineNumberTable")?;
        let catch = cb.pool().class("java/lang/Throwable")?;
        cb.pool().long(1 << 40)?;
        cb.pool().string("caf\u{e9} \u{1F40D}")?;
        let code = Code {
            max_stack: 1,
            max_locals: 1,
            // nop; nop; return; astore_0; return
            code: vec![0x00, 0x00, 0xB1, 0x4B, 0xB1],
            exception_table: vec![ExceptionEntry { start_pc: 0, end_pc: 2, handler_pc: 3, catch_type: catch }],
            attributes: vec![Attribute {
                name_index: lnt,
                info: AttributeInfo::LineNumberTable(vec![LineNumber { start_pc: 0, line_number: 7 }]),
            }],
        };
        cb.add_method(MA::PUBLIC | MA::STATIC, "run", "()V", code)?;
        cb.set_source_file("sample.py")?;
        Ok(cb.build())
    }

    #[test]
    fn write_then_read_is_lossless() -> Result<()> {
        let class = sample()?;
        let bytes = class.to_bytes()?;
        assert_eq!(&bytes[..8], &[0xCA, 0xFE, 0xBA, 0xBE, 0, 0, 0, 49]);
        let back = ClassFile::from_bytes(&bytes)?;
        assert_eq!(back, class);
        assert_eq!(back.to_bytes()?, bytes);
        Ok(())
    }

    #[test]
    fn unfinalized_pool_is_not_written() -> Result<()> {
        let mut class = sample()?;
        class.constant_pool = ConstantPool::new();
        assert_eq!(class.to_bytes(), Err(ClassFileError::PoolNotFinalized));
        Ok(())
    }

    #[test]
    fn bad_magic_and_version() -> Result<()> {
        let mut bytes = sample()?.to_bytes()?;
        bytes[0] = 0xCB;
        assert!(matches!(ClassFile::from_bytes(&bytes), Err(ClassFileError::BadMagic(_))));
        bytes[0] = 0xCA;
        bytes[7] = 60;
        assert!(matches!(
            ClassFile::from_bytes(&bytes),
            Err(ClassFileError::UnsupportedVersion { major: 60, .. })
        ));
        Ok(())
    }

    #[test]
    fn truncation_and_trailing_bytes_fail() -> Result<()> {
        let bytes = sample()?.to_bytes()?;
        let cut = &bytes[..bytes.len() - 3];
        assert!(matches!(
            ClassFile::from_bytes(cut),
            Err(ClassFileError::Core(CoreError::UnexpectedEof { .. }))
        ));
        let mut longer = bytes;
        longer.push(0);
        assert!(matches!(
            ClassFile::from_bytes(&longer),
            Err(ClassFileError::Core(CoreError::InvalidLength { .. }))
        ));
        Ok(())
    }

    #[test]
    fn attribute_length_mismatch_fails() -> Result<()> {
        let class = sample()?;
        let mut bytes = class.to_bytes()?;
        // SourceFile est le dernier attribut : u16 nom, u32 longueur (=2), u16 index
        let len_at = bytes.len() - 6;
        assert_eq!(&bytes[len_at..len_at + 4], &[0, 0, 0, 2]);
        bytes[len_at + 3] = 3;
        bytes.push(0);
        assert!(matches!(
            ClassFile::from_bytes(&bytes),
            Err(ClassFileError::LengthMismatch { declared: 3, parsed: 2, .. })
        ));
        Ok(())
    }

    #[test]
    fn out_of_range_index_fails() -> Result<()> {
        let class = sample()?;
        let mut bytes = class.to_bytes()?;
        let count = class.constant_pool.count();
        // this_class suit la table et les drapeaux d'accès
        let pool_end = pool_end(&bytes)?;
        bytes[pool_end + 2..pool_end + 4].copy_from_slice(&(count + 5).to_be_bytes());
        assert!(matches!(ClassFile::from_bytes(&bytes), Err(ClassFileError::IndexOutOfRange { .. })));
        Ok(())
    }

    #[test]
    fn line_entry_past_the_code_fails() -> Result<()> {
        let mut class = sample()?;
        lines_of(&mut class).push(LineNumber { start_pc: 5, line_number: 8 });
        assert!(matches!(
            ClassFile::from_bytes(&class.to_bytes()?),
            Err(ClassFileError::InvalidCode { pc: 5, .. })
        ));

        lines_of(&mut class)[1].start_pc = 4;
        assert!(ClassFile::from_bytes(&class.to_bytes()?).is_ok());
        Ok(())
    }

    #[test]
    fn unknown_constant_tag_fails() -> Result<()> {
        let mut bytes = sample()?.to_bytes()?;
        // le tag de la première entrée suit magic, versions et compte
        bytes[10] = 2;
        assert!(matches!(ClassFile::from_bytes(&bytes), Err(ClassFileError::UnknownTag { tag: 2, index: 1 })));
        Ok(())
    }

    /// Table des lignes de `run`.
    fn lines_of(class: &mut ClassFile) -> &mut Vec<LineNumber> {
        let code = class.methods[0]
            .attributes
            .iter_mut()
            .find_map(|a| match &mut a.info {
                AttributeInfo::Code(code) => Some(code),
                _ => None,
            })
            .unwrap();
        match &mut code.attributes[0].info {
            AttributeInfo::LineNumberTable(lines) => lines,
            other => panic!("unexpected attribute {other:?}"),
        }
    }

    /// Offset de fin de la table des constantes.
    fn pool_end(bytes: &[u8]) -> Result<usize> {
        let mut r = ByteReader::new(bytes);
        r.read_bytes(8)?;
        read_pool(&mut r)?;
        Ok(r.offset())
    }
}
