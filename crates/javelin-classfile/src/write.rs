//! Sérialisation d'un `ClassFile` (big-endian, attributs préfixés par leur longueur).

use javelin_core::ByteWriter;
use tracing::debug;

use crate::{
    class::{Attribute, AttributeInfo, Code, Member},
    constants::Constant,
    mutf8, ClassFile, ClassFileError, ConstantPool, Result, MAGIC,
};

impl ClassFile {
    /// Produit les octets du class file. La table doit être finalisée.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        if !self.constant_pool.is_finalized() {
            return Err(ClassFileError::PoolNotFinalized);
        }
        let mut w = ByteWriter::new();
        w.write_u32(MAGIC);
        w.write_u16(self.minor_version);
        w.write_u16(self.major_version);
        write_pool(&mut w, &self.constant_pool)?;
        w.write_u16(self.access_flags.bits());
        w.write_u16(self.this_class);
        w.write_u16(self.super_class);
        write_len(&mut w, self.interfaces.len(), "interfaces")?;
        for i in &self.interfaces {
            w.write_u16(*i);
        }
        write_members(&mut w, &self.fields, "fields")?;
        write_members(&mut w, &self.methods, "methods")?;
        write_attributes(&mut w, &self.attributes)?;
        debug!(bytes = w.len(), constants = self.constant_pool.len(), "class file written");
        Ok(w.into_vec())
    }
}

fn write_len(w: &mut ByteWriter, len: usize, section: &'static str) -> Result<()> {
    let len = u16::try_from(len).map_err(|_| javelin_core::CoreError::invalid_length(section, len))?;
    w.write_u16(len);
    Ok(())
}

fn write_pool(w: &mut ByteWriter, pool: &ConstantPool) -> Result<()> {
    w.write_u16(pool.count());
    for (_, c) in pool.iter() {
        w.write_u8(c.tag());
        match c {
            Constant::Utf8(s) => {
                let bytes = mutf8::encode(s);
                let len = u16::try_from(bytes.len()).map_err(|_| ClassFileError::Utf8TooLong(bytes.len()))?;
                w.write_u16(len);
                w.write_bytes(&bytes);
            }
            Constant::Integer(v) => w.write_i32(*v),
            Constant::Float(bits) => w.write_u32(*bits),
            Constant::Long(v) => w.write_i64(*v),
            Constant::Double(bits) => w.write_i64(*bits as i64),
            Constant::Class(n) | Constant::String(n) => w.write_u16(*n),
            Constant::Fieldref { class, name_and_type }
            | Constant::Methodref { class, name_and_type }
            | Constant::InterfaceMethodref { class, name_and_type } => {
                w.write_u16(*class);
                w.write_u16(*name_and_type);
            }
            Constant::NameAndType { name, descriptor } => {
                w.write_u16(*name);
                w.write_u16(*descriptor);
            }
        }
    }
    Ok(())
}

fn write_members(w: &mut ByteWriter, members: &[Member], section: &'static str) -> Result<()> {
    write_len(w, members.len(), section)?;
    for m in members {
        w.write_u16(m.access_flags.bits());
        w.write_u16(m.name_index);
        w.write_u16(m.descriptor_index);
        write_attributes(w, &m.attributes)?;
    }
    Ok(())
}

fn write_attributes(w: &mut ByteWriter, attributes: &[Attribute]) -> Result<()> {
    write_len(w, attributes.len(), "attributes")?;
    for a in attributes {
        w.write_u16(a.name_index);
        let at = w.reserve_u32();
        match &a.info {
            AttributeInfo::Code(code) => write_code(w, code)?,
            AttributeInfo::LineNumberTable(lines) => {
                write_len(w, lines.len(), "LineNumberTable")?;
                for l in lines {
                    w.write_u16(l.start_pc);
                    w.write_u16(l.line_number);
                }
            }
            AttributeInfo::SourceFile(i) => w.write_u16(*i),
            AttributeInfo::Exceptions(classes) => {
                write_len(w, classes.len(), "Exceptions")?;
                for c in classes {
                    w.write_u16(*c);
                }
            }
            AttributeInfo::Raw(bytes) => w.write_bytes(bytes),
        }
        w.close_length(at, "attribute")?;
    }
    Ok(())
}

fn write_code(w: &mut ByteWriter, code: &Code) -> Result<()> {
    w.write_u16(code.max_stack);
    w.write_u16(code.max_locals);
    let len = u32::try_from(code.code.len()).map_err(|_| ClassFileError::CodeTooLarge(code.code.len()))?;
    w.write_u32(len);
    w.write_bytes(&code.code);
    write_len(w, code.exception_table.len(), "exception_table")?;
    for e in &code.exception_table {
        w.write_u16(e.start_pc);
        w.write_u16(e.end_pc);
        w.write_u16(e.handler_pc);
        w.write_u16(e.catch_type);
    }
    write_attributes(w, &code.attributes)
}
