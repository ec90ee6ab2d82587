use std::fs;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use jclassfile::class_file;
use jclassfile::constant_pool::ConstantPool;
use opentelemetry::KeyValue;
use rayon::prelude::*;
use zip::ZipArchive;

use crate::descriptor::method_param_count;
use crate::ir::{CallKind, CallSite, Class, Field, Instruction, MemberRef, Method, Operand};
use crate::opcodes;
use crate::telemetry::{Telemetry, with_span};

/// Parse every class in a `.class`, `.jar` or `.zip` input.
pub(crate) fn scan_input(input: &Path, telemetry: Option<&Telemetry>) -> Result<Vec<Class>> {
    let extension = input
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "class" => scan_class_file(input, telemetry),
        "jar" | "zip" => scan_archive(input, telemetry),
        "apk" | "dex" | "aab" => anyhow::bail!(
            "dex input is not supported by the class-file backend: {}",
            input.display()
        ),
        _ => anyhow::bail!("unsupported input file: {}", input.display()),
    }
}

fn scan_class_file(path: &Path, telemetry: Option<&Telemetry>) -> Result<Vec<Class>> {
    let span_attributes = [KeyValue::new("classquery.class_path", path.display().to_string())];
    let class = with_span(telemetry, "class.scan", &span_attributes, || -> Result<Class> {
        let data = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        parse_class_bytes(data).with_context(|| format!("failed to parse {}", path.display()))
    })?;
    Ok(vec![class])
}

fn scan_archive(path: &Path, telemetry: Option<&Telemetry>) -> Result<Vec<Class>> {
    let span_attributes = [KeyValue::new("classquery.jar_path", path.display().to_string())];
    let entries = with_span(telemetry, "jar.scan", &span_attributes, || {
        read_archive_entries(path)
    })?;

    // ZipArchive is not shareable across threads, so entries are read up
    // front and only parsing fans out.
    entries
        .into_par_iter()
        .map(|(name, data)| {
            let attributes = [
                KeyValue::new("classquery.jar_path", path.display().to_string()),
                KeyValue::new("classquery.jar_entry", name.clone()),
            ];
            with_span(telemetry, "class.scan", &attributes, || {
                parse_class_bytes(data)
                    .with_context(|| format!("failed to parse {}:{}", path.display(), name))
            })
        })
        .collect::<Result<Vec<_>>>()
}

/// Bytes of every class entry, sorted by entry name. Other entries are ignored.
fn read_archive_entries(path: &Path) -> Result<Vec<(String, Vec<u8>)>> {
    let file = fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut archive =
        ZipArchive::new(file).with_context(|| format!("failed to read {}", path.display()))?;

    let mut class_names = Vec::new();
    for index in 0..archive.len() {
        let entry = archive
            .by_index(index)
            .with_context(|| format!("failed to read {}", path.display()))?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name();
        if name.ends_with(".class")
            && !name.ends_with("module-info.class")
            && !name.starts_with("META-INF/versions/")
        {
            class_names.push(name.to_string());
        }
    }
    class_names.sort();

    let mut entries = Vec::with_capacity(class_names.len());
    for name in class_names {
        let mut entry = archive
            .by_name(&name)
            .with_context(|| format!("failed to read {}:{}", path.display(), name))?;
        let mut data = Vec::new();
        entry
            .read_to_end(&mut data)
            .with_context(|| format!("failed to read {}:{}", path.display(), name))?;
        entries.push((name, data));
    }
    Ok(entries)
}

pub(crate) fn parse_class_bytes(data: Vec<u8>) -> Result<Class> {
    let class_file = match class_file::parse(&data) {
        Ok(parsed) => parsed,
        Err(err) => {
            let message = format!("{err}");
            if message.contains("unmatched attribute") {
                tracing::warn!(error = %message, "falling back to header-only class parsing");
                return parse_class_bytes_minimal(data).context("failed to parse class file bytes");
            }
            return Err(err).context("failed to parse class file bytes");
        }
    };
    let constant_pool = class_file.constant_pool();
    let name =
        resolve_class_name(constant_pool, class_file.this_class()).context("resolve class name")?;
    let super_name = if class_file.super_class() == 0 {
        None
    } else {
        Some(
            resolve_class_name(constant_pool, class_file.super_class())
                .context("resolve super class name")?,
        )
    };
    let mut interfaces = Vec::new();
    for interface in class_file.interfaces() {
        interfaces
            .push(resolve_class_name(constant_pool, *interface).context("resolve interface name")?);
    }
    let access_flags = class_access_flags(&data).context("read class access flags")?;
    let fields = parse_fields(constant_pool, class_file.fields()).context("parse fields")?;
    let methods = parse_methods(constant_pool, class_file.methods()).context("parse methods")?;

    Ok(Class {
        name,
        access_flags,
        super_name,
        interfaces,
        fields,
        methods,
        bytes: data,
    })
}

fn parse_fields(
    constant_pool: &[ConstantPool],
    fields: &[jclassfile::fields::FieldInfo],
) -> Result<Vec<Field>> {
    let mut parsed = Vec::new();
    for field in fields {
        let name = resolve_utf8(constant_pool, field.name_index()).context("resolve field name")?;
        let descriptor = resolve_utf8(constant_pool, field.descriptor_index())
            .context("resolve field descriptor")?;
        parsed.push(Field {
            name,
            descriptor,
            access_flags: field.access_flags().bits(),
        });
    }
    Ok(parsed)
}

fn parse_methods(
    constant_pool: &[ConstantPool],
    methods: &[jclassfile::methods::MethodInfo],
) -> Result<Vec<Method>> {
    let mut parsed = Vec::new();
    for method in methods {
        let name =
            resolve_utf8(constant_pool, method.name_index()).context("resolve method name")?;
        let descriptor = resolve_utf8(constant_pool, method.descriptor_index())
            .context("resolve method descriptor")?;
        method_param_count(&descriptor)
            .with_context(|| format!("invalid descriptor for method {name}"))?;
        let code = method
            .attributes()
            .iter()
            .find_map(|attribute| match attribute {
                jclassfile::attributes::Attribute::Code { code, .. } => Some(code),
                _ => None,
            });
        let (instructions, calls) = match code {
            Some(code) => parse_bytecode(code, constant_pool).context("parse bytecode")?,
            None => (Vec::new(), Vec::new()),
        };
        parsed.push(Method {
            name,
            descriptor,
            access_flags: method.access_flags().bits(),
            instructions,
            calls,
        });
    }
    Ok(parsed)
}

fn parse_bytecode(
    code: &[u8],
    constant_pool: &[ConstantPool],
) -> Result<(Vec<Instruction>, Vec<CallSite>)> {
    let mut instructions = Vec::new();
    let mut calls = Vec::new();
    let mut offset = 0usize;
    while offset < code.len() {
        let opcode = code[offset];
        let start_offset = offset as u32;
        let length = opcode_length(code, offset)?;
        if length == 0 || offset + length > code.len() {
            anyhow::bail!("invalid bytecode length at offset {}", offset);
        }
        let operand = match opcode {
            opcodes::BIPUSH => Operand::Int(read_u8(code, offset + 1)? as i8 as i32),
            opcodes::SIPUSH => Operand::Int(read_u16(code, offset + 1)? as i16 as i32),
            opcodes::LDC => {
                let index = read_u8(code, offset + 1)? as u16;
                constant_operand(constant_pool, index)?
            }
            opcodes::LDC_W | opcodes::LDC2_W => {
                let index = read_u16(code, offset + 1)?;
                constant_operand(constant_pool, index)?
            }
            0x15..=0x19 | 0x36..=0x3a | opcodes::RET => {
                Operand::Local(read_u8(code, offset + 1)? as u16)
            }
            opcodes::IINC => Operand::Increment {
                index: read_u8(code, offset + 1)? as u16,
                delta: read_u8(code, offset + 2)? as i8 as i16,
            },
            op if opcodes::is_short_branch(op) => {
                let delta = read_u16(code, offset + 1)? as i16;
                Operand::Branch(start_offset as i64 + delta as i64)
            }
            opcodes::GOTO_W | opcodes::JSR_W => {
                let delta = read_i32(code, offset + 1)?;
                Operand::Branch(start_offset as i64 + delta as i64)
            }
            opcodes::GETSTATIC..=opcodes::PUTFIELD => {
                let index = read_u16(code, offset + 1)?;
                Operand::Member(
                    resolve_member_ref(constant_pool, index).context("resolve field ref")?,
                )
            }
            opcodes::INVOKEVIRTUAL
            | opcodes::INVOKESPECIAL
            | opcodes::INVOKESTATIC
            | opcodes::INVOKEINTERFACE => {
                let index = read_u16(code, offset + 1)?;
                let member =
                    resolve_member_ref(constant_pool, index).context("resolve method ref")?;
                let kind = match opcode {
                    opcodes::INVOKESPECIAL => CallKind::Special,
                    opcodes::INVOKESTATIC => CallKind::Static,
                    opcodes::INVOKEINTERFACE => CallKind::Interface,
                    _ => CallKind::Virtual,
                };
                calls.push(CallSite {
                    owner: member.owner.clone(),
                    name: member.name.clone(),
                    descriptor: member.descriptor.clone(),
                    kind,
                    offset: start_offset,
                });
                Operand::Member(member)
            }
            opcodes::INVOKEDYNAMIC => Operand::Constant(read_u16(code, offset + 1)?),
            opcodes::NEW
            | opcodes::ANEWARRAY
            | opcodes::CHECKCAST
            | opcodes::INSTANCEOF
            | opcodes::MULTIANEWARRAY => {
                let index = read_u16(code, offset + 1)?;
                Operand::Type(resolve_class_name(constant_pool, index).context("resolve type")?)
            }
            opcodes::NEWARRAY => Operand::Int(read_u8(code, offset + 1)? as i32),
            opcodes::WIDE => {
                let index = read_u16(code, offset + 2)?;
                if read_u8(code, offset + 1)? == opcodes::IINC {
                    Operand::Increment {
                        index,
                        delta: read_u16(code, offset + 4)? as i16,
                    }
                } else {
                    Operand::Local(index)
                }
            }
            _ => Operand::None,
        };

        instructions.push(Instruction {
            offset: start_offset,
            opcode,
            operand,
        });
        offset += length;
    }
    Ok((instructions, calls))
}

fn constant_operand(constant_pool: &[ConstantPool], index: u16) -> Result<Operand> {
    let entry = constant_pool
        .get(index as usize)
        .context("missing constant pool entry")?;
    let operand = match entry {
        ConstantPool::String { string_index } => {
            Operand::String(resolve_utf8(constant_pool, *string_index)?)
        }
        ConstantPool::Class { name_index } => {
            Operand::Type(resolve_utf8(constant_pool, *name_index)?)
        }
        _ => Operand::Constant(index),
    };
    Ok(operand)
}

fn resolve_member_ref(constant_pool: &[ConstantPool], index: u16) -> Result<MemberRef> {
    let entry = constant_pool
        .get(index as usize)
        .context("missing member ref entry")?;
    let (class_index, name_and_type_index) = match entry {
        ConstantPool::Fieldref {
            class_index,
            name_and_type_index,
        }
        | ConstantPool::Methodref {
            class_index,
            name_and_type_index,
        }
        | ConstantPool::InterfaceMethodref {
            class_index,
            name_and_type_index,
        } => (*class_index, *name_and_type_index),
        _ => anyhow::bail!("unexpected member ref entry"),
    };
    let owner = resolve_class_name(constant_pool, class_index).context("resolve owner")?;
    let (name_index, descriptor_index) = resolve_name_and_type(constant_pool, name_and_type_index)?;
    let name = resolve_utf8(constant_pool, name_index).context("resolve member name")?;
    let descriptor =
        resolve_utf8(constant_pool, descriptor_index).context("resolve member descriptor")?;
    Ok(MemberRef {
        owner,
        name,
        descriptor,
    })
}

fn resolve_name_and_type(constant_pool: &[ConstantPool], index: u16) -> Result<(u16, u16)> {
    let entry = constant_pool
        .get(index as usize)
        .context("missing name and type entry")?;
    match entry {
        ConstantPool::NameAndType {
            name_index,
            descriptor_index,
        } => Ok((*name_index, *descriptor_index)),
        _ => anyhow::bail!("unexpected name and type entry"),
    }
}

fn resolve_class_name(constant_pool: &[ConstantPool], class_index: u16) -> Result<String> {
    let entry = constant_pool
        .get(class_index as usize)
        .context("missing class entry")?;
    match entry {
        ConstantPool::Class { name_index } => resolve_utf8(constant_pool, *name_index),
        _ => anyhow::bail!("unexpected class entry"),
    }
}

fn resolve_utf8(constant_pool: &[ConstantPool], index: u16) -> Result<String> {
    let entry = constant_pool
        .get(index as usize)
        .context("missing utf8 entry")?;
    match entry {
        ConstantPool::Utf8 { value } => Ok(value.clone()),
        _ => anyhow::bail!("unexpected utf8 entry"),
    }
}

/// Header-only parse used when the full parser rejects an attribute it does not know.
fn parse_class_bytes_minimal(data: Vec<u8>) -> Result<Class> {
    let header = read_class_header(&data)?;
    Ok(Class {
        name: header.name,
        access_flags: header.access_flags,
        super_name: header.super_name,
        interfaces: header.interfaces,
        fields: Vec::new(),
        methods: Vec::new(),
        bytes: data,
    })
}

fn class_access_flags(data: &[u8]) -> Result<u16> {
    Ok(read_class_header(data)?.access_flags)
}

/// Class header fields read without the full attribute parser.
struct ClassHeader {
    name: String,
    access_flags: u16,
    super_name: Option<String>,
    interfaces: Vec<String>,
}

fn read_class_header(data: &[u8]) -> Result<ClassHeader> {
    let mut offset = 0usize;
    let magic = read_u32(data, offset)?;
    if magic != 0xCAFEBABE {
        anyhow::bail!("invalid class file magic");
    }
    // Skip magic, minor and major version.
    offset += 8;
    let (utf8_entries, class_entries) = read_constant_pool_minimal(data, &mut offset)?;
    let access_flags = read_u16(data, offset)?;
    let this_class = read_u16(data, offset + 2)?;
    let super_class = read_u16(data, offset + 4)?;
    let interface_count = read_u16(data, offset + 6)? as usize;
    offset += 8;

    let resolve = |index: u16| -> Result<String> {
        let name_index = class_entries
            .get(index as usize)
            .copied()
            .flatten()
            .context("missing class entry")?;
        utf8_entries
            .get(name_index as usize)
            .cloned()
            .flatten()
            .context("missing utf8 entry for class name")
    };

    let name = resolve(this_class).context("resolve class name")?;
    let super_name = if super_class == 0 {
        None
    } else {
        Some(resolve(super_class).context("resolve super class name")?)
    };
    let mut interfaces = Vec::with_capacity(interface_count);
    for index in 0..interface_count {
        let class_index = read_u16(data, offset + index * 2)?;
        interfaces.push(resolve(class_index).context("resolve interface name")?);
    }

    Ok(ClassHeader {
        name,
        access_flags,
        super_name,
        interfaces,
    })
}

/// Walk the constant pool, keeping only UTF-8 values and class name indices.
fn read_constant_pool_minimal(
    data: &[u8],
    offset: &mut usize,
) -> Result<(Vec<Option<String>>, Vec<Option<u16>>)> {
    let count = read_u16(data, *offset)? as usize;
    *offset += 2;
    let mut utf8_entries = vec![None; count.max(1)];
    let mut class_entries = vec![None; count.max(1)];
    let mut index = 1usize;
    while index < count {
        let tag = read_u8(data, *offset)?;
        *offset += 1;
        match tag {
            1 => {
                let len = read_u16(data, *offset)? as usize;
                let bytes = data
                    .get(*offset + 2..*offset + 2 + len)
                    .context("class bytes out of bounds")?;
                utf8_entries[index] = Some(String::from_utf8_lossy(bytes).to_string());
                *offset += 2 + len;
            }
            7 => {
                class_entries[index] = Some(read_u16(data, *offset)?);
                *offset += 2;
            }
            3 | 4 | 9 | 10 | 11 | 12 | 17 | 18 => *offset += 4,
            5 | 6 => {
                *offset += 8;
                // Long and double occupy two constant pool slots.
                index += 1;
            }
            8 | 16 | 19 | 20 => *offset += 2,
            15 => *offset += 3,
            _ => anyhow::bail!("unsupported constant pool tag: {}", tag),
        }
        index += 1;
    }
    Ok((utf8_entries, class_entries))
}

pub(crate) fn opcode_length(code: &[u8], offset: usize) -> Result<usize> {
    let opcode = code[offset];
    let length = match opcode {
        0x00..=0x0f => 1,
        opcodes::BIPUSH => 2,
        opcodes::SIPUSH => 3,
        opcodes::LDC => 2,
        opcodes::LDC_W | opcodes::LDC2_W => 3,
        0x15..=0x19 => 2,
        0x1a..=0x35 => 1,
        0x36..=0x3a => 2,
        0x3b..=0x83 => 1,
        opcodes::IINC => 3,
        0x85..=0x98 => 1,
        0x99..=0xa8 => 3,
        opcodes::RET => 2,
        opcodes::TABLESWITCH => tableswitch_length(code, offset)?,
        opcodes::LOOKUPSWITCH => lookupswitch_length(code, offset)?,
        0xac..=0xb1 => 1,
        0xb2..=0xb8 => 3,
        opcodes::INVOKEINTERFACE | opcodes::INVOKEDYNAMIC => 5,
        opcodes::NEW => 3,
        opcodes::NEWARRAY => 2,
        opcodes::ANEWARRAY => 3,
        0xbe | 0xbf => 1,
        opcodes::CHECKCAST | opcodes::INSTANCEOF => 3,
        0xc2 | 0xc3 => 1,
        opcodes::WIDE => wide_length(code, offset)?,
        opcodes::MULTIANEWARRAY => 4,
        opcodes::IFNULL | opcodes::IFNONNULL => 3,
        opcodes::GOTO_W | opcodes::JSR_W => 5,
        0xca | 0xfe | 0xff => 1,
        _ => anyhow::bail!("unsupported opcode 0x{:02x}", opcode),
    };
    Ok(length)
}

fn tableswitch_length(code: &[u8], offset: usize) -> Result<usize> {
    let padding = padding(offset);
    let base = offset + 1 + padding;
    let low = read_i32(code, base + 4)?;
    let high = read_i32(code, base + 8)?;
    let count = high
        .checked_sub(low)
        .and_then(|v| v.checked_add(1))
        .context("invalid tableswitch range")?;
    if count < 0 {
        anyhow::bail!("invalid tableswitch range");
    }
    Ok(1 + padding + 12 + (count as usize) * 4)
}

fn lookupswitch_length(code: &[u8], offset: usize) -> Result<usize> {
    let padding = padding(offset);
    let npairs = read_i32(code, offset + 1 + padding + 4)?;
    if npairs < 0 {
        anyhow::bail!("invalid lookupswitch pairs");
    }
    Ok(1 + padding + 8 + (npairs as usize) * 8)
}

fn wide_length(code: &[u8], offset: usize) -> Result<usize> {
    let opcode = read_u8(code, offset + 1).context("missing wide opcode")?;
    if opcode == opcodes::IINC { Ok(6) } else { Ok(4) }
}

fn padding(offset: usize) -> usize {
    (4 - ((offset + 1) % 4)) % 4
}

fn read_u8(bytes: &[u8], offset: usize) -> Result<u8> {
    bytes.get(offset).copied().context("byte out of bounds")
}

fn read_u16(bytes: &[u8], offset: usize) -> Result<u16> {
    let slice = bytes.get(offset..offset + 2).context("u16 out of bounds")?;
    Ok(u16::from_be_bytes([slice[0], slice[1]]))
}

fn read_u32(bytes: &[u8], offset: usize) -> Result<u32> {
    let slice = bytes.get(offset..offset + 4).context("u32 out of bounds")?;
    Ok(u32::from_be_bytes([slice[0], slice[1], slice[2], slice[3]]))
}

fn read_i32(bytes: &[u8], offset: usize) -> Result<i32> {
    Ok(read_u32(bytes, offset)? as i32)
}
