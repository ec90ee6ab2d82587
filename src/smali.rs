//! Smali-style listings of JVM classes.
//!
//! The layout follows baksmali (`.class`, `.super`, `.implements`, `.field`,
//! `.method` blocks) while instruction bodies use JVM mnemonics.

use std::collections::BTreeSet;

use crate::access::{class_keywords, field_keywords, is_static, method_keywords};
use crate::ir::{Class, Instruction, Method, Operand};
use crate::opcodes;

/// Render a class as a Smali-style listing.
pub(crate) fn render_class(class: &Class) -> String {
    let mut lines = vec![format!(
        ".class {}",
        with_keywords(&class_keywords(class.access_flags), &type_descriptor(&class.name))
    )];
    if let Some(super_name) = &class.super_name {
        lines.push(format!(".super {}", type_descriptor(super_name)));
    }

    if !class.interfaces.is_empty() {
        lines.push(String::new());
        lines.push("# interfaces".to_string());
        for interface in &class.interfaces {
            lines.push(format!(".implements {}", type_descriptor(interface)));
        }
    }

    let (static_fields, instance_fields): (Vec<_>, Vec<_>) = class
        .fields
        .iter()
        .partition(|field| is_static(field.access_flags));
    let sections = [
        ("static fields", static_fields),
        ("instance fields", instance_fields),
    ];
    for (title, fields) in sections {
        if fields.is_empty() {
            continue;
        }
        lines.push(String::new());
        lines.push(format!("# {title}"));
        for field in fields {
            let member = format!("{}:{}", field.name, field.descriptor);
            lines.push(format!(
                ".field {}",
                with_keywords(&field_keywords(field.access_flags), &member)
            ));
        }
    }

    let (direct, virtual_methods): (Vec<_>, Vec<_>) =
        class.methods.iter().partition(|method| is_direct(method));
    for (title, methods) in [("direct methods", direct), ("virtual methods", virtual_methods)] {
        if methods.is_empty() {
            continue;
        }
        lines.push(String::new());
        lines.push(format!("# {title}"));
        for (index, method) in methods.into_iter().enumerate() {
            if index > 0 {
                lines.push(String::new());
            }
            render_method(&mut lines, method);
        }
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

fn is_direct(method: &Method) -> bool {
    method.name.starts_with('<')
        || is_static(method.access_flags)
        || method.access_flags & crate::access::ACC_PRIVATE != 0
}

fn render_method(lines: &mut Vec<String>, method: &Method) {
    let mut keywords = method_keywords(method.access_flags);
    if method.name.starts_with('<') {
        keywords.push("constructor");
    }
    let member = format!("{}{}", method.name, method.descriptor);
    lines.push(format!(".method {}", with_keywords(&keywords, &member)));

    let targets: BTreeSet<i64> = method
        .instructions
        .iter()
        .filter_map(|instruction| match instruction.operand {
            Operand::Branch(target) => Some(target),
            _ => None,
        })
        .collect();
    for instruction in &method.instructions {
        if targets.contains(&(instruction.offset as i64)) {
            lines.push(format!("    :L{}", instruction.offset));
        }
        lines.push(format!("    {}", format_instruction(instruction)));
    }
    lines.push(".end method".to_string());
}

fn format_instruction(instruction: &Instruction) -> String {
    let mnemonic = opcodes::mnemonic(instruction.opcode).unwrap_or("unknown");
    match &instruction.operand {
        Operand::None => mnemonic.to_string(),
        Operand::Int(value) => format!("{mnemonic} {value}"),
        Operand::Local(index) => format!("{mnemonic} {index}"),
        Operand::Increment { index, delta } => format!("{mnemonic} {index}, {delta}"),
        Operand::Branch(target) => format!("{mnemonic} :L{target}"),
        Operand::Member(member) => {
            let owner = type_descriptor(&member.owner);
            if member.descriptor.starts_with('(') {
                format!("{mnemonic} {owner}->{}{}", member.name, member.descriptor)
            } else {
                format!("{mnemonic} {owner}->{}:{}", member.name, member.descriptor)
            }
        }
        Operand::Type(name) => format!("{mnemonic} {}", type_descriptor(name)),
        Operand::String(value) => format!("{mnemonic} \"{}\"", value.escape_default()),
        Operand::Constant(index) => format!("{mnemonic} #{index}"),
    }
}

/// `Lpkg/Name;` for an internal class name; array descriptors pass through.
fn type_descriptor(internal: &str) -> String {
    if internal.starts_with('[') {
        internal.to_string()
    } else {
        format!("L{internal};")
    }
}

fn with_keywords(keywords: &[&str], subject: &str) -> String {
    if keywords.is_empty() {
        subject.to_string()
    } else {
        format!("{} {subject}", keywords.join(" "))
    }
}

/// A `.method` ... `.end method` block cut out of a listing.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct MethodBlock<'a> {
    pub(crate) name: &'a str,
    /// Descriptor as written after the name, e.g. `(I)V`.
    pub(crate) descriptor: &'a str,
    pub(crate) text: &'a str,
}

/// Split a listing into its method blocks, in listing order.
pub(crate) fn method_blocks(smali: &str) -> Vec<MethodBlock<'_>> {
    let mut blocks = Vec::new();
    let mut start = None;
    let mut offset = 0;
    for line in smali.split_inclusive('\n') {
        let trimmed = line.trim();
        if trimmed.starts_with(".method ") {
            start = Some(offset);
        } else if trimmed == ".end method" {
            if let Some(begin) = start.take() {
                let text = &smali[begin..offset + line.len()];
                if let Some((name, descriptor)) = method_header(text) {
                    blocks.push(MethodBlock {
                        name,
                        descriptor,
                        text: text.trim_end_matches('\n'),
                    });
                }
            }
        }
        offset += line.len();
    }
    blocks
}

fn method_header(block: &str) -> Option<(&str, &str)> {
    let header = block.lines().next()?.trim();
    let member = header.split_whitespace().last()?;
    match member.find('(') {
        Some(open) => Some((&member[..open], &member[open..])),
        None => Some((member, "")),
    }
}
