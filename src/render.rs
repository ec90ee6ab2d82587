//! Declaration-level Java source used when no external decompiler is configured.

use crate::access::{
    ACC_ABSTRACT, ACC_ANNOTATION, ACC_ENUM, ACC_FINAL, ACC_PUBLIC, is_interface, is_synthetic,
    java_field_modifiers, java_method_modifiers,
};
use crate::descriptor::{decode_method_signature, decode_type, internal_to_fqcn};
use crate::ir::{Class, Method};

pub(crate) fn render_class_stub(class: &Class) -> String {
    let mut out = String::new();
    let fqcn = internal_to_fqcn(&class.name);
    if let Some((package, _)) = fqcn.rsplit_once('.') {
        out.push_str(&format!("package {package};\n\n"));
    }
    out.push_str(&format!("{} {{\n", class_declaration(class)));

    for field in class.fields.iter().filter(|field| !is_synthetic(field.access_flags)) {
        let modifiers = java_field_modifiers(field.access_flags);
        out.push_str(&format!(
            "    {}{} {};\n",
            prefix(&modifiers),
            decode_type(&field.descriptor),
            field.name
        ));
    }
    // Compiler-generated members have no source form.
    for method in class.methods.iter().filter(|method| !is_synthetic(method.access_flags)) {
        out.push('\n');
        out.push_str(&indent(&render_method_stub(class, method)));
    }
    out.push_str("}\n");
    out
}

/// Source stub for one method: its declaration and, for concrete methods, the calls it makes.
pub(crate) fn render_method_stub(class: &Class, method: &Method) -> String {
    let mut out = String::new();
    if method.name == "<clinit>" {
        out.push_str("static {\n");
    } else {
        let signature = decode_method_signature(&format!("{}{}", method.name, method.descriptor));
        let parameters = signature
            .parameter_types
            .iter()
            .enumerate()
            .map(|(index, ty)| format!("{ty} arg{index}"))
            .collect::<Vec<_>>()
            .join(", ");
        let modifiers = java_method_modifiers(method.access_flags);
        let head = if method.name == "<init>" {
            format!("{}{}({parameters})", prefix(&modifiers), simple_class_name(&class.name))
        } else {
            format!(
                "{}{} {}({parameters})",
                prefix(&modifiers),
                signature.return_type,
                method.name
            )
        };
        if !method.has_code() {
            return format!("{head};\n");
        }
        out.push_str(&format!("{head} {{\n"));
    }
    let mut seen = Vec::new();
    for call in &method.calls {
        let target = format!(
            "{}.{}({})",
            internal_to_fqcn(&call.owner),
            call.name,
            decode_method_signature(&format!("{}{}", call.name, call.descriptor))
                .parameter_types
                .join(", ")
        );
        if !seen.contains(&target) {
            out.push_str(&format!("    // calls {target}\n"));
            seen.push(target);
        }
    }
    out.push_str("}\n");
    out
}

fn class_declaration(class: &Class) -> String {
    let flags = class.access_flags;
    let mut parts = Vec::new();
    if flags & ACC_PUBLIC != 0 {
        parts.push("public");
    }
    let kind = if flags & ACC_ANNOTATION != 0 {
        "@interface"
    } else if is_interface(flags) {
        "interface"
    } else if flags & ACC_ENUM != 0 {
        "enum"
    } else {
        if flags & ACC_ABSTRACT != 0 {
            parts.push("abstract");
        }
        if flags & ACC_FINAL != 0 {
            parts.push("final");
        }
        "class"
    };
    parts.push(kind);
    let mut declaration = format!("{} {}", parts.join(" "), simple_class_name(&class.name));

    let interfaces: Vec<String> = class
        .interfaces
        .iter()
        .map(|name| internal_to_fqcn(name))
        .collect();
    if is_interface(flags) {
        if !interfaces.is_empty() {
            declaration.push_str(&format!(" extends {}", interfaces.join(", ")));
        }
        return declaration;
    }
    if let Some(super_name) = &class.super_name {
        if super_name != "java/lang/Object" && super_name != "java/lang/Enum" {
            declaration.push_str(&format!(" extends {}", internal_to_fqcn(super_name)));
        }
    }
    if !interfaces.is_empty() {
        declaration.push_str(&format!(" implements {}", interfaces.join(", ")));
    }
    declaration
}

/// Source-level name of a class: `Worker` for `com/example/Outer$Worker`.
pub(crate) fn simple_class_name(internal: &str) -> &str {
    let simple = internal.rsplit('/').next().unwrap_or(internal);
    simple.rsplit('$').next().unwrap_or(simple)
}

fn prefix(modifiers: &[&str]) -> String {
    if modifiers.is_empty() {
        String::new()
    } else {
        format!("{} ", modifiers.join(" "))
    }
}

fn indent(text: &str) -> String {
    text.lines()
        .map(|line| format!("    {line}\n"))
        .collect()
}
