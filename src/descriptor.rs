use std::str::FromStr;

use anyhow::{Context, Result};
use jdescriptor::MethodDescriptor;
use serde::Serialize;

/// Count parameters in a JVM method descriptor.
pub(crate) fn method_param_count(descriptor: &str) -> Result<usize> {
    let descriptor =
        MethodDescriptor::from_str(descriptor).context("parse method descriptor")?;
    Ok(descriptor.parameter_types().len())
}

/// Method name and readable types decoded from a `name(params)return` signature.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub(crate) struct MethodSignature {
    pub(crate) method_name: String,
    pub(crate) parameter_types: Vec<String>,
    pub(crate) return_type: String,
}

/// Decode a method signature such as `test2(Ljava/lang/String;)V`.
///
/// Never fails: malformed input yields best-effort output. Without a `(` after
/// at least one name character, the whole input is the method name, with no
/// parameters and a `void` return.
pub(crate) fn decode_method_signature(signature: &str) -> MethodSignature {
    let Some(open) = signature.find('(').filter(|open| *open > 0) else {
        return MethodSignature {
            method_name: signature.to_string(),
            parameter_types: Vec::new(),
            return_type: "void".to_string(),
        };
    };
    let method_name = signature[..open].to_string();
    let close = signature.rfind(')');

    let parameter_types = match close {
        Some(close) if close > open + 1 => decode_type_list(&signature[open + 1..close]),
        _ => Vec::new(),
    };
    let return_type = match close {
        Some(close) if close + 1 < signature.len() => {
            let (ty, _) = next_type(&signature[close + 1..]);
            ty
        }
        _ => "void".to_string(),
    };

    MethodSignature {
        method_name,
        parameter_types,
        return_type,
    }
}

/// Decode a run of concatenated type descriptors, e.g. `ILjava/lang/String;[J`.
pub(crate) fn decode_type_list(descriptors: &str) -> Vec<String> {
    let mut types = Vec::new();
    let mut rest = descriptors;
    while !rest.is_empty() {
        let (ty, remaining) = next_type(rest);
        types.push(ty);
        rest = remaining;
    }
    types
}

/// Decode a single field descriptor into a readable type name.
pub(crate) fn decode_type(descriptor: &str) -> String {
    if descriptor.is_empty() {
        return String::new();
    }
    next_type(descriptor).0
}

fn next_type(input: &str) -> (String, &str) {
    // Array dimensions are counted up front so deeply nested input cannot
    // exhaust the stack.
    let dimensions = input.bytes().take_while(|byte| *byte == b'[').count();
    let component = &input[dimensions..];
    let (mut ty, rest) = next_component(component);
    for _ in 0..dimensions {
        ty.push_str("[]");
    }
    (ty, rest)
}

fn next_component(input: &str) -> (String, &str) {
    let mut chars = input.chars();
    let Some(first) = chars.next() else {
        return (String::new(), input);
    };
    if first == 'L' {
        return match input.find(';') {
            Some(end) => (input[1..end].replace('/', "."), &input[end + 1..]),
            None => (input.to_string(), ""),
        };
    }
    let ty = match primitive_name(first) {
        Some(name) => name.to_string(),
        None => first.to_string(),
    };
    (ty, chars.as_str())
}

const PRIMITIVES: [(char, &str); 9] = [
    ('Z', "boolean"),
    ('B', "byte"),
    ('C', "char"),
    ('S', "short"),
    ('I', "int"),
    ('J', "long"),
    ('F', "float"),
    ('D', "double"),
    ('V', "void"),
];

/// Readable name for a one-letter primitive descriptor.
pub(crate) fn primitive_name(code: char) -> Option<&'static str> {
    PRIMITIVES
        .iter()
        .find(|(candidate, _)| *candidate == code)
        .map(|(_, name)| *name)
}

/// One-letter descriptor for a primitive type name.
pub(crate) fn primitive_descriptor(name: &str) -> Option<char> {
    PRIMITIVES
        .iter()
        .find(|(_, candidate)| *candidate == name)
        .map(|(code, _)| *code)
}

/// Convert an internal class name (`com/example/Foo`) to a dotted name.
pub(crate) fn internal_to_fqcn(internal: &str) -> String {
    internal.replace('/', ".")
}

/// Descriptor for a readable type name: `int[]` becomes `[I`, `com.example.Foo` becomes
/// `Lcom/example/Foo;`.
pub(crate) fn encode_type(type_name: &str) -> String {
    let component = type_name.trim_end_matches("[]");
    let dimensions = (type_name.len() - component.len()) / 2;
    let mut descriptor = "[".repeat(dimensions);
    match primitive_descriptor(component) {
        Some(code) => descriptor.push(code),
        None => {
            descriptor.push('L');
            descriptor.push_str(&component.replace('.', "/"));
            descriptor.push(';');
        }
    }
    descriptor
}

/// Compare parameter types by last dotted segment, ignoring case.
///
/// One `[]` is stripped from each side, so arrays only match arrays.
pub(crate) fn parameter_type_matches(actual: &str, expected: &str) -> bool {
    let (actual, actual_array) = strip_array(actual);
    let (expected, expected_array) = strip_array(expected);
    actual_array == expected_array
        && simple_type_name(actual).eq_ignore_ascii_case(simple_type_name(expected))
}

fn strip_array(type_name: &str) -> (&str, bool) {
    match type_name.strip_suffix("[]") {
        Some(component) => (component, true),
        None => (type_name, false),
    }
}

/// Last dotted segment of a type name, e.g. `String[]` for `java.lang.String[]`.
fn simple_type_name(type_name: &str) -> &str {
    type_name
        .rsplit_once('.')
        .map(|(_, simple)| simple)
        .unwrap_or(type_name)
}
