use std::collections::BTreeMap;
use std::fs;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use opentelemetry::KeyValue;
use tempfile::TempDir;

use crate::descriptor::{decode_type, internal_to_fqcn, parameter_type_matches};
use crate::external::ExternalCommand;
use crate::ir::Class;
use crate::render::{render_class_stub, render_method_stub, simple_class_name};
use crate::scan::scan_input;
use crate::session::{
    ClassHandle, DecompileOptions, Decompiler, FieldHandle, LoadRequest, MethodHandle,
    MethodUsage, Program,
};
use crate::smali::render_class;
use crate::telemetry::{Telemetry, with_span};
use crate::xref::{MethodId, build_call_graph};

/// Session backend over `.class`, `.jar` and `.zip` inputs.
pub(crate) struct ClassfileDecompiler {
    command: Option<ExternalCommand>,
    telemetry: Option<Arc<Telemetry>>,
}

impl ClassfileDecompiler {
    pub(crate) fn new(command: Option<ExternalCommand>, telemetry: Option<Arc<Telemetry>>) -> Self {
        Self { command, telemetry }
    }
}

impl Decompiler for ClassfileDecompiler {
    fn load(&self, request: &LoadRequest) -> Result<Box<dyn Program>> {
        check_options(request.options)?;
        let telemetry = self.telemetry.as_deref();
        let classes = scan_input(&request.input, telemetry)?;
        // Each session writes class files for the external command into its
        // own directory, so closing a replaced session leaves the new one intact.
        let scratch = match &self.command {
            Some(_) => {
                fs::create_dir_all(&request.output).with_context(|| {
                    format!("failed to create {}", request.output.display())
                })?;
                let dir = tempfile::Builder::new()
                    .prefix(".scratch-")
                    .tempdir_in(&request.output)
                    .with_context(|| {
                        format!("failed to create scratch dir in {}", request.output.display())
                    })?;
                Some(dir)
            }
            None => None,
        };
        let attributes = [KeyValue::new("classquery.class_count", classes.len() as i64)];
        let program = with_span(telemetry, "xref.build", &attributes, || {
            ClassfileProgram::new(classes, self.command.clone(), scratch)
        });
        Ok(Box::new(program))
    }
}

/// Reject load options this backend cannot honor.
fn check_options(options: DecompileOptions) -> Result<()> {
    if options.deobfuscation {
        anyhow::bail!("deobfuscation is not supported by the class-file backend");
    }
    if options.debug_info {
        anyhow::bail!("debug info listings are not supported by the class-file backend");
    }
    if !options.skip_resources {
        anyhow::bail!("resource extraction is not supported by the class-file backend");
    }
    if !options.alternate_input {
        anyhow::bail!("the class-file backend only reads JVM bytecode input");
    }
    Ok(())
}

pub(crate) struct ClassfileProgram {
    classes: Vec<Class>,
    by_name: BTreeMap<String, usize>,
    handles: Arc<Vec<ClassHandle>>,
    command: Option<ExternalCommand>,
    /// Present while the session is open and an external command is configured.
    scratch: Mutex<Option<TempDir>>,
}

impl ClassfileProgram {
    fn new(
        mut classes: Vec<Class>,
        command: Option<ExternalCommand>,
        scratch: Option<TempDir>,
    ) -> Self {
        classes.sort_by(|left, right| left.name.cmp(&right.name));
        classes.dedup_by(|left, right| left.name == right.name);
        let usages = build_call_graph(&classes).reverse_usages();

        let mut by_name = BTreeMap::new();
        let mut handles = Vec::with_capacity(classes.len());
        for (index, class) in classes.iter().enumerate() {
            let full_name = internal_to_fqcn(&class.name);
            let methods = class
                .methods
                .iter()
                .map(|method| {
                    let mut handle =
                        MethodHandle::from_descriptor(&full_name, &method.name, &method.descriptor);
                    let id = MethodId {
                        class_name: class.name.clone(),
                        name: method.name.clone(),
                        descriptor: method.descriptor.clone(),
                    };
                    if let Some(callers) = usages.get(&id) {
                        handle.reverse_usages = callers
                            .iter()
                            .map(|(caller, offset)| MethodUsage {
                                class_name: internal_to_fqcn(&caller.class_name),
                                method_name: caller.name.clone(),
                                offset: *offset,
                            })
                            .collect();
                    }
                    handle
                })
                .collect();
            let fields = class
                .fields
                .iter()
                .map(|field| FieldHandle {
                    name: field.name.clone(),
                    full_name: format!("{full_name}.{}", field.name),
                    type_name: decode_type(&field.descriptor),
                })
                .collect();
            by_name.insert(full_name.clone(), index);
            handles.push(ClassHandle {
                full_name,
                methods,
                fields,
            });
        }

        Self {
            classes,
            by_name,
            handles: Arc::new(handles),
            command,
            scratch: Mutex::new(scratch),
        }
    }

    fn class(&self, handle: &ClassHandle) -> Result<&Class> {
        self.by_name
            .get(&handle.full_name)
            .and_then(|index| self.classes.get(*index))
            .with_context(|| format!("{} is not part of this session", handle.full_name))
    }

    fn external_source(&self, class: &Class) -> Option<Result<String>> {
        let command = self.command.as_ref()?;
        let scratch = self.scratch.lock().unwrap_or_else(PoisonError::into_inner);
        let result = match scratch.as_ref() {
            Some(dir) => command.decompile(&class.name, &class.bytes, dir.path()),
            None => Err(anyhow::anyhow!("session is closed")),
        };
        Some(result)
    }
}

impl Program for ClassfileProgram {
    fn classes(&self) -> Arc<Vec<ClassHandle>> {
        self.handles.clone()
    }

    fn class_code(&self, handle: &ClassHandle) -> Result<String> {
        let class = self.class(handle)?;
        match self.external_source(class) {
            Some(source) => source,
            None => Ok(render_class_stub(class)),
        }
    }

    fn class_smali(&self, handle: &ClassHandle) -> Result<Option<String>> {
        let class = self.class(handle)?;
        Ok(Some(render_class(class)))
    }

    fn method_code(&self, handle: &ClassHandle, method: &MethodHandle) -> Result<String> {
        let class = self.class(handle)?;
        let declared = class
            .methods
            .iter()
            .find(|candidate| {
                candidate.name == method.name && candidate.descriptor == method.descriptor
            })
            .with_context(|| format!("{} has no method {}", handle.full_name, method.name))?;
        if let Some(source) = self.external_source(class) {
            let source = source?;
            let name = match method.name.as_str() {
                "<init>" => simple_class_name(&class.name),
                name => name,
            };
            if let Some(body) = extract_method_source(&source, name, &method.arguments) {
                return Ok(body);
            }
            tracing::debug!(method = %method.full_name, "method not located in decompiled source");
        }
        Ok(render_method_stub(class, declared))
    }

    fn close(&self) -> Result<()> {
        let scratch = self
            .scratch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(dir) = scratch {
            let path = dir.path().display().to_string();
            dir.close()
                .with_context(|| format!("failed to remove {path}"))?;
        }
        tracing::debug!(classes = self.classes.len(), "closed class-file session");
        Ok(())
    }
}

/// Cut the declaration of `name` whose parameters match `parameter_types` out of Java source.
///
/// Declarations without a body are skipped.
fn extract_method_source(source: &str, name: &str, parameter_types: &[String]) -> Option<String> {
    let lines: Vec<&str> = source.lines().collect();
    (0..lines.len()).find_map(|start| {
        let header = declaration_header(&lines[start..]);
        let declared = declared_parameters(&header, name)?;
        let matches = declared.len() == parameter_types.len()
            && declared
                .iter()
                .zip(parameter_types)
                .all(|(actual, expected)| {
                    parameter_type_matches(actual, &expected.replace('$', "."))
                });
        if !matches {
            return None;
        }
        let end = body_end(&lines, start)?;
        Some(lines[start..=end].join("\n"))
    })
}

/// The line at the start of `lines`, joined with following lines until its parameter list closes.
fn declaration_header(lines: &[&str]) -> String {
    let mut header = String::new();
    for line in lines {
        if !header.is_empty() {
            header.push(' ');
        }
        header.push_str(line.trim());
        if !header.contains('(') || header.contains(')') {
            break;
        }
    }
    header
}

/// Source-level parameter types when `header` declares `name`.
fn declared_parameters(header: &str, name: &str) -> Option<Vec<String>> {
    let needle = format!("{name}(");
    let at = header.find(&needle)?;
    let prefix = &header[..at];
    if !(prefix.is_empty() || prefix.ends_with(char::is_whitespace)) {
        return None;
    }
    // Statements such as `x = bar(1)` or `return new Foo(a)` are not declarations.
    let last_word = prefix.split_whitespace().last().unwrap_or_default();
    if prefix.contains(['=', '(', ';']) || matches!(last_word, "new" | "return" | "throw") {
        return None;
    }
    let rest = &header[at + needle.len()..];
    let list = &rest[..rest.find(')')?];
    Some(
        split_parameters(list)
            .into_iter()
            .filter_map(|parameter| parameter_type(&parameter))
            .collect(),
    )
}

/// Split a parameter list on commas outside generic arguments.
fn split_parameters(list: &str) -> Vec<String> {
    let mut parameters = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    for ch in list.chars() {
        match ch {
            '<' => depth += 1,
            '>' => depth -= 1,
            ',' if depth == 0 => {
                parameters.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(ch);
    }
    parameters.push(current);
    parameters
        .into_iter()
        .map(|parameter| parameter.trim().to_string())
        .filter(|parameter| !parameter.is_empty())
        .collect()
}

/// Type of one `final @Ann Type name` parameter, without generic arguments.
fn parameter_type(parameter: &str) -> Option<String> {
    let mut erased = String::new();
    let mut depth = 0i32;
    for ch in parameter.chars() {
        match ch {
            '<' => depth += 1,
            '>' => depth -= 1,
            _ if depth == 0 => erased.push(ch),
            _ => {}
        }
    }
    let tokens: Vec<&str> = erased
        .split_whitespace()
        .filter(|token| *token != "final" && !token.starts_with('@'))
        .collect();
    let (variable, type_tokens) = tokens.split_last()?;
    let mut type_name = type_tokens.concat().replace("...", "[]");
    // C-style `String args[]`.
    let dimensions = variable.matches("[]").count();
    type_name.push_str(&"[]".repeat(dimensions));
    Some(type_name)
}

/// Index of the line closing the body that opens at or after `start`.
fn body_end(lines: &[&str], start: usize) -> Option<usize> {
    let mut depth = 0i32;
    let mut opened = false;
    for (index, line) in lines.iter().enumerate().skip(start) {
        for ch in line.chars() {
            match ch {
                '{' => {
                    depth += 1;
                    opened = true;
                }
                '}' => depth -= 1,
                ';' if !opened => return None,
                _ => {}
            }
        }
        if opened && depth <= 0 {
            return Some(index);
        }
    }
    None
}
