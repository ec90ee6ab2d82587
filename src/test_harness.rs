use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use zip::write::SimpleFileOptions;

use crate::descriptor::decode_type;
use crate::session::{
    ClassHandle, Decompiler, FieldHandle, LoadRequest, MethodHandle, MethodUsage, Program,
};

/// Minimal class file writer for tests.
pub(crate) struct ClassFileBuilder {
    cp: Vec<CpEntry>,
    access_flags: u16,
    this_class: u16,
    super_class: u16,
    interfaces: Vec<u16>,
    fields: Vec<FieldSpec>,
    methods: Vec<MethodSpec>,
    code_index: u16,
}

impl ClassFileBuilder {
    pub(crate) fn new(class_name: &str, super_name: &str) -> Self {
        let mut builder = Self {
            cp: Vec::new(),
            access_flags: 0x0021,
            this_class: 0,
            super_class: 0,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            code_index: 0,
        };
        builder.code_index = builder.add_utf8("Code");
        builder.this_class = builder.add_class(class_name);
        builder.super_class = builder.add_class(super_name);
        builder
    }

    pub(crate) fn set_access_flags(&mut self, flags: u16) {
        self.access_flags = flags;
    }

    pub(crate) fn add_utf8(&mut self, value: &str) -> u16 {
        self.cp.push(CpEntry::Utf8(value.to_string()));
        self.cp.len() as u16
    }

    pub(crate) fn add_class(&mut self, name: &str) -> u16 {
        let name_index = self.add_utf8(name);
        self.cp.push(CpEntry::Class(name_index));
        self.cp.len() as u16
    }

    pub(crate) fn add_string(&mut self, value: &str) -> u16 {
        let utf8_index = self.add_utf8(value);
        self.cp.push(CpEntry::String(utf8_index));
        self.cp.len() as u16
    }

    pub(crate) fn add_name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let name_index = self.add_utf8(name);
        let descriptor_index = self.add_utf8(descriptor);
        self.cp
            .push(CpEntry::NameAndType(name_index, descriptor_index));
        self.cp.len() as u16
    }

    pub(crate) fn add_method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.add_class(class);
        let name_and_type = self.add_name_and_type(name, descriptor);
        self.cp.push(CpEntry::MethodRef(class_index, name_and_type));
        self.cp.len() as u16
    }

    pub(crate) fn add_field_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.add_class(class);
        let name_and_type = self.add_name_and_type(name, descriptor);
        self.cp.push(CpEntry::FieldRef(class_index, name_and_type));
        self.cp.len() as u16
    }

    pub(crate) fn add_interface(&mut self, name: &str) {
        let index = self.add_class(name);
        self.interfaces.push(index);
    }

    pub(crate) fn add_field(&mut self, name: &str, descriptor: &str, access_flags: u16) {
        let name_index = self.add_utf8(name);
        let descriptor_index = self.add_utf8(descriptor);
        self.fields.push(FieldSpec {
            access_flags,
            name_index,
            descriptor_index,
        });
    }

    /// Add a public method with a `Code` attribute.
    pub(crate) fn add_method(
        &mut self,
        name: &str,
        descriptor: &str,
        code: Vec<u8>,
        max_stack: u16,
        max_locals: u16,
    ) {
        self.add_method_with_flags(0x0001, name, descriptor, code, max_stack, max_locals);
    }

    pub(crate) fn add_method_with_flags(
        &mut self,
        access_flags: u16,
        name: &str,
        descriptor: &str,
        code: Vec<u8>,
        max_stack: u16,
        max_locals: u16,
    ) {
        let name_index = self.add_utf8(name);
        let descriptor_index = self.add_utf8(descriptor);
        self.methods.push(MethodSpec {
            access_flags,
            name_index,
            descriptor_index,
            code: Some(CodeSpec {
                code,
                max_stack,
                max_locals,
            }),
        });
    }

    /// Add a `public abstract` method without a `Code` attribute.
    pub(crate) fn add_abstract_method(&mut self, name: &str, descriptor: &str) {
        let name_index = self.add_utf8(name);
        let descriptor_index = self.add_utf8(descriptor);
        self.methods.push(MethodSpec {
            access_flags: 0x0401,
            name_index,
            descriptor_index,
            code: None,
        });
    }

    pub(crate) fn finish(self) -> Vec<u8> {
        let mut bytes = Vec::new();
        write_u32(&mut bytes, 0xCAFEBABE);
        write_u16(&mut bytes, 0);
        write_u16(&mut bytes, 52);
        write_u16(&mut bytes, (self.cp.len() + 1) as u16);
        for entry in &self.cp {
            entry.write(&mut bytes);
        }
        write_u16(&mut bytes, self.access_flags);
        write_u16(&mut bytes, self.this_class);
        write_u16(&mut bytes, self.super_class);
        write_u16(&mut bytes, self.interfaces.len() as u16);
        for interface in &self.interfaces {
            write_u16(&mut bytes, *interface);
        }
        write_u16(&mut bytes, self.fields.len() as u16);
        for field in &self.fields {
            write_u16(&mut bytes, field.access_flags);
            write_u16(&mut bytes, field.name_index);
            write_u16(&mut bytes, field.descriptor_index);
            write_u16(&mut bytes, 0);
        }
        write_u16(&mut bytes, self.methods.len() as u16);
        for method in &self.methods {
            write_u16(&mut bytes, method.access_flags);
            write_u16(&mut bytes, method.name_index);
            write_u16(&mut bytes, method.descriptor_index);
            let Some(code) = &method.code else {
                write_u16(&mut bytes, 0);
                continue;
            };
            write_u16(&mut bytes, 1);
            write_u16(&mut bytes, self.code_index);
            let attr_len = 12 + code.code.len() as u32;
            write_u32(&mut bytes, attr_len);
            write_u16(&mut bytes, code.max_stack);
            write_u16(&mut bytes, code.max_locals);
            write_u32(&mut bytes, code.code.len() as u32);
            bytes.extend_from_slice(&code.code);
            write_u16(&mut bytes, 0);
            write_u16(&mut bytes, 0);
        }
        write_u16(&mut bytes, 0);
        bytes
    }
}

struct FieldSpec {
    access_flags: u16,
    name_index: u16,
    descriptor_index: u16,
}

struct MethodSpec {
    access_flags: u16,
    name_index: u16,
    descriptor_index: u16,
    code: Option<CodeSpec>,
}

struct CodeSpec {
    code: Vec<u8>,
    max_stack: u16,
    max_locals: u16,
}

/// Constant pool entries the builder can emit.
enum CpEntry {
    Utf8(String),
    Class(u16),
    String(u16),
    NameAndType(u16, u16),
    FieldRef(u16, u16),
    MethodRef(u16, u16),
}

impl CpEntry {
    fn write(&self, bytes: &mut Vec<u8>) {
        match self {
            CpEntry::Utf8(value) => {
                bytes.push(1);
                write_u16(bytes, value.len() as u16);
                bytes.extend_from_slice(value.as_bytes());
            }
            CpEntry::Class(name_index) => {
                bytes.push(7);
                write_u16(bytes, *name_index);
            }
            CpEntry::String(utf8_index) => {
                bytes.push(8);
                write_u16(bytes, *utf8_index);
            }
            CpEntry::NameAndType(name_index, descriptor_index) => {
                bytes.push(12);
                write_u16(bytes, *name_index);
                write_u16(bytes, *descriptor_index);
            }
            CpEntry::FieldRef(class_index, name_and_type) => {
                bytes.push(9);
                write_u16(bytes, *class_index);
                write_u16(bytes, *name_and_type);
            }
            CpEntry::MethodRef(class_index, name_and_type) => {
                bytes.push(10);
                write_u16(bytes, *class_index);
                write_u16(bytes, *name_and_type);
            }
        }
    }
}

fn write_u16(bytes: &mut Vec<u8>, value: u16) {
    bytes.extend_from_slice(&value.to_be_bytes());
}

fn write_u32(bytes: &mut Vec<u8>, value: u32) {
    bytes.extend_from_slice(&value.to_be_bytes());
}

/// Write a jar holding the given `(entry name, bytes)` pairs.
pub(crate) fn write_jar(path: &Path, entries: &[(&str, Vec<u8>)]) -> Result<()> {
    let file = fs::File::create(path).with_context(|| format!("create {}", path.display()))?;
    let mut writer = zip::ZipWriter::new(file);
    for (name, data) in entries {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .with_context(|| format!("start entry {name}"))?;
        writer
            .write_all(data)
            .with_context(|| format!("write entry {name}"))?;
    }
    writer.finish().context("finish jar")?;
    Ok(())
}

/// In-memory session whose classes can change while it is active.
#[derive(Clone, Default)]
pub(crate) struct FakeProgram {
    state: Arc<FakeState>,
}

#[derive(Default)]
struct FakeState {
    classes: Mutex<Arc<Vec<ClassHandle>>>,
    smali: Mutex<BTreeMap<String, String>>,
    code: Mutex<BTreeMap<String, String>>,
    closed: AtomicBool,
    close_counter: Option<Arc<AtomicUsize>>,
}

impl FakeProgram {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn with_close_counter(counter: Arc<AtomicUsize>) -> Self {
        Self {
            state: Arc::new(FakeState {
                close_counter: Some(counter),
                ..FakeState::default()
            }),
        }
    }

    /// A class handle with no members.
    pub(crate) fn class(full_name: &str) -> ClassHandle {
        Self::class_with(full_name, &[], &[])
    }

    /// A class handle with `(name, descriptor)` methods and `(name, descriptor)` fields.
    pub(crate) fn class_with(
        full_name: &str,
        methods: &[(&str, &str)],
        fields: &[(&str, &str)],
    ) -> ClassHandle {
        ClassHandle {
            full_name: full_name.to_string(),
            methods: methods
                .iter()
                .map(|(name, descriptor)| {
                    MethodHandle::from_descriptor(full_name, name, descriptor)
                })
                .collect(),
            fields: fields
                .iter()
                .map(|(name, descriptor)| FieldHandle {
                    name: name.to_string(),
                    full_name: format!("{full_name}.{name}"),
                    type_name: decode_type(descriptor),
                })
                .collect(),
        }
    }

    pub(crate) fn add_class(&self, class: ClassHandle) {
        let mut guard = self
            .state
            .classes
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::make_mut(&mut *guard).push(class);
    }

    /// Add a class together with a Smali header naming its superclass and interfaces.
    pub(crate) fn add_class_with_smali(
        &self,
        class: ClassHandle,
        super_name: &str,
        interfaces: &[&str],
    ) {
        let mut smali = format!(
            ".class public L{};\n.super L{};\n",
            class.full_name.replace('.', "/"),
            super_name.replace('.', "/")
        );
        for interface in interfaces {
            smali.push_str(&format!(".implements L{};\n", interface.replace('.', "/")));
        }
        self.set_smali(&class.full_name, &smali);
        self.add_class(class);
    }

    pub(crate) fn set_smali(&self, class_name: &str, smali: &str) {
        self.state
            .smali
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(class_name.to_string(), smali.to_string());
    }

    pub(crate) fn set_code(&self, class_name: &str, code: &str) {
        self.state
            .code
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(class_name.to_string(), code.to_string());
    }

    /// Record that `caller_class.caller_method` invokes `class_name.method_name`.
    pub(crate) fn add_usage(
        &self,
        class_name: &str,
        method_name: &str,
        caller_class: &str,
        caller_method: &str,
    ) {
        let mut guard = self
            .state
            .classes
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let classes = Arc::make_mut(&mut *guard);
        let methods = classes
            .iter_mut()
            .filter(|class| class.full_name == class_name)
            .flat_map(|class| class.methods.iter_mut())
            .filter(|method| method.name == method_name);
        for method in methods {
            let offset = method.reverse_usages.len() as u32;
            method.reverse_usages.push(MethodUsage {
                class_name: caller_class.to_string(),
                method_name: caller_method.to_string(),
                offset,
            });
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }
}

impl Program for FakeProgram {
    fn classes(&self) -> Arc<Vec<ClassHandle>> {
        self.state
            .classes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn class_code(&self, class: &ClassHandle) -> Result<String> {
        self.state
            .code
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&class.full_name)
            .cloned()
            .with_context(|| format!("no source recorded for {}", class.full_name))
    }

    fn class_smali(&self, class: &ClassHandle) -> Result<Option<String>> {
        Ok(self
            .state
            .smali
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&class.full_name)
            .cloned())
    }

    fn method_code(&self, _class: &ClassHandle, method: &MethodHandle) -> Result<String> {
        Ok(format!(
            "{} {}({})",
            method.return_type,
            method.name,
            method.arguments.join(", ")
        ))
    }

    fn close(&self) -> Result<()> {
        self.state.closed.store(true, Ordering::SeqCst);
        if let Some(counter) = &self.state.close_counter {
            counter.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Loader handing out [`FakeProgram`]s seeded with a fixed class list.
#[derive(Default)]
pub(crate) struct FakeDecompiler {
    seed: Vec<ClassHandle>,
    failure: Option<String>,
    loads: Mutex<Vec<LoadRequest>>,
    closes: Arc<AtomicUsize>,
    last: Mutex<Option<FakeProgram>>,
}

impl FakeDecompiler {
    pub(crate) fn new(seed: Vec<ClassHandle>) -> Self {
        Self {
            seed,
            ..Self::default()
        }
    }

    /// A loader whose every load fails with `message`.
    pub(crate) fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub(crate) fn load_requests(&self) -> Vec<LoadRequest> {
        self.loads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// The most recently loaded program, sharing state with the active session.
    pub(crate) fn last_program(&self) -> Option<FakeProgram> {
        self.last
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Decompiler for FakeDecompiler {
    fn load(&self, request: &LoadRequest) -> Result<Box<dyn Program>> {
        self.loads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        if let Some(message) = &self.failure {
            anyhow::bail!("{message}");
        }
        let program = FakeProgram::with_close_counter(self.closes.clone());
        for class in &self.seed {
            program.add_class(class.clone());
        }
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Some(program.clone());
        Ok(Box::new(program))
    }
}
