use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use anyhow::Result;

use crate::descriptor::decode_method_signature;

/// Loader options passed to a decompiler backend.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct DecompileOptions {
    pub(crate) deobfuscation: bool,
    pub(crate) debug_info: bool,
    pub(crate) skip_resources: bool,
    /// Prefer the alternate bytecode reader when the backend has one.
    pub(crate) alternate_input: bool,
}

impl Default for DecompileOptions {
    fn default() -> Self {
        Self {
            deobfuscation: false,
            debug_info: false,
            skip_resources: true,
            alternate_input: true,
        }
    }
}

/// Everything a backend needs to open a session.
#[derive(Clone, Debug)]
pub(crate) struct LoadRequest {
    pub(crate) input: PathBuf,
    pub(crate) output: PathBuf,
    pub(crate) options: DecompileOptions,
}

/// Opens sessions over an input archive.
pub(crate) trait Decompiler: Send + Sync {
    fn load(&self, request: &LoadRequest) -> Result<Box<dyn Program>>;
}

/// A loaded decompiler session.
///
/// Handles returned by [`Program::classes`] are snapshots; callers re-read
/// them on every query so classes added by the backend are picked up.
pub(crate) trait Program: Send + Sync {
    fn classes(&self) -> Arc<Vec<ClassHandle>>;

    /// Decompiled source for a whole class.
    fn class_code(&self, class: &ClassHandle) -> Result<String>;

    /// Smali-style disassembly, or `None` when the backend has none for this class.
    fn class_smali(&self, class: &ClassHandle) -> Result<Option<String>>;

    fn method_code(&self, class: &ClassHandle, method: &MethodHandle) -> Result<String>;

    /// Release backend resources. Called once when the session is replaced or closed.
    fn close(&self) -> Result<()>;
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct ClassHandle {
    /// Dotted class name, e.g. `com.example.Foo$Inner`.
    pub(crate) full_name: String,
    pub(crate) methods: Vec<MethodHandle>,
    pub(crate) fields: Vec<FieldHandle>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct MethodHandle {
    pub(crate) name: String,
    /// Declaring class plus method name, e.g. `com.example.Foo.bar`.
    pub(crate) full_name: String,
    pub(crate) descriptor: String,
    pub(crate) arguments: Vec<String>,
    pub(crate) return_type: String,
    pub(crate) reverse_usages: Vec<MethodUsage>,
}

impl MethodHandle {
    /// Build a handle from a JVM descriptor, decoding readable argument types.
    pub(crate) fn from_descriptor(class_name: &str, name: &str, descriptor: &str) -> Self {
        let signature = decode_method_signature(&format!("{name}{descriptor}"));
        Self {
            name: name.to_string(),
            full_name: format!("{class_name}.{name}"),
            descriptor: descriptor.to_string(),
            arguments: signature.parameter_types,
            return_type: signature.return_type,
            reverse_usages: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct FieldHandle {
    pub(crate) name: String,
    pub(crate) full_name: String,
    pub(crate) type_name: String,
}

/// One call site that invokes a method.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub(crate) struct MethodUsage {
    /// Dotted name of the calling class.
    pub(crate) class_name: String,
    pub(crate) method_name: String,
    pub(crate) offset: u32,
}

/// Process-wide slot for the active session.
///
/// Readers clone the `Arc` and drop the lock right away, so a query in
/// flight keeps its session alive across a concurrent replace.
#[derive(Default)]
pub(crate) struct SessionHolder {
    active: RwLock<Option<Arc<dyn Program>>>,
    init_lock: Mutex<()>,
}

impl SessionHolder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get(&self) -> Option<Arc<dyn Program>> {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Publish a new session, returning the one it displaced.
    pub(crate) fn replace(&self, program: Arc<dyn Program>) -> Option<Arc<dyn Program>> {
        self.active
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(program)
    }

    pub(crate) fn take(&self) -> Option<Arc<dyn Program>> {
        self.active
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Serialize session initialization. Hold the guard across load and replace.
    pub(crate) fn init_guard(&self) -> MutexGuard<'_, ()> {
        self.init_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
