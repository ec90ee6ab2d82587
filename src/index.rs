use std::fs;
use std::path::Path;
use std::sync::{Arc, LazyLock};

use opentelemetry::KeyValue;
use rayon::prelude::*;
use regex::Regex;
use serde::Serialize;

use crate::descriptor::{
    MethodSignature, decode_method_signature, encode_type, parameter_type_matches,
};
use crate::error::{QueryError, QueryResult};
use crate::session::{
    ClassHandle, DecompileOptions, Decompiler, LoadRequest, MethodHandle, Program, SessionHolder,
};
use crate::smali::method_blocks;
use crate::telemetry::{Telemetry, with_span};

static SUPER_DIRECTIVE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.super\s+L([\w/$]+);").expect("valid .super pattern"));

/// Result of a successful `init_session`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub(crate) struct SessionSummary {
    pub(crate) class_count: usize,
    pub(crate) input: String,
    pub(crate) output: String,
}

/// Query facade over the active decompiler session.
pub(crate) struct CodeIndex {
    holder: Arc<SessionHolder>,
    decompiler: Arc<dyn Decompiler>,
    options: DecompileOptions,
    telemetry: Option<Arc<Telemetry>>,
}

impl CodeIndex {
    pub(crate) fn new(
        holder: Arc<SessionHolder>,
        decompiler: Arc<dyn Decompiler>,
        telemetry: Option<Arc<Telemetry>>,
    ) -> Self {
        Self {
            holder,
            decompiler,
            options: DecompileOptions::default(),
            telemetry,
        }
    }

    pub(crate) fn telemetry(&self) -> Option<&Telemetry> {
        self.telemetry.as_deref()
    }

    /// Load `input` and make it the active session, closing any previous one.
    pub(crate) fn init_session(&self, input: &Path, output: &Path) -> QueryResult<SessionSummary> {
        tracing::info!(
            input = %input.display(),
            output = %output.display(),
            "initializing session"
        );
        if !input.is_file() {
            return Err(QueryError::InvalidInput(format!(
                "input file does not exist: {}",
                input.display()
            )));
        }
        fs::create_dir_all(output).map_err(|err| {
            QueryError::internal(
                format!("failed to create output directory {}", output.display()),
                &err.into(),
            )
        })?;

        let _guard = self.holder.init_guard();
        let request = LoadRequest {
            input: input.to_path_buf(),
            output: output.to_path_buf(),
            options: self.options,
        };
        let attributes = [
            KeyValue::new("classquery.input", input.display().to_string()),
            KeyValue::new("classquery.output", output.display().to_string()),
        ];
        let loaded = with_span(self.telemetry(), "session.init", &attributes, || {
            self.decompiler.load(&request)
        })
        .map_err(|err| {
            tracing::error!(error = %format!("{err:#}"), "session initialization failed");
            QueryError::internal("failed to initialize decompiler", &err)
        })?;
        let program: Arc<dyn Program> = Arc::from(loaded);
        let class_count = program.classes().len();

        if let Some(previous) = self.holder.replace(program) {
            if let Err(err) = previous.close() {
                tracing::warn!(error = %format!("{err:#}"), "failed to close previous session");
            }
        }
        tracing::info!(class_count, "session initialized");
        Ok(SessionSummary {
            class_count,
            input: input.display().to_string(),
            output: output.display().to_string(),
        })
    }

    pub(crate) fn close_session(&self) -> QueryResult<()> {
        let _guard = self.holder.init_guard();
        let program = self.holder.take().ok_or(QueryError::NotInitialized)?;
        program
            .close()
            .map_err(|err| QueryError::internal("failed to close session", &err))?;
        tracing::info!("session closed");
        Ok(())
    }

    pub(crate) fn get_class_code(&self, class_name: &str) -> QueryResult<String> {
        tracing::info!(class = class_name, "getting class code");
        let program = self.session()?;
        let class = find_class(program.as_ref(), class_name)?;
        program
            .class_code(&class)
            .map_err(|err| QueryError::internal("failed to get class code", &err))
    }

    /// Source of the first method whose name and parameter types match `signature`.
    pub(crate) fn get_method_code(&self, class_name: &str, signature: &str) -> QueryResult<String> {
        tracing::info!(class = class_name, method = signature, "getting method code");
        let program = self.session()?;
        let class = find_class(program.as_ref(), class_name)?;
        let wanted = decode_method_signature(signature);
        let method = class
            .methods
            .iter()
            .find(|method| signature_matches(method, &wanted))
            .ok_or_else(|| QueryError::MethodNotFound {
                class: class_name.to_string(),
                method: signature.to_string(),
            })?;
        program
            .method_code(&class, method)
            .map_err(|err| QueryError::internal("failed to get method code", &err))
    }

    pub(crate) fn get_all_classes(&self) -> QueryResult<Vec<String>> {
        let program = self.session()?;
        let names: Vec<String> = program
            .classes()
            .iter()
            .map(|class| class.full_name.clone())
            .collect();
        tracing::info!(count = names.len(), "listed classes");
        Ok(names)
    }

    /// Methods whose simple name equals `method_name`, as `returnType owner.name(args)`.
    pub(crate) fn search_method_by_name(&self, method_name: &str) -> QueryResult<Vec<String>> {
        let program = self.session()?;
        let results: Vec<String> = program
            .classes()
            .iter()
            .flat_map(|class| class.methods.iter())
            .filter(|method| method.name == method_name)
            .map(|method| {
                format!(
                    "{} {}({})",
                    method.return_type,
                    method.full_name,
                    method.arguments.join(", ")
                )
            })
            .collect();
        tracing::info!(method = method_name, count = results.len(), "searched methods");
        non_empty(results, || format!("No methods found with name: {method_name}"))
    }

    pub(crate) fn get_methods_of_class(&self, class_name: &str) -> QueryResult<Vec<String>> {
        let program = self.session()?;
        let class = find_class(program.as_ref(), class_name)?;
        let names = class
            .methods
            .iter()
            .map(|method| method.full_name.clone())
            .collect();
        non_empty(names, || format!("No methods found in class: {class_name}"))
    }

    pub(crate) fn get_fields_of_class(&self, class_name: &str) -> QueryResult<Vec<String>> {
        let program = self.session()?;
        let class = find_class(program.as_ref(), class_name)?;
        let names = class
            .fields
            .iter()
            .map(|field| field.full_name.clone())
            .collect();
        non_empty(names, || format!("No fields found in class: {class_name}"))
    }

    pub(crate) fn get_smali_of_class(&self, class_name: &str) -> QueryResult<String> {
        tracing::info!(class = class_name, "getting smali");
        let program = self.session()?;
        let class = find_class(program.as_ref(), class_name)?;
        class_smali(program.as_ref(), &class)
    }

    /// `.method` blocks for `method_name`, or for the decoded signature when it contains `(`.
    pub(crate) fn get_smali_of_method(
        &self,
        class_name: &str,
        method_name: &str,
    ) -> QueryResult<String> {
        let program = self.session()?;
        let class = find_class(program.as_ref(), class_name)?;
        let smali = class_smali(program.as_ref(), &class)?;
        let wanted = method_name
            .contains('(')
            .then(|| decode_method_signature(method_name));
        let blocks: Vec<&str> = method_blocks(&smali)
            .into_iter()
            .filter(|block| match &wanted {
                Some(wanted) => {
                    let declared =
                        decode_method_signature(&format!("{}{}", block.name, block.descriptor));
                    block.name == wanted.method_name && parameters_match(&declared, wanted)
                }
                None => block.name == method_name,
            })
            .map(|block| block.text)
            .collect();
        if blocks.is_empty() {
            return Err(QueryError::MethodNotFound {
                class: class_name.to_string(),
                method: method_name.to_string(),
            });
        }
        Ok(blocks.join("\n\n"))
    }

    pub(crate) fn get_superclass_of_class(&self, class_name: &str) -> QueryResult<String> {
        let program = self.session()?;
        let class = find_class(program.as_ref(), class_name)?;
        let smali = class_smali(program.as_ref(), &class)?;
        let superclass = SUPER_DIRECTIVE
            .captures(&smali)
            .and_then(|captures| captures.get(1))
            .map(|name| name.as_str().replace('/', "."))
            .ok_or_else(|| {
                QueryError::NoResultsFound(format!("No superclass found for class: {class_name}"))
            })?;
        tracing::info!(class = class_name, superclass = %superclass, "found superclass");
        Ok(superclass)
    }

    /// Direct subclasses, found by scanning every class's listing in the current session.
    pub(crate) fn get_subclasses_of_class(&self, class_name: &str) -> QueryResult<Vec<String>> {
        let program = self.session()?;
        find_class(program.as_ref(), class_name)?;
        let directive = format!(".super {}", encode_type(class_name));
        let subclasses = scan_listings(program.as_ref(), |line| line == directive);
        tracing::info!(class = class_name, count = subclasses.len(), "found subclasses");
        non_empty(subclasses, || format!("No subclasses found for class: {class_name}"))
    }

    /// Classes whose listing declares `.implements` of the interface.
    ///
    /// The interface itself need not be in the session.
    pub(crate) fn get_implementations_of_interface(
        &self,
        interface_name: &str,
    ) -> QueryResult<Vec<String>> {
        let program = self.session()?;
        let directive = format!(".implements {}", encode_type(interface_name));
        let implementations =
            scan_listings(program.as_ref(), |line| line.contains(directive.as_str()));
        tracing::info!(
            interface = interface_name,
            count = implementations.len(),
            "found implementations"
        );
        non_empty(implementations, || {
            format!("No implementations found for interface: {interface_name}")
        })
    }

    /// Callers of a method as `callerClass.callerMethod`, one entry per call site.
    pub(crate) fn find_xref_of_method(
        &self,
        class_name: &str,
        method_name: &str,
    ) -> QueryResult<Vec<String>> {
        let program = self.session()?;
        let class = find_class(program.as_ref(), class_name)?;
        let targets: Vec<&MethodHandle> = if method_name.contains('(') {
            let wanted = decode_method_signature(method_name);
            class
                .methods
                .iter()
                .find(|method| signature_matches(method, &wanted))
                .into_iter()
                .collect()
        } else {
            class
                .methods
                .iter()
                .filter(|method| method.name == method_name)
                .collect()
        };
        if targets.is_empty() {
            return Err(QueryError::MethodNotFound {
                class: class_name.to_string(),
                method: method_name.to_string(),
            });
        }
        let references: Vec<String> = targets
            .iter()
            .flat_map(|method| method.reverse_usages.iter())
            .map(|usage| format!("{}.{}", usage.class_name, usage.method_name))
            .collect();
        tracing::info!(
            class = class_name,
            method = method_name,
            count = references.len(),
            "found cross-references"
        );
        non_empty(references, || {
            format!("No references found for method: {method_name} in class {class_name}")
        })
    }

    fn session(&self) -> QueryResult<Arc<dyn Program>> {
        self.holder.get().ok_or_else(|| {
            tracing::warn!("query issued before init_session");
            QueryError::NotInitialized
        })
    }
}

fn find_class(program: &dyn Program, class_name: &str) -> QueryResult<ClassHandle> {
    program
        .classes()
        .iter()
        .find(|class| class.full_name == class_name)
        .cloned()
        .ok_or_else(|| QueryError::ClassNotFound(class_name.to_string()))
}

fn class_smali(program: &dyn Program, class: &ClassHandle) -> QueryResult<String> {
    program
        .class_smali(class)
        .map_err(|err| QueryError::internal("failed to get smali code", &err))?
        .ok_or_else(|| {
            QueryError::NoResultsFound(format!(
                "Smali code not available for class: {}",
                class.full_name
            ))
        })
}

/// Names of classes with a listing line satisfying `matches`, in session order.
fn scan_listings<F>(program: &dyn Program, matches: F) -> Vec<String>
where
    F: Fn(&str) -> bool + Sync,
{
    let classes = program.classes();
    classes
        .par_iter()
        .filter_map(|class| match program.class_smali(class) {
            Ok(Some(smali)) => smali
                .lines()
                .any(|line| matches(line.trim()))
                .then(|| class.full_name.clone()),
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(
                    class = %class.full_name,
                    error = %format!("{err:#}"),
                    "skipping class without listing"
                );
                None
            }
        })
        .collect()
}

fn non_empty<F>(items: Vec<String>, message: F) -> QueryResult<Vec<String>>
where
    F: FnOnce() -> String,
{
    if items.is_empty() {
        Err(QueryError::NoResultsFound(message()))
    } else {
        Ok(items)
    }
}

fn signature_matches(method: &MethodHandle, wanted: &MethodSignature) -> bool {
    method.name == wanted.method_name
        && method.arguments.len() == wanted.parameter_types.len()
        && method
            .arguments
            .iter()
            .zip(&wanted.parameter_types)
            .all(|(actual, expected)| parameter_type_matches(actual, expected))
}

fn parameters_match(declared: &MethodSignature, wanted: &MethodSignature) -> bool {
    declared.parameter_types.len() == wanted.parameter_types.len()
        && declared
            .parameter_types
            .iter()
            .zip(&wanted.parameter_types)
            .all(|(actual, expected)| parameter_type_matches(actual, expected))
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_harness::{FakeDecompiler, FakeProgram};

    struct Fixture {
        index: CodeIndex,
        decompiler: Arc<FakeDecompiler>,
        temp_dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new(seed: Vec<ClassHandle>) -> Self {
            let decompiler = Arc::new(FakeDecompiler::new(seed));
            let index = CodeIndex::new(Arc::new(SessionHolder::new()), decompiler.clone(), None);
            let temp_dir = tempfile::tempdir().expect("temp dir");
            fs::write(temp_dir.path().join("app.jar"), b"PK").expect("write input");
            Self {
                index,
                decompiler,
                temp_dir,
            }
        }

        fn init(&self) -> SessionSummary {
            self.index
                .init_session(
                    &self.temp_dir.path().join("app.jar"),
                    &self.temp_dir.path().join("out"),
                )
                .expect("init session")
        }

        fn program(&self) -> FakeProgram {
            self.decompiler.last_program().expect("loaded program")
        }
    }

    fn foo_class() -> ClassHandle {
        FakeProgram::class_with(
            "com.example.Foo",
            &[
                ("bar", "(I)V"),
                ("bar", "(Ljava/lang/String;I)V"),
                ("items", "([[Ljava/lang/String;)Ljava/util/List;"),
                ("<init>", "()V"),
            ],
            &[("count", "I"), ("name", "Ljava/lang/String;")],
        )
    }

    #[test]
    fn every_query_requires_a_session() {
        let fixture = Fixture::new(vec![foo_class()]);
        let index = &fixture.index;
        let name = "com.example.Foo";

        let errors = vec![
            index.get_class_code(name).err(),
            index.get_method_code(name, "bar(I)V").err(),
            index.get_all_classes().err(),
            index.search_method_by_name("bar").err(),
            index.get_methods_of_class(name).err(),
            index.get_fields_of_class(name).err(),
            index.get_smali_of_class(name).err(),
            index.get_smali_of_method(name, "bar").err(),
            index.get_superclass_of_class(name).err(),
            index.get_subclasses_of_class(name).err(),
            index.get_implementations_of_interface("java.lang.Runnable").err(),
            index.find_xref_of_method(name, "bar").err(),
            index.close_session().err(),
        ];

        for error in errors {
            assert_eq!(error, Some(QueryError::NotInitialized));
        }
    }

    #[test]
    fn missing_class_is_distinct_from_missing_session() {
        let fixture = Fixture::new(vec![foo_class()]);
        fixture.init();

        let error = fixture.index.get_class_code("com.example.Missing").err();

        assert_eq!(
            error,
            Some(QueryError::ClassNotFound("com.example.Missing".to_string()))
        );
    }

    #[test]
    fn init_rejects_missing_input_and_passes_fixed_options() {
        let fixture = Fixture::new(Vec::new());
        let error = fixture
            .index
            .init_session(Path::new("/nonexistent/app.jar"), fixture.temp_dir.path())
            .err();
        assert!(matches!(error, Some(QueryError::InvalidInput(_))));

        let summary = fixture.init();

        assert_eq!(summary.class_count, 0);
        assert!(fixture.temp_dir.path().join("out").is_dir());
        let requests = fixture.decompiler.load_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].options, DecompileOptions::default());
        assert!(!requests[0].options.deobfuscation);
        assert!(requests[0].options.skip_resources);
    }

    #[test]
    fn init_failure_keeps_message_chain() {
        let decompiler = Arc::new(FakeDecompiler::failing("corrupt archive"));
        let index = CodeIndex::new(Arc::new(SessionHolder::new()), decompiler, None);
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let input = temp_dir.path().join("app.jar");
        fs::write(&input, b"PK").expect("write input");

        let error = index
            .init_session(&input, &temp_dir.path().join("out"))
            .err()
            .expect("init error");

        assert_eq!(error.to_string(), "failed to initialize decompiler: corrupt archive");
        assert_eq!(index.get_all_classes().err(), Some(QueryError::NotInitialized));
    }

    #[test]
    fn reinit_replaces_and_closes_previous_session() {
        let fixture = Fixture::new(vec![foo_class()]);
        fixture.init();
        let first = fixture.program();

        fixture.init();

        assert!(first.is_closed());
        assert_eq!(fixture.decompiler.close_count(), 1);
        assert!(!fixture.program().is_closed());
    }

    #[test]
    fn close_session_tears_down_active_session() {
        let fixture = Fixture::new(vec![foo_class()]);
        fixture.init();

        fixture.index.close_session().expect("close session");

        assert!(fixture.program().is_closed());
        assert_eq!(fixture.index.get_all_classes().err(), Some(QueryError::NotInitialized));
    }

    #[test]
    fn method_code_matches_on_arity_and_parameter_types() {
        let fixture = Fixture::new(vec![foo_class()]);
        fixture.init();
        let index = &fixture.index;

        let one = index
            .get_method_code("com.example.Foo", "bar(I)V")
            .expect("bar(int)");
        let two = index
            .get_method_code("com.example.Foo", "bar(Ljava/lang/String;I)V")
            .expect("bar(String, int)");

        assert_eq!(one, "void bar(int)");
        assert_eq!(two, "void bar(java.lang.String, int)");
        assert_eq!(
            index.get_method_code("com.example.Foo", "bar(IJ)V").err(),
            Some(QueryError::MethodNotFound {
                class: "com.example.Foo".to_string(),
                method: "bar(IJ)V".to_string(),
            })
        );
    }

    #[test]
    fn method_code_compares_simple_names_and_array_shape() {
        let fixture = Fixture::new(vec![foo_class()]);
        fixture.init();
        let index = &fixture.index;

        assert!(index
            .get_method_code("com.example.Foo", "items([[Lother/pkg/string;)V")
            .is_ok());
        assert!(index
            .get_method_code("com.example.Foo", "items(Ljava/lang/String;)V")
            .is_err());
        assert!(index
            .get_method_code("com.example.Foo", "bar([I)V")
            .is_err());
    }

    #[test]
    fn listings_and_members_are_reported() {
        let fixture = Fixture::new(vec![foo_class()]);
        fixture.init();
        let index = &fixture.index;

        assert_eq!(index.get_all_classes().expect("classes"), vec!["com.example.Foo"]);
        assert_eq!(
            index.get_fields_of_class("com.example.Foo").expect("fields"),
            vec!["com.example.Foo.count", "com.example.Foo.name"]
        );
        assert_eq!(
            index.get_methods_of_class("com.example.Foo").expect("methods")[0],
            "com.example.Foo.bar"
        );
        assert_eq!(
            index.search_method_by_name("items").expect("search"),
            vec!["java.util.List com.example.Foo.items(java.lang.String[][])"]
        );
        assert_eq!(
            index.search_method_by_name("com.example.Foo.items").err(),
            Some(QueryError::NoResultsFound(
                "No methods found with name: com.example.Foo.items".to_string()
            ))
        );
    }

    #[test]
    fn empty_member_lists_are_soft_failures() {
        let fixture = Fixture::new(vec![FakeProgram::class("com.example.Empty")]);
        fixture.init();

        assert!(matches!(
            fixture.index.get_methods_of_class("com.example.Empty"),
            Err(QueryError::NoResultsFound(_))
        ));
        assert!(matches!(
            fixture.index.get_fields_of_class("com.example.Empty"),
            Err(QueryError::NoResultsFound(_))
        ));
    }

    #[test]
    fn class_code_failure_is_internal() {
        let fixture = Fixture::new(vec![foo_class()]);
        fixture.init();

        let error = fixture.index.get_class_code("com.example.Foo").err();
        assert!(matches!(error, Some(QueryError::Internal { .. })));

        fixture.program().set_code("com.example.Foo", "class Foo {}");
        assert_eq!(
            fixture.index.get_class_code("com.example.Foo").expect("code"),
            "class Foo {}"
        );
    }

    #[test]
    fn superclass_comes_from_smali_header() {
        let fixture = Fixture::new(Vec::new());
        fixture.init();
        let program = fixture.program();
        program.add_class_with_smali(
            FakeProgram::class("com.example.Sub"),
            "com.example.Base$Inner",
            &[],
        );
        program.add_class(FakeProgram::class("com.example.NoSmali"));
        program.add_class(FakeProgram::class("java.lang.Object"));
        program.set_smali("java.lang.Object", ".class public Ljava/lang/Object;\n");

        assert_eq!(
            fixture.index.get_superclass_of_class("com.example.Sub").expect("superclass"),
            "com.example.Base$Inner"
        );
        assert!(matches!(
            fixture.index.get_superclass_of_class("com.example.NoSmali"),
            Err(QueryError::NoResultsFound(_))
        ));
        assert_eq!(
            fixture.index.get_superclass_of_class("java.lang.Object").err(),
            Some(QueryError::NoResultsFound(
                "No superclass found for class: java.lang.Object".to_string()
            ))
        );
    }

    #[test]
    fn subclass_scan_sees_classes_added_during_session() {
        let fixture = Fixture::new(Vec::new());
        fixture.init();
        let program = fixture.program();
        program.add_class_with_smali(
            FakeProgram::class("com.example.Base"),
            "java.lang.Object",
            &[],
        );

        assert!(matches!(
            fixture.index.get_subclasses_of_class("com.example.Base"),
            Err(QueryError::NoResultsFound(_))
        ));

        program.add_class_with_smali(
            FakeProgram::class("com.example.Child"),
            "com.example.Base",
            &[],
        );
        program.add_class_with_smali(
            FakeProgram::class("com.example.BaseX"),
            "com.example.BaseX2",
            &[],
        );

        assert_eq!(
            fixture.index.get_subclasses_of_class("com.example.Base").expect("subclasses"),
            vec!["com.example.Child"]
        );
        assert_eq!(
            fixture.index.get_subclasses_of_class("com.example.Missing").err(),
            Some(QueryError::ClassNotFound("com.example.Missing".to_string()))
        );
    }

    #[test]
    fn implementations_do_not_require_interface_in_session() {
        let fixture = Fixture::new(Vec::new());
        fixture.init();
        let program = fixture.program();
        program.add_class_with_smali(
            FakeProgram::class("com.example.Task"),
            "java.lang.Object",
            &["java.lang.Runnable", "java.io.Closeable"],
        );
        program.add_class_with_smali(
            FakeProgram::class("com.example.Other"),
            "java.lang.Object",
            &[],
        );

        assert_eq!(
            fixture
                .index
                .get_implementations_of_interface("java.lang.Runnable")
                .expect("implementations"),
            vec!["com.example.Task"]
        );
        assert!(matches!(
            fixture.index.get_implementations_of_interface("java.util.List"),
            Err(QueryError::NoResultsFound(_))
        ));
    }

    #[test]
    fn smali_of_method_selects_blocks_by_name_or_signature() {
        let fixture = Fixture::new(vec![foo_class()]);
        fixture.init();
        fixture.program().set_smali(
            "com.example.Foo",
            ".class public Lcom/example/Foo;\n.super Ljava/lang/Object;\n\n.method public bar(I)V\n    return\n.end method\n\n.method public bar(Ljava/lang/String;I)V\n    return\n.end method\n",
        );
        let index = &fixture.index;

        let both = index.get_smali_of_method("com.example.Foo", "bar").expect("both");
        let one = index
            .get_smali_of_method("com.example.Foo", "bar(Ljava/lang/String;I)V")
            .expect("one");

        assert_eq!(both.matches(".method").count(), 2);
        assert_eq!(one, ".method public bar(Ljava/lang/String;I)V\n    return\n.end method");
        assert!(matches!(
            index.get_smali_of_method("com.example.Foo", "baz"),
            Err(QueryError::MethodNotFound { .. })
        ));
    }

    #[test]
    fn xrefs_list_each_call_site() {
        let fixture = Fixture::new(vec![foo_class()]);
        fixture.init();
        let program = fixture.program();
        program.add_usage("com.example.Foo", "bar", "com.example.App", "main");
        program.add_usage("com.example.Foo", "bar", "com.example.App", "main");
        let index = &fixture.index;

        let all = index.find_xref_of_method("com.example.Foo", "bar").expect("xrefs");
        let exact = index
            .find_xref_of_method("com.example.Foo", "bar(I)V")
            .expect("exact xrefs");

        // Two sites recorded on each of the two overloads.
        assert_eq!(all.len(), 4);
        assert!(all.iter().all(|entry| entry == "com.example.App.main"));
        assert_eq!(exact.len(), 2);
        assert!(matches!(
            index.find_xref_of_method("com.example.Foo", "items"),
            Err(QueryError::NoResultsFound(_))
        ));
        assert!(matches!(
            index.find_xref_of_method("com.example.Foo", "missing"),
            Err(QueryError::MethodNotFound { .. })
        ));
    }
}
