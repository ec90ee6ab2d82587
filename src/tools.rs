//! Static tool registry shared by the MCP server and the `query` subcommand.

use std::path::Path;

use opentelemetry::KeyValue;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};

use crate::error::QueryError;
use crate::index::CodeIndex;
use crate::response::Envelope;
use crate::telemetry::with_span;

/// A string argument accepted by a tool.
pub(crate) struct ParamSpec {
    pub(crate) name: &'static str,
    pub(crate) description: &'static str,
}

pub(crate) struct ToolSpec {
    pub(crate) name: &'static str,
    pub(crate) description: &'static str,
    pub(crate) params: &'static [ParamSpec],
    handler: fn(&CodeIndex, Value) -> Envelope,
}

const CLASS_NAME: ParamSpec = ParamSpec {
    name: "class_name",
    description: "Fully qualified class name, e.g. com.example.Foo",
};

const METHOD_NAME: ParamSpec = ParamSpec {
    name: "method_name",
    description: "Simple method name, or name plus JVM descriptor such as bar(I)V",
};

pub(crate) static TOOLS: &[ToolSpec] = &[
    ToolSpec {
        name: "init_session",
        description: "Load an archive and make it the active session, replacing any previous one.",
        params: &[
            ParamSpec {
                name: "input_path",
                description: "Path to the .jar, .zip or .class file to load",
            },
            ParamSpec {
                name: "output_path",
                description: "Directory for decompiler output; created if missing",
            },
        ],
        handler: init_session,
    },
    ToolSpec {
        name: "close_session",
        description: "Close the active session.",
        params: &[],
        handler: close_session,
    },
    ToolSpec {
        name: "get_class_code",
        description: "Decompiled source of a class.",
        params: &[CLASS_NAME],
        handler: get_class_code,
    },
    ToolSpec {
        name: "get_method_code",
        description: "Decompiled source of the method matching a JVM signature.",
        params: &[
            CLASS_NAME,
            ParamSpec {
                name: "method_signature",
                description: "Method name plus descriptor, e.g. test2(Ljava/lang/String;)V",
            },
        ],
        handler: get_method_code,
    },
    ToolSpec {
        name: "get_all_classes",
        description: "Fully qualified names of every class in the session.",
        params: &[],
        handler: get_all_classes,
    },
    ToolSpec {
        name: "search_method_by_name",
        description: "Find methods by simple name across all classes.",
        params: &[ParamSpec {
            name: "method_name",
            description: "Simple method name to search for",
        }],
        handler: search_method_by_name,
    },
    ToolSpec {
        name: "get_methods_of_class",
        description: "Qualified names of the methods declared by a class.",
        params: &[CLASS_NAME],
        handler: get_methods_of_class,
    },
    ToolSpec {
        name: "get_fields_of_class",
        description: "Qualified names of the fields declared by a class.",
        params: &[CLASS_NAME],
        handler: get_fields_of_class,
    },
    ToolSpec {
        name: "get_smali_of_class",
        description: "Smali-style disassembly of a class.",
        params: &[CLASS_NAME],
        handler: get_smali_of_class,
    },
    ToolSpec {
        name: "get_smali_of_method",
        description: "Smali-style disassembly of one method or all its overloads.",
        params: &[CLASS_NAME, METHOD_NAME],
        handler: get_smali_of_method,
    },
    ToolSpec {
        name: "get_superclass_of_class",
        description: "Direct superclass of a class.",
        params: &[CLASS_NAME],
        handler: get_superclass_of_class,
    },
    ToolSpec {
        name: "get_subclasses_of_class",
        description: "Classes that directly extend a class.",
        params: &[CLASS_NAME],
        handler: get_subclasses_of_class,
    },
    ToolSpec {
        name: "get_implementation_of_interface",
        description: "Classes that directly implement an interface.",
        params: &[ParamSpec {
            name: "interface_name",
            description: "Fully qualified interface name, e.g. java.lang.Runnable",
        }],
        handler: get_implementation_of_interface,
    },
    ToolSpec {
        name: "find_xref_of_method",
        description: "Methods that call the given method, one entry per call site.",
        params: &[CLASS_NAME, METHOD_NAME],
        handler: find_xref_of_method,
    },
];

pub(crate) fn find_tool(name: &str) -> Option<&'static ToolSpec> {
    TOOLS.iter().find(|tool| tool.name == name)
}

impl ToolSpec {
    /// JSON Schema for the tool's arguments object.
    pub(crate) fn input_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .params
            .iter()
            .map(|param| {
                (
                    param.name.to_string(),
                    json!({"type": "string", "description": param.description}),
                )
            })
            .collect();
        let required: Vec<&str> = self.params.iter().map(|param| param.name).collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        })
    }

    /// Run the tool inside a `tool:<name>` span.
    pub(crate) fn call(&self, index: &CodeIndex, args: Value) -> Envelope {
        let span_name = format!("tool:{}", self.name);
        let attributes = [KeyValue::new("classquery.tool", self.name)];
        let envelope = with_span(index.telemetry(), &span_name, &attributes, || {
            (self.handler)(index, args)
        });
        if !envelope.success {
            tracing::warn!(
                tool = self.name,
                error = envelope.error.as_deref().unwrap_or_default(),
                "tool failed"
            );
        }
        envelope
    }
}

fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T, QueryError> {
    let args = if args.is_null() { json!({}) } else { args };
    serde_path_to_error::deserialize(args).map_err(|err| {
        let path = err.path().to_string();
        if path == "." {
            QueryError::InvalidInput(err.inner().to_string())
        } else {
            QueryError::InvalidInput(format!("{path}: {}", err.inner()))
        }
    })
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct NoArgs {}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct InitArgs {
    input_path: String,
    output_path: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ClassArgs {
    class_name: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct MethodCodeArgs {
    class_name: String,
    method_signature: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct MethodNameArgs {
    method_name: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ClassMethodArgs {
    class_name: String,
    method_name: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct InterfaceArgs {
    interface_name: String,
}

fn init_session(index: &CodeIndex, args: Value) -> Envelope {
    Envelope::from_result(parse_args::<InitArgs>(args).and_then(|args| {
        index.init_session(Path::new(&args.input_path), Path::new(&args.output_path))
    }))
}

fn close_session(index: &CodeIndex, args: Value) -> Envelope {
    Envelope::from_result(
        parse_args::<NoArgs>(args)
            .and_then(|_| index.close_session())
            .map(|()| "session closed"),
    )
}

fn get_class_code(index: &CodeIndex, args: Value) -> Envelope {
    Envelope::from_result(
        parse_args::<ClassArgs>(args).and_then(|args| index.get_class_code(&args.class_name)),
    )
}

fn get_method_code(index: &CodeIndex, args: Value) -> Envelope {
    Envelope::from_result(parse_args::<MethodCodeArgs>(args).and_then(|args| {
        index.get_method_code(&args.class_name, &args.method_signature)
    }))
}

fn get_all_classes(index: &CodeIndex, args: Value) -> Envelope {
    Envelope::from_result(parse_args::<NoArgs>(args).and_then(|_| index.get_all_classes()))
}

fn search_method_by_name(index: &CodeIndex, args: Value) -> Envelope {
    Envelope::from_result(
        parse_args::<MethodNameArgs>(args)
            .and_then(|args| index.search_method_by_name(&args.method_name)),
    )
}

fn get_methods_of_class(index: &CodeIndex, args: Value) -> Envelope {
    Envelope::from_result(
        parse_args::<ClassArgs>(args).and_then(|args| index.get_methods_of_class(&args.class_name)),
    )
}

fn get_fields_of_class(index: &CodeIndex, args: Value) -> Envelope {
    Envelope::from_result(
        parse_args::<ClassArgs>(args).and_then(|args| index.get_fields_of_class(&args.class_name)),
    )
}

fn get_smali_of_class(index: &CodeIndex, args: Value) -> Envelope {
    Envelope::from_result(
        parse_args::<ClassArgs>(args).and_then(|args| index.get_smali_of_class(&args.class_name)),
    )
}

fn get_smali_of_method(index: &CodeIndex, args: Value) -> Envelope {
    Envelope::from_result(parse_args::<ClassMethodArgs>(args).and_then(|args| {
        index.get_smali_of_method(&args.class_name, &args.method_name)
    }))
}

fn get_superclass_of_class(index: &CodeIndex, args: Value) -> Envelope {
    Envelope::from_result(
        parse_args::<ClassArgs>(args)
            .and_then(|args| index.get_superclass_of_class(&args.class_name)),
    )
}

fn get_subclasses_of_class(index: &CodeIndex, args: Value) -> Envelope {
    Envelope::from_result(
        parse_args::<ClassArgs>(args)
            .and_then(|args| index.get_subclasses_of_class(&args.class_name)),
    )
}

fn get_implementation_of_interface(index: &CodeIndex, args: Value) -> Envelope {
    Envelope::from_result(
        parse_args::<InterfaceArgs>(args)
            .and_then(|args| index.get_implementations_of_interface(&args.interface_name)),
    )
}

fn find_xref_of_method(index: &CodeIndex, args: Value) -> Envelope {
    Envelope::from_result(parse_args::<ClassMethodArgs>(args).and_then(|args| {
        index.find_xref_of_method(&args.class_name, &args.method_name)
    }))
}
